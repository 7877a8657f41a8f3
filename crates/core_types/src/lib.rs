pub mod ai;
pub mod anthology;
pub mod article;
pub mod asset;
pub mod error;
pub mod ids;
pub mod taxonomy;

use serde::{Deserialize, Serialize};

pub use ai::{
    AiConfig, AiModel, AiProvider, ChatEvent, ChatEventStream, ChatRole, ChatStreamRequest,
    ChatTurn, ModelKind, ProviderAdapter, ProviderKind, UpstreamEndpoint,
};
pub use anthology::Anthology;
pub use article::{Article, ArticleRef};
pub use asset::{Asset, FileType, format_size};
pub use error::{ErrorCode, KbError, KbResult};
pub use taxonomy::{Category, Tag};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UiLanguage {
    ZhCn,
    EnUs,
}

/// Row state. Deleted rows stay in the table and are filtered out by every query.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    #[default]
    Active,
    Deleted,
}

impl Lifecycle {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Deleted => "deleted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }

    pub fn is_active(self) -> bool {
        self == Self::Active
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    #[default]
    Public,
    Private,
}

impl Permission {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "public" => Some(Self::Public),
            "private" => Some(Self::Private),
            _ => None,
        }
    }
}

/// The user a request acts on behalf of. Resolved once per request and passed
/// explicitly to every service call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity(String);

impl Identity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self(user_id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Uniform reply body: `{code, msg, data}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub code: u32,
    pub msg: String,
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    pub fn success(msg: impl Into<String>, data: Option<T>) -> Self {
        Self {
            code: ErrorCode::Success.code(),
            msg: msg.into(),
            data,
        }
    }

    pub fn failure(code: ErrorCode, msg: impl Into<String>, data: Option<T>) -> Self {
        Self {
            code: code.code(),
            msg: msg.into(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_round_trips_through_text() {
        for state in [Lifecycle::Active, Lifecycle::Deleted] {
            assert_eq!(Lifecycle::parse(state.as_str()), Some(state));
        }
        assert_eq!(Lifecycle::parse("valid"), None);
    }

    #[test]
    fn envelope_serializes_null_data() {
        let envelope: Envelope<()> = Envelope::failure(ErrorCode::ResourceNotFound, "gone", None);
        let json = serde_json::to_value(&envelope).expect("json");
        assert_eq!(json["code"], 404);
        assert_eq!(json["msg"], "gone");
        assert!(json["data"].is_null());
    }
}
