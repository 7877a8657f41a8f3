use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Numeric codes carried in the `code` field of every reply.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub enum ErrorCode {
    Success,
    ParamError,
    ParamRequired,
    ParamInvalid,
    TitleDuplicate,
    ArticleHasChildren,
    ArticleNotExist,
    ResourceNotFound,
    ResourceExisted,
    UploadNotFound,
    UploadTooLarge,
    SystemError,
    DatabaseError,
    NetworkError,
}

impl ErrorCode {
    pub const fn code(self) -> u32 {
        match self {
            Self::Success => 200,
            Self::ParamError => 400,
            Self::ParamRequired => 401,
            Self::ParamInvalid => 402,
            Self::TitleDuplicate => 4003,
            Self::ArticleHasChildren => 4004,
            Self::ArticleNotExist => 4005,
            Self::ResourceNotFound => 404,
            Self::ResourceExisted => 409,
            Self::UploadNotFound => 410,
            Self::UploadTooLarge => 411,
            Self::SystemError => 500,
            Self::DatabaseError => 5001,
            Self::NetworkError => 5002,
        }
    }

    /// Message-catalog key for the default text of this code.
    pub const fn message_key(self) -> &'static str {
        match self {
            Self::Success => "code.success",
            Self::ParamError => "code.param_error",
            Self::ParamRequired => "code.param_required",
            Self::ParamInvalid => "code.param_invalid",
            Self::TitleDuplicate => "code.title_duplicate",
            Self::ArticleHasChildren => "code.article_has_children",
            Self::ArticleNotExist => "code.article_not_exist",
            Self::ResourceNotFound => "code.resource_not_found",
            Self::ResourceExisted => "code.resource_existed",
            Self::UploadNotFound => "code.upload_not_found",
            Self::UploadTooLarge => "code.upload_too_large",
            Self::SystemError => "code.system_error",
            Self::DatabaseError => "code.database_error",
            Self::NetworkError => "code.network_error",
        }
    }
}

#[derive(Debug, Error)]
pub enum KbError {
    /// Bad or missing input. The message names the first offending field.
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Duplicate(String),

    /// Entity absent or soft-deleted.
    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    #[error("article {0} has children and cannot be deleted")]
    HasChildren(String),

    #[error("file exceeds the {limit_mb}MB upload limit")]
    UploadTooLarge { limit_mb: u64 },

    #[error("{0}")]
    UploadMissing(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("storage failure: {0:#}")]
    Storage(anyhow::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type KbResult<T> = std::result::Result<T, KbError>;

impl KbError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(what: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            what,
            id: id.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) => ErrorCode::ParamError,
            Self::Duplicate(_) => ErrorCode::TitleDuplicate,
            Self::NotFound { what: "article", .. } => ErrorCode::ArticleNotExist,
            Self::NotFound { .. } => ErrorCode::ResourceNotFound,
            Self::HasChildren(_) => ErrorCode::ArticleHasChildren,
            Self::UploadTooLarge { .. } => ErrorCode::UploadTooLarge,
            Self::UploadMissing(_) => ErrorCode::UploadNotFound,
            Self::Upstream(_) => ErrorCode::NetworkError,
            Self::Storage(_) => ErrorCode::DatabaseError,
            Self::Internal(_) => ErrorCode::SystemError,
        }
    }

    /// Whether the message is safe and useful to show as the reply's `msg`.
    /// Storage and internal failures show the catalog text and attach the
    /// diagnostic as `data` instead.
    pub fn is_user_facing(&self) -> bool {
        !matches!(self, Self::Storage(_) | Self::Internal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn article_not_found_uses_dedicated_code() {
        assert_eq!(
            KbError::not_found("article", "art_1").code(),
            ErrorCode::ArticleNotExist
        );
        assert_eq!(
            KbError::not_found("tag", "tag_1").code(),
            ErrorCode::ResourceNotFound
        );
    }

    #[test]
    fn storage_errors_are_not_user_facing() {
        let err = KbError::Storage(anyhow::anyhow!("disk I/O error"));
        assert_eq!(err.code().code(), 5001);
        assert!(!err.is_user_facing());
        assert!(KbError::validation("title is required").is_user_facing());
    }
}
