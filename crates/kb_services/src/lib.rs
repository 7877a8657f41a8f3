pub mod anthology;
pub mod article;
pub mod asset;
pub mod category;
pub mod chat;
pub mod reorder;
pub mod settings;
pub mod tag;
pub mod tree;

use std::sync::Arc;

use core_types::asset::MAX_UPLOAD_BYTES;
use core_types::{KbError, KbResult, ProviderAdapter};
use serde::{Deserialize, Deserializer};
use storage_sqlite::SqliteStorage;

pub use asset::{BlobStore, LocalBlobStore};
pub use chat::ChatOptions;

/// Service layer over the stores: validation, uniqueness, derived fields
/// and the chat relay. Every operation takes the acting identity explicitly.
pub struct KnowledgeBase {
    storage: SqliteStorage,
    blobs: Arc<dyn BlobStore>,
    provider: Arc<dyn ProviderAdapter>,
    chat: ChatOptions,
    max_upload_bytes: u64,
}

impl KnowledgeBase {
    pub fn new(
        storage: SqliteStorage,
        blobs: Arc<dyn BlobStore>,
        provider: Arc<dyn ProviderAdapter>,
    ) -> Self {
        Self {
            storage,
            blobs,
            provider,
            chat: ChatOptions::default(),
            max_upload_bytes: MAX_UPLOAD_BYTES,
        }
    }

    pub fn with_chat_options(mut self, chat: ChatOptions) -> Self {
        self.chat = chat;
        self
    }

    pub fn with_max_upload_bytes(mut self, max_upload_bytes: u64) -> Self {
        self.max_upload_bytes = max_upload_bytes.max(1);
        self
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }
}

/// Classifies store failures. Store code reports plain `anyhow` errors; only
/// a unique-index violation has a domain meaning.
pub(crate) trait StorageResultExt<T> {
    fn storage(self) -> KbResult<T>;
    fn unique(self, duplicate: impl FnOnce() -> String) -> KbResult<T>;
}

impl<T> StorageResultExt<T> for anyhow::Result<T> {
    fn storage(self) -> KbResult<T> {
        self.map_err(KbError::Storage)
    }

    fn unique(self, duplicate: impl FnOnce() -> String) -> KbResult<T> {
        self.map_err(|err| {
            if storage_sqlite::is_unique_violation(&err) {
                KbError::Duplicate(duplicate())
            } else {
                KbError::Storage(err)
            }
        })
    }
}

/// Trims `value` and checks it is non-empty and at most `max` characters.
pub(crate) fn required_text(field: &str, value: Option<&str>, max: usize) -> KbResult<String> {
    let value = value.map(str::trim).unwrap_or_default();
    if value.is_empty() {
        return Err(KbError::validation(format!("{field} is required")));
    }
    bounded_text(field, value, max)
}

pub(crate) fn bounded_text(field: &str, value: &str, max: usize) -> KbResult<String> {
    let value = value.trim();
    if value.chars().count() > max {
        return Err(KbError::validation(format!(
            "{field} must be at most {max} characters"
        )));
    }
    Ok(value.to_string())
}

/// Deserializes an id link that may be absent (`None`), cleared with `null`
/// or `""` (`Some(None)`), or set (`Some(Some(_))`). Use with `#[serde(default)]`.
pub(crate) fn nullable_id<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer)
        .map(|value| Some(value.filter(|id| !id.trim().is_empty())))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use anyhow::Result;
    use async_trait::async_trait;
    use core_types::{
        ChatEvent, ChatEventStream, ChatStreamRequest, Identity, ProviderAdapter, UpstreamEndpoint,
    };
    use futures::StreamExt;
    use storage_sqlite::SqliteStorage;
    use tokio::sync::Mutex;

    use super::*;

    /// Replays a fixed event script and records what it was asked.
    #[derive(Default)]
    pub struct ScriptedProvider {
        pub script: Vec<ChatEvent>,
        pub seen: Mutex<Vec<(UpstreamEndpoint, ChatStreamRequest)>>,
        /// Stall after the script instead of ending the stream.
        pub hold_open: bool,
        /// Set once the event stream handed out has been dropped.
        pub released: Arc<AtomicBool>,
    }

    struct ReleaseFlag(Arc<AtomicBool>);

    impl Drop for ReleaseFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ProviderAdapter for ScriptedProvider {
        async fn stream_chat(
            &self,
            endpoint: &UpstreamEndpoint,
            request: ChatStreamRequest,
        ) -> Result<ChatEventStream> {
            self.seen.lock().await.push((endpoint.clone(), request));
            let guard = ReleaseFlag(self.released.clone());
            let scripted = futures::stream::iter(self.script.clone());
            let events: ChatEventStream = if self.hold_open {
                Box::pin(scripted.chain(futures::stream::pending()))
            } else {
                Box::pin(scripted)
            };
            Ok(Box::pin(events.map(move |event| {
                let _held = &guard;
                event
            })))
        }
    }

    pub struct Fixture {
        pub kb: KnowledgeBase,
        pub upload_dir: tempfile::TempDir,
        pub provider: Arc<ScriptedProvider>,
    }

    pub async fn fixture() -> Fixture {
        fixture_with(ScriptedProvider::default()).await
    }

    pub async fn fixture_with(provider: ScriptedProvider) -> Fixture {
        let storage = SqliteStorage::in_memory().await.expect("storage");
        let upload_dir = tempfile::tempdir().expect("tempdir");
        let provider = Arc::new(provider);
        let kb = KnowledgeBase::new(
            storage,
            Arc::new(LocalBlobStore::new(upload_dir.path())),
            provider.clone(),
        );
        Fixture {
            kb,
            upload_dir,
            provider,
        }
    }

    pub fn alice() -> Identity {
        Identity::new("alice")
    }

    pub fn bob() -> Identity {
        Identity::new("bob")
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Deserialize)]
    struct Patch {
        #[serde(default, deserialize_with = "nullable_id")]
        link: Option<Option<String>>,
    }

    #[test]
    fn distinguishes_absent_null_and_empty() {
        let absent: Patch = serde_json::from_str("{}").expect("json");
        assert_eq!(absent.link, None);

        let cleared: Patch = serde_json::from_str(r#"{"link":""}"#).expect("json");
        assert_eq!(cleared.link, Some(None));

        let nulled: Patch = serde_json::from_str(r#"{"link":null}"#).expect("json");
        assert_eq!(nulled.link, Some(None));

        let set: Patch = serde_json::from_str(r#"{"link":"art_1"}"#).expect("json");
        assert_eq!(set.link, Some(Some("art_1".to_string())));
    }

    #[test]
    fn text_bounds_count_characters() {
        assert_eq!(
            required_text("title", Some("  知识库  "), 3).expect("ok"),
            "知识库"
        );
        assert!(required_text("title", Some("   "), 3).is_err());
        assert!(required_text("title", None, 3).is_err());
        assert!(bounded_text("name", "四个汉字", 3).is_err());
    }
}
