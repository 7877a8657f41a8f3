use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use core_types::{ArticleRef, Asset, FileType, Identity, KbError, KbResult, format_size, ids};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use storage_sqlite::{AssetFilter, NewAsset};

use crate::{KnowledgeBase, StorageResultExt, nullable_id, required_text};

const NAME_MAX_CHARS: usize = 255;
const MAX_PAGE_SIZE: u32 = 100;

/// Where uploaded bytes live. Paths are relative, `/`-separated and never
/// escape the store.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<()>;
    /// `None` when nothing is stored at `path`.
    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>>;
    async fn remove(&self, path: &str) -> Result<()>;
}

/// Blob store over a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = relative_blob_path(path)
            .with_context(|| format!("blob path escapes the upload directory: {path}"))?;
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let target = self.resolve(path)?;
        if let Some(dir) = target.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        tokio::fs::write(&target, bytes)
            .await
            .with_context(|| format!("failed to write {}", target.display()))
    }

    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let target = self.resolve(path)?;
        match tokio::fs::read(&target).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("failed to read {}", target.display())),
        }
    }

    async fn remove(&self, path: &str) -> Result<()> {
        let target = self.resolve(path)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("failed to remove {}", target.display())),
        }
    }
}

/// Accepts only plain relative paths.
fn relative_blob_path(path: &str) -> Option<PathBuf> {
    let path = Path::new(path);
    if path.as_os_str().is_empty() {
        return None;
    }
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    (!clean.as_os_str().is_empty()).then_some(clean)
}

/// One multipart `file` field, fully buffered.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// How assets are shown to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetView {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub file_type: FileType,
    pub size: String,
    pub download_url: String,
    /// Upload time, `YYYY-MM-DD HH:MM:SS`.
    pub date: String,
    pub linked: bool,
    pub source_article: Option<ArticleRef>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    #[serde(flatten)]
    pub asset: AssetView,
    /// True when identical content was already stored; the existing asset is returned.
    pub duplicate: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TypeStats {
    pub count: i64,
    pub total_bytes: i64,
    pub formatted_size: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetListing {
    pub list: Vec<AssetView>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
    pub has_more: bool,
    /// Every file type, in a fixed order, over all of the uploader's assets.
    pub stats: IndexMap<FileType, TypeStats>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssetQuery {
    pub page: Option<u32>,
    #[serde(alias = "pageSize")]
    pub page_size: Option<u32>,
    #[serde(rename = "type")]
    pub file_type: Option<String>,
    #[serde(alias = "searchQuery")]
    pub search_query: Option<String>,
    pub linked: Option<bool>,
}

/// Registers a file that is already in the upload directory.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssetRecordInput {
    pub id: Option<String>,
    pub name: Option<String>,
    pub original_name: Option<String>,
    pub file_type: Option<String>,
    pub file_size: Option<i64>,
    pub file_path: Option<String>,
    pub file_extension: Option<String>,
    pub mime_type: Option<String>,
    pub file_hash: Option<String>,
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssetUpdateInput {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "nullable_id")]
    pub linked_article_id: Option<Option<String>>,
}

impl KnowledgeBase {
    /// Stores an uploaded file, or returns the existing asset when the same
    /// bytes were uploaded before.
    pub async fn upload_asset(
        &self,
        identity: &Identity,
        file: UploadedFile,
    ) -> KbResult<UploadOutcome> {
        let file_name = file.file_name.trim().to_string();
        if file_name.is_empty() {
            return Err(KbError::UploadMissing("no file was uploaded".to_string()));
        }
        if file.bytes.len() as u64 > self.max_upload_bytes {
            return Err(KbError::UploadTooLarge {
                limit_mb: self.max_upload_bytes / (1024 * 1024),
            });
        }

        let uploader = identity.as_str();
        let file_hash = hex::encode(Sha256::digest(&file.bytes));
        if let Some(existing) = self
            .storage
            .find_asset_by_hash(uploader, &file_hash)
            .await
            .storage()?
        {
            tracing::debug!(asset = %existing.id, hash = %file_hash, "upload matched existing content");
            return Ok(UploadOutcome {
                asset: self.asset_view(existing).await?,
                duplicate: true,
            });
        }

        let file_extension = Path::new(&file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
            .unwrap_or_default();
        let file_type = FileType::from_extension(&file_extension);
        let id = ids::generate(ids::ASSET);
        let mime_type = mime_guess::from_path(&file_name)
            .first_or_octet_stream()
            .to_string();

        // Same bytes from another uploader share the stored blob.
        let shared = self.storage.find_blob_by_hash(&file_hash).await.storage()?;
        let wrote_blob = shared.is_none();
        let file_path = match shared {
            Some(path) => {
                tracing::debug!(hash = %file_hash, path = %path, "upload reuses stored blob");
                path
            }
            None => {
                let path = format!("{}/{id}{file_extension}", file_type.as_str());
                self.blobs.put(&path, &file.bytes).await?;
                path
            }
        };
        let inserted = self
            .storage
            .insert_asset(
                uploader,
                NewAsset {
                    id: Some(id),
                    name: file_name.clone(),
                    original_name: file_name,
                    file_type,
                    file_size: file.bytes.len() as i64,
                    file_path: file_path.clone(),
                    file_extension,
                    mime_type,
                    linked_article_id: None,
                    file_hash,
                    metadata: Map::new(),
                },
            )
            .await
            .storage();
        let asset = match inserted {
            Ok(asset) => asset,
            Err(err) => {
                if !wrote_blob {
                    return Err(err);
                }
                if let Err(cleanup) = self.blobs.remove(&file_path).await {
                    tracing::warn!(path = %file_path, error = %cleanup, "failed to remove orphaned upload");
                }
                return Err(err);
            }
        };
        tracing::info!(asset = %asset.id, size = asset.file_size, kind = asset.file_type.as_str(), "asset uploaded");

        Ok(UploadOutcome {
            asset: self.asset_view(asset).await?,
            duplicate: false,
        })
    }

    pub async fn create_asset_record(
        &self,
        identity: &Identity,
        input: AssetRecordInput,
    ) -> KbResult<AssetView> {
        let name = required_text("name", input.name.as_deref(), NAME_MAX_CHARS)?;
        let file_type = input
            .file_type
            .as_deref()
            .map(str::trim)
            .filter(|kind| !kind.is_empty())
            .ok_or_else(|| KbError::validation("file_type is required"))?;
        let file_type = FileType::parse(file_type)
            .ok_or_else(|| KbError::validation(format!("file_type is not recognised: {file_type}")))?;
        let file_size = input
            .file_size
            .filter(|size| *size > 0)
            .ok_or_else(|| KbError::validation("file_size must be a positive integer"))?;
        let file_path = input
            .file_path
            .map(|path| path.trim().to_string())
            .filter(|path| !path.is_empty())
            .ok_or_else(|| KbError::validation("file_path is required"))?;
        if relative_blob_path(&file_path).is_none() {
            return Err(KbError::validation(
                "file_path must be relative to the upload directory",
            ));
        }

        let mime_type = input
            .mime_type
            .filter(|mime| !mime.trim().is_empty())
            .unwrap_or_else(|| mime_guess::from_path(&name).first_or_octet_stream().to_string());
        let asset = self
            .storage
            .insert_asset(
                identity.as_str(),
                NewAsset {
                    id: input.id.filter(|id| !id.trim().is_empty()),
                    original_name: input.original_name.unwrap_or_else(|| name.clone()),
                    name,
                    file_type,
                    file_size,
                    file_path,
                    file_extension: input.file_extension.unwrap_or_default(),
                    mime_type,
                    linked_article_id: None,
                    file_hash: input.file_hash.unwrap_or_default(),
                    metadata: input.metadata.unwrap_or_default(),
                },
            )
            .await
            .unique(|| "an asset with this id already exists".to_string())?;
        self.asset_view(asset).await
    }

    pub async fn update_asset(
        &self,
        identity: &Identity,
        id: &str,
        input: AssetUpdateInput,
    ) -> KbResult<AssetView> {
        let name = input
            .name
            .as_deref()
            .map(|name| required_text("name", Some(name), NAME_MAX_CHARS))
            .transpose()?;
        if let Some(Some(article_id)) = &input.linked_article_id {
            self.storage
                .get_article(article_id)
                .await
                .storage()?
                .ok_or_else(|| KbError::not_found("article", article_id.as_str()))?;
        }

        let asset = self
            .storage
            .update_asset(identity.as_str(), id, name, input.linked_article_id)
            .await
            .storage()?
            .ok_or_else(|| KbError::not_found("asset", id))?;
        self.asset_view(asset).await
    }

    /// Marks the asset deleted. The stored bytes stay where they are.
    pub async fn delete_asset(&self, identity: &Identity, id: &str) -> KbResult<()> {
        if self
            .storage
            .soft_delete_asset(identity.as_str(), id)
            .await
            .storage()?
        {
            Ok(())
        } else {
            Err(KbError::not_found("asset", id))
        }
    }

    pub async fn list_assets(&self, identity: &Identity, query: AssetQuery) -> KbResult<AssetListing> {
        let uploader = identity.as_str();
        let file_type = match query.file_type.as_deref().map(str::trim) {
            None | Some("") | Some("all") => None,
            Some(kind) => Some(
                FileType::parse(kind)
                    .ok_or_else(|| KbError::validation(format!("type is not recognised: {kind}")))?,
            ),
        };
        let filter = AssetFilter {
            file_type,
            search: query
                .search_query
                .map(|search| search.trim().to_string())
                .filter(|search| !search.is_empty()),
            linked: query.linked,
            page: query.page.unwrap_or(1).max(1),
            page_size: query.page_size.unwrap_or(20).clamp(1, MAX_PAGE_SIZE),
        };

        let page = self.storage.list_assets(uploader, &filter).await.storage()?;
        let mut list = Vec::with_capacity(page.items.len());
        for asset in page.items {
            list.push(self.asset_view(asset).await?);
        }

        let mut stats: IndexMap<FileType, TypeStats> = FileType::ALL
            .into_iter()
            .map(|kind| {
                (
                    kind,
                    TypeStats {
                        count: 0,
                        total_bytes: 0,
                        formatted_size: format_size(0),
                    },
                )
            })
            .collect();
        for row in self.storage.asset_type_stats(uploader).await.storage()? {
            stats.insert(
                row.file_type,
                TypeStats {
                    count: row.count,
                    total_bytes: row.total_bytes,
                    formatted_size: format_size(row.total_bytes.max(0) as u64),
                },
            );
        }

        let seen = u64::from(filter.page) * u64::from(filter.page_size);
        Ok(AssetListing {
            list,
            total: page.total,
            page: filter.page,
            page_size: filter.page_size,
            has_more: seen < page.total.max(0) as u64,
            stats,
        })
    }

    /// The asset record and its full contents. Only the uploader can fetch it.
    pub async fn download_asset(&self, identity: &Identity, id: &str) -> KbResult<(Asset, Vec<u8>)> {
        let asset = self
            .storage
            .get_uploaded_asset(identity.as_str(), id)
            .await
            .storage()?
            .ok_or_else(|| KbError::not_found("asset", id))?;
        match self.blobs.read(&asset.file_path).await {
            Ok(Some(bytes)) => Ok((asset, bytes)),
            Ok(None) => Err(KbError::UploadMissing(format!(
                "file for asset {id} is missing from storage"
            ))),
            Err(err) => {
                tracing::warn!(asset = %id, path = %asset.file_path, error = %err, "failed to read asset");
                Err(KbError::Internal(err))
            }
        }
    }

    async fn asset_view(&self, asset: Asset) -> KbResult<AssetView> {
        let source_article = match &asset.linked_article_id {
            Some(article_id) => self
                .storage
                .get_article(article_id)
                .await
                .storage()?
                .map(|article| ArticleRef::from(&article)),
            None => None,
        };
        Ok(AssetView {
            size: asset.formatted_size(),
            download_url: asset.download_url(),
            date: asset.upload_time.format("%Y-%m-%d %H:%M:%S").to_string(),
            id: asset.id,
            name: asset.name,
            file_type: asset.file_type,
            linked: asset.is_linked,
            source_article,
        })
    }
}
