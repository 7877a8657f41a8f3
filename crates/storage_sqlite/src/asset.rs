use anyhow::{Context, Result};
use chrono::Utc;
use core_types::{Asset, FileType, ids};
use serde_json::{Map, Value};
use sqlx::{QueryBuilder, Row, Sqlite};

use crate::{SqliteStorage, parse_lifecycle, parse_rfc3339, timestamp};

const ASSET_COLUMNS: &str = "r.id, r.name, r.original_name, r.file_type, r.file_size, r.file_path, \
     r.file_extension, r.mime_type, r.uploader, r.linked_article_id, r.is_linked, r.file_hash, \
     r.metadata_json, r.lifecycle, r.upload_time, r.update_time";

#[derive(Debug, Clone)]
pub struct NewAsset {
    /// Pre-generated so the blob can be written under its final name first.
    pub id: Option<String>,
    pub name: String,
    pub original_name: String,
    pub file_type: FileType,
    pub file_size: i64,
    pub file_path: String,
    pub file_extension: String,
    pub mime_type: String,
    pub linked_article_id: Option<String>,
    pub file_hash: String,
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct AssetFilter {
    pub file_type: Option<FileType>,
    /// Case-insensitive substring of the display or original name.
    pub search: Option<String>,
    pub linked: Option<bool>,
    /// 1-based.
    pub page: u32,
    pub page_size: u32,
}

impl Default for AssetFilter {
    fn default() -> Self {
        Self {
            file_type: None,
            search: None,
            linked: None,
            page: 1,
            page_size: 20,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AssetPage {
    pub items: Vec<Asset>,
    pub total: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetTypeStats {
    pub file_type: FileType,
    pub count: i64,
    pub total_bytes: i64,
}

impl SqliteStorage {
    pub async fn insert_asset(&self, uploader: &str, new: NewAsset) -> Result<Asset> {
        let id = new.id.unwrap_or_else(|| ids::generate(ids::ASSET));
        let now = timestamp(Utc::now());
        let metadata_json =
            serde_json::to_string(&new.metadata).context("failed to encode asset metadata")?;

        sqlx::query(
            r#"
            INSERT INTO assets(id, name, original_name, file_type, file_size, file_path, file_extension,
                               mime_type, uploader, linked_article_id, is_linked, file_hash, metadata_json,
                               upload_time, update_time)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)
            "#,
        )
        .bind(&id)
        .bind(&new.name)
        .bind(&new.original_name)
        .bind(new.file_type.as_str())
        .bind(new.file_size)
        .bind(&new.file_path)
        .bind(&new.file_extension)
        .bind(&new.mime_type)
        .bind(uploader)
        .bind(&new.linked_article_id)
        .bind(new.linked_article_id.is_some())
        .bind(&new.file_hash)
        .bind(metadata_json)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.get_asset(&id)
            .await?
            .with_context(|| format!("asset {id} vanished after insert"))
    }

    pub async fn get_asset(&self, id: &str) -> Result<Option<Asset>> {
        let row = sqlx::query(&format!(
            "SELECT {ASSET_COLUMNS} FROM assets r WHERE r.id = ?1 AND {}",
            active!("r")
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(map_asset_row).transpose()
    }

    /// The uploader's own copy of the asset, if it is still active.
    pub async fn get_uploaded_asset(&self, uploader: &str, id: &str) -> Result<Option<Asset>> {
        Ok(self
            .get_asset(id)
            .await?
            .filter(|asset| asset.uploader == uploader))
    }

    /// Oldest active asset of `uploader` with this content hash.
    pub async fn find_asset_by_hash(&self, uploader: &str, file_hash: &str) -> Result<Option<Asset>> {
        let row = sqlx::query(&format!(
            "SELECT {ASSET_COLUMNS} FROM assets r WHERE r.uploader = ?1 AND r.file_hash = ?2 AND {} \
             ORDER BY r.upload_time ASC LIMIT 1",
            active!("r")
        ))
        .bind(uploader)
        .bind(file_hash)
        .fetch_optional(&self.pool)
        .await?;
        row.map(map_asset_row).transpose()
    }

    /// Stored path of any asset, deleted ones included, whose bytes hash to
    /// `file_hash`. Deleting an asset keeps its blob, so the path stays valid.
    pub async fn find_blob_by_hash(&self, file_hash: &str) -> Result<Option<String>> {
        let path = sqlx::query_scalar::<_, String>(
            "SELECT file_path FROM assets WHERE file_hash = ?1 ORDER BY upload_time ASC LIMIT 1",
        )
        .bind(file_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(path)
    }

    pub async fn list_assets(&self, uploader: &str, filter: &AssetFilter) -> Result<AssetPage> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) AS n FROM assets r WHERE ");
        push_filter(&mut count, uploader, filter);
        let total: i64 = count.build().fetch_one(&self.pool).await?.get("n");

        let page = i64::from(filter.page.max(1));
        let page_size = i64::from(filter.page_size.max(1));
        let mut select = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {ASSET_COLUMNS} FROM assets r WHERE "
        ));
        push_filter(&mut select, uploader, filter);
        select
            .push(" ORDER BY r.upload_time DESC LIMIT ")
            .push_bind(page_size)
            .push(" OFFSET ")
            .push_bind((page - 1) * page_size);

        let items = select
            .build()
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(map_asset_row)
            .collect::<Result<Vec<_>>>()?;
        Ok(AssetPage { items, total })
    }

    /// Count and byte total per file type over all of the uploader's active assets.
    pub async fn asset_type_stats(&self, uploader: &str) -> Result<Vec<AssetTypeStats>> {
        let rows = sqlx::query(concat!(
            "SELECT r.file_type, COUNT(*) AS n, COALESCE(SUM(r.file_size), 0) AS bytes ",
            "FROM assets r WHERE r.uploader = ?1 AND ",
            active!("r"),
            " GROUP BY r.file_type ORDER BY r.file_type"
        ))
        .bind(uploader)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let file_type = row.get::<&str, _>("file_type");
                Ok(AssetTypeStats {
                    file_type: FileType::parse(file_type)
                        .with_context(|| format!("invalid file type in database: {file_type}"))?,
                    count: row.get("n"),
                    total_bytes: row.get("bytes"),
                })
            })
            .collect()
    }

    /// `linked_article_id`: `Some(None)` unlinks.
    pub async fn update_asset(
        &self,
        uploader: &str,
        id: &str,
        name: Option<String>,
        linked_article_id: Option<Option<String>>,
    ) -> Result<Option<Asset>> {
        let Some(current) = self.get_uploaded_asset(uploader, id).await? else {
            return Ok(None);
        };

        let link = linked_article_id.unwrap_or(current.linked_article_id);
        sqlx::query(
            r#"
            UPDATE assets
            SET name = ?1, linked_article_id = ?2, is_linked = ?3, update_time = ?4
            WHERE id = ?5
            "#,
        )
        .bind(name.unwrap_or(current.name))
        .bind(&link)
        .bind(link.is_some())
        .bind(timestamp(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.get_asset(id).await
    }

    pub async fn soft_delete_asset(&self, uploader: &str, id: &str) -> Result<bool> {
        let result = sqlx::query(concat!(
            "UPDATE assets AS r SET lifecycle = 'deleted', update_time = ?1 ",
            "WHERE r.id = ?2 AND r.uploader = ?3 AND ",
            active!("r"),
        ))
        .bind(timestamp(Utc::now()))
        .bind(id)
        .bind(uploader)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn push_filter<'a>(query: &mut QueryBuilder<'a, Sqlite>, uploader: &'a str, filter: &'a AssetFilter) {
    query.push(active!("r")).push(" AND r.uploader = ").push_bind(uploader);
    if let Some(file_type) = filter.file_type {
        query.push(" AND r.file_type = ").push_bind(file_type.as_str());
    }
    if let Some(search) = filter.search.as_deref().filter(|s| !s.is_empty()) {
        query
            .push(" AND (instr(lower(r.name), lower(")
            .push_bind(search)
            .push(")) > 0 OR instr(lower(r.original_name), lower(")
            .push_bind(search)
            .push(")) > 0)");
    }
    if let Some(linked) = filter.linked {
        query.push(" AND r.is_linked = ").push_bind(linked);
    }
}

fn map_asset_row(row: sqlx::sqlite::SqliteRow) -> Result<Asset> {
    let file_type = row.get::<&str, _>("file_type");
    let metadata_json = row.get::<&str, _>("metadata_json");
    Ok(Asset {
        id: row.get("id"),
        name: row.get("name"),
        original_name: row.get("original_name"),
        file_type: FileType::parse(file_type)
            .with_context(|| format!("invalid file type in database: {file_type}"))?,
        file_size: row.get("file_size"),
        file_path: row.get("file_path"),
        file_extension: row.get("file_extension"),
        mime_type: row.get("mime_type"),
        uploader: row.get("uploader"),
        linked_article_id: row.get("linked_article_id"),
        is_linked: row.get("is_linked"),
        file_hash: row.get("file_hash"),
        metadata: serde_json::from_str(metadata_json).context("invalid asset metadata json")?,
        lifecycle: parse_lifecycle(row.get::<&str, _>("lifecycle"))?,
        upload_time: parse_rfc3339(row.get::<String, _>("upload_time"))?,
        update_time: parse_rfc3339(row.get::<String, _>("update_time"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_asset(name: &str, file_type: FileType, size: i64, hash: &str) -> NewAsset {
        NewAsset {
            id: None,
            name: name.to_string(),
            original_name: name.to_string(),
            file_type,
            file_size: size,
            file_path: format!("{}/{name}", file_type.as_str()),
            file_extension: String::new(),
            mime_type: "application/octet-stream".to_string(),
            linked_article_id: None,
            file_hash: hash.to_string(),
            metadata: Map::new(),
        }
    }

    #[tokio::test]
    async fn finds_by_hash_and_hides_deleted() {
        let storage = SqliteStorage::in_memory().await.expect("storage");
        let asset = storage
            .insert_asset("alice", new_asset("a.png", FileType::Image, 10, "h1"))
            .await
            .expect("insert");
        assert!(asset.id.starts_with("res_"));

        let found = storage
            .find_asset_by_hash("alice", "h1")
            .await
            .expect("find")
            .expect("present");
        assert_eq!(found.id, asset.id);
        assert!(
            storage
                .find_asset_by_hash("bob", "h1")
                .await
                .expect("find")
                .is_none()
        );
        assert!(
            storage
                .get_uploaded_asset("bob", &asset.id)
                .await
                .expect("get")
                .is_none()
        );

        assert!(
            !storage
                .soft_delete_asset("bob", &asset.id)
                .await
                .expect("delete")
        );
        assert!(
            storage
                .soft_delete_asset("alice", &asset.id)
                .await
                .expect("delete")
        );
        assert!(
            storage
                .find_asset_by_hash("alice", "h1")
                .await
                .expect("find")
                .is_none()
        );
        assert_eq!(
            storage.find_blob_by_hash("h1").await.expect("blob").as_deref(),
            Some(asset.file_path.as_str())
        );
    }

    #[tokio::test]
    async fn pages_filters_and_aggregates() {
        let storage = SqliteStorage::in_memory().await.expect("storage");
        for (index, (name, kind, size)) in [
            ("notes.md", FileType::Document, 100),
            ("cat.png", FileType::Image, 2048),
            ("dog.png", FileType::Image, 1024),
        ]
        .into_iter()
        .enumerate()
        {
            storage
                .insert_asset("alice", new_asset(name, kind, size, &format!("h{index}")))
                .await
                .expect("insert");
        }

        let images = storage
            .list_assets(
                "alice",
                &AssetFilter {
                    file_type: Some(FileType::Image),
                    page_size: 1,
                    ..AssetFilter::default()
                },
            )
            .await
            .expect("list");
        assert_eq!(images.total, 2);
        assert_eq!(images.items.len(), 1);

        let searched = storage
            .list_assets(
                "alice",
                &AssetFilter {
                    search: Some("note".to_string()),
                    ..AssetFilter::default()
                },
            )
            .await
            .expect("list");
        assert_eq!(searched.total, 1);

        let stats = storage.asset_type_stats("alice").await.expect("stats");
        let image = stats
            .iter()
            .find(|s| s.file_type == FileType::Image)
            .expect("image stats");
        assert_eq!(image.count, 2);
        assert_eq!(image.total_bytes, 3072);
    }

    #[tokio::test]
    async fn update_links_and_unlinks() {
        let storage = SqliteStorage::in_memory().await.expect("storage");
        let asset = storage
            .insert_asset("alice", new_asset("a.txt", FileType::Document, 1, "h"))
            .await
            .expect("insert");

        let linked = storage
            .update_asset("alice", &asset.id, None, Some(Some("art_1".to_string())))
            .await
            .expect("update")
            .expect("present");
        assert!(linked.is_linked);

        let unlinked = storage
            .update_asset("alice", &asset.id, Some("b.txt".to_string()), Some(None))
            .await
            .expect("update")
            .expect("present");
        assert!(!unlinked.is_linked);
        assert_eq!(unlinked.linked_article_id, None);
        assert_eq!(unlinked.name, "b.txt");
    }
}
