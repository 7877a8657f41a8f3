use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;

/// Predicate that hides soft-deleted rows. Every content query filters through it.
macro_rules! active {
    ($alias:literal) => {
        concat!($alias, ".lifecycle = 'active'")
    };
}

mod anthology;
mod article;
mod asset;
mod rank;
mod settings;
mod taxonomy;

pub use anthology::{AnthologyChanges, ArticlePreview, NewAnthology};
pub use article::{ArticleChanges, ArticleFilter, LeafDelete, NewArticle};
pub use asset::{AssetFilter, AssetPage, AssetTypeStats, NewAsset};
pub use rank::{RankChange, RankedRow, ReorderTx, SortScope};
pub use settings::{NewModel, NewProvider, ProviderChanges};
pub use taxonomy::{CategoryChanges, NamedCount, NewCategory, NewTag};

pub const CURRENT_DB_SCHEMA_VERSION: u32 = 1;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS metadata (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS anthologies (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        description TEXT NOT NULL,
        icon_id TEXT NOT NULL,
        owner TEXT NOT NULL,
        permission TEXT NOT NULL,
        pinned INTEGER NOT NULL DEFAULT 0,
        sort INTEGER NOT NULL DEFAULT 0,
        lifecycle TEXT NOT NULL DEFAULT 'active',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS anthologies_owner_title
    ON anthologies(owner, title) WHERE lifecycle = 'active';
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS articles (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        content TEXT NOT NULL,
        anthology_id TEXT NOT NULL,
        parent_id TEXT,
        author TEXT NOT NULL,
        permission TEXT NOT NULL,
        read_count INTEGER NOT NULL DEFAULT 0,
        category_id TEXT,
        sort INTEGER NOT NULL DEFAULT 0,
        lifecycle TEXT NOT NULL DEFAULT 'active',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS articles_author_anthology_title
    ON articles(author, anthology_id, title) WHERE lifecycle = 'active';
    "#,
    "CREATE INDEX IF NOT EXISTS articles_anthology ON articles(anthology_id);",
    "CREATE INDEX IF NOT EXISTS articles_parent ON articles(parent_id);",
    r#"
    CREATE TABLE IF NOT EXISTS categories (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        owner TEXT NOT NULL,
        sort INTEGER NOT NULL DEFAULT 0,
        lifecycle TEXT NOT NULL DEFAULT 'active',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS categories_owner_name
    ON categories(owner, name) WHERE lifecycle = 'active';
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tags (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        owner TEXT NOT NULL,
        sort INTEGER NOT NULL DEFAULT 0,
        lifecycle TEXT NOT NULL DEFAULT 'active',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS tags_owner_name
    ON tags(owner, name) WHERE lifecycle = 'active';
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS article_tags (
        article_id TEXT NOT NULL,
        tag_id TEXT NOT NULL,
        PRIMARY KEY (article_id, tag_id)
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS assets (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        original_name TEXT NOT NULL,
        file_type TEXT NOT NULL,
        file_size INTEGER NOT NULL,
        file_path TEXT NOT NULL,
        file_extension TEXT NOT NULL,
        mime_type TEXT NOT NULL,
        uploader TEXT NOT NULL,
        linked_article_id TEXT,
        is_linked INTEGER NOT NULL DEFAULT 0,
        file_hash TEXT NOT NULL,
        metadata_json TEXT NOT NULL DEFAULT '{}',
        lifecycle TEXT NOT NULL DEFAULT 'active',
        upload_time TEXT NOT NULL,
        update_time TEXT NOT NULL
    );
    "#,
    "CREATE INDEX IF NOT EXISTS assets_hash ON assets(file_hash);",
    "CREATE INDEX IF NOT EXISTS assets_uploader ON assets(uploader);",
    r#"
    CREATE TABLE IF NOT EXISTS ai_providers (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        kind TEXT NOT NULL,
        base_url TEXT NOT NULL,
        api_key TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ai_models (
        id TEXT PRIMARY KEY,
        provider_id TEXT NOT NULL,
        name TEXT NOT NULL,
        display_name TEXT,
        kind TEXT NOT NULL,
        FOREIGN KEY(provider_id) REFERENCES ai_providers(id) ON DELETE CASCADE
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS system_settings (
        key TEXT PRIMARY KEY,
        value_json TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT ''
    );
    "#,
];

#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
    /// Serializes rank rewrites so two reorders of one list cannot interleave.
    reorder_lock: Arc<Mutex<()>>,
}

impl SqliteStorage {
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!(
            "sqlite://{}",
            path.as_ref().to_string_lossy()
        ))?
        .create_if_missing(true)
        .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open {}", path.as_ref().display()))?;
        Self::with_pool(pool).await
    }

    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        let storage = Self {
            pool,
            reorder_lock: Arc::new(Mutex::new(())),
        };
        storage.migrate().await?;
        Ok(storage)
    }

    async fn migrate(&self) -> Result<()> {
        for sql in SCHEMA {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .with_context(|| format!("failed migration sql: {sql}"))?;
        }

        sqlx::query(
            r#"
            INSERT INTO metadata(key, value)
            VALUES ('schema_version', ?1)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(CURRENT_DB_SCHEMA_VERSION.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn schema_version(&self) -> Result<u32> {
        let row = sqlx::query("SELECT value FROM metadata WHERE key = 'schema_version'")
            .fetch_one(&self.pool)
            .await?;
        let version = row.get::<String, _>("value").parse::<u32>()?;
        Ok(version)
    }
}

/// True when `err` wraps an SQLite unique-constraint violation, i.e. a
/// concurrent insert won the race past an application-level duplicate check.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<sqlx::Error>()
            .and_then(|e| e.as_database_error())
            .is_some_and(|db| db.is_unique_violation())
    })
}

/// Fixed-width UTC timestamps, so text order matches time order.
pub(crate) fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_rfc3339(value: String) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(&value)
        .with_context(|| format!("invalid timestamp {value}"))?
        .with_timezone(&Utc))
}

pub(crate) fn parse_lifecycle(value: &str) -> Result<core_types::Lifecycle> {
    core_types::Lifecycle::parse(value)
        .with_context(|| format!("invalid lifecycle in database: {value}"))
}

pub(crate) fn parse_permission(value: &str) -> Result<core_types::Permission> {
    core_types::Permission::parse(value)
        .with_context(|| format!("invalid permission in database: {value}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrates_and_records_schema_version() {
        let storage = SqliteStorage::in_memory().await.expect("storage");
        let schema_version = storage.schema_version().await.expect("schema version");
        assert_eq!(schema_version, CURRENT_DB_SCHEMA_VERSION);

        // idempotent
        storage.migrate().await.expect("second migrate");
    }

    #[test]
    fn timestamps_sort_lexically() {
        let earlier = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .expect("ts")
            .with_timezone(&Utc);
        let later = DateTime::parse_from_rfc3339("2026-01-01T00:00:00.25Z")
            .expect("ts")
            .with_timezone(&Utc);
        assert!(timestamp(earlier) < timestamp(later));
        assert_eq!(timestamp(earlier).len(), timestamp(later).len());
        assert_eq!(
            parse_rfc3339(timestamp(earlier)).expect("parse"),
            earlier
        );
    }
}
