use anyhow::Result;
use chrono::Utc;
use core_types::{Anthology, Permission, ids};
use serde::Serialize;
use sqlx::Row;

use crate::{SqliteStorage, parse_lifecycle, parse_permission, parse_rfc3339, timestamp};

const SELECT_ANTHOLOGY: &str = concat!(
    "SELECT a.id, a.title, a.description, a.icon_id, a.owner, a.permission, a.pinned, a.sort, ",
    "a.lifecycle, a.created_at, a.updated_at, ",
    "(SELECT COUNT(*) FROM articles ar WHERE ar.anthology_id = a.id AND ",
    active!("ar"),
    ") AS article_count ",
    "FROM anthologies a WHERE a.owner = ?1 AND ",
    active!("a"),
);

#[derive(Debug, Clone)]
pub struct NewAnthology {
    pub title: String,
    pub description: String,
    pub icon_id: String,
    pub permission: Permission,
    pub pinned: bool,
    pub sort: i64,
}

/// Partial update; `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct AnthologyChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub icon_id: Option<String>,
    pub permission: Option<Permission>,
    pub pinned: Option<bool>,
}

/// Short entry shown under an anthology in the list view.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ArticlePreview {
    pub article_id: String,
    pub title: String,
    /// `MM-DD` of the article's last update.
    pub date: String,
}

impl SqliteStorage {
    pub async fn create_anthology(&self, owner: &str, new: NewAnthology) -> Result<Anthology> {
        let id = ids::generate(ids::ANTHOLOGY);
        let now = timestamp(Utc::now());
        sqlx::query(
            r#"
            INSERT INTO anthologies(id, title, description, icon_id, owner, permission, pinned, sort, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
            "#,
        )
        .bind(&id)
        .bind(&new.title)
        .bind(&new.description)
        .bind(&new.icon_id)
        .bind(owner)
        .bind(new.permission.as_str())
        .bind(new.pinned)
        .bind(new.sort)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.require_anthology(owner, &id).await
    }

    pub async fn get_anthology(&self, owner: &str, id: &str) -> Result<Option<Anthology>> {
        let row = sqlx::query(&format!("{SELECT_ANTHOLOGY} AND a.id = ?2"))
            .bind(owner)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(map_anthology_row).transpose()
    }

    async fn require_anthology(&self, owner: &str, id: &str) -> Result<Anthology> {
        self.get_anthology(owner, id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("anthology {id} vanished after write"))
    }

    /// Pinned first, then rank, then most recently updated.
    pub async fn list_anthologies(&self, owner: &str) -> Result<Vec<Anthology>> {
        let rows = sqlx::query(&format!(
            "{SELECT_ANTHOLOGY} ORDER BY a.pinned DESC, a.sort ASC, a.updated_at DESC"
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(map_anthology_row).collect()
    }

    pub async fn anthology_title_exists(
        &self,
        owner: &str,
        title: &str,
        exclude_id: Option<&str>,
    ) -> Result<bool> {
        let row = sqlx::query(concat!(
            "SELECT COUNT(*) AS n FROM anthologies a WHERE a.owner = ?1 AND a.title = ?2 ",
            "AND (?3 IS NULL OR a.id <> ?3) AND ",
            active!("a"),
        ))
        .bind(owner)
        .bind(title)
        .bind(exclude_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("n") > 0)
    }

    pub async fn update_anthology(
        &self,
        owner: &str,
        id: &str,
        changes: AnthologyChanges,
    ) -> Result<Option<Anthology>> {
        let Some(current) = self.get_anthology(owner, id).await? else {
            return Ok(None);
        };

        sqlx::query(
            r#"
            UPDATE anthologies
            SET title = ?1, description = ?2, icon_id = ?3, permission = ?4, pinned = ?5, updated_at = ?6
            WHERE id = ?7
            "#,
        )
        .bind(changes.title.unwrap_or(current.title))
        .bind(changes.description.unwrap_or(current.description))
        .bind(changes.icon_id.unwrap_or(current.icon_id))
        .bind(changes.permission.unwrap_or(current.permission).as_str())
        .bind(changes.pinned.unwrap_or(current.pinned))
        .bind(timestamp(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.get_anthology(owner, id).await
    }

    /// Returns false when there was no active row to delete.
    pub async fn soft_delete_anthology(&self, owner: &str, id: &str) -> Result<bool> {
        let result = sqlx::query(concat!(
            "UPDATE anthologies AS a SET lifecycle = 'deleted', updated_at = ?1 ",
            "WHERE a.id = ?2 AND a.owner = ?3 AND ",
            active!("a"),
        ))
        .bind(timestamp(Utc::now()))
        .bind(id)
        .bind(owner)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// The first `limit` active articles of an anthology in tree order.
    pub async fn article_previews(
        &self,
        anthology_id: &str,
        limit: i64,
    ) -> Result<Vec<ArticlePreview>> {
        let rows = sqlx::query(concat!(
            "SELECT ar.id, ar.title, ar.updated_at FROM articles ar WHERE ar.anthology_id = ?1 AND ",
            active!("ar"),
            " ORDER BY ar.sort ASC, ar.updated_at DESC LIMIT ?2"
        ))
        .bind(anthology_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let updated_at = parse_rfc3339(row.get::<String, _>("updated_at"))?;
                Ok(ArticlePreview {
                    article_id: row.get("id"),
                    title: row.get("title"),
                    date: updated_at.format("%m-%d").to_string(),
                })
            })
            .collect()
    }
}

fn map_anthology_row(row: sqlx::sqlite::SqliteRow) -> Result<Anthology> {
    Ok(Anthology {
        id: row.get("id"),
        title: row.get("title"),
        description: row.get("description"),
        icon_id: row.get("icon_id"),
        owner: row.get("owner"),
        permission: parse_permission(row.get::<&str, _>("permission"))?,
        pinned: row.get("pinned"),
        article_count: row.get("article_count"),
        sort: row.get("sort"),
        lifecycle: parse_lifecycle(row.get::<&str, _>("lifecycle"))?,
        created_at: parse_rfc3339(row.get::<String, _>("created_at"))?,
        updated_at: parse_rfc3339(row.get::<String, _>("updated_at"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NewArticle;

    fn new_anthology(title: &str) -> NewAnthology {
        NewAnthology {
            title: title.to_string(),
            description: "notes".to_string(),
            icon_id: "book".to_string(),
            permission: Permission::Public,
            pinned: false,
            sort: 1,
        }
    }

    #[tokio::test]
    async fn create_get_update_delete() {
        let storage = SqliteStorage::in_memory().await.expect("storage");
        let created = storage
            .create_anthology("alice", new_anthology("Rust"))
            .await
            .expect("create");
        assert!(created.id.starts_with("coll_"));
        assert_eq!(created.article_count, 0);

        assert!(
            storage
                .get_anthology("bob", &created.id)
                .await
                .expect("get")
                .is_none()
        );

        let updated = storage
            .update_anthology(
                "alice",
                &created.id,
                AnthologyChanges {
                    pinned: Some(true),
                    ..AnthologyChanges::default()
                },
            )
            .await
            .expect("update")
            .expect("present");
        assert!(updated.pinned);
        assert_eq!(updated.title, "Rust");

        assert!(
            storage
                .soft_delete_anthology("alice", &created.id)
                .await
                .expect("delete")
        );
        assert!(
            !storage
                .soft_delete_anthology("alice", &created.id)
                .await
                .expect("delete twice")
        );
        assert!(
            storage
                .get_anthology("alice", &created.id)
                .await
                .expect("get")
                .is_none()
        );
    }

    #[tokio::test]
    async fn deleted_titles_can_be_reused() {
        let storage = SqliteStorage::in_memory().await.expect("storage");
        let first = storage
            .create_anthology("alice", new_anthology("Inbox"))
            .await
            .expect("create");
        assert!(
            storage
                .anthology_title_exists("alice", "Inbox", None)
                .await
                .expect("exists")
        );
        assert!(
            !storage
                .anthology_title_exists("alice", "Inbox", Some(&first.id))
                .await
                .expect("exists")
        );

        storage
            .soft_delete_anthology("alice", &first.id)
            .await
            .expect("delete");
        storage
            .create_anthology("alice", new_anthology("Inbox"))
            .await
            .expect("recreate");
    }

    #[tokio::test]
    async fn lists_pinned_first_with_counts_and_previews() {
        let storage = SqliteStorage::in_memory().await.expect("storage");
        let plain = storage
            .create_anthology("alice", new_anthology("Plain"))
            .await
            .expect("create");
        let pinned = storage
            .create_anthology(
                "alice",
                NewAnthology {
                    pinned: true,
                    sort: 5,
                    ..new_anthology("Pinned")
                },
            )
            .await
            .expect("create");

        for title in ["one", "two", "three", "four"] {
            storage
                .create_article(
                    "alice",
                    NewArticle {
                        title: title.to_string(),
                        anthology_id: plain.id.clone(),
                        ..NewArticle::default()
                    },
                )
                .await
                .expect("article");
        }

        let listed = storage.list_anthologies("alice").await.expect("list");
        let ids: Vec<&str> = listed.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec![pinned.id.as_str(), plain.id.as_str()]);
        assert_eq!(listed[1].article_count, 4);

        let previews = storage
            .article_previews(&plain.id, 3)
            .await
            .expect("previews");
        assert_eq!(previews.len(), 3);
        assert_eq!(previews[0].date.len(), 5);
    }
}
