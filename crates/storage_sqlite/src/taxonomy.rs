use anyhow::{Context, Result};
use chrono::Utc;
use core_types::{Category, Tag, ids};
use sqlx::Row;

use crate::{SqliteStorage, parse_lifecycle, parse_rfc3339, timestamp};

const CATEGORY_COLUMNS: &str =
    "c.id, c.name, c.description, c.owner, c.sort, c.lifecycle, c.created_at, c.updated_at";
const TAG_COLUMNS: &str = "t.id, t.name, t.owner, t.sort, t.lifecycle, t.created_at, t.updated_at";

#[derive(Debug, Clone)]
pub struct NewCategory {
    pub name: String,
    pub description: String,
    pub sort: i64,
}

#[derive(Debug, Clone, Default)]
pub struct CategoryChanges {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewTag {
    pub name: String,
    pub sort: i64,
}

/// A category or tag together with how many active articles use it.
#[derive(Debug, Clone)]
pub struct NamedCount<T> {
    pub item: T,
    pub article_count: i64,
}

impl SqliteStorage {
    pub async fn create_category(&self, owner: &str, new: NewCategory) -> Result<Category> {
        let id = ids::generate(ids::CATEGORY);
        sqlx::query(
            r#"
            INSERT INTO categories(id, name, description, owner, sort, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
            "#,
        )
        .bind(&id)
        .bind(&new.name)
        .bind(&new.description)
        .bind(owner)
        .bind(new.sort)
        .bind(timestamp(Utc::now()))
        .execute(&self.pool)
        .await?;

        self.get_category(owner, &id)
            .await?
            .with_context(|| format!("category {id} vanished after insert"))
    }

    pub async fn get_category(&self, owner: &str, id: &str) -> Result<Option<Category>> {
        let row = sqlx::query(&format!(
            "SELECT {CATEGORY_COLUMNS} FROM categories c WHERE c.id = ?1 AND c.owner = ?2 AND {}",
            active!("c")
        ))
        .bind(id)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await?;
        row.map(map_category_row).transpose()
    }

    pub async fn category_name_exists(
        &self,
        owner: &str,
        name: &str,
        exclude_id: Option<&str>,
    ) -> Result<bool> {
        let row = sqlx::query(concat!(
            "SELECT COUNT(*) AS n FROM categories c WHERE c.owner = ?1 AND c.name = ?2 ",
            "AND (?3 IS NULL OR c.id <> ?3) AND ",
            active!("c"),
        ))
        .bind(owner)
        .bind(name)
        .bind(exclude_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("n") > 0)
    }

    /// Rank order; `name` filters by substring.
    pub async fn list_categories(
        &self,
        owner: &str,
        name: Option<&str>,
    ) -> Result<Vec<NamedCount<Category>>> {
        let rows = sqlx::query(&format!(
            "SELECT {CATEGORY_COLUMNS}, \
             (SELECT COUNT(*) FROM articles ar WHERE ar.category_id = c.id AND ar.author = c.owner AND {}) AS article_count \
             FROM categories c WHERE c.owner = ?1 AND {} AND (?2 IS NULL OR instr(lower(c.name), lower(?2)) > 0) \
             ORDER BY c.sort ASC, c.created_at DESC",
            active!("ar"),
            active!("c"),
        ))
        .bind(owner)
        .bind(name.filter(|n| !n.is_empty()))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let article_count = row.get("article_count");
                Ok(NamedCount {
                    item: map_category_row(row)?,
                    article_count,
                })
            })
            .collect()
    }

    /// Active articles of `owner` that have no category.
    pub async fn uncategorized_count(&self, owner: &str) -> Result<i64> {
        let row = sqlx::query(concat!(
            "SELECT COUNT(*) AS n FROM articles ar WHERE ar.author = ?1 AND ar.category_id IS NULL AND ",
            active!("ar"),
        ))
        .bind(owner)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("n"))
    }

    pub async fn update_category(
        &self,
        owner: &str,
        id: &str,
        changes: CategoryChanges,
    ) -> Result<Option<Category>> {
        let Some(current) = self.get_category(owner, id).await? else {
            return Ok(None);
        };

        sqlx::query("UPDATE categories SET name = ?1, description = ?2, updated_at = ?3 WHERE id = ?4")
            .bind(changes.name.unwrap_or(current.name))
            .bind(changes.description.unwrap_or(current.description))
            .bind(timestamp(Utc::now()))
            .bind(id)
            .execute(&self.pool)
            .await?;

        self.get_category(owner, id).await
    }

    pub async fn soft_delete_category(&self, owner: &str, id: &str) -> Result<bool> {
        let result = sqlx::query(concat!(
            "UPDATE categories AS c SET lifecycle = 'deleted', updated_at = ?1 ",
            "WHERE c.id = ?2 AND c.owner = ?3 AND ",
            active!("c"),
        ))
        .bind(timestamp(Utc::now()))
        .bind(id)
        .bind(owner)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn create_tag(&self, owner: &str, new: NewTag) -> Result<Tag> {
        let id = ids::generate(ids::TAG);
        sqlx::query(
            r#"
            INSERT INTO tags(id, name, owner, sort, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            "#,
        )
        .bind(&id)
        .bind(&new.name)
        .bind(owner)
        .bind(new.sort)
        .bind(timestamp(Utc::now()))
        .execute(&self.pool)
        .await?;

        self.get_tag(owner, &id)
            .await?
            .with_context(|| format!("tag {id} vanished after insert"))
    }

    pub async fn get_tag(&self, owner: &str, id: &str) -> Result<Option<Tag>> {
        let row = sqlx::query(&format!(
            "SELECT {TAG_COLUMNS} FROM tags t WHERE t.id = ?1 AND t.owner = ?2 AND {}",
            active!("t")
        ))
        .bind(id)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await?;
        row.map(map_tag_row).transpose()
    }

    pub async fn tag_name_exists(
        &self,
        owner: &str,
        name: &str,
        exclude_id: Option<&str>,
    ) -> Result<bool> {
        let row = sqlx::query(concat!(
            "SELECT COUNT(*) AS n FROM tags t WHERE t.owner = ?1 AND t.name = ?2 ",
            "AND (?3 IS NULL OR t.id <> ?3) AND ",
            active!("t"),
        ))
        .bind(owner)
        .bind(name)
        .bind(exclude_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("n") > 0)
    }

    pub async fn list_tags(&self, owner: &str, name: Option<&str>) -> Result<Vec<NamedCount<Tag>>> {
        let rows = sqlx::query(&format!(
            "SELECT {TAG_COLUMNS}, \
             (SELECT COUNT(*) FROM article_tags at JOIN articles ar ON ar.id = at.article_id \
              WHERE at.tag_id = t.id AND {}) AS article_count \
             FROM tags t WHERE t.owner = ?1 AND {} AND (?2 IS NULL OR instr(lower(t.name), lower(?2)) > 0) \
             ORDER BY t.sort ASC, t.created_at DESC",
            active!("ar"),
            active!("t"),
        ))
        .bind(owner)
        .bind(name.filter(|n| !n.is_empty()))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let article_count = row.get("article_count");
                Ok(NamedCount {
                    item: map_tag_row(row)?,
                    article_count,
                })
            })
            .collect()
    }

    pub async fn rename_tag(&self, owner: &str, id: &str, name: &str) -> Result<Option<Tag>> {
        let result = sqlx::query(concat!(
            "UPDATE tags AS t SET name = ?1, updated_at = ?2 WHERE t.id = ?3 AND t.owner = ?4 AND ",
            active!("t"),
        ))
        .bind(name)
        .bind(timestamp(Utc::now()))
        .bind(id)
        .bind(owner)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_tag(owner, id).await
    }

    pub async fn soft_delete_tag(&self, owner: &str, id: &str) -> Result<bool> {
        let result = sqlx::query(concat!(
            "UPDATE tags AS t SET lifecycle = 'deleted', updated_at = ?1 ",
            "WHERE t.id = ?2 AND t.owner = ?3 AND ",
            active!("t"),
        ))
        .bind(timestamp(Utc::now()))
        .bind(id)
        .bind(owner)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn map_category_row(row: sqlx::sqlite::SqliteRow) -> Result<Category> {
    Ok(Category {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        owner: row.get("owner"),
        sort: row.get("sort"),
        lifecycle: parse_lifecycle(row.get::<&str, _>("lifecycle"))?,
        created_at: parse_rfc3339(row.get::<String, _>("created_at"))?,
        updated_at: parse_rfc3339(row.get::<String, _>("updated_at"))?,
    })
}

fn map_tag_row(row: sqlx::sqlite::SqliteRow) -> Result<Tag> {
    Ok(Tag {
        id: row.get("id"),
        name: row.get("name"),
        owner: row.get("owner"),
        sort: row.get("sort"),
        lifecycle: parse_lifecycle(row.get::<&str, _>("lifecycle"))?,
        created_at: parse_rfc3339(row.get::<String, _>("created_at"))?,
        updated_at: parse_rfc3339(row.get::<String, _>("updated_at"))?,
    })
}
