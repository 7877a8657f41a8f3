use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::Utc;
use core_types::taxonomy::UNCATEGORIZED;
use core_types::{Article, Permission, ids};
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};

use crate::{SqliteStorage, parse_lifecycle, parse_permission, parse_rfc3339, timestamp};

const ARTICLE_COLUMNS: &str = "ar.id, ar.title, ar.content, ar.anthology_id, ar.parent_id, \
     ar.author, ar.permission, ar.read_count, ar.category_id, ar.sort, ar.lifecycle, \
     ar.created_at, ar.updated_at";

#[derive(Debug, Clone, Default)]
pub struct NewArticle {
    pub title: String,
    pub content: String,
    pub anthology_id: String,
    pub parent_id: Option<String>,
    pub permission: Permission,
    pub category_id: Option<String>,
    pub tag_ids: Vec<String>,
    pub sort: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafDelete {
    Deleted,
    HasChildren,
    Missing,
}

/// Partial update. For the nullable links the outer `Option` says whether
/// the field was sent and the inner one whether it is cleared.
#[derive(Debug, Clone, Default)]
pub struct ArticleChanges {
    pub title: Option<String>,
    pub content: Option<String>,
    pub anthology_id: Option<String>,
    pub parent_id: Option<Option<String>>,
    pub permission: Option<Permission>,
    pub category_id: Option<Option<String>>,
    pub tag_ids: Option<Vec<String>>,
    pub sort: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct ArticleFilter {
    pub anthology_id: Option<String>,
    pub tag_id: Option<String>,
    /// [`UNCATEGORIZED`] selects articles without a category.
    pub category_id: Option<String>,
    /// Case-insensitive title substring.
    pub keyword: Option<String>,
}

impl SqliteStorage {
    pub async fn create_article(&self, author: &str, new: NewArticle) -> Result<Article> {
        let id = ids::generate(ids::ARTICLE);
        let now = timestamp(Utc::now());
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO articles(id, title, content, anthology_id, parent_id, author, permission, category_id, sort, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
            "#,
        )
        .bind(&id)
        .bind(&new.title)
        .bind(&new.content)
        .bind(&new.anthology_id)
        .bind(&new.parent_id)
        .bind(author)
        .bind(new.permission.as_str())
        .bind(&new.category_id)
        .bind(new.sort)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        replace_tags(&mut tx, &id, &new.tag_ids).await?;
        tx.commit().await?;

        self.get_article(&id)
            .await?
            .with_context(|| format!("article {id} vanished after insert"))
    }

    pub async fn get_article(&self, id: &str) -> Result<Option<Article>> {
        let row = sqlx::query(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles ar WHERE ar.id = ?1 AND {}",
            active!("ar")
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut article = map_article_row(row)?;
        article.tag_ids = self
            .tag_ids_for(std::slice::from_ref(&article.id))
            .await?
            .remove(&article.id)
            .unwrap_or_default();
        Ok(Some(article))
    }

    /// Bumps the read counter without touching `updated_at`.
    pub async fn increment_read_count(&self, id: &str) -> Result<()> {
        sqlx::query(concat!(
            "UPDATE articles AS ar SET read_count = ar.read_count + 1 WHERE ar.id = ?1 AND ",
            active!("ar"),
        ))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_article(&self, id: &str, changes: ArticleChanges) -> Result<Option<Article>> {
        let Some(current) = self.get_article(id).await? else {
            return Ok(None);
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            UPDATE articles
            SET title = ?1, content = ?2, anthology_id = ?3, parent_id = ?4, permission = ?5,
                category_id = ?6, sort = ?7, updated_at = ?8
            WHERE id = ?9
            "#,
        )
        .bind(changes.title.unwrap_or(current.title))
        .bind(changes.content.unwrap_or(current.content))
        .bind(changes.anthology_id.unwrap_or(current.anthology_id))
        .bind(changes.parent_id.unwrap_or(current.parent_id))
        .bind(changes.permission.unwrap_or(current.permission).as_str())
        .bind(changes.category_id.unwrap_or(current.category_id))
        .bind(changes.sort.unwrap_or(current.sort))
        .bind(timestamp(Utc::now()))
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if let Some(tag_ids) = &changes.tag_ids {
            replace_tags(&mut tx, id, tag_ids).await?;
        }
        tx.commit().await?;

        self.get_article(id).await
    }

    /// Soft-deletes the article unless an active child still points at it.
    /// The guard is part of the update, so a child added concurrently either
    /// blocks the delete or is not visible yet.
    pub async fn soft_delete_leaf_article(&self, id: &str) -> Result<LeafDelete> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(concat!(
            "UPDATE articles AS ar SET lifecycle = 'deleted', updated_at = ?1 WHERE ar.id = ?2 AND ",
            active!("ar"),
            " AND NOT EXISTS (SELECT 1 FROM articles c WHERE c.parent_id = ?2 AND ",
            active!("c"),
            ")",
        ))
        .bind(timestamp(Utc::now()))
        .bind(id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() > 0 {
            tx.commit().await?;
            return Ok(LeafDelete::Deleted);
        }

        let children: i64 = sqlx::query_scalar(concat!(
            "SELECT COUNT(*) FROM articles c WHERE c.parent_id = ?1 AND ",
            active!("c"),
        ))
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(if children > 0 {
            LeafDelete::HasChildren
        } else {
            LeafDelete::Missing
        })
    }

    pub async fn article_title_exists(
        &self,
        author: &str,
        anthology_id: &str,
        title: &str,
        exclude_id: Option<&str>,
    ) -> Result<bool> {
        let row = sqlx::query(concat!(
            "SELECT COUNT(*) AS n FROM articles ar WHERE ar.author = ?1 AND ar.anthology_id = ?2 ",
            "AND ar.title = ?3 AND (?4 IS NULL OR ar.id <> ?4) AND ",
            active!("ar"),
        ))
        .bind(author)
        .bind(anthology_id)
        .bind(title)
        .bind(exclude_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("n") > 0)
    }

    /// The author's active articles by rank, then most recently updated.
    pub async fn list_articles(&self, author: &str, filter: &ArticleFilter) -> Result<Vec<Article>> {
        let mut query = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles ar WHERE {} AND ar.author = ",
            active!("ar")
        ));
        query.push_bind(author);

        if let Some(anthology_id) = &filter.anthology_id {
            query.push(" AND ar.anthology_id = ").push_bind(anthology_id);
        }
        match filter.category_id.as_deref() {
            Some(UNCATEGORIZED) => {
                query.push(" AND ar.category_id IS NULL");
            }
            Some(category_id) => {
                query.push(" AND ar.category_id = ").push_bind(category_id);
            }
            None => {}
        }
        if let Some(tag_id) = &filter.tag_id {
            query
                .push(" AND EXISTS (SELECT 1 FROM article_tags at WHERE at.article_id = ar.id AND at.tag_id = ")
                .push_bind(tag_id)
                .push(")");
        }
        if let Some(keyword) = filter.keyword.as_deref().filter(|k| !k.is_empty()) {
            query
                .push(" AND instr(lower(ar.title), lower(")
                .push_bind(keyword)
                .push(")) > 0");
        }
        query.push(" ORDER BY ar.sort ASC, ar.updated_at DESC");

        let rows = query.build().fetch_all(&self.pool).await?;
        self.hydrate(rows).await
    }

    /// Every active article of an anthology, for tree assembly.
    pub async fn list_anthology_articles(&self, anthology_id: &str) -> Result<Vec<Article>> {
        let rows = sqlx::query(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles ar WHERE ar.anthology_id = ?1 AND {} \
             ORDER BY ar.sort ASC, ar.updated_at DESC",
            active!("ar")
        ))
        .bind(anthology_id)
        .fetch_all(&self.pool)
        .await?;
        self.hydrate(rows).await
    }

    async fn hydrate(&self, rows: Vec<sqlx::sqlite::SqliteRow>) -> Result<Vec<Article>> {
        let mut articles = rows
            .into_iter()
            .map(map_article_row)
            .collect::<Result<Vec<_>>>()?;
        let ids: Vec<String> = articles.iter().map(|a| a.id.clone()).collect();
        let mut tags = self.tag_ids_for(&ids).await?;
        for article in &mut articles {
            article.tag_ids = tags.remove(&article.id).unwrap_or_default();
        }
        Ok(articles)
    }

    /// Active tag ids per article, in tag rank order.
    async fn tag_ids_for(&self, article_ids: &[String]) -> Result<HashMap<String, Vec<String>>> {
        let mut by_article: HashMap<String, Vec<String>> = HashMap::new();
        if article_ids.is_empty() {
            return Ok(by_article);
        }

        let mut query = QueryBuilder::<Sqlite>::new(format!(
            "SELECT at.article_id, at.tag_id FROM article_tags at \
             JOIN tags t ON t.id = at.tag_id WHERE {} AND at.article_id IN (",
            active!("t")
        ));
        let mut separated = query.separated(", ");
        for id in article_ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(") ORDER BY t.sort ASC, t.created_at DESC");

        for row in query.build().fetch_all(&self.pool).await? {
            by_article
                .entry(row.get("article_id"))
                .or_default()
                .push(row.get("tag_id"));
        }
        Ok(by_article)
    }
}

async fn replace_tags(conn: &mut SqliteConnection, article_id: &str, tag_ids: &[String]) -> Result<()> {
    sqlx::query("DELETE FROM article_tags WHERE article_id = ?1")
        .bind(article_id)
        .execute(&mut *conn)
        .await?;
    for tag_id in tag_ids {
        sqlx::query("INSERT OR IGNORE INTO article_tags(article_id, tag_id) VALUES (?1, ?2)")
            .bind(article_id)
            .bind(tag_id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

fn map_article_row(row: sqlx::sqlite::SqliteRow) -> Result<Article> {
    Ok(Article {
        id: row.get("id"),
        title: row.get("title"),
        content: row.get("content"),
        anthology_id: row.get("anthology_id"),
        parent_id: row.get("parent_id"),
        author: row.get("author"),
        permission: parse_permission(row.get::<&str, _>("permission"))?,
        read_count: row.get("read_count"),
        category_id: row.get("category_id"),
        tag_ids: Vec::new(),
        sort: row.get("sort"),
        lifecycle: parse_lifecycle(row.get::<&str, _>("lifecycle"))?,
        created_at: parse_rfc3339(row.get::<String, _>("created_at"))?,
        updated_at: parse_rfc3339(row.get::<String, _>("updated_at"))?,
    })
}
