use anyhow::{Context, Result};
use sqlx::{Row, Sqlite, Transaction};
use tokio::sync::OwnedMutexGuard;

use crate::SqliteStorage;

/// A list of siblings that share one rank sequence.
#[derive(Debug, Clone, Copy)]
pub enum SortScope<'a> {
    Anthologies { owner: &'a str },
    Categories { owner: &'a str },
    Tags { owner: &'a str },
}

impl SortScope<'_> {
    fn owner(&self) -> &str {
        match self {
            Self::Anthologies { owner } | Self::Categories { owner } | Self::Tags { owner } => owner,
        }
    }

    fn table(&self) -> &'static str {
        match self {
            Self::Anthologies { .. } => "anthologies",
            Self::Categories { .. } => "categories",
            Self::Tags { .. } => "tags",
        }
    }

    /// Current display order, the same order the list endpoints use.
    fn select_sql(&self) -> &'static str {
        match self {
            Self::Anthologies { .. } => concat!(
                "SELECT a.id, a.sort, a.pinned FROM anthologies a WHERE a.owner = ?1 AND ",
                active!("a"),
                " ORDER BY a.pinned DESC, a.sort ASC, a.updated_at DESC"
            ),
            Self::Categories { .. } => concat!(
                "SELECT c.id, c.sort, 0 AS pinned FROM categories c WHERE c.owner = ?1 AND ",
                active!("c"),
                " ORDER BY c.sort ASC, c.created_at DESC"
            ),
            Self::Tags { .. } => concat!(
                "SELECT t.id, t.sort, 0 AS pinned FROM tags t WHERE t.owner = ?1 AND ",
                active!("t"),
                " ORDER BY t.sort ASC, t.created_at DESC"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedRow {
    pub id: String,
    pub sort: i64,
    pub pinned: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankChange {
    pub id: String,
    pub sort: i64,
}

/// An open rank rewrite. Holds the per-store reorder lock and a write
/// transaction; dropping it without [`ReorderTx::apply`] rolls back.
pub struct ReorderTx {
    rows: Vec<RankedRow>,
    table: &'static str,
    tx: Transaction<'static, Sqlite>,
    _guard: OwnedMutexGuard<()>,
}

impl ReorderTx {
    pub fn items(&self) -> &[RankedRow] {
        &self.rows
    }

    /// Writes the changed ranks and commits. Returns how many rows moved.
    pub async fn apply(mut self, changes: &[RankChange]) -> Result<usize> {
        let sql = format!("UPDATE {} SET sort = ?1 WHERE id = ?2", self.table);
        for change in changes {
            sqlx::query(&sql)
                .bind(change.sort)
                .bind(&change.id)
                .execute(&mut *self.tx)
                .await
                .with_context(|| format!("failed to rerank {} {}", self.table, change.id))?;
        }
        self.tx.commit().await?;
        Ok(changes.len())
    }
}

impl SqliteStorage {
    /// Rank for a newly created row: one past the current maximum.
    pub async fn next_rank(&self, scope: SortScope<'_>) -> Result<i64> {
        let sql = format!(
            "SELECT COALESCE(MAX(sort), 0) + 1 AS next FROM {} WHERE owner = ?1 AND lifecycle = 'active'",
            scope.table()
        );
        let row = sqlx::query(&sql)
            .bind(scope.owner())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("next"))
    }

    /// Locks the scope's rank sequence and snapshots it in display order.
    pub async fn begin_reorder(&self, scope: SortScope<'_>) -> Result<ReorderTx> {
        let guard = self.reorder_lock.clone().lock_owned().await;
        let mut tx = self.pool.begin().await?;
        // take the sqlite write lock before reading the snapshot
        sqlx::query(&format!(
            "UPDATE {} SET sort = sort WHERE 0",
            scope.table()
        ))
        .execute(&mut *tx)
        .await?;

        let rows = sqlx::query(scope.select_sql())
            .bind(scope.owner())
            .fetch_all(&mut *tx)
            .await?
            .into_iter()
            .map(|row| RankedRow {
                id: row.get("id"),
                sort: row.get("sort"),
                pinned: row.get::<i64, _>("pinned") != 0,
            })
            .collect();

        Ok(ReorderTx {
            rows,
            table: scope.table(),
            tx,
            _guard: guard,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NewCategory, NewTag};

    #[tokio::test]
    async fn snapshot_follows_display_order_and_apply_commits() {
        let storage = SqliteStorage::in_memory().await.expect("storage");
        let mut ids = Vec::new();
        for (name, sort) in [("b", 2), ("a", 1), ("c", 3)] {
            let category = storage
                .create_category(
                    "alice",
                    NewCategory {
                        name: name.to_string(),
                        description: String::new(),
                        sort,
                    },
                )
                .await
                .expect("category");
            ids.push(category.id);
        }

        let reorder = storage
            .begin_reorder(SortScope::Categories { owner: "alice" })
            .await
            .expect("begin");
        let order: Vec<i64> = reorder.items().iter().map(|row| row.sort).collect();
        assert_eq!(order, vec![1, 2, 3]);

        let moved = reorder
            .apply(&[RankChange {
                id: ids[2].clone(),
                sort: 0,
            }])
            .await
            .expect("apply");
        assert_eq!(moved, 1);

        let category = storage
            .get_category("alice", &ids[2])
            .await
            .expect("get")
            .expect("present");
        assert_eq!(category.sort, 0);
    }

    #[tokio::test]
    async fn dropping_reorder_rolls_back() {
        let storage = SqliteStorage::in_memory().await.expect("storage");
        let tag = storage
            .create_tag(
                "alice",
                NewTag {
                    name: "rust".to_string(),
                    sort: 1,
                },
            )
            .await
            .expect("tag");

        {
            let mut reorder = storage
                .begin_reorder(SortScope::Tags { owner: "alice" })
                .await
                .expect("begin");
            sqlx::query("UPDATE tags SET sort = 9 WHERE id = ?1")
                .bind(&tag.id)
                .execute(&mut *reorder.tx)
                .await
                .expect("update");
        }

        let reloaded = storage
            .get_tag("alice", &tag.id)
            .await
            .expect("get")
            .expect("present");
        assert_eq!(reloaded.sort, 1);
    }
}
