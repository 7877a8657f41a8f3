//! Manual ordering of anthologies, categories and tags.
//!
//! Moving an item takes the whole sibling list in its current display order,
//! pulls the item out, reinserts it at the requested 1-based position and
//! renumbers everything `1..=n`. Only rows whose rank actually changed are
//! written back.

use core_types::{KbError, KbResult};
use storage_sqlite::{RankChange, RankedRow, SortScope};

use crate::{KnowledgeBase, StorageResultExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveError {
    /// Position below 1.
    InvalidPosition,
    /// Pinned items keep their place at the top and are never renumbered.
    Pinned,
    /// The item is not among the siblings.
    Missing,
}

/// Computes the rank writes that move `id` to `position`.
///
/// `items` must be in display order. Pinned rows are left out of the
/// renumbering; positions past the end clamp to the last slot.
pub fn plan_move(items: &[RankedRow], id: &str, position: i64) -> Result<Vec<RankChange>, MoveError> {
    if position < 1 {
        return Err(MoveError::InvalidPosition);
    }

    let target = items
        .iter()
        .find(|row| row.id == id)
        .ok_or(MoveError::Missing)?;
    if target.pinned {
        return Err(MoveError::Pinned);
    }

    let mut order: Vec<&RankedRow> = items.iter().filter(|row| !row.pinned).collect();
    let from = order
        .iter()
        .position(|row| row.id == id)
        .ok_or(MoveError::Missing)?;
    let moved = order.remove(from);
    let to = usize::try_from(position - 1)
        .unwrap_or(usize::MAX)
        .min(order.len());
    order.insert(to, moved);

    Ok(order
        .into_iter()
        .zip(1..)
        .filter(|(row, rank)| row.sort != *rank)
        .map(|(row, rank)| RankChange {
            id: row.id.clone(),
            sort: rank,
        })
        .collect())
}

impl KnowledgeBase {
    /// Runs [`plan_move`] against the stored list under the reorder lock.
    pub(crate) async fn move_to(
        &self,
        scope: SortScope<'_>,
        what: &'static str,
        id: &str,
        position: i64,
    ) -> KbResult<()> {
        if position < 1 {
            return Err(invalid_position());
        }

        let reorder = self.storage.begin_reorder(scope).await.storage()?;
        let changes = plan_move(reorder.items(), id, position).map_err(|err| match err {
            MoveError::InvalidPosition => invalid_position(),
            MoveError::Pinned => KbError::validation("pinned items cannot be reordered"),
            MoveError::Missing => KbError::not_found(what, id),
        })?;
        let written = reorder.apply(&changes).await.storage()?;
        tracing::debug!(what, id, position, written, "reordered");
        Ok(())
    }
}

fn invalid_position() -> KbError {
    KbError::validation("sort must be a positive integer")
}
