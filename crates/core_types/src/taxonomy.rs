use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Lifecycle;

pub const CATEGORY_NAME_MAX_CHARS: usize = 10;
pub const CATEGORY_DESCRIPTION_MAX_CHARS: usize = 100;
pub const TAG_NAME_MAX_CHARS: usize = 10;

/// Pseudo category id selecting articles that have no category.
pub const UNCATEGORIZED: &str = "uncategorized";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub description: String,
    pub owner: String,
    pub sort: i64,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub sort: i64,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
