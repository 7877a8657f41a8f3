use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Lifecycle, Permission};

pub const TITLE_MAX_CHARS: usize = 20;
pub const DESCRIPTION_MAX_CHARS: usize = 100;
pub const ICON_MAX_CHARS: usize = 20;
pub const DEFAULT_DESCRIPTION: &str = "No description yet";
pub const DEFAULT_ICON: &str = "book";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anthology {
    pub id: String,
    pub title: String,
    pub description: String,
    pub icon_id: String,
    pub owner: String,
    pub permission: Permission,
    pub pinned: bool,
    /// Active articles in this anthology, computed at read time.
    pub article_count: i64,
    pub sort: i64,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
