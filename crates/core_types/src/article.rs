use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Lifecycle, Permission};

pub const TITLE_MAX_CHARS: usize = 255;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub title: String,
    pub content: String,
    pub anthology_id: String,
    pub parent_id: Option<String>,
    pub author: String,
    pub permission: Permission,
    pub read_count: i64,
    pub category_id: Option<String>,
    #[serde(default)]
    pub tag_ids: Vec<String>,
    pub sort: i64,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// `{id, title}` pair used wherever another record points at an article.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArticleRef {
    pub id: String,
    pub title: String,
}

impl From<&Article> for ArticleRef {
    fn from(article: &Article) -> Self {
        Self {
            id: article.id.clone(),
            title: article.title.clone(),
        }
    }
}
