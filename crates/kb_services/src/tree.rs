use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};

use core_types::Article;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Doc,
    Folder,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArticleNode {
    pub id: String,
    pub article_id: String,
    pub title: String,
    /// `YYYY-MM-DD` of the last update.
    pub date: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub parent_id: Option<String>,
    pub children: Vec<ArticleNode>,
}

/// Nests the articles of one anthology under their parents.
///
/// Roots are articles whose parent is unset or not in `articles`. Each level
/// is ordered by rank, then most recently updated. Every article appears
/// exactly once; members of a stored parent cycle are surfaced as extra roots
/// after the regular ones.
pub fn assemble(articles: &[Article]) -> Vec<ArticleNode> {
    let by_id: HashMap<&str, &Article> = articles.iter().map(|a| (a.id.as_str(), a)).collect();
    let mut children: HashMap<&str, Vec<&Article>> = HashMap::new();
    let mut roots = Vec::new();
    for article in articles {
        match article.parent_id.as_deref() {
            Some(parent) if parent != article.id && by_id.contains_key(parent) => {
                children.entry(parent).or_default().push(article);
            }
            _ => roots.push(article),
        }
    }

    let mut visited = HashSet::new();
    let mut tree = build_level(roots, &children, &mut visited);
    if visited.len() < articles.len() {
        let stranded = articles
            .iter()
            .filter(|a| !visited.contains(a.id.as_str()))
            .collect();
        tree.extend(build_level(stranded, &children, &mut visited));
    }
    tree
}

fn build_level<'a>(
    mut level: Vec<&'a Article>,
    children: &HashMap<&'a str, Vec<&'a Article>>,
    visited: &mut HashSet<&'a str>,
) -> Vec<ArticleNode> {
    level.sort_by_key(|a| (a.sort, Reverse(a.updated_at)));
    let mut nodes = Vec::with_capacity(level.len());
    for article in level {
        if !visited.insert(article.id.as_str()) {
            continue;
        }
        let kids = children
            .get(article.id.as_str())
            .cloned()
            .unwrap_or_default();
        let kids = build_level(kids, children, visited);
        nodes.push(ArticleNode {
            id: article.id.clone(),
            article_id: article.id.clone(),
            title: article.title.clone(),
            date: article.updated_at.format("%Y-%m-%d").to_string(),
            kind: if kids.is_empty() {
                NodeKind::Doc
            } else {
                NodeKind::Folder
            },
            parent_id: article.parent_id.clone(),
            children: kids,
        });
    }
    nodes
}

/// True when making `new_parent` the parent of `article_id` would put
/// `article_id` among its own ancestors.
pub fn would_create_cycle(articles: &[Article], article_id: &str, new_parent: &str) -> bool {
    let parents: HashMap<&str, Option<&str>> = articles
        .iter()
        .map(|a| (a.id.as_str(), a.parent_id.as_deref()))
        .collect();

    let mut seen = HashSet::new();
    let mut cursor = Some(new_parent);
    while let Some(current) = cursor {
        if current == article_id {
            return true;
        }
        if !seen.insert(current) {
            // an existing loop that does not pass through article_id
            return false;
        }
        cursor = parents.get(current).copied().flatten();
    }
    false
}
