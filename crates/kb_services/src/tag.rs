use chrono::{DateTime, Utc};
use core_types::taxonomy::TAG_NAME_MAX_CHARS;
use core_types::{Identity, KbError, KbResult, Tag};
use serde::{Deserialize, Serialize};
use storage_sqlite::{NewTag, SortScope};

use crate::{KnowledgeBase, StorageResultExt, required_text};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TagInput {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TagQuery {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TagEntry {
    pub tag_id: String,
    pub name: String,
    pub sort: i64,
    pub article_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KnowledgeBase {
    pub async fn create_tag(&self, identity: &Identity, input: TagInput) -> KbResult<Tag> {
        let owner = identity.as_str();
        let name = required_text("name", input.name.as_deref(), TAG_NAME_MAX_CHARS)?;
        self.ensure_tag_name_free(owner, &name, None).await?;

        let sort = self
            .storage
            .next_rank(SortScope::Tags { owner })
            .await
            .storage()?;
        self.storage
            .create_tag(
                owner,
                NewTag {
                    name: name.clone(),
                    sort,
                },
            )
            .await
            .unique(|| duplicate_name(&name))
    }

    pub async fn tag(&self, identity: &Identity, id: &str) -> KbResult<Tag> {
        self.storage
            .get_tag(identity.as_str(), id)
            .await
            .storage()?
            .ok_or_else(|| KbError::not_found("tag", id))
    }

    pub async fn list_tags(&self, identity: &Identity, query: TagQuery) -> KbResult<Vec<TagEntry>> {
        let tags = self
            .storage
            .list_tags(identity.as_str(), query.name.as_deref().map(str::trim))
            .await
            .storage()?;
        Ok(tags
            .into_iter()
            .map(|counted| TagEntry {
                tag_id: counted.item.id,
                name: counted.item.name,
                sort: counted.item.sort,
                article_count: counted.article_count,
                created_at: counted.item.created_at,
                updated_at: counted.item.updated_at,
            })
            .collect())
    }

    /// Tags only carry a name, so an update is a rename. Without a name the
    /// tag is returned unchanged.
    pub async fn update_tag(&self, identity: &Identity, id: &str, input: TagInput) -> KbResult<Tag> {
        let owner = identity.as_str();
        let current = self.tag(identity, id).await?;
        let Some(name) = input.name.as_deref() else {
            return Ok(current);
        };
        let name = required_text("name", Some(name), TAG_NAME_MAX_CHARS)?;
        self.ensure_tag_name_free(owner, &name, Some(id)).await?;
        self.storage
            .rename_tag(owner, id, &name)
            .await
            .unique(|| duplicate_name(&name))?
            .ok_or_else(|| KbError::not_found("tag", id))
    }

    pub async fn sort_tag(&self, identity: &Identity, id: &str, position: i64) -> KbResult<Tag> {
        let owner = identity.as_str();
        self.move_to(SortScope::Tags { owner }, "tag", id, position)
            .await?;
        self.tag(identity, id).await
    }

    pub async fn delete_tag(&self, identity: &Identity, id: &str) -> KbResult<()> {
        if self
            .storage
            .soft_delete_tag(identity.as_str(), id)
            .await
            .storage()?
        {
            Ok(())
        } else {
            Err(KbError::not_found("tag", id))
        }
    }

    async fn ensure_tag_name_free(
        &self,
        owner: &str,
        name: &str,
        exclude_id: Option<&str>,
    ) -> KbResult<()> {
        if self
            .storage
            .tag_name_exists(owner, name, exclude_id)
            .await
            .storage()?
        {
            return Err(KbError::Duplicate(duplicate_name(name)));
        }
        Ok(())
    }
}

fn duplicate_name(name: &str) -> String {
    format!("a tag named \"{name}\" already exists")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anthology::AnthologyInput;
    use crate::article::ArticleInput;
    use crate::testing::{alice, fixture};

    fn named(name: &str) -> TagInput {
        TagInput {
            name: Some(name.to_string()),
        }
    }

    #[tokio::test]
    async fn lists_in_rank_order_with_article_counts() {
        let fx = fixture().await;
        let rust = fx.kb.create_tag(&alice(), named("rust")).await.expect("tag");
        let sql = fx.kb.create_tag(&alice(), named("sql")).await.expect("tag");
        let space = fx
            .kb
            .create_anthology(
                &alice(),
                AnthologyInput {
                    title: Some("Space".to_string()),
                    ..AnthologyInput::default()
                },
            )
            .await
            .expect("anthology");
        fx.kb
            .create_article(
                &alice(),
                ArticleInput {
                    title: Some("sqlx".to_string()),
                    anthology_id: Some(space.id.clone()),
                    tag_ids: Some(vec![rust.id.clone(), sql.id.clone()]),
                    ..ArticleInput::default()
                },
            )
            .await
            .expect("article");

        fx.kb.sort_tag(&alice(), &sql.id, 1).await.expect("sort");
        let entries = fx.kb.list_tags(&alice(), TagQuery::default()).await.expect("list");
        let summary: Vec<(&str, i64, i64)> = entries
            .iter()
            .map(|e| (e.name.as_str(), e.sort, e.article_count))
            .collect();
        assert_eq!(summary, vec![("sql", 1, 1), ("rust", 2, 1)]);

        let filtered = fx
            .kb
            .list_tags(
                &alice(),
                TagQuery {
                    name: Some("RU".to_string()),
                },
            )
            .await
            .expect("list");
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].tag_id, rust.id);
    }

    #[tokio::test]
    async fn rename_checks_duplicates() {
        let fx = fixture().await;
        let a = fx.kb.create_tag(&alice(), named("a")).await.expect("tag");
        fx.kb.create_tag(&alice(), named("b")).await.expect("tag");

        assert!(matches!(
            fx.kb.update_tag(&alice(), &a.id, named("b")).await,
            Err(KbError::Duplicate(_))
        ));
        let renamed = fx.kb.update_tag(&alice(), &a.id, named("c")).await.expect("rename");
        assert_eq!(renamed.name, "c");

        let untouched = fx
            .kb
            .update_tag(&alice(), &a.id, TagInput::default())
            .await
            .expect("empty update");
        assert_eq!(untouched.name, "c");
        assert!(matches!(
            fx.kb.update_tag(&alice(), &a.id, named("  ")).await,
            Err(KbError::Validation(_))
        ));

        fx.kb.delete_tag(&alice(), &a.id).await.expect("delete");
        assert!(matches!(
            fx.kb.update_tag(&alice(), &a.id, named("d")).await,
            Err(KbError::NotFound { .. })
        ));
    }
}
