use chrono::{DateTime, Utc};
use core_types::taxonomy::{CATEGORY_DESCRIPTION_MAX_CHARS, CATEGORY_NAME_MAX_CHARS, UNCATEGORIZED};
use core_types::{Category, Identity, KbError, KbResult};
use serde::{Deserialize, Serialize};
use storage_sqlite::{CategoryChanges, NewCategory, SortScope};

use crate::{KnowledgeBase, StorageResultExt, bounded_text, required_text};

const UNCATEGORIZED_NAME: &str = "未分类";
const UNCATEGORIZED_DESCRIPTION: &str = "未关联分类的文章";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CategoryInput {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CategoryQuery {
    pub name: Option<String>,
    #[serde(default)]
    pub include_uncategorized: bool,
}

/// One row of the category list. The synthetic uncategorized bucket has no
/// timestamps.
#[derive(Debug, Clone, Serialize)]
pub struct CategoryEntry {
    pub category_id: String,
    pub name: String,
    pub description: String,
    pub sort: i64,
    pub article_count: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl KnowledgeBase {
    pub async fn create_category(
        &self,
        identity: &Identity,
        input: CategoryInput,
    ) -> KbResult<Category> {
        let owner = identity.as_str();
        let name = required_text("name", input.name.as_deref(), CATEGORY_NAME_MAX_CHARS)?;
        let description = bounded_text(
            "description",
            input.description.as_deref().unwrap_or_default(),
            CATEGORY_DESCRIPTION_MAX_CHARS,
        )?;
        self.ensure_category_name_free(owner, &name, None).await?;

        let sort = self
            .storage
            .next_rank(SortScope::Categories { owner })
            .await
            .storage()?;
        self.storage
            .create_category(
                owner,
                NewCategory {
                    name: name.clone(),
                    description,
                    sort,
                },
            )
            .await
            .unique(|| duplicate_name(&name))
    }

    pub async fn category(&self, identity: &Identity, id: &str) -> KbResult<Category> {
        self.storage
            .get_category(identity.as_str(), id)
            .await
            .storage()?
            .ok_or_else(|| KbError::not_found("category", id))
    }

    pub async fn list_categories(
        &self,
        identity: &Identity,
        query: CategoryQuery,
    ) -> KbResult<Vec<CategoryEntry>> {
        let owner = identity.as_str();
        let name = query.name.as_deref().map(str::trim);
        let categories = self
            .storage
            .list_categories(owner, name)
            .await
            .storage()?;

        let mut entries = Vec::with_capacity(categories.len() + 1);
        if query.include_uncategorized {
            entries.push(CategoryEntry {
                category_id: UNCATEGORIZED.to_string(),
                name: UNCATEGORIZED_NAME.to_string(),
                description: UNCATEGORIZED_DESCRIPTION.to_string(),
                sort: 0,
                article_count: self.storage.uncategorized_count(owner).await.storage()?,
                created_at: None,
                updated_at: None,
            });
        }
        entries.extend(categories.into_iter().map(|counted| CategoryEntry {
            category_id: counted.item.id,
            name: counted.item.name,
            description: counted.item.description,
            sort: counted.item.sort,
            article_count: counted.article_count,
            created_at: Some(counted.item.created_at),
            updated_at: Some(counted.item.updated_at),
        }));
        Ok(entries)
    }

    pub async fn update_category(
        &self,
        identity: &Identity,
        id: &str,
        input: CategoryInput,
    ) -> KbResult<Category> {
        let owner = identity.as_str();
        let name = input
            .name
            .as_deref()
            .map(|name| required_text("name", Some(name), CATEGORY_NAME_MAX_CHARS))
            .transpose()?;
        let description = input
            .description
            .as_deref()
            .map(|text| bounded_text("description", text, CATEGORY_DESCRIPTION_MAX_CHARS))
            .transpose()?;

        self.category(identity, id).await?;
        if let Some(name) = &name {
            self.ensure_category_name_free(owner, name, Some(id)).await?;
        }
        let duplicate = duplicate_name(name.as_deref().unwrap_or_default());
        self.storage
            .update_category(owner, id, CategoryChanges { name, description })
            .await
            .unique(|| duplicate)?
            .ok_or_else(|| KbError::not_found("category", id))
    }

    pub async fn sort_category(
        &self,
        identity: &Identity,
        id: &str,
        position: i64,
    ) -> KbResult<Category> {
        let owner = identity.as_str();
        self.move_to(SortScope::Categories { owner }, "category", id, position)
            .await?;
        self.category(identity, id).await
    }

    /// Articles keep pointing at a deleted category; lookups treat the link
    /// as absent.
    pub async fn delete_category(&self, identity: &Identity, id: &str) -> KbResult<()> {
        if self
            .storage
            .soft_delete_category(identity.as_str(), id)
            .await
            .storage()?
        {
            Ok(())
        } else {
            Err(KbError::not_found("category", id))
        }
    }

    async fn ensure_category_name_free(
        &self,
        owner: &str,
        name: &str,
        exclude_id: Option<&str>,
    ) -> KbResult<()> {
        if self
            .storage
            .category_name_exists(owner, name, exclude_id)
            .await
            .storage()?
        {
            return Err(KbError::Duplicate(duplicate_name(name)));
        }
        Ok(())
    }
}

fn duplicate_name(name: &str) -> String {
    format!("a category named \"{name}\" already exists")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anthology::AnthologyInput;
    use crate::article::ArticleInput;
    use crate::testing::{alice, bob, fixture};

    fn named(name: &str) -> CategoryInput {
        CategoryInput {
            name: Some(name.to_string()),
            description: None,
        }
    }

    #[tokio::test]
    async fn list_counts_articles_and_prepends_uncategorized_bucket() {
        let fx = fixture().await;
        let rust = fx.kb.create_category(&alice(), named("Rust")).await.expect("category");
        fx.kb.create_category(&alice(), named("Go")).await.expect("category");
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
        for (title, category) in [("a", Some(&rust.id)), ("b", Some(&rust.id)), ("c", None)] {
            fx.kb
                .create_article(
                    &alice(),
                    ArticleInput {
                        title: Some(title.to_string()),
                        anthology_id: Some(space.id.clone()),
                        category_id: Some(category.cloned()),
                        ..ArticleInput::default()
                    },
                )
                .await
                .expect("article");
        }

        let entries = fx
            .kb
            .list_categories(
                &alice(),
                CategoryQuery {
                    name: None,
                    include_uncategorized: true,
                },
            )
            .await
            .expect("list");
        let summary: Vec<(&str, i64)> = entries
            .iter()
            .map(|e| (e.name.as_str(), e.article_count))
            .collect();
        assert_eq!(summary, vec![(UNCATEGORIZED_NAME, 1), ("Rust", 2), ("Go", 0)]);
        assert_eq!(entries[0].category_id, UNCATEGORIZED);
        assert_eq!(entries[1].category_id, rust.id);
        assert!(entries[0].created_at.is_none());

        let filtered = fx
            .kb
            .list_categories(
                &alice(),
                CategoryQuery {
                    name: Some("ru".to_string()),
                    include_uncategorized: false,
                },
            )
            .await
            .expect("list");
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "Rust");
    }

    #[tokio::test]
    async fn names_are_unique_per_owner_and_bounded() {
        let fx = fixture().await;
        fx.kb.create_category(&alice(), named("Rust")).await.expect("category");
        assert!(matches!(
            fx.kb.create_category(&alice(), named("Rust")).await,
            Err(KbError::Duplicate(_))
        ));
        fx.kb.create_category(&bob(), named("Rust")).await.expect("other owner");
        assert!(matches!(
            fx.kb.create_category(&alice(), named("elevenchars")).await,
            Err(KbError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn update_sort_and_delete() {
        let fx = fixture().await;
        let first = fx.kb.create_category(&alice(), named("One")).await.expect("category");
        let second = fx.kb.create_category(&alice(), named("Two")).await.expect("category");

        let updated = fx
            .kb
            .update_category(
                &alice(),
                &first.id,
                CategoryInput {
                    name: None,
                    description: Some("first one".to_string()),
                },
            )
            .await
            .expect("update");
        assert_eq!(updated.name, "One");
        assert_eq!(updated.description, "first one");

        let moved = fx.kb.sort_category(&alice(), &second.id, 1).await.expect("sort");
        assert_eq!(moved.sort, 1);
        assert_eq!(fx.kb.category(&alice(), &first.id).await.expect("get").sort, 2);

        fx.kb.delete_category(&alice(), &first.id).await.expect("delete");
        assert!(matches!(
            fx.kb.category(&alice(), &first.id).await,
            Err(KbError::NotFound { .. })
        ));
    }
}
