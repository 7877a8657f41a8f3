use core_types::anthology::{
    DEFAULT_DESCRIPTION, DEFAULT_ICON, DESCRIPTION_MAX_CHARS, ICON_MAX_CHARS, TITLE_MAX_CHARS,
};
use core_types::{Anthology, Identity, KbError, KbResult, Permission};
use serde::{Deserialize, Serialize};
use storage_sqlite::{AnthologyChanges, ArticlePreview, NewAnthology, SortScope};

use crate::{KnowledgeBase, StorageResultExt, bounded_text, required_text};

const PREVIEW_LEN: i64 = 3;

/// Body of create and update requests. On update every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnthologyInput {
    pub title: Option<String>,
    pub description: Option<String>,
    pub icon_id: Option<String>,
    pub permission: Option<Permission>,
    #[serde(alias = "is_top", alias = "isTop")]
    pub pinned: Option<bool>,
}

/// List entry: the anthology plus its first few articles.
#[derive(Debug, Clone, Serialize)]
pub struct AnthologySummary {
    #[serde(flatten)]
    pub anthology: Anthology,
    pub articles: Vec<ArticlePreview>,
}

impl KnowledgeBase {
    pub async fn create_anthology(
        &self,
        identity: &Identity,
        input: AnthologyInput,
    ) -> KbResult<Anthology> {
        let owner = identity.as_str();
        let title = required_text("title", input.title.as_deref(), TITLE_MAX_CHARS)?;
        let description = match input.description.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => bounded_text("description", text, DESCRIPTION_MAX_CHARS)?,
            _ => DEFAULT_DESCRIPTION.to_string(),
        };
        let icon_id = icon(input.icon_id.as_deref())?.unwrap_or_else(|| DEFAULT_ICON.to_string());

        self.ensure_anthology_title_free(owner, &title, None).await?;
        let sort = self
            .storage
            .next_rank(SortScope::Anthologies { owner })
            .await
            .storage()?;

        self.storage
            .create_anthology(
                owner,
                NewAnthology {
                    title: title.clone(),
                    description,
                    icon_id,
                    permission: input.permission.unwrap_or_default(),
                    pinned: input.pinned.unwrap_or(false),
                    sort,
                },
            )
            .await
            .unique(|| duplicate_title(&title))
    }

    pub async fn anthology(&self, identity: &Identity, id: &str) -> KbResult<Anthology> {
        self.storage
            .get_anthology(identity.as_str(), id)
            .await
            .storage()?
            .ok_or_else(|| KbError::not_found("anthology", id))
    }

    /// Pinned first, then rank, then most recently updated.
    pub async fn list_anthologies(&self, identity: &Identity) -> KbResult<Vec<AnthologySummary>> {
        let anthologies = self
            .storage
            .list_anthologies(identity.as_str())
            .await
            .storage()?;

        let mut summaries = Vec::with_capacity(anthologies.len());
        for anthology in anthologies {
            let articles = self
                .storage
                .article_previews(&anthology.id, PREVIEW_LEN)
                .await
                .storage()?;
            summaries.push(AnthologySummary {
                anthology,
                articles,
            });
        }
        Ok(summaries)
    }

    pub async fn update_anthology(
        &self,
        identity: &Identity,
        id: &str,
        input: AnthologyInput,
    ) -> KbResult<Anthology> {
        let owner = identity.as_str();
        let title = input
            .title
            .as_deref()
            .map(|title| required_text("title", Some(title), TITLE_MAX_CHARS))
            .transpose()?;
        let description = input
            .description
            .as_deref()
            .map(|text| bounded_text("description", text, DESCRIPTION_MAX_CHARS))
            .transpose()?;
        let icon_id = icon(input.icon_id.as_deref())?;

        self.anthology(identity, id).await?;
        if let Some(title) = &title {
            self.ensure_anthology_title_free(owner, title, Some(id)).await?;
        }

        let changes = AnthologyChanges {
            title: title.clone(),
            description,
            icon_id,
            permission: input.permission,
            pinned: input.pinned,
        };
        self.storage
            .update_anthology(owner, id, changes)
            .await
            .unique(|| duplicate_title(title.as_deref().unwrap_or_default()))?
            .ok_or_else(|| KbError::not_found("anthology", id))
    }

    /// Moves the anthology to `position` among the owner's unpinned anthologies.
    pub async fn sort_anthology(
        &self,
        identity: &Identity,
        id: &str,
        position: i64,
    ) -> KbResult<Anthology> {
        let owner = identity.as_str();
        self.move_to(SortScope::Anthologies { owner }, "anthology", id, position)
            .await?;
        self.anthology(identity, id).await
    }

    pub async fn delete_anthology(&self, identity: &Identity, id: &str) -> KbResult<()> {
        if self
            .storage
            .soft_delete_anthology(identity.as_str(), id)
            .await
            .storage()?
        {
            Ok(())
        } else {
            Err(KbError::not_found("anthology", id))
        }
    }

    async fn ensure_anthology_title_free(
        &self,
        owner: &str,
        title: &str,
        exclude_id: Option<&str>,
    ) -> KbResult<()> {
        if self
            .storage
            .anthology_title_exists(owner, title, exclude_id)
            .await
            .storage()?
        {
            return Err(KbError::Duplicate(duplicate_title(title)));
        }
        Ok(())
    }
}

fn duplicate_title(title: &str) -> String {
    format!("an anthology titled \"{title}\" already exists")
}

/// A blank icon means "not given".
fn icon(value: Option<&str>) -> KbResult<Option<String>> {
    match value.map(str::trim) {
        Some(icon) if !icon.is_empty() => bounded_text("icon_id", icon, ICON_MAX_CHARS).map(Some),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use core_types::ErrorCode;

    use super::*;
    use crate::testing::{alice, bob, fixture};

    fn titled(title: &str) -> AnthologyInput {
        AnthologyInput {
            title: Some(title.to_string()),
            ..AnthologyInput::default()
        }
    }

    #[tokio::test]
    async fn applies_defaults_and_ranks_after_existing() {
        let fx = fixture().await;
        let first = fx.kb.create_anthology(&alice(), titled("One")).await.expect("create");
        let second = fx.kb.create_anthology(&alice(), titled("Two")).await.expect("create");
        assert_eq!(first.description, DEFAULT_DESCRIPTION);
        assert_eq!(first.icon_id, DEFAULT_ICON);
        assert_eq!(first.permission, Permission::Public);
        assert_eq!(second.sort, first.sort + 1);
    }

    #[tokio::test]
    async fn duplicate_titles_are_per_owner() {
        let fx = fixture().await;
        fx.kb.create_anthology(&alice(), titled("Notes")).await.expect("create");

        let err = fx
            .kb
            .create_anthology(&alice(), titled("Notes"))
            .await
            .expect_err("duplicate");
        assert_eq!(err.code(), ErrorCode::TitleDuplicate);

        fx.kb
            .create_anthology(&bob(), titled("Notes"))
            .await
            .expect("other owner");
    }

    #[tokio::test]
    async fn validates_lengths() {
        let fx = fixture().await;
        let long = "x".repeat(TITLE_MAX_CHARS + 1);
        let err = fx
            .kb
            .create_anthology(&alice(), titled(&long))
            .await
            .expect_err("too long");
        assert!(matches!(err, KbError::Validation(_)));

        let err = fx
            .kb
            .create_anthology(&alice(), AnthologyInput::default())
            .await
            .expect_err("missing title");
        assert_eq!(err.to_string(), "title is required");

        let err = fx
            .kb
            .create_anthology(
                &alice(),
                AnthologyInput {
                    icon_id: Some("i".repeat(ICON_MAX_CHARS + 1)),
                    ..titled("Icons")
                },
            )
            .await
            .expect_err("icon too long");
        assert_eq!(err.to_string(), "icon_id must be at most 20 characters");

        let created = fx.kb.create_anthology(&alice(), titled("Icons")).await.expect("create");
        let err = fx
            .kb
            .update_anthology(
                &alice(),
                &created.id,
                AnthologyInput {
                    icon_id: Some("i".repeat(ICON_MAX_CHARS + 1)),
                    ..AnthologyInput::default()
                },
            )
            .await
            .expect_err("icon too long");
        assert!(matches!(err, KbError::Validation(_)));
    }

    #[tokio::test]
    async fn update_rechecks_title_and_keeps_other_fields() {
        let fx = fixture().await;
        let a = fx.kb.create_anthology(&alice(), titled("A")).await.expect("create");
        fx.kb.create_anthology(&alice(), titled("B")).await.expect("create");

        let err = fx
            .kb
            .update_anthology(&alice(), &a.id, titled("B"))
            .await
            .expect_err("taken");
        assert!(matches!(err, KbError::Duplicate(_)));

        // renaming to its own title is fine
        let same = fx
            .kb
            .update_anthology(&alice(), &a.id, titled("A"))
            .await
            .expect("same title");
        assert_eq!(same.title, "A");

        let pinned = fx
            .kb
            .update_anthology(
                &alice(),
                &a.id,
                AnthologyInput {
                    pinned: Some(true),
                    ..AnthologyInput::default()
                },
            )
            .await
            .expect("pin");
        assert!(pinned.pinned);
        assert_eq!(pinned.title, "A");
    }

    #[tokio::test]
    async fn sort_moves_within_unpinned_and_rejects_pinned() {
        let fx = fixture().await;
        let mut ids = Vec::new();
        for title in ["A", "B", "C"] {
            ids.push(
                fx.kb
                    .create_anthology(&alice(), titled(title))
                    .await
                    .expect("create")
                    .id,
            );
        }
        let pinned = fx
            .kb
            .create_anthology(
                &alice(),
                AnthologyInput {
                    pinned: Some(true),
                    ..titled("P")
                },
            )
            .await
            .expect("create");

        let moved = fx.kb.sort_anthology(&alice(), &ids[2], 1).await.expect("sort");
        assert_eq!(moved.sort, 1);

        let listed = fx.kb.list_anthologies(&alice()).await.expect("list");
        let order: Vec<&str> = listed.iter().map(|s| s.anthology.title.as_str()).collect();
        assert_eq!(order, vec!["P", "C", "A", "B"]);
        let ranks: Vec<i64> = listed[1..].iter().map(|s| s.anthology.sort).collect();
        assert_eq!(ranks, vec![1, 2, 3]);

        let err = fx
            .kb
            .sort_anthology(&alice(), &pinned.id, 1)
            .await
            .expect_err("pinned");
        assert!(matches!(err, KbError::Validation(_)));

        let err = fx
            .kb
            .sort_anthology(&alice(), &ids[0], 0)
            .await
            .expect_err("position");
        assert_eq!(err.to_string(), "sort must be a positive integer");

        let err = fx
            .kb
            .sort_anthology(&bob(), &ids[0], 1)
            .await
            .expect_err("not bob's");
        assert_eq!(err.code(), ErrorCode::ResourceNotFound);
    }

    #[tokio::test]
    async fn deleted_anthologies_disappear() {
        let fx = fixture().await;
        let a = fx.kb.create_anthology(&alice(), titled("Gone")).await.expect("create");
        fx.kb.delete_anthology(&alice(), &a.id).await.expect("delete");

        assert!(matches!(
            fx.kb.anthology(&alice(), &a.id).await,
            Err(KbError::NotFound { .. })
        ));
        assert!(matches!(
            fx.kb.delete_anthology(&alice(), &a.id).await,
            Err(KbError::NotFound { .. })
        ));
        assert!(fx.kb.list_anthologies(&alice()).await.expect("list").is_empty());
    }
}
