use core_types::article::TITLE_MAX_CHARS;
use core_types::{Article, ArticleRef, Category, Identity, KbError, KbResult, Permission, Tag};
use serde::{Deserialize, Serialize};
use storage_sqlite::{ArticleChanges, ArticleFilter, LeafDelete, NewArticle};

use crate::tree::{self, ArticleNode};
use crate::{KnowledgeBase, StorageResultExt, nullable_id, required_text};

/// Body of article create and update requests.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArticleInput {
    pub title: Option<String>,
    pub content: Option<String>,
    #[serde(alias = "coll_id", alias = "collId")]
    pub anthology_id: Option<String>,
    #[serde(default, deserialize_with = "nullable_id")]
    pub parent_id: Option<Option<String>>,
    pub permission: Option<Permission>,
    #[serde(default, deserialize_with = "nullable_id")]
    pub category_id: Option<Option<String>>,
    #[serde(alias = "tags")]
    pub tag_ids: Option<Vec<String>>,
    pub sort: Option<i64>,
}

/// Query string of `GET /article/list`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArticleQuery {
    pub coll_id: Option<String>,
    pub tag_id: Option<String>,
    pub category_id: Option<String>,
    pub keyword: Option<String>,
}

impl From<ArticleQuery> for ArticleFilter {
    fn from(query: ArticleQuery) -> Self {
        let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());
        Self {
            anthology_id: non_empty(query.coll_id),
            tag_id: non_empty(query.tag_id),
            category_id: non_empty(query.category_id),
            keyword: non_empty(query.keyword).map(|k| k.trim().to_string()),
        }
    }
}

/// An article with its links resolved.
#[derive(Debug, Clone, Serialize)]
pub struct ArticleDetail {
    #[serde(flatten)]
    pub article: Article,
    pub category: Option<Category>,
    pub tags: Vec<Tag>,
    pub parent: Option<ArticleRef>,
}

impl KnowledgeBase {
    pub async fn create_article(
        &self,
        identity: &Identity,
        input: ArticleInput,
    ) -> KbResult<Article> {
        let author = identity.as_str();
        let title = required_text("title", input.title.as_deref(), TITLE_MAX_CHARS)?;
        let anthology_id = input
            .anthology_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| KbError::validation("coll_id is required"))?;
        self.anthology(identity, &anthology_id).await?;

        let parent_id = input.parent_id.flatten();
        if let Some(parent_id) = &parent_id {
            self.ensure_parent(parent_id, &anthology_id).await?;
        }
        let category_id = input.category_id.flatten();
        if let Some(category_id) = &category_id {
            self.category(identity, category_id).await?;
        }
        let tag_ids = self
            .resolve_tag_ids(identity, input.tag_ids.unwrap_or_default())
            .await?;
        self.ensure_article_title_free(author, &anthology_id, &title, None)
            .await?;

        let article = self
            .storage
            .create_article(
                author,
                NewArticle {
                    title: title.clone(),
                    content: input.content.unwrap_or_default(),
                    anthology_id,
                    parent_id,
                    permission: input.permission.unwrap_or_default(),
                    category_id,
                    tag_ids,
                    sort: input.sort.unwrap_or(0),
                },
            )
            .await
            .unique(|| duplicate_title(&title))?;
        tracing::debug!(article = %article.id, anthology = %article.anthology_id, "article created");
        Ok(article)
    }

    /// Reads an article and counts the read. Other users' private articles
    /// are reported as missing.
    pub async fn article_detail(&self, identity: &Identity, id: &str) -> KbResult<ArticleDetail> {
        let article = self.readable_article(identity, id).await?;
        self.storage.increment_read_count(id).await.storage()?;
        let article = Article {
            read_count: article.read_count + 1,
            ..article
        };

        let owner = article.author.as_str();
        let category = match &article.category_id {
            Some(category_id) => self
                .storage
                .get_category(owner, category_id)
                .await
                .storage()?,
            None => None,
        };
        let mut tags = Vec::with_capacity(article.tag_ids.len());
        for tag_id in &article.tag_ids {
            if let Some(tag) = self.storage.get_tag(owner, tag_id).await.storage()? {
                tags.push(tag);
            }
        }
        let parent = match &article.parent_id {
            Some(parent_id) => self
                .storage
                .get_article(parent_id)
                .await
                .storage()?
                .map(|parent| ArticleRef::from(&parent)),
            None => None,
        };

        Ok(ArticleDetail {
            article,
            category,
            tags,
            parent,
        })
    }

    pub async fn update_article(
        &self,
        identity: &Identity,
        id: &str,
        input: ArticleInput,
    ) -> KbResult<Article> {
        let author = identity.as_str();
        let current = self.owned_article(identity, id).await?;

        let title = input
            .title
            .as_deref()
            .map(|title| required_text("title", Some(title), TITLE_MAX_CHARS))
            .transpose()?;

        let anthology_id = input
            .anthology_id
            .filter(|anthology_id| !anthology_id.trim().is_empty());
        if let Some(anthology_id) = &anthology_id {
            self.anthology(identity, anthology_id).await?;
        }
        let target_anthology = anthology_id
            .clone()
            .unwrap_or_else(|| current.anthology_id.clone());

        // moving to another anthology detaches from a parent left behind
        let parent_id = match input.parent_id {
            None if target_anthology != current.anthology_id && current.parent_id.is_some() => {
                Some(None)
            }
            other => other,
        };
        if let Some(Some(parent_id)) = &parent_id {
            if parent_id == id {
                return Err(KbError::validation("an article cannot be its own parent"));
            }
            self.ensure_parent(parent_id, &target_anthology).await?;
            let siblings = self
                .storage
                .list_anthology_articles(&target_anthology)
                .await
                .storage()?;
            if tree::would_create_cycle(&siblings, id, parent_id) {
                return Err(KbError::validation(
                    "parent_id would make the article its own ancestor",
                ));
            }
        }

        if let Some(Some(category_id)) = &input.category_id {
            self.category(identity, category_id).await?;
        }
        let tag_ids = match input.tag_ids {
            Some(tag_ids) => Some(self.resolve_tag_ids(identity, tag_ids).await?),
            None => None,
        };

        let effective_title = title.as_deref().unwrap_or(&current.title);
        if title.is_some() || anthology_id.is_some() {
            self.ensure_article_title_free(author, &target_anthology, effective_title, Some(id))
                .await?;
        }
        let duplicate = duplicate_title(effective_title);

        let changes = ArticleChanges {
            title,
            content: input.content,
            anthology_id,
            parent_id,
            permission: input.permission,
            category_id: input.category_id,
            tag_ids,
            sort: input.sort,
        };
        self.storage
            .update_article(id, changes)
            .await
            .unique(|| duplicate)?
            .ok_or_else(|| KbError::not_found("article", id))
    }

    /// Soft-deletes an article. Refused while any active child remains.
    pub async fn delete_article(&self, identity: &Identity, id: &str) -> KbResult<()> {
        self.owned_article(identity, id).await?;
        match self.storage.soft_delete_leaf_article(id).await.storage()? {
            LeafDelete::Deleted => Ok(()),
            LeafDelete::HasChildren => Err(KbError::HasChildren(id.to_string())),
            LeafDelete::Missing => Err(KbError::not_found("article", id)),
        }
    }

    pub async fn list_articles(
        &self,
        identity: &Identity,
        query: ArticleQuery,
    ) -> KbResult<Vec<Article>> {
        self.storage
            .list_articles(identity.as_str(), &query.into())
            .await
            .storage()
    }

    /// The anthology's articles nested under their parents.
    pub async fn article_tree(
        &self,
        identity: &Identity,
        anthology_id: &str,
    ) -> KbResult<Vec<ArticleNode>> {
        if anthology_id.trim().is_empty() {
            return Err(KbError::validation("coll_id is required"));
        }
        self.anthology(identity, anthology_id).await?;
        let articles = self
            .storage
            .list_anthology_articles(anthology_id)
            .await
            .storage()?;
        Ok(tree::assemble(&articles))
    }

    async fn readable_article(&self, identity: &Identity, id: &str) -> KbResult<Article> {
        let article = self
            .storage
            .get_article(id)
            .await
            .storage()?
            .ok_or_else(|| KbError::not_found("article", id))?;
        if article.permission == Permission::Private && article.author != identity.as_str() {
            return Err(KbError::not_found("article", id));
        }
        Ok(article)
    }

    async fn owned_article(&self, identity: &Identity, id: &str) -> KbResult<Article> {
        self.storage
            .get_article(id)
            .await
            .storage()?
            .filter(|article| article.author == identity.as_str())
            .ok_or_else(|| KbError::not_found("article", id))
    }

    async fn ensure_parent(&self, parent_id: &str, anthology_id: &str) -> KbResult<()> {
        let parent = self
            .storage
            .get_article(parent_id)
            .await
            .storage()?
            .ok_or_else(|| KbError::not_found("article", parent_id))?;
        if parent.anthology_id != anthology_id {
            return Err(KbError::validation(
                "parent_id must belong to the same anthology",
            ));
        }
        Ok(())
    }

    /// Checks every tag exists and drops repeats, keeping first-seen order.
    async fn resolve_tag_ids(&self, identity: &Identity, tag_ids: Vec<String>) -> KbResult<Vec<String>> {
        let mut resolved: Vec<String> = Vec::with_capacity(tag_ids.len());
        for tag_id in tag_ids {
            let tag_id = tag_id.trim().to_string();
            if tag_id.is_empty() || resolved.contains(&tag_id) {
                continue;
            }
            self.tag(identity, &tag_id).await?;
            resolved.push(tag_id);
        }
        Ok(resolved)
    }

    async fn ensure_article_title_free(
        &self,
        author: &str,
        anthology_id: &str,
        title: &str,
        exclude_id: Option<&str>,
    ) -> KbResult<()> {
        if self
            .storage
            .article_title_exists(author, anthology_id, title, exclude_id)
            .await
            .storage()?
        {
            return Err(KbError::Duplicate(duplicate_title(title)));
        }
        Ok(())
    }
}

fn duplicate_title(title: &str) -> String {
    format!("an article titled \"{title}\" already exists in this anthology")
}

#[cfg(test)]
mod tests {
    use core_types::ErrorCode;

    use super::*;
    use crate::anthology::AnthologyInput;
    use crate::category::CategoryInput;
    use crate::tag::TagInput;
    use crate::testing::{Fixture, alice, bob, fixture};
    use crate::tree::NodeKind;

    async fn anthology(fx: &Fixture, title: &str) -> String {
        fx.kb
            .create_anthology(
                &alice(),
                AnthologyInput {
                    title: Some(title.to_string()),
                    ..AnthologyInput::default()
                },
            )
            .await
            .expect("anthology")
            .id
    }

    fn input(title: &str, anthology_id: &str, parent: Option<&str>) -> ArticleInput {
        ArticleInput {
            title: Some(title.to_string()),
            anthology_id: Some(anthology_id.to_string()),
            parent_id: parent.map(|p| Some(p.to_string())),
            ..ArticleInput::default()
        }
    }

    async fn article(fx: &Fixture, title: &str, anthology_id: &str, parent: Option<&str>) -> Article {
        fx.kb
            .create_article(&alice(), input(title, anthology_id, parent))
            .await
            .expect("article")
    }

    #[tokio::test]
    async fn create_validates_links() {
        let fx = fixture().await;
        let space = anthology(&fx, "Space").await;
        let other = anthology(&fx, "Other").await;
        let foreign_parent = article(&fx, "Elsewhere", &other, None).await;

        let err = fx
            .kb
            .create_article(&alice(), input("T", "coll_missing", None))
            .await
            .expect_err("anthology");
        assert_eq!(err.code(), ErrorCode::ResourceNotFound);

        let err = fx
            .kb
            .create_article(&alice(), input("T", &space, Some(&foreign_parent.id)))
            .await
            .expect_err("parent elsewhere");
        assert!(matches!(err, KbError::Validation(_)));

        let err = fx
            .kb
            .create_article(
                &alice(),
                ArticleInput {
                    category_id: Some(Some("cat_missing".to_string())),
                    ..input("T", &space, None)
                },
            )
            .await
            .expect_err("category");
        assert!(matches!(err, KbError::NotFound { what: "category", .. }));

        let err = fx
            .kb
            .create_article(
                &alice(),
                ArticleInput {
                    tag_ids: Some(vec!["tag_missing".to_string()]),
                    ..input("T", &space, None)
                },
            )
            .await
            .expect_err("tag");
        assert!(matches!(err, KbError::NotFound { what: "tag", .. }));
    }

    #[tokio::test]
    async fn titles_are_unique_per_anthology() {
        let fx = fixture().await;
        let a = anthology(&fx, "A").await;
        let b = anthology(&fx, "B").await;
        article(&fx, "Intro", &a, None).await;
        article(&fx, "Intro", &b, None).await;

        let err = fx
            .kb
            .create_article(&alice(), input("Intro", &a, None))
            .await
            .expect_err("duplicate");
        assert_eq!(err.code(), ErrorCode::TitleDuplicate);
    }

    #[tokio::test]
    async fn detail_counts_reads_and_resolves_links() {
        let fx = fixture().await;
        let space = anthology(&fx, "Space").await;
        let category = fx
            .kb
            .create_category(
                &alice(),
                CategoryInput {
                    name: Some("Rust".to_string()),
                    ..CategoryInput::default()
                },
            )
            .await
            .expect("category");
        let tag = fx
            .kb
            .create_tag(
                &alice(),
                TagInput {
                    name: Some("async".to_string()),
                },
            )
            .await
            .expect("tag");
        let parent = article(&fx, "Parent", &space, None).await;
        let child = fx
            .kb
            .create_article(
                &alice(),
                ArticleInput {
                    category_id: Some(Some(category.id.clone())),
                    tag_ids: Some(vec![tag.id.clone(), tag.id.clone()]),
                    ..input("Child", &space, Some(&parent.id))
                },
            )
            .await
            .expect("child");
        assert_eq!(child.tag_ids, vec![tag.id.clone()]);

        let first = fx.kb.article_detail(&alice(), &child.id).await.expect("detail");
        let second = fx.kb.article_detail(&alice(), &child.id).await.expect("detail");
        assert_eq!(first.article.read_count, 1);
        assert_eq!(second.article.read_count, 2);
        assert_eq!(second.category.map(|c| c.name), Some("Rust".to_string()));
        assert_eq!(second.tags.len(), 1);
        assert_eq!(second.parent.map(|p| p.title), Some("Parent".to_string()));
    }

    #[tokio::test]
    async fn private_articles_are_hidden_from_others() {
        let fx = fixture().await;
        let space = anthology(&fx, "Space").await;
        let secret = fx
            .kb
            .create_article(
                &alice(),
                ArticleInput {
                    permission: Some(Permission::Private),
                    ..input("Secret", &space, None)
                },
            )
            .await
            .expect("article");

        let err = fx
            .kb
            .article_detail(&bob(), &secret.id)
            .await
            .expect_err("hidden");
        assert_eq!(err.code(), ErrorCode::ArticleNotExist);
        fx.kb.article_detail(&alice(), &secret.id).await.expect("own");
    }

    #[tokio::test]
    async fn delete_refuses_while_children_remain() {
        let fx = fixture().await;
        let space = anthology(&fx, "Space").await;
        let parent = article(&fx, "Parent", &space, None).await;
        let child = article(&fx, "Child", &space, Some(&parent.id)).await;

        let err = fx
            .kb
            .delete_article(&alice(), &parent.id)
            .await
            .expect_err("has children");
        assert_eq!(err.code(), ErrorCode::ArticleHasChildren);
        let tree = fx.kb.article_tree(&alice(), &space).await.expect("tree");
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].children.len(), 1);

        fx.kb.delete_article(&alice(), &child.id).await.expect("leaf");
        fx.kb.delete_article(&alice(), &parent.id).await.expect("now empty");
        assert!(fx.kb.article_tree(&alice(), &space).await.expect("tree").is_empty());
    }

    #[tokio::test]
    async fn update_rejects_cycles_and_foreign_authors() {
        let fx = fixture().await;
        let space = anthology(&fx, "Space").await;
        let a = article(&fx, "A", &space, None).await;
        let b = article(&fx, "B", &space, Some(&a.id)).await;

        let err = fx
            .kb
            .update_article(
                &alice(),
                &a.id,
                ArticleInput {
                    parent_id: Some(Some(b.id.clone())),
                    ..ArticleInput::default()
                },
            )
            .await
            .expect_err("cycle");
        assert!(matches!(err, KbError::Validation(_)));

        let err = fx
            .kb
            .update_article(
                &alice(),
                &a.id,
                ArticleInput {
                    parent_id: Some(Some(a.id.clone())),
                    ..ArticleInput::default()
                },
            )
            .await
            .expect_err("self");
        assert!(matches!(err, KbError::Validation(_)));

        let err = fx
            .kb
            .update_article(&bob(), &a.id, ArticleInput::default())
            .await
            .expect_err("not bob's");
        assert_eq!(err.code(), ErrorCode::ArticleNotExist);

        let detached = fx
            .kb
            .update_article(
                &alice(),
                &b.id,
                ArticleInput {
                    parent_id: Some(None),
                    content: Some("body".to_string()),
                    ..ArticleInput::default()
                },
            )
            .await
            .expect("detach");
        assert_eq!(detached.parent_id, None);
        assert_eq!(detached.title, "B");
        assert_eq!(detached.content, "body");

        let tree = fx.kb.article_tree(&alice(), &space).await.expect("tree");
        assert!(tree.iter().all(|node| node.kind == NodeKind::Doc));
    }

    #[tokio::test]
    async fn list_filters_by_category_tag_and_keyword() {
        let fx = fixture().await;
        let space = anthology(&fx, "Space").await;
        let category = fx
            .kb
            .create_category(
                &alice(),
                CategoryInput {
                    name: Some("Notes".to_string()),
                    ..CategoryInput::default()
                },
            )
            .await
            .expect("category");
        let tag = fx
            .kb
            .create_tag(
                &alice(),
                TagInput {
                    name: Some("db".to_string()),
                },
            )
            .await
            .expect("tag");
        fx.kb
            .create_article(
                &alice(),
                ArticleInput {
                    category_id: Some(Some(category.id.clone())),
                    tag_ids: Some(vec![tag.id.clone()]),
                    ..input("SQLite Tips", &space, None)
                },
            )
            .await
            .expect("tagged");
        article(&fx, "Loose thoughts", &space, None).await;

        let titles = |articles: Vec<Article>| -> Vec<String> {
            articles.into_iter().map(|a| a.title).collect()
        };

        let by_tag = fx
            .kb
            .list_articles(
                &alice(),
                ArticleQuery {
                    tag_id: Some(tag.id.clone()),
                    ..ArticleQuery::default()
                },
            )
            .await
            .expect("list");
        assert_eq!(titles(by_tag), vec!["SQLite Tips"]);

        let uncategorized = fx
            .kb
            .list_articles(
                &alice(),
                ArticleQuery {
                    category_id: Some("uncategorized".to_string()),
                    ..ArticleQuery::default()
                },
            )
            .await
            .expect("list");
        assert_eq!(titles(uncategorized), vec!["Loose thoughts"]);

        let by_keyword = fx
            .kb
            .list_articles(
                &alice(),
                ArticleQuery {
                    keyword: Some("sqlite".to_string()),
                    coll_id: Some(space.clone()),
                    ..ArticleQuery::default()
                },
            )
            .await
            .expect("list");
        assert_eq!(titles(by_keyword), vec!["SQLite Tips"]);

        assert!(
            fx.kb
                .list_articles(&bob(), ArticleQuery::default())
                .await
                .expect("list")
                .is_empty()
        );
    }

    #[tokio::test]
    async fn list_follows_rank_like_the_tree() {
        let fx = fixture().await;
        let space = anthology(&fx, "Space").await;
        for (title, sort) in [("third", 3), ("first", 1), ("second", 2)] {
            fx.kb
                .create_article(
                    &alice(),
                    ArticleInput {
                        sort: Some(sort),
                        ..input(title, &space, None)
                    },
                )
                .await
                .expect("article");
        }

        let listed: Vec<String> = fx
            .kb
            .list_articles(
                &alice(),
                ArticleQuery {
                    coll_id: Some(space.clone()),
                    ..ArticleQuery::default()
                },
            )
            .await
            .expect("list")
            .into_iter()
            .map(|a| a.title)
            .collect();
        assert_eq!(listed, vec!["first", "second", "third"]);

        let tree: Vec<String> = fx
            .kb
            .article_tree(&alice(), &space)
            .await
            .expect("tree")
            .into_iter()
            .map(|node| node.title)
            .collect();
        assert_eq!(tree, listed);
    }
}
