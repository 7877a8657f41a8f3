use std::sync::Arc;

use axum::extract::State;
use core_types::Article;
use kb_services::article::{ArticleDetail, ArticleInput, ArticleQuery};
use kb_services::tree::ArticleNode;
use serde::Deserialize;

use crate::extract::{ApiJson, ApiPath, ApiQuery, CurrentUser};
use crate::{ApiResult, ApiState};

#[derive(Debug, Deserialize)]
pub struct TreeQuery {
    #[serde(default)]
    coll_id: String,
}

pub async fn create(
    State(state): State<Arc<ApiState>>,
    CurrentUser(user): CurrentUser,
    ApiJson(input): ApiJson<ArticleInput>,
) -> ApiResult<Article> {
    Ok(state.ok(state.kb.create_article(&user, input).await?))
}

pub async fn detail(
    State(state): State<Arc<ApiState>>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<ArticleDetail> {
    Ok(state.ok(state.kb.article_detail(&user, &id).await?))
}

pub async fn update(
    State(state): State<Arc<ApiState>>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<String>,
    ApiJson(input): ApiJson<ArticleInput>,
) -> ApiResult<Article> {
    Ok(state.ok(state.kb.update_article(&user, &id, input).await?))
}

pub async fn remove(
    State(state): State<Arc<ApiState>>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<()> {
    state.kb.delete_article(&user, &id).await?;
    Ok(state.done())
}

pub async fn list(
    State(state): State<Arc<ApiState>>,
    CurrentUser(user): CurrentUser,
    ApiQuery(query): ApiQuery<ArticleQuery>,
) -> ApiResult<Vec<Article>> {
    Ok(state.ok(state.kb.list_articles(&user, query).await?))
}

pub async fn tree(
    State(state): State<Arc<ApiState>>,
    CurrentUser(user): CurrentUser,
    ApiQuery(query): ApiQuery<TreeQuery>,
) -> ApiResult<Vec<ArticleNode>> {
    Ok(state.ok(state.kb.article_tree(&user, &query.coll_id).await?))
}
