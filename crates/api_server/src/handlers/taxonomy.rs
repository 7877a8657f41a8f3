//! Categories and tags share one shape: create, detail, list, update, sort
//! and delete.

use std::sync::Arc;

use axum::extract::State;
use core_types::{Category, Tag};
use kb_services::category::{CategoryEntry, CategoryInput, CategoryQuery};
use kb_services::tag::{TagEntry, TagInput, TagQuery};

use super::SortBody;
use crate::extract::{ApiJson, ApiPath, ApiQuery, CurrentUser};
use crate::{ApiResult, ApiState};

pub async fn create_category(
    State(state): State<Arc<ApiState>>,
    CurrentUser(user): CurrentUser,
    ApiJson(input): ApiJson<CategoryInput>,
) -> ApiResult<Category> {
    Ok(state.ok(state.kb.create_category(&user, input).await?))
}

pub async fn category_detail(
    State(state): State<Arc<ApiState>>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Category> {
    Ok(state.ok(state.kb.category(&user, &id).await?))
}

pub async fn list_categories(
    State(state): State<Arc<ApiState>>,
    CurrentUser(user): CurrentUser,
    ApiQuery(query): ApiQuery<CategoryQuery>,
) -> ApiResult<Vec<CategoryEntry>> {
    Ok(state.ok(state.kb.list_categories(&user, query).await?))
}

pub async fn update_category(
    State(state): State<Arc<ApiState>>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<String>,
    ApiJson(input): ApiJson<CategoryInput>,
) -> ApiResult<Category> {
    Ok(state.ok(state.kb.update_category(&user, &id, input).await?))
}

pub async fn sort_category(
    State(state): State<Arc<ApiState>>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<String>,
    ApiJson(body): ApiJson<SortBody>,
) -> ApiResult<Category> {
    Ok(state.ok(state.kb.sort_category(&user, &id, body.position()).await?))
}

pub async fn delete_category(
    State(state): State<Arc<ApiState>>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<()> {
    state.kb.delete_category(&user, &id).await?;
    Ok(state.done())
}

pub async fn create_tag(
    State(state): State<Arc<ApiState>>,
    CurrentUser(user): CurrentUser,
    ApiJson(input): ApiJson<TagInput>,
) -> ApiResult<Tag> {
    Ok(state.ok(state.kb.create_tag(&user, input).await?))
}

pub async fn tag_detail(
    State(state): State<Arc<ApiState>>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Tag> {
    Ok(state.ok(state.kb.tag(&user, &id).await?))
}

pub async fn list_tags(
    State(state): State<Arc<ApiState>>,
    CurrentUser(user): CurrentUser,
    ApiQuery(query): ApiQuery<TagQuery>,
) -> ApiResult<Vec<TagEntry>> {
    Ok(state.ok(state.kb.list_tags(&user, query).await?))
}

pub async fn update_tag(
    State(state): State<Arc<ApiState>>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<String>,
    ApiJson(input): ApiJson<TagInput>,
) -> ApiResult<Tag> {
    Ok(state.ok(state.kb.update_tag(&user, &id, input).await?))
}

pub async fn sort_tag(
    State(state): State<Arc<ApiState>>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<String>,
    ApiJson(body): ApiJson<SortBody>,
) -> ApiResult<Tag> {
    Ok(state.ok(state.kb.sort_tag(&user, &id, body.position()).await?))
}

pub async fn delete_tag(
    State(state): State<Arc<ApiState>>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<()> {
    state.kb.delete_tag(&user, &id).await?;
    Ok(state.done())
}
