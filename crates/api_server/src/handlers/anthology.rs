use std::sync::Arc;

use axum::extract::State;
use core_types::Anthology;
use kb_services::anthology::{AnthologyInput, AnthologySummary};

use super::SortBody;
use crate::extract::{ApiJson, ApiPath, CurrentUser};
use crate::{ApiResult, ApiState};

pub async fn create(
    State(state): State<Arc<ApiState>>,
    CurrentUser(user): CurrentUser,
    ApiJson(input): ApiJson<AnthologyInput>,
) -> ApiResult<Anthology> {
    let anthology = state.kb.create_anthology(&user, input).await?;
    Ok(state.ok(anthology))
}

pub async fn detail(
    State(state): State<Arc<ApiState>>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Anthology> {
    Ok(state.ok(state.kb.anthology(&user, &id).await?))
}

pub async fn list(
    State(state): State<Arc<ApiState>>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<Vec<AnthologySummary>> {
    Ok(state.ok(state.kb.list_anthologies(&user).await?))
}

pub async fn update(
    State(state): State<Arc<ApiState>>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<String>,
    ApiJson(input): ApiJson<AnthologyInput>,
) -> ApiResult<Anthology> {
    Ok(state.ok(state.kb.update_anthology(&user, &id, input).await?))
}

pub async fn sort(
    State(state): State<Arc<ApiState>>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<String>,
    ApiJson(body): ApiJson<SortBody>,
) -> ApiResult<Anthology> {
    Ok(state.ok(state.kb.sort_anthology(&user, &id, body.position()).await?))
}

pub async fn remove(
    State(state): State<Arc<ApiState>>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<()> {
    state.kb.delete_anthology(&user, &id).await?;
    Ok(state.done())
}
