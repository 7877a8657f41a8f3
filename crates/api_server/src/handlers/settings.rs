use std::sync::Arc;

use axum::extract::State;
use core_types::{AiConfig, AiModel, AiProvider};
use kb_services::settings::{ModelInput, ProviderInput};

use crate::extract::{ApiJson, ApiPath};
use crate::{ApiResult, ApiState};

pub async fn list_providers(State(state): State<Arc<ApiState>>) -> ApiResult<Vec<AiProvider>> {
    Ok(state.ok(state.kb.list_providers().await?))
}

pub async fn create_provider(
    State(state): State<Arc<ApiState>>,
    ApiJson(input): ApiJson<ProviderInput>,
) -> ApiResult<AiProvider> {
    Ok(state.ok(state.kb.create_provider(input).await?))
}

pub async fn provider_detail(
    State(state): State<Arc<ApiState>>,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<AiProvider> {
    Ok(state.ok(state.kb.provider(&id).await?))
}

pub async fn update_provider(
    State(state): State<Arc<ApiState>>,
    ApiPath(id): ApiPath<String>,
    ApiJson(input): ApiJson<ProviderInput>,
) -> ApiResult<AiProvider> {
    Ok(state.ok(state.kb.update_provider(&id, input).await?))
}

pub async fn delete_provider(
    State(state): State<Arc<ApiState>>,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<()> {
    state.kb.delete_provider(&id).await?;
    Ok(state.done())
}

pub async fn create_model(
    State(state): State<Arc<ApiState>>,
    ApiJson(input): ApiJson<ModelInput>,
) -> ApiResult<AiModel> {
    Ok(state.ok(state.kb.create_model(input).await?))
}

pub async fn delete_model(
    State(state): State<Arc<ApiState>>,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<()> {
    state.kb.delete_model(&id).await?;
    Ok(state.done())
}

pub async fn get_ai_config(State(state): State<Arc<ApiState>>) -> ApiResult<AiConfig> {
    Ok(state.ok(state.kb.ai_config().await?))
}

pub async fn save_ai_config(
    State(state): State<Arc<ApiState>>,
    ApiJson(config): ApiJson<AiConfig>,
) -> ApiResult<AiConfig> {
    state.kb.save_ai_config(config.clone()).await?;
    Ok(state.ok(config))
}
