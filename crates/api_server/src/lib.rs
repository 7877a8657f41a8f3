//! HTTP surface of the knowledge base. Every route lives under `/api` and
//! answers with the `{code, msg, data}` envelope, except the file downloads
//! and the chat stream.

pub mod error;
pub mod extract;
mod handlers;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::{Request, Response};
use axum::routing::{delete, get, post, put};
use core_types::Envelope;
use i18n::I18n;
use kb_services::KnowledgeBase;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use error::{ApiError, ApiResult};

/// Room for multipart framing on top of the file itself.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

pub struct ApiState {
    pub kb: KnowledgeBase,
    pub i18n: I18n,
    /// Acting user for requests without an `X-User-Id` header.
    pub default_owner: String,
}

impl ApiState {
    pub fn new(kb: KnowledgeBase, i18n: I18n, default_owner: impl Into<String>) -> Self {
        Self {
            kb,
            i18n,
            default_owner: default_owner.into(),
        }
    }

    pub(crate) fn ok<T: Serialize>(&self, data: T) -> axum::Json<Envelope<T>> {
        axum::Json(Envelope::success(
            self.i18n.code(core_types::ErrorCode::Success),
            Some(data),
        ))
    }

    pub(crate) fn done(&self) -> axum::Json<Envelope<()>> {
        axum::Json(Envelope::success(
            self.i18n.code(core_types::ErrorCode::Success),
            None,
        ))
    }
}

pub fn router(state: Arc<ApiState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let upload_limit = usize::try_from(state.kb.max_upload_bytes())
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    let api = Router::new()
        .route("/health", get(handlers::health))
        // anthologies
        .route("/anthology/create", post(handlers::anthology::create))
        .route("/anthology/list", get(handlers::anthology::list))
        .route("/anthology/detail/:id", get(handlers::anthology::detail))
        .route("/anthology/update/:id", put(handlers::anthology::update))
        .route("/anthology/delete/:id", delete(handlers::anthology::remove))
        .route("/anthology/:id/sort", put(handlers::anthology::sort))
        // articles
        .route("/article/create", post(handlers::article::create))
        .route("/article/list", get(handlers::article::list))
        .route("/article/tree-list", get(handlers::article::tree))
        .route("/article/detail/:id", get(handlers::article::detail))
        .route("/article/update/:id", put(handlers::article::update))
        .route("/article/delete/:id", delete(handlers::article::remove))
        // categories
        .route("/category/create", post(handlers::taxonomy::create_category))
        .route("/category/list", get(handlers::taxonomy::list_categories))
        .route("/category/detail/:id", get(handlers::taxonomy::category_detail))
        .route("/category/update/:id", put(handlers::taxonomy::update_category))
        .route("/category/delete/:id", delete(handlers::taxonomy::delete_category))
        .route("/category/:id/sort", put(handlers::taxonomy::sort_category))
        // tags
        .route("/tag/create", post(handlers::taxonomy::create_tag))
        .route("/tag/list", get(handlers::taxonomy::list_tags))
        .route("/tag/detail/:id", get(handlers::taxonomy::tag_detail))
        .route("/tag/update/:id", put(handlers::taxonomy::update_tag))
        .route("/tag/delete/:id", delete(handlers::taxonomy::delete_tag))
        .route("/tag/:id/sort", put(handlers::taxonomy::sort_tag))
        // assets
        .route("/resource/list", get(handlers::asset::list))
        .route(
            "/resource/upload",
            post(handlers::asset::upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/resource/create", post(handlers::asset::create))
        .route("/resource/update/:id", put(handlers::asset::update))
        .route("/resource/delete/:id", delete(handlers::asset::remove))
        .route("/resource/download/:id", get(handlers::asset::download))
        .route("/resource/view/:id", get(handlers::asset::view))
        // assistant
        .route("/ai/chat", post(handlers::chat::chat))
        .route(
            "/settings/providers",
            get(handlers::settings::list_providers).post(handlers::settings::create_provider),
        )
        .route(
            "/settings/providers/:id",
            get(handlers::settings::provider_detail)
                .put(handlers::settings::update_provider)
                .delete(handlers::settings::delete_provider),
        )
        .route("/settings/models", post(handlers::settings::create_model))
        .route("/settings/models/:id", delete(handlers::settings::delete_model))
        .route("/settings/config/get_ai_config", get(handlers::settings::get_ai_config))
        .route("/settings/config/save_ai_config", post(handlers::settings::save_ai_config));

    Router::new()
        .nest("/api", api)
        .fallback(handlers::not_found)
        .layer(axum::middleware::map_response_with_state(
            state.clone(),
            error::render_failure,
        ))
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    tracing::info_span!(
                        "request",
                        method = %request.method(),
                        uri = %request.uri(),
                    )
                })
                .on_request(())
                .on_response(|response: &Response<_>, latency: Duration, _span: &tracing::Span| {
                    let status = response.status();
                    if status.is_success() {
                        tracing::debug!(status = %status, latency_ms = latency.as_millis(), "request served");
                    } else {
                        tracing::warn!(status = %status, latency_ms = latency.as_millis(), "request failed");
                    }
                }),
        )
        .with_state(state)
}

pub async fn serve(state: Arc<ApiState>, bind_addr: &str) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(bind = %bind_addr, "quire api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "failed to listen for shutdown signal");
            }
            tracing::info!("shutting down");
        })
        .await?;
    Ok(())
}
