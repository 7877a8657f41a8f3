use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use kb_services::chat::ChatRequest;

use crate::extract::ApiJson;
use crate::{ApiError, ApiState};

/// Streams the reply as raw text chunks. Errors found before the upstream
/// call answer with the usual envelope instead.
pub async fn chat(
    State(state): State<Arc<ApiState>>,
    ApiJson(request): ApiJson<ChatRequest>,
) -> Result<Response, ApiError> {
    let chunks = state.kb.chat(request).await?;
    let body = Body::from_stream(chunks.map(Ok::<_, Infallible>));
    Ok((
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response())
}
