use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use core_types::{Envelope, ErrorCode, KbError};

use crate::ApiState;

pub type ApiResult<T> = Result<Json<Envelope<T>>, ApiError>;

/// A failed request. Rendered into the envelope by [`render_failure`], which
/// knows the configured language.
#[derive(Debug)]
pub struct ApiError(pub KbError);

impl From<KbError> for ApiError {
    fn from(err: KbError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self(KbError::validation(message))
    }

    pub fn status(&self) -> StatusCode {
        match &self.0 {
            KbError::Validation(_) => StatusCode::BAD_REQUEST,
            KbError::NotFound { .. } | KbError::UploadMissing(_) => StatusCode::NOT_FOUND,
            KbError::Duplicate(_) | KbError::HasChildren(_) => StatusCode::CONFLICT,
            KbError::UploadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            KbError::Upstream(_) => StatusCode::BAD_GATEWAY,
            KbError::Storage(_) | KbError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// What the envelope of a failed request says, minus the localized text.
#[derive(Debug, Clone)]
pub(crate) struct Failure {
    code: ErrorCode,
    /// Shown instead of the catalog text.
    message: Option<String>,
    data: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.0.code();
        let failure = match self.0 {
            KbError::Validation(message) => Failure {
                code,
                message: Some(message),
                data: None,
            },
            err if err.is_user_facing() => {
                tracing::debug!(code = code.code(), error = %err, "request rejected");
                Failure {
                    code,
                    message: None,
                    data: Some(err.to_string()),
                }
            }
            err => {
                tracing::error!(code = code.code(), error = ?err, "request failed");
                Failure {
                    code,
                    message: None,
                    data: Some(format!("{err:#}")),
                }
            }
        };

        let mut response = status.into_response();
        response.extensions_mut().insert(failure);
        response
    }
}

/// Response middleware that turns a [`Failure`] into its envelope body.
/// Bare method-not-allowed replies from the router get one too.
pub(crate) async fn render_failure(State(state): State<Arc<ApiState>>, mut response: Response) -> Response {
    let failure = match response.extensions_mut().remove::<Failure>() {
        Some(failure) => failure,
        None if response.status() == StatusCode::METHOD_NOT_ALLOWED
            && !response.headers().contains_key(header::CONTENT_TYPE) =>
        {
            Failure {
                code: ErrorCode::ParamError,
                message: None,
                data: Some("method not allowed".to_string()),
            }
        }
        None => return response,
    };
    let msg = failure
        .message
        .unwrap_or_else(|| state.i18n.code(failure.code).to_string());
    let (mut parts, _) = response.into_parts();
    parts.headers.remove(header::CONTENT_LENGTH);
    (parts, Json(Envelope::failure(failure.code, msg, failure.data))).into_response()
}
