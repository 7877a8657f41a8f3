pub mod anthology;
pub mod article;
pub mod asset;
pub mod chat;
pub mod settings;
pub mod taxonomy;

use std::sync::Arc;

use axum::extract::State;
use axum::http::Uri;
use core_types::KbError;
use serde::{Deserialize, Serialize};

use crate::{ApiError, ApiResult, ApiState};

#[derive(Debug, Serialize)]
pub struct Health {
    service: &'static str,
    version: &'static str,
}

pub async fn health(State(state): State<Arc<ApiState>>) -> ApiResult<Health> {
    Ok(state.ok(Health {
        service: "quire",
        version: env!("CARGO_PKG_VERSION"),
    }))
}

/// Unknown paths still answer with the envelope.
pub async fn not_found(uri: Uri) -> ApiError {
    ApiError(KbError::not_found("route", uri.path()))
}

/// Body of the `.../{id}/sort` routes.
#[derive(Debug, Deserialize)]
pub struct SortBody {
    pub sort: Option<i64>,
}

impl SortBody {
    /// A missing position is reported like an out-of-range one.
    pub fn position(&self) -> i64 {
        self.sort.unwrap_or(0)
    }
}
