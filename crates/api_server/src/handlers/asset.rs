use std::sync::Arc;

use axum::body::Body;
use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use core_types::{Asset, Envelope, KbError};
use kb_services::asset::{
    AssetListing, AssetQuery, AssetRecordInput, AssetUpdateInput, AssetView, UploadOutcome,
    UploadedFile,
};

use crate::extract::{ApiJson, ApiPath, ApiQuery, CurrentUser};
use crate::{ApiError, ApiResult, ApiState};

const FILE_FIELD: &str = "file";
const BYTES_PER_MB: u64 = 1024 * 1024;

pub async fn list(
    State(state): State<Arc<ApiState>>,
    CurrentUser(user): CurrentUser,
    ApiQuery(query): ApiQuery<AssetQuery>,
) -> ApiResult<AssetListing> {
    Ok(state.ok(state.kb.list_assets(&user, query).await?))
}

pub async fn upload(
    State(state): State<Arc<ApiState>>,
    CurrentUser(user): CurrentUser,
    mut multipart: Multipart,
) -> ApiResult<UploadOutcome> {
    let limit_mb = state.kb.max_upload_bytes() / BYTES_PER_MB;
    let mut file = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| multipart_error(err, limit_mb))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|err| multipart_error(err, limit_mb))?;
        file = Some(UploadedFile {
            file_name,
            bytes: bytes.to_vec(),
        });
        break;
    }

    let file = file.ok_or_else(|| KbError::UploadMissing("no file was uploaded".to_string()))?;
    Ok(state.ok(state.kb.upload_asset(&user, file).await?))
}

fn multipart_error(err: MultipartError, limit_mb: u64) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError(KbError::UploadTooLarge { limit_mb })
    } else {
        ApiError::validation(err.body_text())
    }
}

pub async fn create(
    State(state): State<Arc<ApiState>>,
    CurrentUser(user): CurrentUser,
    ApiJson(input): ApiJson<AssetRecordInput>,
) -> ApiResult<AssetView> {
    Ok(state.ok(state.kb.create_asset_record(&user, input).await?))
}

pub async fn update(
    State(state): State<Arc<ApiState>>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<String>,
    ApiJson(input): ApiJson<AssetUpdateInput>,
) -> ApiResult<AssetView> {
    Ok(state.ok(state.kb.update_asset(&user, &id, input).await?))
}

pub async fn remove(
    State(state): State<Arc<ApiState>>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<()> {
    state.kb.delete_asset(&user, &id).await?;
    Ok(axum::Json(Envelope::success(state.i18n.t("asset.deleted"), None)))
}

pub async fn download(
    State(state): State<Arc<ApiState>>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<String>,
) -> Result<Response, ApiError> {
    let (asset, bytes) = state.kb.download_asset(&user, &id).await?;
    Ok(file_response(&asset, bytes, Disposition::Attachment))
}

/// Like [`download`], but images open in the browser.
pub async fn view(
    State(state): State<Arc<ApiState>>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<String>,
) -> Result<Response, ApiError> {
    let (asset, bytes) = state.kb.download_asset(&user, &id).await?;
    let disposition = if asset.is_inline() {
        Disposition::Inline
    } else {
        Disposition::Attachment
    };
    Ok(file_response(&asset, bytes, disposition))
}

#[derive(Debug, Clone, Copy)]
enum Disposition {
    Inline,
    Attachment,
}

fn file_response(asset: &Asset, bytes: Vec<u8>, disposition: Disposition) -> Response {
    let mut headers = HeaderMap::new();
    let mime = HeaderValue::from_str(&asset.mime_type)
        .ok()
        .filter(|_| !asset.mime_type.is_empty())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    headers.insert(header::CONTENT_TYPE, mime);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(bytes.len()));
    if let Ok(value) = HeaderValue::from_str(&content_disposition(disposition, &asset.original_name)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    (StatusCode::OK, headers, Body::from(bytes)).into_response()
}

/// Plain `filename` for old clients plus the RFC 5987 `filename*` form.
fn content_disposition(disposition: Disposition, file_name: &str) -> String {
    let kind = match disposition {
        Disposition::Inline => "inline",
        Disposition::Attachment => "attachment",
    };
    let fallback: String = file_name
        .chars()
        .map(|ch| match ch {
            ' '..='~' if ch != '"' && ch != '\\' => ch,
            _ => '_',
        })
        .collect();
    format!(
        "{kind}; filename=\"{fallback}\"; filename*=UTF-8''{}",
        percent_encode(file_name)
    )
}

fn percent_encode(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || b"-._~".contains(&byte) {
            encoded.push(char::from(byte));
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disposition_carries_both_file_name_forms() {
        assert_eq!(
            content_disposition(Disposition::Attachment, "笔记 1.md"),
            "attachment; filename=\"___1.md\"; filename*=UTF-8''%E7%AC%94%E8%AE%B0%201.md"
        );
        assert_eq!(
            content_disposition(Disposition::Inline, "a\"b.png"),
            "inline; filename=\"a_b.png\"; filename*=UTF-8''a%22b.png"
        );
    }
}
