//! # Decode Endpoints
//!
//! Both endpoints take a `multipart/form-data` upload with the audio in a
//! field named `file`, and answer `{ "message": string, "raw": string }`.
//!
//! - `POST /decode` expects WAV. A decoder failure is an error response.
//! - `POST /decode-webm` expects WEBM/Opus and converts it with ffmpeg first.
//!   A decoder failure after conversion answers `200` with an empty `message`.

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use actix_multipart::Multipart;
use actix_web::http::header;
use actix_web::{web, HttpRequest, HttpResponse};
use futures_util::StreamExt;
use tracing::debug;

const UPLOAD_FIELD: &str = "file";

pub async fn decode(
    req: HttpRequest,
    payload: Multipart,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let limit = state.get_config().process.max_upload_bytes;
    let wav = read_upload(&req, payload, limit)
        .await?
        .ok_or_else(|| AppError::Input("file is required (audio/wav)".to_string()))?;

    let report = state.toolkit().decode_wav(&wav).await?;
    Ok(HttpResponse::Ok().json(report))
}

pub async fn decode_webm(
    req: HttpRequest,
    payload: Multipart,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let limit = state.get_config().process.max_upload_bytes;
    let webm = read_upload(&req, payload, limit)
        .await?
        .ok_or_else(|| AppError::Input("file is required (audio/webm)".to_string()))?;

    let report = state.toolkit().decode_webm(&webm).await?;
    Ok(HttpResponse::Ok().json(report))
}

fn is_multipart(req: &HttpRequest) -> bool {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_ascii_lowercase().starts_with("multipart/form-data"))
        .unwrap_or(false)
}

/// Bytes of the first `file` field, or `None` when the request carries none.
/// Other fields are drained and ignored.
async fn read_upload(
    req: &HttpRequest,
    mut payload: Multipart,
    limit: usize,
) -> AppResult<Option<Vec<u8>>> {
    if !is_multipart(req) {
        return Ok(None);
    }

    while let Some(field) = payload.next().await {
        let mut field = field?;
        let is_upload = field.name() == Some(UPLOAD_FIELD);

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk?;
            if !is_upload {
                continue;
            }
            if bytes.len() + chunk.len() > limit {
                return Err(AppError::Input(format!(
                    "file exceeds the upload limit of {} bytes",
                    limit
                )));
            }
            bytes.extend_from_slice(&chunk);
        }

        if is_upload {
            debug!(bytes = bytes.len(), "received upload");
            return Ok(Some(bytes));
        }
    }

    Ok(None)
}
