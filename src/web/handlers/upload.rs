//! Chunked upload handler.

use std::sync::Arc;

use axum::{
    extract::{multipart::Field, Multipart, State},
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};

use crate::upload::ChunkUpload;
use crate::web::dto::{ApiResponse, UploadResponse};
use crate::web::error::ApiError;
use crate::web::handlers::AppState;
use crate::web::middleware::AuthUser;

/// Cookie carrying the upload session token between chunk requests.
pub const SESSION_COOKIE: &str = "uploader_id";

async fn text_field(field: Field<'_>, name: &str) -> Result<String, ApiError> {
    field.text().await.map_err(|e| {
        tracing::debug!("Failed to read field {}: {}", name, e);
        ApiError::bad_request(format!("Invalid value for '{name}'"))
    })
}

fn parse_number<T: std::str::FromStr>(value: Option<String>, name: &str) -> Result<T, ApiError> {
    let value = value.ok_or_else(|| ApiError::bad_request(format!("Missing field '{name}'")))?;
    value
        .trim()
        .parse()
        .map_err(|_| ApiError::bad_request(format!("Invalid value for '{name}'")))
}

fn non_empty(value: String) -> Option<String> {
    (!value.trim().is_empty()).then_some(value)
}

/// Read the multipart form of one chunk request.
async fn read_chunk(mut multipart: Multipart) -> Result<ChunkUpload, ApiError> {
    let mut total_chunks = None;
    let mut chunk_index = None;
    let mut filesize = None;
    let mut upload = ChunkUpload::default();
    let mut data = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        tracing::error!("Failed to read multipart field: {}", e);
        ApiError::bad_request("Invalid multipart data")
    })? {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "file" => {
                let bytes = field.bytes().await.map_err(|e| {
                    tracing::error!("Failed to read chunk content: {}", e);
                    ApiError::bad_request("Failed to read chunk")
                })?;
                data = Some(bytes.to_vec());
            }
            "total_chunks" => total_chunks = Some(text_field(field, &name).await?),
            "chunk_index" => chunk_index = Some(text_field(field, &name).await?),
            "filesize" => filesize = Some(text_field(field, &name).await?),
            "filename" => upload.filename = text_field(field, &name).await?,
            "checksum" => upload.checksum = non_empty(text_field(field, &name).await?),
            "comment" => upload.comment = non_empty(text_field(field, &name).await?),
            "save_dir" => upload.save_dir = non_empty(text_field(field, &name).await?),
            "session_id" => upload.session_id = non_empty(text_field(field, &name).await?),
            _ => {}
        }
    }

    upload.total_chunks = parse_number(total_chunks, "total_chunks")?;
    upload.chunk_index = parse_number(chunk_index, "chunk_index")?;
    upload.filesize = parse_number(filesize, "filesize")?;
    upload.data = data.ok_or_else(|| ApiError::bad_request("No chunk provided"))?;
    if upload.filename.trim().is_empty() {
        return Err(ApiError::bad_request("Missing field 'filename'"));
    }
    Ok(upload)
}

/// POST /api/upload - Receive one chunk of an upload.
///
/// The session token is taken from a `session_id` form field or the
/// `uploader_id` cookie, and set again on every successful response.
pub async fn upload_chunk(
    State(state): State<Arc<AppState>>,
    AuthUser(claims): AuthUser,
    jar: CookieJar,
    multipart: Multipart,
) -> Result<(CookieJar, Json<ApiResponse<UploadResponse>>), ApiError> {
    let ctx = state.caller(&claims).await?;
    let mut upload = read_chunk(multipart).await?;
    if upload.session_id.is_none() {
        upload.session_id = jar.get(SESSION_COOKIE).map(|c| c.value().to_string());
    }

    let outcome = state.coordinator.receive_chunk(&ctx, upload).await?;

    let cookie = Cookie::build((SESSION_COOKIE, outcome.session_id().to_string()))
        .path("/")
        .http_only(true);
    Ok((
        jar.add(cookie),
        Json(ApiResponse::new(UploadResponse::from(outcome))),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number::<u32>(Some(" 3 ".to_string()), "n").unwrap(), 3);
        assert!(parse_number::<u32>(None, "n").is_err());
        assert!(parse_number::<u32>(Some("-1".to_string()), "n").is_err());
        assert!(parse_number::<u64>(Some("abc".to_string()), "n").is_err());
    }

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty("x".to_string()).as_deref(), Some("x"));
        assert!(non_empty("  ".to_string()).is_none());
    }
}
