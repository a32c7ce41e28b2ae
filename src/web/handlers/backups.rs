//! Backup record handlers: listing, detail, comments, download and delete.

use std::io;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::Response,
    Json,
};
use tokio_util::io::ReaderStream;

use crate::backup::{Backup, BackupFilter, BackupRepository, CommentRepository, NewComment};
use crate::db::CompanyRepository;
use crate::quota::QuotaLedger;
use crate::tenant::TenantContext;
use crate::web::dto::{
    ApiResponse, BackupDetailResponse, BackupListQuery, BackupResponse, CommentRequest,
    CommentResponse, CompanyBackupQuery, ValidatedJson,
};
use crate::web::error::ApiError;
use crate::web::handlers::AppState;
use crate::web::middleware::AuthUser;

/// Generate a safe Content-Disposition header value for file downloads.
///
/// Control characters are dropped and quotes or backslashes replaced in the
/// plain `filename` parameter; names that needed this, or are not ASCII,
/// also get an RFC 5987 `filename*` parameter.
fn content_disposition_header(filename: &str) -> String {
    let sanitized: String = filename
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            '"' | '\\' => '_',
            _ => c,
        })
        .collect();

    if filename.is_ascii() && !filename.chars().any(|c| c.is_control() || c == '"' || c == '\\') {
        return format!("attachment; filename=\"{}\"", filename);
    }

    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        sanitized,
        urlencoding::encode(filename)
    )
}

/// Load a backup the caller may access.
///
/// Callers outside the backup's tenant, or members who neither own it nor
/// administer the company, get 401.
async fn accessible_backup(
    state: &AppState,
    ctx: &TenantContext,
    id: i64,
) -> Result<Backup, ApiError> {
    let backup = BackupRepository::new(state.db.pool())
        .get_by_id(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Backup not found"))?;

    if !ctx.can_access_backup(&backup) {
        tracing::warn!(
            backup_id = id,
            user_id = ctx.user.id,
            "Denied access to backup"
        );
        return Err(ApiError::unauthorized(
            "You do not have permission to access this backup",
        ));
    }
    Ok(backup)
}

/// GET /api/backups - Backups visible to the caller, newest first.
///
/// Company admins see the whole company, members only their own uploads.
pub async fn list_backups(
    State(state): State<Arc<AppState>>,
    AuthUser(claims): AuthUser,
    Query(query): Query<BackupListQuery>,
) -> Result<Json<ApiResponse<Vec<BackupResponse>>>, ApiError> {
    let ctx = state.caller(&claims).await?;

    let filter = if ctx.is_privileged() {
        BackupFilter::new()
    } else if ctx.is_company_admin() {
        BackupFilter::new().company(ctx.require_company()?.id)
    } else {
        BackupFilter::new().user(ctx.user.id)
    };
    let backups = BackupRepository::new(state.db.pool()).list(&filter).await?;

    let code = query
        .company_code
        .as_deref()
        .map(|c| c.trim().to_lowercase())
        .filter(|c| !c.is_empty());
    let backups = backups
        .into_iter()
        .filter(|b| {
            code.as_ref()
                .map_or(true, |code| b.basename.to_lowercase().contains(code))
        })
        .map(BackupResponse::from)
        .collect();

    Ok(Json(ApiResponse::new(backups)))
}

/// GET /api/companies/:id/backups - A company's backups.
///
/// Usage is reconciled against the records before listing.
pub async fn list_company_backups(
    State(state): State<Arc<AppState>>,
    AuthUser(claims): AuthUser,
    Path(company_id): Path<i64>,
    Query(query): Query<CompanyBackupQuery>,
) -> Result<Json<ApiResponse<Vec<BackupResponse>>>, ApiError> {
    let ctx = state.caller(&claims).await?;
    if !ctx.can_view_company(company_id) {
        return Err(ApiError::unauthorized(
            "You do not have permission to view this company",
        ));
    }

    CompanyRepository::new(state.db.pool())
        .get_by_id(company_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Company not found"))?;

    if let Err(e) = QuotaLedger::new(state.db.pool()).reconcile(company_id).await {
        tracing::warn!(company_id, error = %e, "Failed to reconcile used storage");
    }

    let mut filter = BackupFilter::new().company(company_id).dates(
        query.start_date.map(|d| d.to_string()),
        query.end_date.map(|d| d.to_string()),
    );
    if let Some(name) = query.name.filter(|n| !n.trim().is_empty()) {
        filter = filter.name(name.trim());
    }

    let backups = BackupRepository::new(state.db.pool())
        .list(&filter)
        .await?
        .into_iter()
        .map(BackupResponse::from)
        .collect();
    Ok(Json(ApiResponse::new(backups)))
}

/// GET /api/backups/:id - Backup detail with comment threads.
pub async fn get_backup(
    State(state): State<Arc<AppState>>,
    AuthUser(claims): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<BackupDetailResponse>>, ApiError> {
    let ctx = state.caller(&claims).await?;
    let backup = accessible_backup(&state, &ctx, id).await?;

    let comments_repo = CommentRepository::new(state.db.pool());
    let mut comments = Vec::new();
    for comment in comments_repo.list_top_level(backup.id).await? {
        let replies = comments_repo.list_replies(comment.id).await?;
        comments.push(CommentResponse::with_replies(comment, replies));
    }

    Ok(Json(ApiResponse::new(BackupDetailResponse {
        backup: backup.into(),
        comments,
    })))
}

/// POST /api/backups/:id/comments - Comment on a backup or reply to a comment.
pub async fn add_comment(
    State(state): State<Arc<AppState>>,
    AuthUser(claims): AuthUser,
    Path(id): Path<i64>,
    ValidatedJson(request): ValidatedJson<CommentRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CommentResponse>>), ApiError> {
    let ctx = state.caller(&claims).await?;
    let backup = accessible_backup(&state, &ctx, id).await?;

    let mut comment = NewComment::new(backup.id, ctx.user.id, request.body);
    if let Some(parent_id) = request.parent_id {
        comment = comment.reply_to(parent_id);
    }
    let comment = CommentRepository::new(state.db.pool())
        .create(&comment)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::new(CommentResponse::from(comment))),
    ))
}

/// GET /api/backups/:id/download - Stream the backup as an attachment.
pub async fn download_backup(
    State(state): State<Arc<AppState>>,
    AuthUser(claims): AuthUser,
    Path(id): Path<i64>,
) -> Result<Response<Body>, ApiError> {
    let ctx = state.caller(&claims).await?;
    let backup = accessible_backup(&state, &ctx, id).await?;

    let file = match tokio::fs::File::open(backup.path()).await {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::warn!(backup_id = id, path = %backup.file_path, "Backup file is missing");
            return Err(ApiError::not_found("File not found"));
        }
        Err(e) => {
            tracing::error!("Failed to open backup file: {}", e);
            return Err(ApiError::internal("Failed to open file"));
        }
    };
    let length = file
        .metadata()
        .await
        .map_err(|e| {
            tracing::error!("Failed to read backup metadata: {}", e);
            ApiError::internal("Failed to open file")
        })?
        .len();

    let content_type = mime_guess::from_path(&backup.basename)
        .first_or_octet_stream()
        .to_string();

    tracing::info!(backup_id = id, user_id = ctx.user.id, "Backup downloaded");

    Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition_header(&backup.basename),
        )
        .header(header::CONTENT_LENGTH, length)
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| {
            tracing::error!("Failed to build response: {}", e);
            ApiError::internal("Failed to build response")
        })
}

/// DELETE /api/backups/:id - Remove a backup and its file.
pub async fn delete_backup(
    State(state): State<Arc<AppState>>,
    AuthUser(claims): AuthUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let ctx = state.caller(&claims).await?;
    accessible_backup(&state, &ctx, id).await?;

    let backup = BackupRepository::new(state.db.pool())
        .delete(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Backup not found"))?;

    match tokio::fs::remove_file(backup.path()).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %backup.file_path, error = %e, "Failed to remove backup file");
        }
    }

    tracing::info!(
        backup_id = id,
        company_id = backup.company_id,
        size = backup.size,
        "Backup deleted"
    );
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_disposition_header_simple_ascii() {
        let result = content_disposition_header("site_2024.zip");
        assert_eq!(result, "attachment; filename=\"site_2024.zip\"");
    }

    #[test]
    fn test_content_disposition_header_with_spaces() {
        let result = content_disposition_header("my site.zip");
        assert_eq!(result, "attachment; filename=\"my site.zip\"");
    }

    #[test]
    fn test_content_disposition_header_non_ascii() {
        let result = content_disposition_header("sauvegarde_été.zip");
        assert!(result.starts_with("attachment; filename=\""));
        assert!(result.contains("filename*=UTF-8''sauvegarde_%C3%A9t%C3%A9.zip"));
    }

    #[test]
    fn test_content_disposition_header_quote_and_backslash() {
        let result = content_disposition_header("a\"b\\c.zip");
        assert!(result.contains("filename=\"a_b_c.zip\""));
        assert!(result.contains("%22"));
    }

    #[test]
    fn test_content_disposition_header_strips_control_characters() {
        let result = content_disposition_header("file\"\r\nX-Evil: header\r\n.zip");
        assert!(!result.contains('\r'));
        assert!(!result.contains('\n'));
        assert!(result.starts_with("attachment; filename="));
    }
}
