//! Directory browsing handlers.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};

use crate::web::dto::{
    ApiResponse, BrowseQuery, DirectoryListingResponse, NavigateBody, NavigateResponse,
    ValidatedJson,
};
use crate::web::error::ApiError;
use crate::web::handlers::AppState;
use crate::web::middleware::AuthUser;

/// GET /api/browse?path= - List a folder of the caller's backup tree.
pub async fn browse_directory(
    State(state): State<Arc<AppState>>,
    AuthUser(claims): AuthUser,
    Query(query): Query<BrowseQuery>,
) -> Result<Json<ApiResponse<DirectoryListingResponse>>, ApiError> {
    let ctx = state.caller(&claims).await?;
    let listing = state
        .browser
        .browse(state.db.pool(), &ctx, query.path.as_deref().unwrap_or(""))
        .await?;
    Ok(Json(ApiResponse::new(listing.into())))
}

/// POST /api/browse/navigate - Listing for upload clients, scoped to a company code.
pub async fn navigate_directory(
    State(state): State<Arc<AppState>>,
    AuthUser(claims): AuthUser,
    ValidatedJson(body): ValidatedJson<NavigateBody>,
) -> Result<Json<ApiResponse<NavigateResponse>>, ApiError> {
    let ctx = state.caller(&claims).await?;
    let listing = state
        .browser
        .navigate(state.db.pool(), &ctx, body.into())
        .await?;
    Ok(Json(ApiResponse::new(listing.into())))
}
