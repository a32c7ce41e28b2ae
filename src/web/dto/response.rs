//! Response DTOs for the vault API.

use serde::Serialize;

use crate::backup::{Backup, Comment};
use crate::browse::{Breadcrumb, DirectoryListing, NavigateListing};
use crate::quota::format_size;
use crate::upload::ChunkOutcome;

/// Generic API response wrapper.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

/// A backup as shown to clients. The storage path is never exposed.
#[derive(Debug, Serialize)]
pub struct BackupResponse {
    pub id: i64,
    pub user_id: i64,
    pub company_id: i64,
    pub filename: String,
    pub size: i64,
    /// Size for display, e.g. `1.50 MB`.
    pub size_display: String,
    pub checksum: Option<String>,
    /// Upload time (RFC 3339).
    pub uploaded_at: String,
}

impl From<Backup> for BackupResponse {
    fn from(backup: Backup) -> Self {
        Self {
            uploaded_at: backup.uploaded_at_datetime().to_rfc3339(),
            size_display: format_size(backup.size.max(0) as u64),
            id: backup.id,
            user_id: backup.user_id,
            company_id: backup.company_id,
            filename: backup.basename,
            size: backup.size,
            checksum: backup.checksum,
        }
    }
}

/// A comment with its replies.
#[derive(Debug, Serialize)]
pub struct CommentResponse {
    pub id: i64,
    pub user_id: i64,
    pub parent_id: Option<i64>,
    pub body: String,
    pub created_at: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub replies: Vec<CommentResponse>,
}

impl CommentResponse {
    pub fn with_replies(comment: Comment, replies: Vec<Comment>) -> Self {
        let mut response = Self::from(comment);
        response.replies = replies.into_iter().map(Self::from).collect();
        response
    }
}

impl From<Comment> for CommentResponse {
    fn from(comment: Comment) -> Self {
        Self {
            id: comment.id,
            user_id: comment.user_id,
            parent_id: comment.parent_id,
            body: comment.body,
            created_at: comment.created_at,
            replies: Vec::new(),
        }
    }
}

/// Backup detail with its comment threads, oldest first.
#[derive(Debug, Serialize)]
pub struct BackupDetailResponse {
    pub backup: BackupResponse,
    pub comments: Vec<CommentResponse>,
}

/// Directory listing.
#[derive(Debug, Serialize)]
pub struct DirectoryListingResponse {
    pub path: String,
    pub subdirectories: Vec<String>,
    pub files: Vec<BackupResponse>,
    pub breadcrumbs: Vec<Breadcrumb>,
    pub parent_path: Option<String>,
}

impl From<DirectoryListing> for DirectoryListingResponse {
    fn from(listing: DirectoryListing) -> Self {
        Self {
            path: listing.path,
            subdirectories: listing.subdirectories,
            files: listing.files.into_iter().map(BackupResponse::from).collect(),
            breadcrumbs: listing.breadcrumbs,
            parent_path: listing.parent_path,
        }
    }
}

/// Navigation result for upload clients.
#[derive(Debug, Serialize)]
pub struct NavigateResponse {
    pub directories: Vec<String>,
    pub segments: Vec<String>,
    pub files: Vec<BackupResponse>,
}

impl From<NavigateListing> for NavigateResponse {
    fn from(listing: NavigateListing) -> Self {
        Self {
            directories: listing.directories,
            segments: listing.segments,
            files: listing.files.into_iter().map(BackupResponse::from).collect(),
        }
    }
}

/// Upload progress.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UploadResponse {
    /// A chunk was stored.
    ChunkReceived {
        message: String,
        session_id: String,
        chunk_index: u32,
        missing: Vec<u32>,
    },
    /// The last chunk arrived and the file was stored.
    Complete {
        message: String,
        session_id: String,
        backup: BackupResponse,
    },
}

impl From<ChunkOutcome> for UploadResponse {
    fn from(outcome: ChunkOutcome) -> Self {
        match outcome {
            ChunkOutcome::Accepted {
                session_id,
                chunk_index,
                missing,
            } => UploadResponse::ChunkReceived {
                message: "Chunk uploaded successfully".to_string(),
                session_id: session_id.to_string(),
                chunk_index,
                missing,
            },
            ChunkOutcome::Complete { session_id, backup } => UploadResponse::Complete {
                message: "File uploaded successfully".to_string(),
                session_id: session_id.to_string(),
                backup: backup.into(),
            },
        }
    }
}
