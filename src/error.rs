//! Error types for the backup vault.

use thiserror::Error;

/// Common error type for the backup vault.
#[derive(Error, Debug)]
pub enum VaultError {
    /// Database error.
    ///
    /// Errors from sqlx are converted into this variant.
    #[error("database error: {0}")]
    Database(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A client supplied path was malformed or tried to leave its root.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The assembled upload does not carry the required archive extension.
    #[error("{0}")]
    UnsupportedMediaType(String),

    /// Accepting the upload would overflow the tenant's storage quota.
    ///
    /// All sizes are in bytes.
    #[error("{}", quota_message(.filename, *.limit, *.remaining, *.attempted))]
    StorageLimitExceeded {
        filename: String,
        limit: u64,
        remaining: u64,
        attempted: u64,
    },

    /// The assembled file's checksum differs from the client's.
    #[error("Invalid checksum: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// The chunk set is not complete or does not add up to the declared size.
    #[error("incomplete upload: {0}")]
    IncompleteUpload(String),

    /// Catch-all for failures while receiving or assembling an upload.
    #[error("upload failed: {0}")]
    UploadFailed(String),

    /// The caller has no tenant or tried to cross tenant boundaries.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// Validation error for user input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

fn quota_message(filename: &str, limit: u64, remaining: u64, attempted: u64) -> String {
    format!(
        "Could not upload file {filename}. You cannot exceed your storage limit of {}. \
         Storage left: {}, upload size: {}",
        crate::quota::format_size(limit),
        crate::quota::format_size(remaining),
        crate::quota::format_size(attempted),
    )
}

// io::Error is not Clone; the copy keeps its kind and message.
impl Clone for VaultError {
    fn clone(&self) -> Self {
        match self {
            Self::Database(s) => Self::Database(s.clone()),
            Self::Io(e) => Self::Io(std::io::Error::new(e.kind(), e.to_string())),
            Self::InvalidPath(s) => Self::InvalidPath(s.clone()),
            Self::UnsupportedMediaType(s) => Self::UnsupportedMediaType(s.clone()),
            Self::StorageLimitExceeded {
                filename,
                limit,
                remaining,
                attempted,
            } => Self::StorageLimitExceeded {
                filename: filename.clone(),
                limit: *limit,
                remaining: *remaining,
                attempted: *attempted,
            },
            Self::ChecksumMismatch { expected, actual } => Self::ChecksumMismatch {
                expected: expected.clone(),
                actual: actual.clone(),
            },
            Self::IncompleteUpload(s) => Self::IncompleteUpload(s.clone()),
            Self::UploadFailed(s) => Self::UploadFailed(s.clone()),
            Self::Unauthorized(s) => Self::Unauthorized(s.clone()),
            Self::NotFound(s) => Self::NotFound(s.clone()),
            Self::Validation(s) => Self::Validation(s.clone()),
            Self::Config(s) => Self::Config(s.clone()),
        }
    }
}

impl From<sqlx::Error> for VaultError {
    fn from(e: sqlx::Error) -> Self {
        VaultError::Database(e.to_string())
    }
}

/// Result type alias for vault operations.
pub type Result<T> = std::result::Result<T, VaultError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_path_display() {
        let err = VaultError::InvalidPath("missing marker".to_string());
        assert_eq!(err.to_string(), "invalid path: missing marker");
    }

    #[test]
    fn test_not_found_display() {
        let err = VaultError::NotFound("backup".to_string());
        assert_eq!(err.to_string(), "backup not found");
    }

    #[test]
    fn test_storage_limit_message_is_human_readable() {
        let err = VaultError::StorageLimitExceeded {
            filename: "site.zip".to_string(),
            limit: 1024 * 1024,
            remaining: 1024,
            attempted: 2048,
        };
        let msg = err.to_string();
        assert!(msg.contains("site.zip"));
        assert!(msg.contains("1.00 MB"));
        assert!(msg.contains("Storage left: 1.00 KB"));
        assert!(msg.contains("upload size: 2.00 KB"));
    }

    #[test]
    fn test_checksum_mismatch_display() {
        let err = VaultError::ChecksumMismatch {
            expected: "abc".to_string(),
            actual: "def".to_string(),
        };
        assert!(err.to_string().starts_with("Invalid checksum"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: VaultError = io_err.into();
        assert!(matches!(err, VaultError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_clone_keeps_io_kind() {
        let err = VaultError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ));
        match err.clone() {
            VaultError::Io(e) => {
                assert_eq!(e.kind(), std::io::ErrorKind::PermissionDenied);
                assert!(e.to_string().contains("denied"));
            }
            other => panic!("unexpected clone: {other:?}"),
        }
    }
}
