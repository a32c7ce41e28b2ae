//! Request DTOs for the vault API.

use chrono::NaiveDate;
use serde::Deserialize;
use validator::Validate;

use crate::backup::MAX_COMMENT_LENGTH;
use crate::browse::NavigateRequest;

/// New comment or reply on a backup.
#[derive(Debug, Deserialize, Validate)]
pub struct CommentRequest {
    #[validate(custom(function = "super::validation::comment_body"))]
    pub body: String,
    /// Top-level comment to reply to.
    #[serde(default)]
    pub parent_id: Option<i64>,
}

/// Query for `GET /api/backups`.
#[derive(Debug, Default, Deserialize)]
pub struct BackupListQuery {
    /// Case-insensitive substring of the file name.
    #[serde(default)]
    pub company_code: Option<String>,
}

/// Query for `GET /api/companies/:id/backups`.
#[derive(Debug, Default, Deserialize)]
pub struct CompanyBackupQuery {
    /// Substring of the stored path.
    #[serde(default)]
    pub name: Option<String>,
    /// First upload day to include (`YYYY-MM-DD`).
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    /// Last upload day to include (`YYYY-MM-DD`).
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

/// Query for `GET /api/browse`.
#[derive(Debug, Default, Deserialize)]
pub struct BrowseQuery {
    #[serde(default)]
    pub path: Option<String>,
}

/// Body of `POST /api/browse/navigate`.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct NavigateBody {
    #[validate(custom(function = "super::validation::no_control_chars"))]
    #[serde(default)]
    pub company_code: Option<String>,
    #[validate(custom(function = "super::validation::no_control_chars"))]
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub default_latest: bool,
}

impl From<NavigateBody> for NavigateRequest {
    fn from(body: NavigateBody) -> Self {
        Self {
            company_code: body.company_code.filter(|c| !c.trim().is_empty()),
            path: body.path,
            default_latest: body.default_latest,
        }
    }
}
