//! Backup Vault - chunked backup uploads with per-tenant quotas.
//!
//! Files arrive as numbered chunks, are reassembled into the uploading
//! company's folder once complete, and are charged against the company's
//! storage limit. A confined directory browser and download API expose the
//! stored tree.

pub mod backup;
pub mod browse;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod notify;
pub mod quota;
pub mod tenant;
pub mod upload;
pub mod web;

pub use backup::{Backup, BackupFilter, BackupRepository, Comment, CommentRepository};
pub use browse::{DirectoryBrowser, DirectoryListing, NavigateListing, NavigateRequest};
pub use config::Config;
pub use db::{Company, CompanyRepository, Database, NewCompany, NewUser, Role, User, UserRepository};
pub use error::{Result, VaultError};
pub use notify::{BackupNotice, LogNotifier, Notifier};
pub use quota::{format_size, QuotaLedger};
pub use tenant::TenantContext;
pub use upload::{ChunkOutcome, ChunkUpload, UploadCoordinator};
pub use web::WebServer;
