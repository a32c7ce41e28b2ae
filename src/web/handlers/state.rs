//! Shared handler state.

use std::sync::Arc;

use crate::browse::DirectoryBrowser;
use crate::config::Config;
use crate::notify::{NotificationDispatcher, Notifier};
use crate::tenant::TenantContext;
use crate::upload::UploadCoordinator;
use crate::web::error::ApiError;
use crate::web::middleware::JwtClaims;
use crate::{Database, Result};

/// Application state shared across handlers.
pub struct AppState {
    pub db: Database,
    pub coordinator: Arc<UploadCoordinator>,
    pub browser: DirectoryBrowser,
}

impl AppState {
    /// Wire the upload and browsing components for `config`.
    pub fn new(db: Database, config: &Config, notifier: Arc<dyn Notifier>) -> Result<Self> {
        let notifications = NotificationDispatcher::new(&config.notify, notifier);
        let coordinator = UploadCoordinator::new(db.clone(), &config.storage, notifications)?;
        Ok(Self {
            coordinator: Arc::new(coordinator),
            browser: DirectoryBrowser::new(&config.storage),
            db,
        })
    }

    /// Load the tenant context for an authenticated caller.
    pub async fn caller(&self, claims: &JwtClaims) -> std::result::Result<TenantContext, ApiError> {
        Ok(TenantContext::resolve(self.db.pool(), claims.sub).await?)
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("coordinator", &self.coordinator)
            .field("browser", &self.browser)
            .finish()
    }
}
