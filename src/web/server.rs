//! Web server for the vault API.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;

use crate::config::{Config, StorageConfig, WebConfig};
use crate::notify::{LogNotifier, Notifier};
use crate::upload::UploadCoordinator;
use crate::{Database, Result, VaultError};

use super::handlers::AppState;
use super::middleware::JwtState;
use super::router::{create_health_router, create_router};

/// Web server for the API.
pub struct WebServer {
    addr: SocketAddr,
    app_state: Arc<AppState>,
    jwt_state: Arc<JwtState>,
    web_config: WebConfig,
    storage_config: StorageConfig,
}

impl WebServer {
    /// Create a web server delivering notifications through the log.
    pub fn new(config: &Config, db: Database) -> Result<Self> {
        Self::with_notifier(config, db, Arc::new(LogNotifier))
    }

    /// Create a web server with a custom notification backend.
    pub fn with_notifier(config: &Config, db: Database, notifier: Arc<dyn Notifier>) -> Result<Self> {
        let addr = format!("{}:{}", config.web.host, config.web.port)
            .parse()
            .map_err(|e| VaultError::Config(format!("invalid web server address: {e}")))?;

        Ok(Self {
            addr,
            app_state: Arc::new(AppState::new(db, config, notifier)?),
            jwt_state: Arc::new(JwtState::new(&config.web.jwt_secret)),
            web_config: config.web.clone(),
            storage_config: config.storage.clone(),
        })
    }

    /// Get the server address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The full application router, for serving or in-process testing.
    pub fn router(&self) -> Router {
        create_router(
            Arc::clone(&self.app_state),
            Arc::clone(&self.jwt_state),
            &self.web_config,
        )
        .merge(create_health_router())
    }

    /// Start the background sweep of abandoned upload sessions.
    ///
    /// Chunk files older than the session TTL are deleted and idle sessions
    /// are forgotten.
    fn start_sweep_task(coordinator: Arc<UploadCoordinator>, storage: &StorageConfig) {
        let ttl = Duration::from_secs(storage.session_ttl_secs);
        let every = Duration::from_secs(storage.sweep_interval_secs.max(1));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);

            // Skip the first immediate tick
            interval.tick().await;

            loop {
                interval.tick().await;

                if let Err(e) = coordinator.sweep(ttl).await {
                    tracing::warn!(error = %e, "Failed to sweep abandoned uploads");
                }
            }
        });
        tracing::info!(
            interval_secs = every.as_secs(),
            ttl_secs = ttl.as_secs(),
            "Upload sweep task started"
        );
    }

    async fn bind(self) -> std::io::Result<(TcpListener, Router)> {
        let router = self.router();
        let listener = TcpListener::bind(self.addr).await?;

        // Start the sweep only after a successful bind
        Self::start_sweep_task(Arc::clone(&self.app_state.coordinator), &self.storage_config);

        tracing::info!("Web server listening on http://{}", listener.local_addr()?);
        Ok((listener, router))
    }

    /// Run the web server.
    pub async fn run(self) -> std::io::Result<()> {
        let (listener, router) = self.bind().await?;
        axum::serve(listener, router).await
    }

    /// Run the server and return the actual bound address.
    ///
    /// This is useful for testing when binding to port 0.
    pub async fn run_with_addr(self) -> std::io::Result<SocketAddr> {
        let (listener, router) = self.bind().await?;
        let local_addr = listener.local_addr()?;

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!("Web server error: {}", e);
            }
        });

        Ok(local_addr)
    }
}
