//! HTTP API for the vault.
//!
//! All routes live under `/api` and require a bearer token; `/health` is
//! public.

pub mod dto;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod server;

pub use error::ApiError;
pub use router::create_router;
pub use server::WebServer;
