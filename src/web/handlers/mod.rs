//! API handlers for the vault.

pub mod backups;
pub mod browse;
mod state;
pub mod upload;

pub use backups::*;
pub use browse::*;
pub use state::AppState;
pub use upload::*;
