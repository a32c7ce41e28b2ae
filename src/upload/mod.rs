//! Chunked upload intake.
//!
//! Clients send a file as numbered chunks tied together by a session token.
//! Chunks are kept in a scratch directory until the set is complete, then
//! reassembled into the tenant's backup folder and recorded.
//!
//! ```text
//! {media_root}/
//! ├── uploads/                      scratch, {session}_chunk_{i}.part
//! └── backups/
//!     └── {company}/{subpath}/{filename}
//! ```

mod chunk_store;
mod coordinator;
pub mod integrity;
mod path_resolver;
mod session;

pub use chunk_store::ChunkStore;
pub use coordinator::{ChunkOutcome, ChunkUpload, SweepReport, UploadCoordinator};
pub use path_resolver::{available_path, create_unique, validate_filename, PathResolver};
pub use session::{
    SessionId, SessionRegistry, SessionState, SharedSession, UploadFingerprint, UploadSession,
    MAX_SESSION_ID_LEN,
};
