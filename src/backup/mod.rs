//! Backup records and their comments.
//!
//! A backup row is created only after an upload has been reassembled and
//! validated; it points at the stored file and carries its size, which feeds
//! the tenant's storage accounting.

mod comment;
mod record;

pub use comment::{Comment, CommentRepository, NewComment, MAX_COMMENT_LENGTH};
pub use record::{Backup, BackupFilter, BackupRepository, NewBackup};
