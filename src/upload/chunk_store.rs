//! Scratch storage for upload chunks.
//!
//! Chunks live flat in one directory and are named
//! `{session_id}_chunk_{index}.part`, so chunks of different sessions never
//! collide and a session's chunks can be found by prefix.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use super::session::SessionId;
use crate::Result;

/// Chunk scratch directory.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    root: PathBuf,
}

impl ChunkStore {
    /// Open the store, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn prefix(session_id: &SessionId) -> String {
        format!("{}_chunk_", session_id.as_str())
    }

    /// Path of chunk `index` for a session.
    pub fn chunk_path(&self, session_id: &SessionId, index: u32) -> PathBuf {
        self.root
            .join(format!("{}{index}.part", Self::prefix(session_id)))
    }

    /// Store one chunk, replacing an earlier copy of the same index.
    pub async fn put_chunk(&self, session_id: &SessionId, index: u32, bytes: &[u8]) -> Result<()> {
        let path = self.chunk_path(session_id, index);
        tokio::fs::write(&path, bytes).await?;
        debug!(session = %session_id, index, size = bytes.len(), "Stored chunk");
        Ok(())
    }

    /// Indices in `0..count` that have no chunk on disk.
    pub fn missing_indices(&self, session_id: &SessionId, count: u32) -> Vec<u32> {
        (0..count)
            .filter(|&i| !self.chunk_path(session_id, i).is_file())
            .collect()
    }

    /// Whether any chunk of the session is on disk.
    pub fn has_chunks(&self, session_id: &SessionId) -> bool {
        let prefix = Self::prefix(session_id);
        match fs::read_dir(&self.root) {
            Ok(entries) => entries
                .flatten()
                .any(|e| e.file_name().to_string_lossy().starts_with(&prefix)),
            Err(_) => false,
        }
    }

    /// Total size of chunks `0..count`. Missing chunks count as zero.
    pub fn total_size(&self, session_id: &SessionId, count: u32) -> u64 {
        (0..count)
            .filter_map(|i| fs::metadata(self.chunk_path(session_id, i)).ok())
            .map(|m| m.len())
            .sum()
    }

    /// Copy chunks `0..count` into `dest` in index order, deleting each chunk
    /// as soon as it has been copied.
    ///
    /// Chunks are streamed, never held in memory whole. Returns the number of
    /// bytes written. Blocking; call from a blocking context.
    pub fn drain_in_order<W: Write>(
        &self,
        session_id: &SessionId,
        count: u32,
        dest: &mut W,
    ) -> Result<u64> {
        let mut written = 0u64;
        for index in 0..count {
            let path = self.chunk_path(session_id, index);
            let mut chunk = File::open(&path)?;
            written += io::copy(&mut chunk, dest)?;
            drop(chunk);
            remove_quietly(&path);
        }
        dest.flush()?;
        Ok(written)
    }

    /// Delete every chunk of a session. Missing files are not an error.
    pub fn delete_all(&self, session_id: &SessionId) -> usize {
        let prefix = Self::prefix(session_id);
        let Ok(entries) = fs::read_dir(&self.root) else {
            return 0;
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            if entry.file_name().to_string_lossy().starts_with(&prefix) && remove_quietly(&entry.path())
            {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(session = %session_id, removed, "Deleted session chunks");
        }
        removed
    }

    /// Session that a chunk file name belongs to.
    fn owner(file_name: &str) -> Option<SessionId> {
        let stem = file_name.strip_suffix(".part")?;
        let (session, _) = stem.rsplit_once("_chunk_")?;
        SessionId::parse(session)
    }

    /// Delete chunk files whose last modification is older than `max_age`.
    ///
    /// Chunks of the `live` sessions are kept whatever their age.
    pub fn sweep_stale(&self, max_age: Duration, live: &HashSet<SessionId>) -> Result<usize> {
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut removed = 0;
        for entry in fs::read_dir(&self.root)?.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("part") {
                continue;
            }
            let owner = Self::owner(&entry.file_name().to_string_lossy());
            if owner.is_some_and(|id| live.contains(&id)) {
                continue;
            }
            let modified = entry.metadata().and_then(|m| m.modified());
            match modified {
                Ok(modified) if modified <= cutoff => {
                    if remove_quietly(&path) {
                        removed += 1;
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Cannot stat chunk file"),
            }
        }
        Ok(removed)
    }
}

/// Remove a file, logging failures other than "not found".
fn remove_quietly(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to delete chunk file");
            false
        }
    }
}
