//! Chunk intake and finalization.
//!
//! Every chunk request goes through [`UploadCoordinator::receive_chunk`]. The
//! request that completes the chunk set finalizes the upload while holding the
//! session lock: chunks are concatenated into the destination, the result is
//! validated (type, quota, checksum), and only then is a backup record
//! written. Any failure removes the assembled file and all remaining chunks.

use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{error, info, warn};

use super::chunk_store::ChunkStore;
use super::integrity;
use super::path_resolver::{create_unique, validate_filename, PathResolver};
use super::session::{SessionId, SessionRegistry, UploadFingerprint, UploadSession};
use crate::backup::{Backup, BackupRepository, CommentRepository, NewBackup, NewComment};
use crate::config::StorageConfig;
use crate::db::{Company, CompanyRepository, Database};
use crate::notify::NotificationDispatcher;
use crate::quota;
use crate::tenant::TenantContext;
use crate::{Result, VaultError};

/// One chunk request as received from the client.
#[derive(Debug, Clone, Default)]
pub struct ChunkUpload {
    /// Session token echoed by the client, if any.
    pub session_id: Option<String>,
    pub chunk_index: u32,
    pub total_chunks: u32,
    /// Declared size of the whole file.
    pub filesize: u64,
    pub filename: String,
    pub data: Vec<u8>,
    /// Expected hex SHA-256 of the whole file.
    pub checksum: Option<String>,
    /// URL-encoded comment to attach to the backup.
    pub comment: Option<String>,
    /// Client folder hint, see [`PathResolver::sanitize_subpath`].
    pub save_dir: Option<String>,
}

impl ChunkUpload {
    fn fingerprint(&self) -> UploadFingerprint {
        UploadFingerprint {
            filename: self.filename.clone(),
            total_chunks: self.total_chunks,
            filesize: self.filesize,
        }
    }

    fn decoded_comment(&self) -> Option<String> {
        let raw = self.comment.as_deref()?.trim();
        let decoded = urlencoding::decode(raw)
            .map(|c| c.into_owned())
            .unwrap_or_else(|_| raw.to_string());
        let decoded = decoded.trim();
        (!decoded.is_empty()).then(|| decoded.to_string())
    }
}

/// Result of accepting a chunk.
#[derive(Debug, Clone)]
pub enum ChunkOutcome {
    /// Chunk stored; the upload is still waiting for `missing`.
    Accepted {
        session_id: SessionId,
        chunk_index: u32,
        missing: Vec<u32>,
    },
    /// The upload was finalized into `backup`.
    Complete {
        session_id: SessionId,
        backup: Backup,
    },
}

impl ChunkOutcome {
    pub fn session_id(&self) -> &SessionId {
        match self {
            ChunkOutcome::Accepted { session_id, .. } => session_id,
            ChunkOutcome::Complete { session_id, .. } => session_id,
        }
    }
}

/// Counts from one cleanup sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub sessions: usize,
    pub chunks: usize,
}

/// Drives upload sessions from first chunk to backup record.
pub struct UploadCoordinator {
    db: Database,
    chunks: ChunkStore,
    resolver: PathResolver,
    sessions: SessionRegistry,
    notifications: NotificationDispatcher,
    allowed_extension: String,
}

impl UploadCoordinator {
    pub fn new(
        db: Database,
        storage: &StorageConfig,
        notifications: NotificationDispatcher,
    ) -> Result<Self> {
        Ok(Self {
            db,
            chunks: ChunkStore::new(storage.uploads_root())?,
            resolver: PathResolver::new(storage),
            sessions: SessionRegistry::new(),
            notifications,
            allowed_extension: storage
                .allowed_extension
                .trim_start_matches('.')
                .to_lowercase(),
        })
    }

    pub fn chunk_store(&self) -> &ChunkStore {
        &self.chunks
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Accept one chunk, finalizing the upload once every chunk is present.
    pub async fn receive_chunk(&self, ctx: &TenantContext, upload: ChunkUpload) -> Result<ChunkOutcome> {
        let session_id = upload
            .session_id
            .as_deref()
            .and_then(SessionId::parse)
            .unwrap_or_else(SessionId::generate);

        let company = match ctx.require_company() {
            Ok(company) => company,
            Err(e) => {
                self.chunks.delete_all(&session_id);
                return Err(e);
            }
        };

        if upload.total_chunks == 0 || upload.chunk_index >= upload.total_chunks {
            return Err(VaultError::Validation(format!(
                "chunk index {} is outside 0..{}",
                upload.chunk_index, upload.total_chunks
            )));
        }
        validate_filename(&upload.filename)?;

        let fingerprint = upload.fingerprint();
        let shared = self.sessions.get_or_create(&session_id).await;
        let mut session = shared.lock().await;

        if let Some(prior) = self.replay(&session, &upload) {
            info!(session = %session_id, "Final chunk repeated for finished upload");
            return prior.map(|backup| ChunkOutcome::Complete { session_id, backup });
        }

        if session.begin(fingerprint, company.id, ctx.user.id) {
            self.chunks.delete_all(&session_id);
        }

        if let Err(e) = quota::ensure_fits(company, &upload.filename, upload.filesize) {
            self.chunks.delete_all(&session_id);
            session.fail(e.clone());
            return Err(e);
        }

        if let Err(e) = self
            .chunks
            .put_chunk(&session_id, upload.chunk_index, &upload.data)
            .await
        {
            return Err(self.abort(&mut session, upload_failure(e)));
        }
        session.record_chunk(upload.chunk_index, &upload.data)?;

        let missing = self.chunks.missing_indices(&session_id, upload.total_chunks);
        if !missing.is_empty() {
            return Ok(ChunkOutcome::Accepted {
                session_id,
                chunk_index: upload.chunk_index,
                missing,
            });
        }

        session.start_finalizing();
        match self.finalize(ctx, company, &session_id, &upload).await {
            Ok(backup) => {
                info!(
                    user = %ctx.user.username,
                    company = %company.name,
                    file = %backup.basename,
                    size = backup.size,
                    "Upload complete"
                );
                session.complete(backup.clone());
                Ok(ChunkOutcome::Complete { session_id, backup })
            }
            Err(e) => Err(self.abort(&mut session, e)),
        }
    }

    /// A repeated final chunk of a finished multi-chunk upload gets the
    /// earlier result. A final chunk with a different payload starts a new
    /// upload on the same token.
    fn replay(&self, session: &UploadSession, upload: &ChunkUpload) -> Option<Result<Backup>> {
        if upload.total_chunks < 2 || upload.chunk_index + 1 != upload.total_chunks {
            return None;
        }
        let prior = session.prior_outcome(&upload.fingerprint(), &upload.data)?;
        (!self.chunks.has_chunks(&session.id)).then_some(prior)
    }

    fn abort(&self, session: &mut UploadSession, error: VaultError) -> VaultError {
        self.chunks.delete_all(&session.id);
        warn!(session = %session.id, error = %error, "Upload failed");
        session.fail(error.clone());
        error
    }

    async fn finalize(
        &self,
        ctx: &TenantContext,
        company: &Company,
        session_id: &SessionId,
        upload: &ChunkUpload,
    ) -> Result<Backup> {
        self.check_extension(&upload.filename)?;

        let missing = self.chunks.missing_indices(session_id, upload.total_chunks);
        if !missing.is_empty() {
            return Err(VaultError::IncompleteUpload(format!("missing chunks {missing:?}")));
        }
        let received = self.chunks.total_size(session_id, upload.total_chunks);
        if received != upload.filesize {
            return Err(VaultError::IncompleteUpload(format!(
                "received {received} bytes, expected {}",
                upload.filesize
            )));
        }

        let destination = self
            .resolver
            .resolve_destination(&company.name, upload.save_dir.as_deref(), &upload.filename)
            .map_err(upload_failure)?;
        let (path, size) = self.assemble(session_id, upload.total_chunks, destination).await?;

        match self.validate_and_record(ctx, company, &path, size, upload).await {
            Ok(backup) => Ok(backup),
            Err(e) => {
                discard_file(&path).await;
                Err(e)
            }
        }
    }

    fn check_extension(&self, filename: &str) -> Result<()> {
        let matches = Path::new(filename)
            .extension()
            .is_some_and(|ext| ext.to_string_lossy().to_lowercase() == self.allowed_extension);
        if matches {
            Ok(())
        } else {
            Err(VaultError::UnsupportedMediaType(format!(
                "Invalid file type. Only .{} files are allowed.",
                self.allowed_extension
            )))
        }
    }

    /// Concatenate the chunks into a fresh file next to `destination`.
    async fn assemble(
        &self,
        session_id: &SessionId,
        total_chunks: u32,
        destination: PathBuf,
    ) -> Result<(PathBuf, u64)> {
        let chunks = self.chunks.clone();
        let session_id = session_id.clone();

        tokio::task::spawn_blocking(move || -> Result<(PathBuf, u64)> {
            let (path, file) = create_unique(&destination)?;
            let mut writer = BufWriter::new(file);
            match chunks.drain_in_order(&session_id, total_chunks, &mut writer) {
                Ok(size) => Ok((path, size)),
                Err(e) => {
                    drop(writer);
                    let _ = std::fs::remove_file(&path);
                    Err(e)
                }
            }
        })
        .await
        .map_err(|e| VaultError::UploadFailed(format!("assembly task failed: {e}")))?
        .map_err(upload_failure)
    }

    async fn validate_and_record(
        &self,
        ctx: &TenantContext,
        company: &Company,
        path: &Path,
        size: u64,
        upload: &ChunkUpload,
    ) -> Result<Backup> {
        let basename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        // Usage may have moved since the request started
        let current = CompanyRepository::new(self.db.pool())
            .get_by_id(company.id)
            .await
            .map_err(upload_failure)?
            .ok_or_else(|| VaultError::UploadFailed("company disappeared".to_string()))?;
        quota::ensure_fits(&current, &basename, size)?;

        let mut record = NewBackup::new(ctx.user.id, company.id, path, size as i64);
        if let Some(expected) = upload.checksum.as_deref().filter(|c| !c.trim().is_empty()) {
            let owned = path.to_path_buf();
            let actual = tokio::task::spawn_blocking(move || integrity::checksum(&owned))
                .await
                .map_err(|e| VaultError::UploadFailed(format!("checksum task failed: {e}")))?
                .map_err(upload_failure)?;
            if !integrity::verify(expected, &actual) {
                warn!(file = %basename, expected, actual = %actual, "Checksum mismatch");
                return Err(VaultError::ChecksumMismatch {
                    expected: expected.trim().to_string(),
                    actual,
                });
            }
            record = record.with_checksum(actual);
        }

        let backup = BackupRepository::new(self.db.pool())
            .create(&record)
            .await
            .map_err(upload_failure)?;

        let comment = upload.decoded_comment();
        if let Some(ref body) = comment {
            if let Err(e) = CommentRepository::new(self.db.pool())
                .create(&NewComment::new(backup.id, ctx.user.id, body.as_str()))
                .await
            {
                error!(backup_id = backup.id, error = %e, "Failed to save upload comment");
            }
        }

        self.notifications
            .backup_uploaded(self.db.pool(), &ctx.user, &backup, comment.as_deref())
            .await;

        Ok(backup)
    }

    /// Forget idle sessions and delete chunk files older than `ttl`.
    ///
    /// Chunks of sessions that are still tracked after forgetting the idle
    /// ones are kept, so a long running upload never loses early chunks.
    pub async fn sweep(&self, ttl: Duration) -> Result<SweepReport> {
        let forgotten = self.sessions.forget_idle(ttl).await;
        let live = self.sessions.ids().await;
        let chunks = self.chunks.clone();
        let removed = tokio::task::spawn_blocking(move || chunks.sweep_stale(ttl, &live))
            .await
            .map_err(|e| VaultError::UploadFailed(format!("sweep task failed: {e}")))??;

        let report = SweepReport {
            sessions: forgotten.len(),
            chunks: removed,
        };
        if report != SweepReport::default() {
            info!(sessions = report.sessions, chunks = report.chunks, "Swept abandoned uploads");
        }
        Ok(report)
    }
}

impl std::fmt::Debug for UploadCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadCoordinator")
            .field("chunks", &self.chunks)
            .field("resolver", &self.resolver)
            .field("allowed_extension", &self.allowed_extension)
            .finish()
    }
}

/// Keep classified errors, wrap everything else as `UploadFailed`.
fn upload_failure(error: VaultError) -> VaultError {
    match error {
        VaultError::Io(_) | VaultError::Database(_) | VaultError::NotFound(_) | VaultError::Config(_) => {
            error!(error = %error, "Unexpected upload error");
            VaultError::UploadFailed(error.to_string())
        }
        classified => classified,
    }
}

async fn discard_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => error!(path = %path.display(), error = %e, "Failed to remove rejected upload"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::BackupFilter;
    use crate::config::NotifyConfig;
    use crate::db::{NewCompany, NewUser, Role, UserRepository};
    use crate::notify::tests::RecordingNotifier;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        db: Database,
        coordinator: UploadCoordinator,
        ctx: TenantContext,
        notifier: Arc<RecordingNotifier>,
    }

    async fn fixture(max_storage: i64, used: i64) -> Fixture {
        let temp = TempDir::new().unwrap();
        let db = Database::open_in_memory().await.unwrap();
        let companies = CompanyRepository::new(db.pool());
        let company = companies
            .create(&NewCompany::new("Acme", max_storage))
            .await
            .unwrap();
        companies.set_used_storage(company.id, used).await.unwrap();
        let user = UserRepository::new(db.pool())
            .create(
                &NewUser::new("alice")
                    .with_email("alice@example.com")
                    .with_company(company.id),
            )
            .await
            .unwrap();
        let ctx = TenantContext::resolve(db.pool(), user.id).await.unwrap();

        let storage = StorageConfig {
            media_root: temp.path().to_string_lossy().into_owned(),
            ..StorageConfig::default()
        };
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = NotificationDispatcher::new(&NotifyConfig::default(), notifier.clone());
        let coordinator = UploadCoordinator::new(db.clone(), &storage, dispatcher).unwrap();

        Fixture {
            _temp: temp,
            db,
            coordinator,
            ctx,
            notifier,
        }
    }

    fn chunk(session: &str, index: u32, total: u32, filesize: u64, data: &[u8]) -> ChunkUpload {
        ChunkUpload {
            session_id: Some(session.to_string()),
            chunk_index: index,
            total_chunks: total,
            filesize,
            filename: "site.zip".to_string(),
            data: data.to_vec(),
            ..ChunkUpload::default()
        }
    }

    async fn used_storage(f: &Fixture) -> i64 {
        CompanyRepository::new(f.db.pool())
            .get_by_id(f.ctx.company.as_ref().unwrap().id)
            .await
            .unwrap()
            .unwrap()
            .used_storage
    }

    async fn backup_count(f: &Fixture) -> usize {
        BackupRepository::new(f.db.pool())
            .list(&BackupFilter::new())
            .await
            .unwrap()
            .len()
    }

    #[tokio::test]
    async fn test_three_chunks_in_order() {
        let f = fixture(1_000_000, 0).await;
        let parts: [Vec<u8>; 3] = [vec![1u8; 4096], vec![2u8; 4096], vec![3u8; 10]];

        for (i, part) in parts.iter().enumerate() {
            let outcome = f
                .coordinator
                .receive_chunk(&f.ctx, chunk("s1", i as u32, 3, 8202, part))
                .await
                .unwrap();
            if i < 2 {
                assert!(matches!(outcome, ChunkOutcome::Accepted { .. }));
            } else {
                let ChunkOutcome::Complete { backup, .. } = outcome else {
                    panic!("expected completion");
                };
                assert_eq!(backup.size, 8202);
                let stored = fs::read(backup.path()).unwrap();
                assert_eq!(stored, parts.concat());
            }
        }

        assert_eq!(used_storage(&f).await, 8202);
        let sid = SessionId::parse("s1").unwrap();
        assert!(!f.coordinator.chunk_store().has_chunks(&sid));
    }

    #[tokio::test]
    async fn test_out_of_order_arrival() {
        let f = fixture(1_000_000, 0).await;

        let outcome = f
            .coordinator
            .receive_chunk(&f.ctx, chunk("s2", 2, 3, 6, b"EF"))
            .await
            .unwrap();
        match outcome {
            ChunkOutcome::Accepted { missing, .. } => assert_eq!(missing, vec![0, 1]),
            other => panic!("unexpected outcome: {other:?}"),
        }
        f.coordinator
            .receive_chunk(&f.ctx, chunk("s2", 0, 3, 6, b"AB"))
            .await
            .unwrap();
        let outcome = f
            .coordinator
            .receive_chunk(&f.ctx, chunk("s2", 1, 3, 6, b"CD"))
            .await
            .unwrap();

        let ChunkOutcome::Complete { backup, .. } = outcome else {
            panic!("expected completion");
        };
        assert_eq!(fs::read(backup.path()).unwrap(), b"ABCDEF");
    }

    #[tokio::test]
    async fn test_quota_scenario() {
        let f = fixture(1000, 900).await;

        let err = f
            .coordinator
            .receive_chunk(&f.ctx, chunk("q1", 0, 1, 150, &[0u8; 150]))
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::StorageLimitExceeded { .. }));
        assert_eq!(used_storage(&f).await, 900);
        assert_eq!(backup_count(&f).await, 0);

        let data = [7u8; 50];
        let mut upload = chunk("q2", 0, 1, 50, &data);
        upload.checksum = Some(integrity::checksum_reader(&data[..]).unwrap());
        let outcome = f.coordinator.receive_chunk(&f.ctx, upload).await.unwrap();

        let ChunkOutcome::Complete { backup, .. } = outcome else {
            panic!("expected completion");
        };
        assert_eq!(backup.size, 50);
        assert!(backup.checksum.is_some());
        assert_eq!(used_storage(&f).await, 950);
    }

    #[tokio::test]
    async fn test_understated_filesize_rejected() {
        let f = fixture(1000, 900).await;
        // Declares 50 bytes but sends 150
        let err = f
            .coordinator
            .receive_chunk(&f.ctx, chunk("q3", 0, 1, 50, &[0u8; 150]))
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::IncompleteUpload(_)));
        assert_eq!(used_storage(&f).await, 900);
        assert_eq!(backup_count(&f).await, 0);
    }

    #[tokio::test]
    async fn test_checksum_mismatch_rolls_back() {
        let f = fixture(1_000_000, 0).await;

        f.coordinator
            .receive_chunk(&f.ctx, chunk("c1", 0, 2, 4, b"ab"))
            .await
            .unwrap();
        let mut last = chunk("c1", 1, 2, 4, b"cd");
        last.checksum = Some("0".repeat(64));
        let err = f.coordinator.receive_chunk(&f.ctx, last).await.unwrap_err();

        assert!(matches!(err, VaultError::ChecksumMismatch { .. }));
        assert_eq!(backup_count(&f).await, 0);
        assert_eq!(used_storage(&f).await, 0);
        let sid = SessionId::parse("c1").unwrap();
        assert!(!f.coordinator.chunk_store().has_chunks(&sid));
        let tenant_dir = f.coordinator.resolver().tenant_root("Acme").unwrap();
        assert!(!tenant_dir.join("site.zip").exists());
    }

    #[tokio::test]
    async fn test_wrong_extension_rejected() {
        let f = fixture(1_000_000, 0).await;
        let mut upload = chunk("e1", 0, 1, 3, b"abc");
        upload.filename = "notes.txt".to_string();

        let err = f.coordinator.receive_chunk(&f.ctx, upload).await.unwrap_err();
        assert!(matches!(err, VaultError::UnsupportedMediaType(_)));
        assert_eq!(err.to_string(), "Invalid file type. Only .zip files are allowed.");
        assert!(!f
            .coordinator
            .chunk_store()
            .has_chunks(&SessionId::parse("e1").unwrap()));
    }

    #[tokio::test]
    async fn test_same_name_twice_gets_two_files() {
        let f = fixture(1_000_000, 0).await;

        let first = f
            .coordinator
            .receive_chunk(&f.ctx, chunk("n1", 0, 1, 3, b"one"))
            .await
            .unwrap();
        let second = f
            .coordinator
            .receive_chunk(&f.ctx, chunk("n1", 0, 1, 3, b"two"))
            .await
            .unwrap();

        let (ChunkOutcome::Complete { backup: a, .. }, ChunkOutcome::Complete { backup: b, .. }) =
            (first, second)
        else {
            panic!("expected two completions");
        };
        assert_ne!(a.file_path, b.file_path);
        assert_eq!(b.basename, "site_1.zip");
        assert_eq!(fs::read(a.path()).unwrap(), b"one");
        assert_eq!(fs::read(b.path()).unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_repeated_final_chunk_replays_result() {
        let f = fixture(1_000_000, 0).await;

        f.coordinator
            .receive_chunk(&f.ctx, chunk("r1", 0, 2, 4, b"ab"))
            .await
            .unwrap();
        let first = f
            .coordinator
            .receive_chunk(&f.ctx, chunk("r1", 1, 2, 4, b"cd"))
            .await
            .unwrap();
        let again = f
            .coordinator
            .receive_chunk(&f.ctx, chunk("r1", 1, 2, 4, b"cd"))
            .await
            .unwrap();

        let (ChunkOutcome::Complete { backup: a, .. }, ChunkOutcome::Complete { backup: b, .. }) =
            (first, again)
        else {
            panic!("expected completions");
        };
        assert_eq!(a.id, b.id);
        assert_eq!(backup_count(&f).await, 1);
        assert_eq!(used_storage(&f).await, 4);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_simultaneous_final_chunks_finalize_once() {
        let f = fixture(1_000_000, 0).await;
        f.coordinator
            .receive_chunk(&f.ctx, chunk("c1", 0, 2, 4, b"ab"))
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            f.coordinator.receive_chunk(&f.ctx, chunk("c1", 1, 2, 4, b"cd")),
            f.coordinator.receive_chunk(&f.ctx, chunk("c1", 1, 2, 4, b"cd")),
        );

        let (ChunkOutcome::Complete { backup: a, .. }, ChunkOutcome::Complete { backup: b, .. }) =
            (a.unwrap(), b.unwrap())
        else {
            panic!("expected completions");
        };
        assert_eq!(a.id, b.id);
        assert_eq!(backup_count(&f).await, 1);
        assert_eq!(used_storage(&f).await, 4);
    }

    #[tokio::test]
    async fn test_reused_token_with_new_content_is_a_new_upload() {
        let f = fixture(1_000_000, 0).await;
        f.coordinator
            .receive_chunk(&f.ctx, chunk("n1", 0, 2, 4, b"ab"))
            .await
            .unwrap();
        let first = f
            .coordinator
            .receive_chunk(&f.ctx, chunk("n1", 1, 2, 4, b"cd"))
            .await
            .unwrap();
        let ChunkOutcome::Complete { backup: first, .. } = first else {
            panic!("expected completion");
        };

        // Same name and size, last chunk sent first
        let outcome = f
            .coordinator
            .receive_chunk(&f.ctx, chunk("n1", 1, 2, 4, b"ZZ"))
            .await
            .unwrap();
        assert!(matches!(outcome, ChunkOutcome::Accepted { ref missing, .. } if missing == &vec![0]));

        let outcome = f
            .coordinator
            .receive_chunk(&f.ctx, chunk("n1", 0, 2, 4, b"YY"))
            .await
            .unwrap();
        let ChunkOutcome::Complete { backup: second, .. } = outcome else {
            panic!("expected completion");
        };

        assert_ne!(first.id, second.id);
        assert_eq!(fs::read(first.path()).unwrap(), b"abcd");
        assert_eq!(fs::read(second.path()).unwrap(), b"YYZZ");
        assert_eq!(backup_count(&f).await, 2);
        assert_eq!(used_storage(&f).await, 8);
        assert!(!f.coordinator.chunk_store().has_chunks(&SessionId::parse("n1").unwrap()));
    }

    #[tokio::test]
    async fn test_traversal_save_dir_rejected() {
        let f = fixture(1_000_000, 0).await;
        let mut upload = chunk("t1", 0, 1, 3, b"abc");
        upload.save_dir = Some("/client/files/../../etc".to_string());

        let err = f.coordinator.receive_chunk(&f.ctx, upload).await.unwrap_err();
        assert!(matches!(err, VaultError::InvalidPath(_)));
        assert_eq!(backup_count(&f).await, 0);
    }

    #[tokio::test]
    async fn test_save_dir_places_file() {
        let f = fixture(1_000_000, 0).await;
        let mut upload = chunk("d1", 0, 1, 3, b"abc");
        upload.save_dir = Some("C:/Adaski/files/ACME01".to_string());

        let ChunkOutcome::Complete { backup, .. } =
            f.coordinator.receive_chunk(&f.ctx, upload).await.unwrap()
        else {
            panic!("expected completion");
        };
        let expected = f
            .coordinator
            .resolver()
            .tenant_root("Acme")
            .unwrap()
            .join("ACME01")
            .join("site.zip");
        assert_eq!(backup.path(), expected);
    }

    #[tokio::test]
    async fn test_user_without_company_rejected() {
        let f = fixture(1_000_000, 0).await;
        let mut ctx = f.ctx.clone();
        ctx.company = None;

        let err = f
            .coordinator
            .receive_chunk(&ctx, chunk("u1", 0, 1, 3, b"abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_bad_chunk_index_rejected() {
        let f = fixture(1_000_000, 0).await;
        let err = f
            .coordinator
            .receive_chunk(&f.ctx, chunk("b1", 3, 3, 3, b"abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::Validation(_)));
    }

    #[tokio::test]
    async fn test_invalid_session_token_gets_fresh_id() {
        let f = fixture(1_000_000, 0).await;
        let outcome = f
            .coordinator
            .receive_chunk(&f.ctx, chunk("../../evil", 0, 2, 4, b"ab"))
            .await
            .unwrap();
        assert_ne!(outcome.session_id().as_str(), "../../evil");
    }

    #[tokio::test]
    async fn test_comment_and_notification() {
        let f = fixture(1_000_000, 0).await;
        let mut upload = chunk("m1", 0, 1, 3, b"abc");
        upload.comment = Some("%20weekly%20run ".to_string());

        let ChunkOutcome::Complete { backup, .. } =
            f.coordinator.receive_chunk(&f.ctx, upload).await.unwrap()
        else {
            panic!("expected completion");
        };

        let comments = CommentRepository::new(f.db.pool())
            .list_top_level(backup.id)
            .await
            .unwrap();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].body, "weekly run");

        // Notification runs on a blocking worker
        for _ in 0..50 {
            if !f.notifier.sent.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let sent = f.notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "Backup 'site.zip' uploaded successfully");
        assert_eq!(sent[0].comment.as_deref(), Some("weekly run"));
    }

    #[tokio::test]
    async fn test_new_file_on_same_session_discards_old_chunks() {
        let f = fixture(1_000_000, 0).await;
        f.coordinator
            .receive_chunk(&f.ctx, chunk("x1", 0, 3, 9, b"old"))
            .await
            .unwrap();

        let mut other = chunk("x1", 0, 2, 4, b"ne");
        other.filename = "other.zip".to_string();
        f.coordinator.receive_chunk(&f.ctx, other).await.unwrap();

        let sid = SessionId::parse("x1").unwrap();
        let store = f.coordinator.chunk_store();
        assert_eq!(store.total_size(&sid, 3), 2);
    }

    #[tokio::test]
    async fn test_sweep_forgets_sessions_and_chunks() {
        let f = fixture(1_000_000, 0).await;
        f.coordinator
            .receive_chunk(&f.ctx, chunk("w1", 0, 2, 4, b"ab"))
            .await
            .unwrap();
        assert_eq!(f.coordinator.sessions().len().await, 1);

        let report = f.coordinator.sweep(Duration::ZERO).await.unwrap();
        assert_eq!(report, SweepReport { sessions: 1, chunks: 1 });
        assert!(f.coordinator.sessions().is_empty().await);
    }

    #[tokio::test]
    async fn test_sweep_keeps_old_chunks_of_active_session() {
        let f = fixture(1_000_000, 0).await;
        f.coordinator
            .receive_chunk(&f.ctx, chunk("l1", 0, 2, 4, b"ab"))
            .await
            .unwrap();

        let sid = SessionId::parse("l1").unwrap();
        let first = f.coordinator.chunk_store().chunk_path(&sid, 0);
        let two_hours_ago = std::time::SystemTime::now() - Duration::from_secs(7200);
        fs::File::options()
            .write(true)
            .open(&first)
            .unwrap()
            .set_modified(two_hours_ago)
            .unwrap();

        let report = f.coordinator.sweep(Duration::from_secs(3600)).await.unwrap();
        assert_eq!(report, SweepReport::default());
        assert!(first.is_file());

        let outcome = f
            .coordinator
            .receive_chunk(&f.ctx, chunk("l1", 1, 2, 4, b"cd"))
            .await
            .unwrap();
        assert!(matches!(outcome, ChunkOutcome::Complete { .. }));
    }

    #[tokio::test]
    async fn test_staff_without_company_cannot_upload() {
        let f = fixture(1_000_000, 0).await;
        let staff = UserRepository::new(f.db.pool())
            .create(&NewUser::new("ops").with_role(Role::Staff))
            .await
            .unwrap();
        let ctx = TenantContext::resolve(f.db.pool(), staff.id).await.unwrap();
        assert!(f
            .coordinator
            .receive_chunk(&ctx, chunk("z1", 0, 1, 3, b"abc"))
            .await
            .is_err());
    }
}
