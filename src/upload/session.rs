//! Upload session state and the in-memory session registry.
//!
//! A session moves `Receiving -> Finalizing -> Complete | Failed`. The
//! registry hands out one shared, async-locked [`UploadSession`] per session
//! id; holding that lock is what keeps two finalizations of the same session
//! from running at once.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use uuid::Uuid;

use super::integrity;
use crate::backup::Backup;
use crate::{Result, VaultError};

/// Longest accepted session id.
pub const MAX_SESSION_ID_LEN: usize = 64;

/// Opaque id correlating the chunks of one upload.
///
/// Ids end up in scratch file names, so only ASCII letters, digits and `-`
/// are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Mint a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Accept a client supplied id, or None if it is not safe to use.
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = !raw.is_empty()
            && raw.len() <= MAX_SESSION_ID_LEN
            && raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        valid.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Receiving,
    Finalizing,
    Complete,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Complete | SessionState::Failed)
    }
}

/// What a session is uploading, as declared by the client on every chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFingerprint {
    pub filename: String,
    pub total_chunks: u32,
    pub filesize: u64,
}

/// State of one upload session.
#[derive(Debug)]
pub struct UploadSession {
    pub id: SessionId,
    pub state: SessionState,
    pub fingerprint: Option<UploadFingerprint>,
    /// Chunk indices stored during this run of the session.
    pub received: BTreeSet<u32>,
    pub company_id: Option<i64>,
    pub user_id: Option<i64>,
    /// Digest of the payload stored for the last chunk index.
    final_chunk_digest: Option<String>,
    outcome: Option<Result<Backup>>,
    last_activity: Instant,
}

impl UploadSession {
    fn new(id: SessionId) -> Self {
        Self {
            id,
            state: SessionState::Receiving,
            fingerprint: None,
            received: BTreeSet::new(),
            company_id: None,
            user_id: None,
            final_chunk_digest: None,
            outcome: None,
            last_activity: Instant::now(),
        }
    }

    pub fn expected_chunks(&self) -> u32 {
        self.fingerprint.as_ref().map_or(0, |f| f.total_chunks)
    }

    /// Bind the session to an upload.
    ///
    /// A session that already finished, or that was receiving a different
    /// file, starts over. Returns true when earlier progress was discarded;
    /// the caller is expected to drop that progress's chunks.
    pub fn begin(&mut self, fingerprint: UploadFingerprint, company_id: i64, user_id: i64) -> bool {
        self.last_activity = Instant::now();

        let same_upload = self.fingerprint.as_ref() == Some(&fingerprint)
            && self.company_id == Some(company_id)
            && self.user_id == Some(user_id);
        if self.state == SessionState::Receiving && same_upload {
            return false;
        }

        let discarded = !self.received.is_empty() && !self.state.is_terminal();
        self.state = SessionState::Receiving;
        self.fingerprint = Some(fingerprint);
        self.received.clear();
        self.company_id = Some(company_id);
        self.user_id = Some(user_id);
        self.final_chunk_digest = None;
        self.outcome = None;
        discarded
    }

    /// Note that chunk `index` was stored with payload `data`.
    pub fn record_chunk(&mut self, index: u32, data: &[u8]) -> Result<()> {
        let expected = self.expected_chunks();
        if index >= expected {
            return Err(VaultError::Validation(format!(
                "chunk index {index} is outside 0..{expected}"
            )));
        }
        if index + 1 == expected {
            self.final_chunk_digest = Some(integrity::digest(data));
        }
        self.received.insert(index);
        self.last_activity = Instant::now();
        Ok(())
    }

    pub fn start_finalizing(&mut self) {
        self.state = SessionState::Finalizing;
    }

    pub fn complete(&mut self, backup: Backup) {
        self.state = SessionState::Complete;
        self.received.clear();
        self.outcome = Some(Ok(backup));
        self.last_activity = Instant::now();
    }

    pub fn fail(&mut self, error: VaultError) {
        self.state = SessionState::Failed;
        self.received.clear();
        self.outcome = Some(Err(error));
        self.last_activity = Instant::now();
    }

    /// Result of the finished upload, if `fingerprint` and the payload of
    /// its last chunk match it.
    ///
    /// A new file of the same name and size reusing the session token differs
    /// in its last chunk and gets None.
    pub fn prior_outcome(
        &self,
        fingerprint: &UploadFingerprint,
        final_chunk: &[u8],
    ) -> Option<Result<Backup>> {
        if !self.state.is_terminal() || self.fingerprint.as_ref() != Some(fingerprint) {
            return None;
        }
        let digest = self.final_chunk_digest.as_deref()?;
        if digest != integrity::digest(final_chunk) {
            return None;
        }
        self.outcome.clone()
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }
}

/// Shared handle to one session.
pub type SharedSession = Arc<Mutex<UploadSession>>;

/// In-memory registry of upload sessions.
///
/// Chunks survive on disk across restarts; the registry does not, and a
/// session seen for the first time simply starts in `Receiving`.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, SharedSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the session for `id`, creating it if it is unknown.
    pub async fn get_or_create(&self, id: &SessionId) -> SharedSession {
        let mut sessions = self.sessions.lock().await;
        sessions
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(UploadSession::new(id.clone()))))
            .clone()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Ids of every session currently tracked.
    pub async fn ids(&self) -> HashSet<SessionId> {
        self.sessions.lock().await.keys().cloned().collect()
    }

    /// Drop sessions idle for longer than `max_idle`.
    ///
    /// Sessions that are locked by a running request are kept.
    pub async fn forget_idle(&self, max_idle: Duration) -> Vec<SessionId> {
        let mut sessions = self.sessions.lock().await;
        let idle: Vec<SessionId> = sessions
            .iter()
            .filter(|(_, session)| {
                session
                    .try_lock()
                    .map(|s| s.idle_for() >= max_idle)
                    .unwrap_or(false)
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in &idle {
            sessions.remove(id);
        }
        idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(filename: &str, total_chunks: u32, filesize: u64) -> UploadFingerprint {
        UploadFingerprint {
            filename: filename.to_string(),
            total_chunks,
            filesize,
        }
    }

    fn backup() -> Backup {
        Backup {
            id: 1,
            user_id: 1,
            company_id: 1,
            file_path: "/m/a.zip".to_string(),
            basename: "a.zip".to_string(),
            size: 3,
            checksum: None,
            uploaded_at: "2024-01-01 00:00:00".to_string(),
        }
    }

    #[test]
    fn test_session_id_parse() {
        assert!(SessionId::parse("3f2a-9c").is_some());
        assert!(SessionId::parse(SessionId::generate().as_str()).is_some());
        assert!(SessionId::parse("").is_none());
        assert!(SessionId::parse("../x").is_none());
        assert!(SessionId::parse("a_chunk_1").is_none());
        assert!(SessionId::parse(&"a".repeat(MAX_SESSION_ID_LEN + 1)).is_none());
    }

    #[test]
    fn test_record_chunk_bounds() {
        let mut session = UploadSession::new(SessionId::generate());
        session.begin(fp("a.zip", 2, 10), 1, 1);
        session.record_chunk(0, b"abcde").unwrap();
        session.record_chunk(1, b"fghij").unwrap();
        assert!(session.record_chunk(2, b"x").is_err());
        assert_eq!(session.received.len(), 2);
    }

    #[test]
    fn test_begin_same_upload_keeps_progress() {
        let mut session = UploadSession::new(SessionId::generate());
        assert!(!session.begin(fp("a.zip", 3, 10), 1, 1));
        session.record_chunk(0, b"abcd").unwrap();
        assert!(!session.begin(fp("a.zip", 3, 10), 1, 1));
        assert_eq!(session.received.len(), 1);
    }

    #[test]
    fn test_begin_different_upload_discards_progress() {
        let mut session = UploadSession::new(SessionId::generate());
        session.begin(fp("a.zip", 3, 10), 1, 1);
        session.record_chunk(0, b"abcd").unwrap();

        assert!(session.begin(fp("b.zip", 2, 5), 1, 1));
        assert!(session.received.is_empty());
        assert_eq!(session.expected_chunks(), 2);
    }

    #[test]
    fn test_terminal_session_restarts_and_keeps_prior_outcome_until_then() {
        let mut session = UploadSession::new(SessionId::generate());
        session.begin(fp("a.zip", 1, 3), 1, 1);
        session.record_chunk(0, b"abc").unwrap();
        session.start_finalizing();
        assert_eq!(session.state, SessionState::Finalizing);
        session.complete(backup());

        let prior = session.prior_outcome(&fp("a.zip", 1, 3), b"abc").unwrap().unwrap();
        assert_eq!(prior.id, 1);
        assert!(session.prior_outcome(&fp("b.zip", 1, 3), b"abc").is_none());

        assert!(!session.begin(fp("a.zip", 1, 3), 1, 1));
        assert_eq!(session.state, SessionState::Receiving);
        assert!(session.prior_outcome(&fp("a.zip", 1, 3), b"abc").is_none());
    }

    #[test]
    fn test_prior_outcome_requires_same_final_chunk() {
        let mut session = UploadSession::new(SessionId::generate());
        session.begin(fp("a.zip", 2, 4), 1, 1);
        session.record_chunk(0, b"ab").unwrap();
        session.record_chunk(1, b"cd").unwrap();
        session.complete(backup());

        assert!(session.prior_outcome(&fp("a.zip", 2, 4), b"cd").is_some());
        assert!(session.prior_outcome(&fp("a.zip", 2, 4), b"ZZ").is_none());
    }

    #[test]
    fn test_failed_outcome_is_replayed() {
        let mut session = UploadSession::new(SessionId::generate());
        session.begin(fp("a.zip", 2, 3), 1, 1);
        session.record_chunk(1, b"c").unwrap();
        session.fail(VaultError::IncompleteUpload("missing".to_string()));
        assert!(matches!(
            session.prior_outcome(&fp("a.zip", 2, 3), b"c"),
            Some(Err(VaultError::IncompleteUpload(_)))
        ));
    }

    #[tokio::test]
    async fn test_registry_returns_same_session() {
        let registry = SessionRegistry::new();
        let id = SessionId::generate();
        let a = registry.get_or_create(&id).await;
        let b = registry.get_or_create(&id).await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_forget_idle_skips_locked_sessions() {
        let registry = SessionRegistry::new();
        let busy = SessionId::generate();
        let idle = SessionId::generate();
        let busy_session = registry.get_or_create(&busy).await;
        registry.get_or_create(&idle).await;

        let _guard = busy_session.lock().await;
        let forgotten = registry.forget_idle(Duration::ZERO).await;
        assert_eq!(forgotten, vec![idle]);
        assert_eq!(registry.len().await, 1);
    }
}
