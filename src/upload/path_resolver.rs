//! Destination paths for finalized uploads.
//!
//! Finalized files land at `<backups_root>/<tenant>/<subpath>/<filename>`.
//! Only `subpath` comes from the client, through the `save_dir` hint: the
//! client sends its own absolute path, and everything up to and including the
//! marker segment (`files` by default) is discarded.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::config::StorageConfig;
use crate::{Result, VaultError};

/// Computes confined destination paths under the backups root.
#[derive(Debug, Clone)]
pub struct PathResolver {
    backups_root: PathBuf,
    marker: String,
    manual_label: String,
}

impl PathResolver {
    pub fn new(storage: &StorageConfig) -> Self {
        Self {
            backups_root: storage.backups_root(),
            marker: storage.path_marker.clone(),
            manual_label: storage.manual_uploads_label.clone(),
        }
    }

    pub fn backups_root(&self) -> &Path {
        &self.backups_root
    }

    /// Root folder of one tenant.
    pub fn tenant_root(&self, tenant: &str) -> Result<PathBuf> {
        let mut components = Path::new(tenant).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) if !tenant.contains('\\') => {
                Ok(self.backups_root.join(name))
            }
            _ => Err(VaultError::InvalidPath(format!(
                "tenant name '{tenant}' is not a single path segment"
            ))),
        }
    }

    /// Turn a client `save_dir` hint into a relative path below the tenant root.
    ///
    /// An empty hint maps to the tenant root itself and the manual uploads
    /// label maps to a folder of that name. Any other hint must contain the
    /// marker segment; segments after it are kept, `.` and empty segments are
    /// dropped, and `..` is rejected.
    pub fn sanitize_subpath(&self, save_dir: Option<&str>) -> Result<PathBuf> {
        let save_dir = match save_dir.map(str::trim) {
            None | Some("") => return Ok(PathBuf::new()),
            Some(s) => s,
        };
        if save_dir == self.manual_label {
            return Ok(PathBuf::from(&self.manual_label));
        }

        let segments: Vec<&str> = save_dir.split(['/', '\\']).collect();
        let Some(marker_pos) = segments.iter().position(|s| *s == self.marker) else {
            return Err(VaultError::InvalidPath(format!(
                "save_dir '{save_dir}' has no '{}' segment",
                self.marker
            )));
        };

        let mut subpath = PathBuf::new();
        for segment in &segments[marker_pos + 1..] {
            match *segment {
                "" | "." => continue,
                ".." => {
                    return Err(VaultError::InvalidPath(format!(
                        "save_dir '{save_dir}' leaves the backup folder"
                    )))
                }
                s if s.contains('\0') => {
                    return Err(VaultError::InvalidPath("save_dir contains NUL".to_string()))
                }
                s => subpath.push(s),
            }
        }
        Ok(subpath)
    }

    /// Resolve where an upload should be written and create its directory.
    ///
    /// The returned path does not exist yet: if `filename` is taken, a numeric
    /// suffix is added (`site.zip`, `site_1.zip`, `site_2.zip`, ...).
    pub fn resolve_destination(
        &self,
        tenant: &str,
        save_dir: Option<&str>,
        filename: &str,
    ) -> Result<PathBuf> {
        validate_filename(filename)?;
        let dir = self.tenant_root(tenant)?.join(self.sanitize_subpath(save_dir)?);
        fs::create_dir_all(&dir)?;
        Ok(available_path(&dir.join(filename)))
    }
}

/// Reject filenames that are not a single plain segment.
pub fn validate_filename(filename: &str) -> Result<()> {
    let mut components = Path::new(filename).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !filename.contains('\\') => Ok(()),
        _ => Err(VaultError::InvalidPath(format!(
            "filename '{filename}' is not a plain file name"
        ))),
    }
}

/// `path` itself if free, otherwise the first free `stem_N.ext`.
pub fn available_path(path: &Path) -> PathBuf {
    let mut n = 0u32;
    loop {
        let candidate = numbered(path, n);
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Create `path` exclusively, moving to the next free suffix if another
/// writer claimed it first.
pub fn create_unique(path: &Path) -> io::Result<(PathBuf, File)> {
    let mut n = 0u32;
    loop {
        let candidate = numbered(path, n);
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(file) => return Ok((candidate, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => n += 1,
            Err(e) => return Err(e),
        }
    }
}

fn numbered(path: &Path, n: u32) -> PathBuf {
    if n == 0 {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}_{n}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{n}"),
    };
    path.with_file_name(name)
}
