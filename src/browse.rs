//! Read-only view over the backup tree.
//!
//! Staff browse the whole backups root, everyone else their company's
//! folder. Requested paths are relative to that base and may never leave it,
//! and only files that have a visible backup record are shown.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use crate::backup::{Backup, BackupFilter, BackupRepository};
use crate::config::StorageConfig;
use crate::db::DbPool;
use crate::tenant::TenantContext;
use crate::upload::PathResolver;
use crate::{Result, VaultError};

/// One clickable step of the path shown above a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Breadcrumb {
    pub name: String,
    /// Path relative to the listing base; empty for the base itself.
    pub path: String,
}

/// Contents of one directory.
#[derive(Debug, Clone)]
pub struct DirectoryListing {
    /// Listed directory, relative to the base.
    pub path: String,
    /// Names of subdirectories, sorted.
    pub subdirectories: Vec<String>,
    /// Visible backups stored directly in this directory.
    pub files: Vec<Backup>,
    pub breadcrumbs: Vec<Breadcrumb>,
    /// Parent directory relative to the base, None at the base.
    pub parent_path: Option<String>,
}

/// Listing returned to upload clients navigating by company code.
#[derive(Debug, Clone, Default)]
pub struct NavigateListing {
    pub directories: Vec<String>,
    /// Path of the listed directory below the tenant root, one entry per segment.
    pub segments: Vec<String>,
    pub files: Vec<Backup>,
}

/// Parameters of a navigation request.
#[derive(Debug, Clone, Default)]
pub struct NavigateRequest {
    pub company_code: Option<String>,
    pub path: Option<String>,
    /// Jump to the folder of the newest matching backup.
    pub default_latest: bool,
}

/// Resolve `requested` below `base` without touching the filesystem more
/// than needed, refusing anything that ends up outside `base`.
pub fn confine(base: &Path, requested: &str) -> Result<PathBuf> {
    let mut resolved = base.to_path_buf();
    let mut depth = 0usize;
    for component in Path::new(requested.trim()).components() {
        match component {
            Component::Normal(name) => {
                resolved.push(name);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir if depth > 0 => {
                resolved.pop();
                depth -= 1;
            }
            Component::ParentDir => {
                return Err(VaultError::InvalidPath(format!(
                    "'{requested}' is outside the backup folder"
                )))
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(VaultError::InvalidPath(format!(
                    "'{requested}' must be a relative path"
                )))
            }
        }
    }

    // Symlinks must not lead out either
    if let (Ok(real_base), Ok(real)) = (base.canonicalize(), resolved.canonicalize()) {
        if !real.starts_with(&real_base) {
            return Err(VaultError::InvalidPath(format!(
                "'{requested}' is outside the backup folder"
            )));
        }
    }
    Ok(resolved)
}

/// Remove empty directories below `base`, keeping `base` itself.
pub fn prune_empty_dirs(base: &Path) -> usize {
    fn prune(dir: &Path) -> io::Result<(usize, bool)> {
        let mut removed = 0;
        let mut empty = true;
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                let (n, child_empty) = prune(&path)?;
                removed += n;
                if child_empty && fs::remove_dir(&path).is_ok() {
                    removed += 1;
                    continue;
                }
            }
            empty = false;
        }
        Ok((removed, empty))
    }

    match prune(base) {
        Ok((removed, _)) => {
            if removed > 0 {
                debug!(base = %base.display(), removed, "Pruned empty directories");
            }
            removed
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
        Err(e) => {
            warn!(base = %base.display(), error = %e, "Failed to prune directories");
            0
        }
    }
}

fn relative_string(base: &Path, path: &Path) -> String {
    path.strip_prefix(base)
        .map(|rel| {
            rel.components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/")
        })
        .unwrap_or_default()
}

fn read_directory(dir: &Path, visible: &[Backup]) -> (Vec<String>, Vec<Backup>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return (Vec::new(), Vec::new());
    };

    let mut subdirectories: Vec<String> = entries
        .flatten()
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    subdirectories.sort();

    let files = visible
        .iter()
        .filter(|b| b.path().parent() == Some(dir) && b.path().is_file())
        .cloned()
        .collect();
    (subdirectories, files)
}

/// List `requested` below `base`.
///
/// Breadcrumbs start at the base's own folder name; nothing above the base
/// is ever offered. Blocking.
pub fn list_directory(base: &Path, requested: &str, visible: &[Backup]) -> Result<DirectoryListing> {
    let dir = confine(base, requested)?;
    let (subdirectories, files) = read_directory(&dir, visible);

    let relative = relative_string(base, &dir);
    let base_label = base
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut breadcrumbs = vec![Breadcrumb {
        name: base_label,
        path: String::new(),
    }];
    let mut walked: Vec<&str> = Vec::new();
    for segment in relative.split('/').filter(|s| !s.is_empty()) {
        walked.push(segment);
        breadcrumbs.push(Breadcrumb {
            name: segment.to_string(),
            path: walked.join("/"),
        });
    }

    let parent_path = (!walked.is_empty()).then(|| walked[..walked.len() - 1].join("/"));

    Ok(DirectoryListing {
        path: relative,
        subdirectories,
        files,
        breadcrumbs,
        parent_path,
    })
}

/// Tenant-scoped browsing over the backups root.
#[derive(Debug, Clone)]
pub struct DirectoryBrowser {
    resolver: PathResolver,
}

impl DirectoryBrowser {
    pub fn new(storage: &StorageConfig) -> Self {
        Self {
            resolver: PathResolver::new(storage),
        }
    }

    /// Folder the caller may browse.
    pub fn base_for(&self, ctx: &TenantContext) -> Result<PathBuf> {
        if ctx.is_privileged() {
            return Ok(self.resolver.backups_root().to_path_buf());
        }
        self.resolver.tenant_root(&ctx.require_company()?.name)
    }

    /// List a directory for the caller, pruning empty folders when the base
    /// itself is requested.
    pub async fn browse(
        &self,
        pool: &DbPool,
        ctx: &TenantContext,
        requested: &str,
    ) -> Result<DirectoryListing> {
        let base = self.base_for(ctx)?;
        let filter = if ctx.is_privileged() {
            BackupFilter::new()
        } else {
            BackupFilter::new().company(ctx.require_company()?.id)
        };
        let visible = BackupRepository::new(pool).list(&filter).await?;

        let requested = requested.to_string();
        tokio::task::spawn_blocking(move || {
            if requested.trim().is_empty() {
                prune_empty_dirs(&base);
            }
            list_directory(&base, &requested, &visible)
        })
        .await
        .map_err(|e| VaultError::UploadFailed(format!("listing task failed: {e}")))?
    }

    /// Navigate below `<tenant>/<company_code>` among backups whose name
    /// contains the code.
    pub async fn navigate(
        &self,
        pool: &DbPool,
        ctx: &TenantContext,
        request: NavigateRequest,
    ) -> Result<NavigateListing> {
        let company = ctx.require_company()?;
        let Some(code) = request.company_code.as_deref().map(str::trim) else {
            return Ok(NavigateListing::default());
        };

        let tenant_root = self.resolver.tenant_root(&company.name)?;
        let base = confine(&tenant_root, code)?;

        let needle = code.to_lowercase();
        let backups: Vec<Backup> = BackupRepository::new(pool)
            .list(&BackupFilter::new().company(company.id))
            .await?
            .into_iter()
            .filter(|b| b.basename.to_lowercase().contains(&needle))
            .collect();
        if backups.is_empty() {
            return Ok(NavigateListing::default());
        }

        let mut dir = confine(&base, request.path.as_deref().unwrap_or(""))?;
        if request.default_latest {
            if let Some(latest_dir) = backups[0].path().parent() {
                if latest_dir.starts_with(&dir) {
                    dir = latest_dir.to_path_buf();
                }
            }
        }

        tokio::task::spawn_blocking(move || {
            let (directories, files) = read_directory(&dir, &backups);
            let segments = relative_string(&tenant_root, &dir)
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            NavigateListing {
                directories,
                segments,
                files,
            }
        })
        .await
        .map_err(|e| VaultError::UploadFailed(format!("listing task failed: {e}")))
    }
}
