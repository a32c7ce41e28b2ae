//! Completed-upload notifications.
//!
//! Delivery itself is pluggable through [`Notifier`]; the default
//! [`LogNotifier`] only records the dispatch. Sending never affects the
//! upload that triggered it.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::backup::Backup;
use crate::config::NotifyConfig;
use crate::db::{DbPool, User, UserRepository};
use crate::Result;

/// One notification about a finished upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupNotice {
    pub subject: String,
    pub sender: String,
    pub recipients: Vec<String>,
    pub basename: String,
    /// Upload time, e.g. `Monday 01 January, 2024 at 09:30`.
    pub uploaded_at: String,
    pub comment: Option<String>,
}

impl BackupNotice {
    pub fn new(
        sender: &str,
        recipients: Vec<String>,
        backup: &Backup,
        comment: Option<&str>,
    ) -> Self {
        Self {
            subject: format!("Backup '{}' uploaded successfully", backup.basename),
            sender: sender.to_string(),
            recipients,
            basename: backup.basename.clone(),
            uploaded_at: backup
                .uploaded_at_datetime()
                .format("%A %d %B, %Y at %H:%M")
                .to_string(),
            comment: comment.map(str::to_string),
        }
    }

    /// Plain text body.
    pub fn body(&self) -> String {
        let mut body = format!(
            "The backup '{}' was uploaded on {}.",
            self.basename, self.uploaded_at
        );
        if let Some(ref comment) = self.comment {
            body.push_str("\n\nComment: ");
            body.push_str(comment);
        }
        body
    }
}

/// Delivery backend. Called from a blocking worker thread.
pub trait Notifier: Send + Sync {
    fn send(&self, notice: &BackupNotice) -> Result<()>;
}

/// Notifier that writes the dispatch to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, notice: &BackupNotice) -> Result<()> {
        info!(
            subject = %notice.subject,
            from = %notice.sender,
            to = %notice.recipients.join(", "),
            "Backup notification sent"
        );
        Ok(())
    }
}

/// The uploader if they opted in, plus opted-in company admins, without
/// duplicates and in that order.
pub fn collect_recipients(uploader: &User, admins: Vec<User>) -> Vec<User> {
    let mut recipients: Vec<User> = Vec::new();
    if uploader.get_backup_emails {
        recipients.push(uploader.clone());
    }
    for admin in admins {
        if admin.get_backup_emails && !recipients.iter().any(|r| r.id == admin.id) {
            recipients.push(admin);
        }
    }
    recipients
}

/// Builds notices and hands them to the notifier off the request path.
#[derive(Clone)]
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    sender: String,
    enabled: bool,
}

impl NotificationDispatcher {
    pub fn new(config: &NotifyConfig, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            notifier,
            sender: config.sender.clone(),
            enabled: config.enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Notify about a finished upload.
    ///
    /// Returns the handle of the background send, or None when nothing was
    /// sent. Lookup failures are logged and swallowed.
    pub async fn backup_uploaded(
        &self,
        pool: &DbPool,
        uploader: &User,
        backup: &Backup,
        comment: Option<&str>,
    ) -> Option<JoinHandle<()>> {
        if !self.enabled {
            return None;
        }

        let admins = match UserRepository::new(pool)
            .list_notified_admins(backup.company_id)
            .await
        {
            Ok(admins) => admins,
            Err(e) => {
                error!(backup_id = backup.id, error = %e, "Failed to look up notification recipients");
                return None;
            }
        };

        let recipients: Vec<String> = collect_recipients(uploader, admins)
            .into_iter()
            .filter_map(|user| {
                if user.email.is_none() {
                    warn!(username = %user.username, "Notification recipient has no email address");
                }
                user.email
            })
            .collect();
        if recipients.is_empty() {
            return None;
        }

        let notice = BackupNotice::new(&self.sender, recipients, backup, comment);
        let notifier = Arc::clone(&self.notifier);
        Some(tokio::task::spawn_blocking(move || {
            if let Err(e) = notifier.send(&notice) {
                error!(subject = %notice.subject, error = %e, "Failed to send backup notification");
            }
        }))
    }
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("sender", &self.sender)
            .field("enabled", &self.enabled)
            .finish()
    }
}
