//! Comments attached to backups.
//!
//! Comments thread one level deep: a reply points at a top-level comment of
//! the same backup, and replies cannot themselves be replied to.

use crate::db::DbPool;
use crate::{Result, VaultError};

/// Maximum comment body length in characters.
pub const MAX_COMMENT_LENGTH: usize = 4000;

const COMMENT_COLUMNS: &str = "id, backup_id, user_id, parent_id, body, created_at";

/// A comment on a backup.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Comment {
    pub id: i64,
    pub backup_id: i64,
    pub user_id: i64,
    /// Top-level comment this one replies to.
    pub parent_id: Option<i64>,
    pub body: String,
    pub created_at: String,
}

impl Comment {
    pub fn is_reply(&self) -> bool {
        self.parent_id.is_some()
    }
}

/// Data for creating a comment.
#[derive(Debug, Clone)]
pub struct NewComment {
    pub backup_id: i64,
    pub user_id: i64,
    pub parent_id: Option<i64>,
    pub body: String,
}

impl NewComment {
    pub fn new(backup_id: i64, user_id: i64, body: impl Into<String>) -> Self {
        Self {
            backup_id,
            user_id,
            parent_id: None,
            body: body.into(),
        }
    }

    pub fn reply_to(mut self, parent_id: i64) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    fn validate(&self) -> Result<()> {
        let body = self.body.trim();
        if body.is_empty() {
            return Err(VaultError::Validation("comment body is empty".to_string()));
        }
        if body.chars().count() > MAX_COMMENT_LENGTH {
            return Err(VaultError::Validation(format!(
                "comment is longer than {MAX_COMMENT_LENGTH} characters"
            )));
        }
        Ok(())
    }
}

/// Repository for backup comments.
pub struct CommentRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> CommentRepository<'a> {
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Create a comment, checking the one-level threading rule for replies.
    pub async fn create(&self, comment: &NewComment) -> Result<Comment> {
        comment.validate()?;

        if let Some(parent_id) = comment.parent_id {
            let parent = self
                .get_by_id(parent_id)
                .await?
                .ok_or_else(|| VaultError::NotFound("parent comment".to_string()))?;
            if parent.backup_id != comment.backup_id {
                return Err(VaultError::Validation(
                    "parent comment belongs to another backup".to_string(),
                ));
            }
            if parent.is_reply() {
                return Err(VaultError::Validation(
                    "replies cannot be replied to".to_string(),
                ));
            }
        }

        let result = sqlx::query(
            "INSERT INTO comments (backup_id, user_id, parent_id, body) VALUES (?, ?, ?, ?)",
        )
        .bind(comment.backup_id)
        .bind(comment.user_id)
        .bind(comment.parent_id)
        .bind(comment.body.trim())
        .execute(self.pool)
        .await?;

        self.get_by_id(result.last_insert_rowid())
            .await?
            .ok_or_else(|| VaultError::NotFound("comment".to_string()))
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<Comment>> {
        let sql = format!("SELECT {COMMENT_COLUMNS} FROM comments WHERE id = ?");
        let comment = sqlx::query_as::<_, Comment>(&sql)
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        Ok(comment)
    }

    /// Top-level comments of a backup, oldest first.
    pub async fn list_top_level(&self, backup_id: i64) -> Result<Vec<Comment>> {
        let sql = format!(
            "SELECT {COMMENT_COLUMNS} FROM comments
             WHERE backup_id = ? AND parent_id IS NULL
             ORDER BY created_at, id"
        );
        let comments = sqlx::query_as::<_, Comment>(&sql)
            .bind(backup_id)
            .fetch_all(self.pool)
            .await?;
        Ok(comments)
    }

    /// Replies to a comment, oldest first.
    pub async fn list_replies(&self, parent_id: i64) -> Result<Vec<Comment>> {
        let sql = format!(
            "SELECT {COMMENT_COLUMNS} FROM comments WHERE parent_id = ? ORDER BY created_at, id"
        );
        let comments = sqlx::query_as::<_, Comment>(&sql)
            .bind(parent_id)
            .fetch_all(self.pool)
            .await?;
        Ok(comments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::{BackupRepository, NewBackup};
    use crate::db::{CompanyRepository, Database, NewCompany, NewUser, UserRepository};

    async fn setup() -> (Database, i64, i64, i64) {
        let db = Database::open_in_memory().await.unwrap();
        let company = CompanyRepository::new(db.pool())
            .create(&NewCompany::new("Acme", 10_000))
            .await
            .unwrap();
        let user = UserRepository::new(db.pool())
            .create(&NewUser::new("alice").with_company(company.id))
            .await
            .unwrap();
        let repo = BackupRepository::new(db.pool());
        let first = repo
            .create(&NewBackup::new(user.id, company.id, "/m/a.zip", 1))
            .await
            .unwrap();
        let second = repo
            .create(&NewBackup::new(user.id, company.id, "/m/b.zip", 1))
            .await
            .unwrap();
        (db, user.id, first.id, second.id)
    }

    #[tokio::test]
    async fn test_create_and_list_threads() {
        let (db, user_id, backup_id, _) = setup().await;
        let repo = CommentRepository::new(db.pool());

        let top = repo
            .create(&NewComment::new(backup_id, user_id, "  nightly run  "))
            .await
            .unwrap();
        assert_eq!(top.body, "nightly run");
        assert!(!top.is_reply());

        let reply = repo
            .create(&NewComment::new(backup_id, user_id, "verified").reply_to(top.id))
            .await
            .unwrap();
        assert_eq!(reply.parent_id, Some(top.id));

        let top_level = repo.list_top_level(backup_id).await.unwrap();
        assert_eq!(top_level.len(), 1);
        let replies = repo.list_replies(top.id).await.unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].body, "verified");
    }

    #[tokio::test]
    async fn test_reply_to_reply_rejected() {
        let (db, user_id, backup_id, _) = setup().await;
        let repo = CommentRepository::new(db.pool());
        let top = repo
            .create(&NewComment::new(backup_id, user_id, "a"))
            .await
            .unwrap();
        let reply = repo
            .create(&NewComment::new(backup_id, user_id, "b").reply_to(top.id))
            .await
            .unwrap();

        let result = repo
            .create(&NewComment::new(backup_id, user_id, "c").reply_to(reply.id))
            .await;
        assert!(matches!(result, Err(VaultError::Validation(_))));
    }

    #[tokio::test]
    async fn test_reply_across_backups_rejected() {
        let (db, user_id, backup_id, other_id) = setup().await;
        let repo = CommentRepository::new(db.pool());
        let top = repo
            .create(&NewComment::new(backup_id, user_id, "a"))
            .await
            .unwrap();

        let result = repo
            .create(&NewComment::new(other_id, user_id, "b").reply_to(top.id))
            .await;
        assert!(matches!(result, Err(VaultError::Validation(_))));

        let missing = repo
            .create(&NewComment::new(backup_id, user_id, "b").reply_to(9999))
            .await;
        assert!(matches!(missing, Err(VaultError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_empty_body_rejected() {
        let (db, user_id, backup_id, _) = setup().await;
        let repo = CommentRepository::new(db.pool());
        let result = repo.create(&NewComment::new(backup_id, user_id, "   ")).await;
        assert!(matches!(result, Err(VaultError::Validation(_))));
    }
}
