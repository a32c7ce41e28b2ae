//! Backup record types and repository.

use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{QueryBuilder, Sqlite};

use crate::db::DbPool;
use crate::{Result, VaultError};

const BACKUP_COLUMNS: &str =
    "id, user_id, company_id, file_path, basename, size, checksum, uploaded_at";

/// A finalized upload.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Backup {
    pub id: i64,
    /// Uploading user.
    pub user_id: i64,
    /// Owning tenant.
    pub company_id: i64,
    /// Absolute path of the stored file.
    pub file_path: String,
    /// File name component of `file_path`.
    pub basename: String,
    /// Size in bytes.
    pub size: i64,
    /// Hex SHA-256 verified at upload time, if the client sent one.
    pub checksum: Option<String>,
    /// Upload time (UTC, `YYYY-MM-DD HH:MM:SS`).
    pub uploaded_at: String,
}

impl Backup {
    pub fn path(&self) -> &Path {
        Path::new(&self.file_path)
    }

    /// Get uploaded_at as DateTime<Utc>.
    pub fn uploaded_at_datetime(&self) -> DateTime<Utc> {
        NaiveDateTime::parse_from_str(&self.uploaded_at, "%Y-%m-%d %H:%M:%S")
            .map(|dt| dt.and_utc())
            .unwrap_or_else(|_| Utc::now())
    }
}

/// Data for creating a backup record.
#[derive(Debug, Clone)]
pub struct NewBackup {
    pub user_id: i64,
    pub company_id: i64,
    pub file_path: String,
    pub size: i64,
    pub checksum: Option<String>,
}

impl NewBackup {
    pub fn new(user_id: i64, company_id: i64, file_path: impl AsRef<Path>, size: i64) -> Self {
        Self {
            user_id,
            company_id,
            file_path: file_path.as_ref().to_string_lossy().into_owned(),
            size,
            checksum: None,
        }
    }

    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    fn basename(&self) -> String {
        Path::new(&self.file_path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Listing filter; unset fields do not restrict.
#[derive(Debug, Clone, Default)]
pub struct BackupFilter {
    pub company_id: Option<i64>,
    pub user_id: Option<i64>,
    /// Substring of the stored path.
    pub name: Option<String>,
    /// Inclusive lower bound, `YYYY-MM-DD`.
    pub start_date: Option<String>,
    /// Inclusive upper bound, `YYYY-MM-DD`.
    pub end_date: Option<String>,
}

impl BackupFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn company(mut self, company_id: i64) -> Self {
        self.company_id = Some(company_id);
        self
    }

    pub fn user(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Restrict to an upload date range.
    ///
    /// A range whose start is after its end is ignored as a whole.
    pub fn dates(mut self, start: Option<String>, end: Option<String>) -> Self {
        if let (Some(s), Some(e)) = (&start, &end) {
            if s > e {
                return self;
            }
        }
        self.start_date = start;
        self.end_date = end;
        self
    }
}

/// Repository for backup records.
///
/// Inserts and deletes also move the owning company's `used_storage` in the
/// same transaction.
pub struct BackupRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> BackupRepository<'a> {
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Insert a backup and add its size to the company's used storage.
    pub async fn create(&self, backup: &NewBackup) -> Result<Backup> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "INSERT INTO backups (user_id, company_id, file_path, basename, size, checksum)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(backup.user_id)
        .bind(backup.company_id)
        .bind(&backup.file_path)
        .bind(backup.basename())
        .bind(backup.size)
        .bind(&backup.checksum)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE companies SET used_storage = used_storage + ? WHERE id = ?")
            .bind(backup.size)
            .bind(backup.company_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        self.get_by_id(result.last_insert_rowid())
            .await?
            .ok_or_else(|| VaultError::NotFound("backup".to_string()))
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<Backup>> {
        let sql = format!("SELECT {BACKUP_COLUMNS} FROM backups WHERE id = ?");
        let backup = sqlx::query_as::<_, Backup>(&sql)
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        Ok(backup)
    }

    /// Delete a backup record and subtract its size from the company's usage.
    ///
    /// Returns the deleted record, or None if it did not exist. The file on
    /// disk is left to the caller.
    pub async fn delete(&self, id: i64) -> Result<Option<Backup>> {
        let mut tx = self.pool.begin().await?;

        // Only the delete that actually removed the row releases its usage
        let sql = format!("DELETE FROM backups WHERE id = ? RETURNING {BACKUP_COLUMNS}");
        let Some(backup) = sqlx::query_as::<_, Backup>(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
        else {
            tx.rollback().await?;
            return Ok(None);
        };

        sqlx::query(
            "UPDATE companies SET used_storage = MAX(used_storage - ?, 0) WHERE id = ?",
        )
        .bind(backup.size)
        .bind(backup.company_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(backup))
    }

    /// List backups matching the filter, newest first.
    pub async fn list(&self, filter: &BackupFilter) -> Result<Vec<Backup>> {
        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {BACKUP_COLUMNS} FROM backups WHERE 1 = 1"));

        if let Some(company_id) = filter.company_id {
            query.push(" AND company_id = ");
            query.push_bind(company_id);
        }
        if let Some(user_id) = filter.user_id {
            query.push(" AND user_id = ");
            query.push_bind(user_id);
        }
        if let Some(ref name) = filter.name {
            query.push(" AND file_path LIKE ");
            query.push_bind(format!("%{}%", escape_like(name)));
            query.push(" ESCAPE '\\'");
        }
        if let Some(ref start) = filter.start_date {
            query.push(" AND date(uploaded_at) >= date(");
            query.push_bind(start.clone());
            query.push(")");
        }
        if let Some(ref end) = filter.end_date {
            query.push(" AND date(uploaded_at) <= date(");
            query.push_bind(end.clone());
            query.push(")");
        }
        query.push(" ORDER BY uploaded_at DESC, id DESC");

        let backups = query.build_query_as::<Backup>().fetch_all(self.pool).await?;
        Ok(backups)
    }

    /// Sum of backup sizes for a company, straight from the records.
    pub async fn total_size_by_company(&self, company_id: i64) -> Result<i64> {
        let total: i64 =
            sqlx::query_scalar("SELECT COALESCE(SUM(size), 0) FROM backups WHERE company_id = ?")
                .bind(company_id)
                .fetch_one(self.pool)
                .await?;
        Ok(total)
    }
}

/// Escape `LIKE` wildcards so `name` matches literally.
fn escape_like(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for c in name.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
