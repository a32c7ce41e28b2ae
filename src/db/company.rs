//! Tenant (company) model and repository.

use super::DbPool;
use crate::{Result, VaultError};

/// A tenant owning a storage quota and a backup namespace.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Company {
    pub id: i64,
    /// Name; also the tenant's folder under the backups root.
    pub name: String,
    /// Storage quota in bytes.
    pub max_storage: i64,
    /// Cached sum of the tenant's backup sizes, in bytes.
    pub used_storage: i64,
    pub created_at: String,
}

impl Company {
    /// Bytes still available; never negative.
    pub fn storage_left(&self) -> u64 {
        (self.max_storage - self.used_storage).max(0) as u64
    }
}

/// Data for creating a new company.
#[derive(Debug, Clone)]
pub struct NewCompany {
    pub name: String,
    pub max_storage: i64,
}

impl NewCompany {
    pub fn new(name: impl Into<String>, max_storage: i64) -> Self {
        Self {
            name: name.into(),
            max_storage,
        }
    }
}

/// Repository for company operations.
pub struct CompanyRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> CompanyRepository<'a> {
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Create a company with zero used storage.
    pub async fn create(&self, company: &NewCompany) -> Result<Company> {
        let result = sqlx::query("INSERT INTO companies (name, max_storage) VALUES (?, ?)")
            .bind(&company.name)
            .bind(company.max_storage)
            .execute(self.pool)
            .await?;

        self.get_by_id(result.last_insert_rowid())
            .await?
            .ok_or_else(|| VaultError::NotFound("company".to_string()))
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<Company>> {
        let company = sqlx::query_as::<_, Company>(
            "SELECT id, name, max_storage, used_storage, created_at FROM companies WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;
        Ok(company)
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Option<Company>> {
        let company = sqlx::query_as::<_, Company>(
            "SELECT id, name, max_storage, used_storage, created_at FROM companies WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(self.pool)
        .await?;
        Ok(company)
    }

    /// Overwrite the cached used storage.
    pub async fn set_used_storage(&self, id: i64, used: i64) -> Result<bool> {
        let result = sqlx::query("UPDATE companies SET used_storage = ? WHERE id = ?")
            .bind(used)
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Add `delta` (possibly negative) to the cached used storage, clamped at zero.
    pub async fn adjust_used_storage(&self, id: i64, delta: i64) -> Result<bool> {
        let result =
            sqlx::query("UPDATE companies SET used_storage = MAX(used_storage + ?, 0) WHERE id = ?")
                .bind(delta)
                .bind(id)
                .execute(self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Change the storage quota.
    pub async fn set_max_storage(&self, id: i64, max: i64) -> Result<bool> {
        let result = sqlx::query("UPDATE companies SET max_storage = ? WHERE id = ?")
            .bind(max)
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
