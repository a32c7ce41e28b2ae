//! Per-tenant storage accounting.
//!
//! `companies.used_storage` is a cached aggregate of backup sizes. Inserts and
//! deletes of backup records move it transactionally (see
//! [`BackupRepository`](crate::backup::BackupRepository)); this module checks
//! uploads against it and re-tallies it from the records when asked.
//!
//! Checks read the cached value without locking, so two concurrent uploads
//! from the same tenant can both pass and overflow the quota together.
//! [`QuotaLedger::reconcile`] brings the cache back in line afterwards.

use tracing::{info, warn};

use crate::backup::BackupRepository;
use crate::db::{Company, CompanyRepository, DbPool};
use crate::{Result, VaultError};

const SIZE_UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];

/// Format a byte count for humans, base 1024 with two decimals.
///
/// `format_size(1536)` gives `"1.50 KB"`.
pub fn format_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }
    let mut exp = 0;
    let mut scaled = bytes;
    while scaled >= 1024 && exp < SIZE_UNITS.len() - 1 {
        scaled /= 1024;
        exp += 1;
    }
    let value = bytes as f64 / 1024f64.powi(exp as i32);
    format!("{value:.2} {}", SIZE_UNITS[exp])
}

/// Reject `attempted` bytes if they do not fit in the company's free space.
pub fn ensure_fits(company: &Company, filename: &str, attempted: u64) -> Result<()> {
    let remaining = company.storage_left();
    if attempted > remaining {
        warn!(
            company_id = company.id,
            filename, attempted, remaining, "Upload rejected by storage quota"
        );
        return Err(VaultError::StorageLimitExceeded {
            filename: filename.to_string(),
            limit: company.max_storage.max(0) as u64,
            remaining,
            attempted,
        });
    }
    Ok(())
}

/// Storage ledger bound to a database pool.
pub struct QuotaLedger<'a> {
    pool: &'a DbPool,
}

impl<'a> QuotaLedger<'a> {
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    async fn company(&self, company_id: i64) -> Result<Company> {
        CompanyRepository::new(self.pool)
            .get_by_id(company_id)
            .await?
            .ok_or_else(|| VaultError::NotFound("company".to_string()))
    }

    /// Check `attempted` bytes against the company's cached usage.
    pub async fn check(&self, company_id: i64, filename: &str, attempted: u64) -> Result<()> {
        let company = self.company(company_id).await?;
        ensure_fits(&company, filename, attempted)
    }

    /// Recompute used storage from the backup records and persist it if the
    /// cached value drifted. Returns the corrected value.
    pub async fn reconcile(&self, company_id: i64) -> Result<i64> {
        let company = self.company(company_id).await?;
        let actual = BackupRepository::new(self.pool)
            .total_size_by_company(company_id)
            .await?;

        if actual != company.used_storage {
            CompanyRepository::new(self.pool)
                .set_used_storage(company_id, actual)
                .await?;
            info!(
                company_id,
                cached = company.used_storage,
                actual,
                "Reconciled used storage"
            );
        }
        Ok(actual)
    }
}
