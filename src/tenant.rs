//! Caller context resolved once per request.

use crate::backup::Backup;
use crate::db::{Company, CompanyRepository, DbPool, Role, User, UserRepository};
use crate::{Result, VaultError};

/// The authenticated user together with their company.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub user: User,
    pub company: Option<Company>,
}

impl TenantContext {
    pub fn new(user: User, company: Option<Company>) -> Self {
        Self { user, company }
    }

    /// Load the user and their company.
    pub async fn resolve(pool: &DbPool, user_id: i64) -> Result<Self> {
        let user = UserRepository::new(pool)
            .get_by_id(user_id)
            .await?
            .ok_or_else(|| VaultError::Unauthorized("unknown user".to_string()))?;

        let company = match user.company_id {
            Some(id) => CompanyRepository::new(pool).get_by_id(id).await?,
            None => None,
        };
        Ok(Self { user, company })
    }

    /// Staff see every tenant.
    pub fn is_privileged(&self) -> bool {
        self.user.role.is_privileged()
    }

    pub fn is_company_admin(&self) -> bool {
        self.user.role == Role::CompanyAdmin
    }

    /// The caller's company, or `Unauthorized` for users without one.
    pub fn require_company(&self) -> Result<&Company> {
        self.company.as_ref().ok_or_else(|| {
            VaultError::Unauthorized(format!(
                "User '{}' is not associated with a company.",
                self.user.username
            ))
        })
    }

    pub fn belongs_to(&self, company_id: i64) -> bool {
        self.company.as_ref().is_some_and(|c| c.id == company_id)
    }

    /// Staff, or a member of the same company who owns the backup or
    /// administers the company.
    pub fn can_access_backup(&self, backup: &Backup) -> bool {
        if self.is_privileged() {
            return true;
        }
        self.belongs_to(backup.company_id)
            && (backup.user_id == self.user.id || self.is_company_admin())
    }

    /// Staff, or any member of the company.
    pub fn can_view_company(&self, company_id: i64) -> bool {
        self.is_privileged() || self.belongs_to(company_id)
    }
}
