//! User model for the backup vault.

use std::fmt;
use std::str::FromStr;

/// User role for permission management.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Role {
    /// Regular tenant member.
    #[default]
    Member = 0,
    /// Administrator of one tenant.
    CompanyAdmin = 1,
    /// Operator staff, sees every tenant.
    Staff = 2,
}

impl Role {
    /// Convert role to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Member => "member",
            Role::CompanyAdmin => "company_admin",
            Role::Staff => "staff",
        }
    }

    /// Whether this role may see every tenant's backups.
    pub fn is_privileged(&self) -> bool {
        *self == Role::Staff
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "member" => Ok(Role::Member),
            "company_admin" => Ok(Role::CompanyAdmin),
            "staff" => Ok(Role::Staff),
            _ => Err(format!("unknown role: {s}")),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A registered user.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    /// Tenant the user uploads for; `None` means uploads are refused.
    pub company_id: Option<i64>,
    #[sqlx(try_from = "String")]
    pub role: Role,
    /// Whether the user wants completed-upload notifications.
    pub get_backup_emails: bool,
    pub created_at: String,
}

/// Data for creating a new user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: Option<String>,
    pub company_id: Option<i64>,
    pub role: Role,
    pub get_backup_emails: bool,
}

impl NewUser {
    /// Create a member without a company.
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            email: None,
            company_id: None,
            role: Role::Member,
            get_backup_emails: true,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_company(mut self, company_id: i64) -> Self {
        self.company_id = Some(company_id);
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    /// Opt in or out of completed-upload notifications.
    pub fn with_backup_emails(mut self, enabled: bool) -> Self {
        self.get_backup_emails = enabled;
        self
    }
}
