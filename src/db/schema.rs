//! Database schema and migrations for the backup vault.
//!
//! Migrations are applied sequentially when the database is first opened or
//! upgraded; the schema_version table records which ones ran.

/// Database migrations, in order.
pub const MIGRATIONS: &[&str] = &[
    // v1: Tenants and users
    r#"
CREATE TABLE companies (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    name            TEXT NOT NULL UNIQUE,
    max_storage     INTEGER NOT NULL DEFAULT 0,   -- bytes
    used_storage    INTEGER NOT NULL DEFAULT 0,   -- bytes, cached sum of backups.size
    created_at      TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE users (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    username            TEXT NOT NULL UNIQUE,
    email               TEXT,
    company_id          INTEGER REFERENCES companies(id) ON DELETE SET NULL,
    role                TEXT NOT NULL DEFAULT 'member',  -- 'member', 'company_admin', 'staff'
    get_backup_emails   INTEGER NOT NULL DEFAULT 1,
    created_at          TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX idx_users_company_id ON users(company_id);
"#,
    // v2: Finalized backups
    r#"
CREATE TABLE backups (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id     INTEGER NOT NULL REFERENCES users(id),
    company_id  INTEGER NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
    file_path   TEXT NOT NULL UNIQUE,    -- absolute path of the stored file
    basename    TEXT NOT NULL,
    size        INTEGER NOT NULL,        -- bytes
    checksum    TEXT,                    -- hex SHA-256, when the client supplied one
    uploaded_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX idx_backups_company_id ON backups(company_id);
CREATE INDEX idx_backups_user_id ON backups(user_id);
CREATE INDEX idx_backups_uploaded_at ON backups(uploaded_at);
"#,
    // v3: Comments with one level of replies
    r#"
CREATE TABLE comments (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    backup_id   INTEGER NOT NULL REFERENCES backups(id) ON DELETE CASCADE,
    user_id     INTEGER NOT NULL REFERENCES users(id),
    parent_id   INTEGER REFERENCES comments(id) ON DELETE CASCADE,
    body        TEXT NOT NULL,
    created_at  TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX idx_comments_backup_id ON comments(backup_id);
CREATE INDEX idx_comments_parent_id ON comments(parent_id);
"#,
];
