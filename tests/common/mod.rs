//! Test helpers for the web API tests.
//!
//! Builds the full router over an in-memory database and a temporary media
//! root, with a company, its users and bearer tokens ready to use.

#![allow(dead_code)]

use std::path::PathBuf;
use std::time::Duration;

use axum::http::header::AUTHORIZATION;
use axum_test::multipart::{MultipartForm, Part};
use axum_test::{TestRequest, TestServer};
use tempfile::TempDir;

use backup_vault::db::{Company, CompanyRepository, NewCompany, NewUser, Role, User, UserRepository};
use backup_vault::web::middleware::JwtState;
use backup_vault::{Config, Database, WebServer};

pub const JWT_SECRET: &str = "test-secret-key-for-testing-only";

/// A running test application.
pub struct TestApp {
    pub server: TestServer,
    pub db: Database,
    pub config: Config,
    pub company: Company,
    pub other_company: Company,
    /// Plain member of `company`.
    pub member: User,
    /// Company admin of `company`.
    pub admin: User,
    /// Member of `other_company`.
    pub outsider: User,
    /// Staff user without a company.
    pub staff: User,
    jwt: JwtState,
    _media: TempDir,
}

impl TestApp {
    /// Start an app whose company may store `max_storage` bytes.
    pub async fn new(max_storage: i64) -> Self {
        let media = TempDir::new().expect("Failed to create media root");
        let mut config = Config::default();
        config.web.jwt_secret = JWT_SECRET.to_string();
        config.storage.media_root = media.path().to_string_lossy().into_owned();

        let db = Database::open_in_memory()
            .await
            .expect("Failed to create test database");

        let companies = CompanyRepository::new(db.pool());
        let company = companies
            .create(&NewCompany::new("Acme", max_storage))
            .await
            .unwrap();
        let other_company = companies
            .create(&NewCompany::new("Globex", max_storage))
            .await
            .unwrap();

        let users = UserRepository::new(db.pool());
        let member = users
            .create(&NewUser::new("alice").with_company(company.id))
            .await
            .unwrap();
        let admin = users
            .create(
                &NewUser::new("boss")
                    .with_company(company.id)
                    .with_role(Role::CompanyAdmin),
            )
            .await
            .unwrap();
        let outsider = users
            .create(&NewUser::new("mallory").with_company(other_company.id))
            .await
            .unwrap();
        let staff = users
            .create(&NewUser::new("ops").with_role(Role::Staff))
            .await
            .unwrap();

        let router = WebServer::new(&config, db.clone())
            .expect("Failed to create web server")
            .router();
        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            db,
            config,
            company,
            other_company,
            member,
            admin,
            outsider,
            staff,
            jwt: JwtState::new(JWT_SECRET),
            _media: media,
        }
    }

    pub fn token(&self, user: &User) -> String {
        self.jwt
            .issue_token(user.id, &user.username, user.role.as_str(), Duration::from_secs(3600))
            .unwrap()
    }

    pub fn bearer(&self, user: &User) -> String {
        format!("Bearer {}", self.token(user))
    }

    pub fn backups_root(&self) -> PathBuf {
        self.config.storage.backups_root()
    }

    pub fn uploads_root(&self) -> PathBuf {
        self.config.storage.uploads_root()
    }

    /// Number of chunk files waiting in the scratch directory.
    pub fn pending_chunks(&self) -> usize {
        std::fs::read_dir(self.uploads_root())
            .map(|entries| entries.flatten().count())
            .unwrap_or(0)
    }

    /// POST one chunk as `user`.
    pub fn upload(&self, user: &User, form: MultipartForm) -> TestRequest {
        self.server
            .post("/api/upload")
            .add_header(AUTHORIZATION, self.bearer(user))
            .multipart(form)
    }

    /// Upload `data` in `chunk_size` pieces, echoing the session cookie, and
    /// return the last response body.
    pub async fn upload_file(
        &self,
        user: &User,
        filename: &str,
        data: &[u8],
        chunk_size: usize,
        extra: &[(&str, &str)],
    ) -> (u16, serde_json::Value) {
        let chunks: Vec<&[u8]> = data.chunks(chunk_size).collect();
        let mut cookie = None;
        let mut last = (0, serde_json::Value::Null);

        for (index, chunk) in chunks.iter().enumerate() {
            let mut form = chunk_form(filename, index, chunks.len(), data.len(), chunk);
            for (name, value) in extra {
                form = form.add_text(*name, *value);
            }
            let mut request = self.upload(user, form);
            if let Some(cookie) = cookie.take() {
                request = request.add_cookie(cookie);
            }
            let response = request.await;
            let status = response.status_code().as_u16();
            let body = response.json::<serde_json::Value>();
            if status != 200 {
                return (status, body);
            }
            cookie = Some(response.cookie("uploader_id"));
            last = (status, body);
        }
        last
    }
}

/// Multipart form for one chunk.
pub fn chunk_form(
    filename: &str,
    index: usize,
    total: usize,
    filesize: usize,
    data: &[u8],
) -> MultipartForm {
    MultipartForm::new()
        .add_text("total_chunks", total)
        .add_text("chunk_index", index)
        .add_text("filesize", filesize)
        .add_text("filename", filename)
        .add_part(
            "file",
            Part::bytes(data.to_vec())
                .file_name("blob")
                .mime_type("application/octet-stream"),
        )
}
