use migration::MigratorTrait;
use sea_orm::{Database, DatabaseConnection};
use std::sync::Arc;
use teahouse::settings::Settings;
use teahouse::storage;
use teahouse::web::{self, AppState};
use tempfile::NamedTempFile;

/// Test database with automatic cleanup
pub struct TestDb {
    connection: DatabaseConnection,
    _temp_file: NamedTempFile,
}

impl TestDb {
    /// Create a new test database with migrations applied
    pub async fn new() -> Self {
        let temp_file = NamedTempFile::new().expect("Failed to create temp file");
        let db_path = temp_file.path().to_str().expect("Invalid temp file path");
        let db_url = format!("sqlite://{}?mode=rwc", db_path);

        let connection = Database::connect(&db_url)
            .await
            .expect("Failed to connect to test database");

        migration::Migrator::up(&connection, None)
            .await
            .expect("Failed to run migrations");

        Self {
            connection,
            _temp_file: temp_file,
        }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }
}

/// Build the application router over the given database
pub fn test_app(db: &DatabaseConnection) -> axum::Router {
    let state = AppState {
        settings: Arc::new(Settings::default()),
        db: db.clone(),
    };
    web::router(state)
}

/// Create a regular test user
pub async fn seed_user(db: &DatabaseConnection, name: &str) -> storage::User {
    storage::create_user(
        db,
        storage::NewUser {
            username: name.to_string(),
            email: format!("{}@example.com", name),
            password: "password123".to_string(),
        },
    )
    .await
    .expect("Failed to create test user")
}

/// Create a test user with admin privilege
pub async fn seed_admin(db: &DatabaseConnection, name: &str) -> storage::User {
    let user = seed_user(db, name).await;
    storage::set_admin(db, user.id, true)
        .await
        .expect("Failed to promote test admin")
        .expect("Test admin not found")
}

/// Mint a bearer token for the given user
pub async fn auth_token(db: &DatabaseConnection, user: &storage::User) -> String {
    storage::issue_access_token(db, user.id, 3600)
        .await
        .expect("Failed to issue test token")
        .token
}
