//! `PostgreSQL` fixtures for integration tests.
//!
//! Connection settings come from `TEST_DB_*` environment variables, falling
//! back to the `polly_test` role on port 5433.

use std::sync::Arc;

use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;
use tracing::{info, warn};

use crate::migrations::Migrator;
use crate::repositories::PollRepository;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Where the test server lives.
#[derive(Debug, Clone)]
pub struct TestDbConfig {
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Role name.
    pub username: String,
    /// Role password.
    pub password: String,
    /// Database used by [`TestDatabase::new`].
    pub database: String,
}

impl Default for TestDbConfig {
    fn default() -> Self {
        Self {
            host: env_or("TEST_DB_HOST", "localhost"),
            port: env_or("TEST_DB_PORT", "5433").parse().unwrap_or(5433),
            username: env_or("TEST_DB_USER", "polly_test"),
            password: env_or("TEST_DB_PASSWORD", "polly_test"),
            database: env_or("TEST_DB_NAME", "polly_test"),
        }
    }
}

impl TestDbConfig {
    /// Connection URL for a database on the test server.
    #[must_use]
    pub fn url_for(&self, database: &str) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{database}",
            self.username, self.password, self.host, self.port
        )
    }

    /// Connection URL for the configured database.
    #[must_use]
    pub fn database_url(&self) -> String {
        self.url_for(&self.database)
    }
}

/// A migrated database holding the poll schema.
pub struct TestDatabase {
    conn: Arc<DatabaseConnection>,
    config: TestDbConfig,
    owned: bool,
}

impl TestDatabase {
    /// Connect to the shared test database and bring its schema up to date.
    pub async fn new() -> Result<Self, DbErr> {
        Self::open(TestDbConfig::default(), false).await
    }

    /// Create a throwaway database so tests can run in parallel.
    ///
    /// Call [`TestDatabase::teardown`] to drop it.
    pub async fn isolated() -> Result<Self, DbErr> {
        let mut config = TestDbConfig::default();
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        config.database = format!("polly_test_{}", &suffix[..12]);

        let admin = Database::connect(config.url_for("postgres")).await?;
        admin
            .execute_unprepared(&format!("CREATE DATABASE \"{}\"", config.database))
            .await?;
        admin.close().await?;

        Self::open(config, true).await
    }

    async fn open(config: TestDbConfig, owned: bool) -> Result<Self, DbErr> {
        let conn = Database::connect(config.database_url()).await?;
        Migrator::up(&conn, None).await?;
        info!(database = %config.database, owned, "Test database ready");

        Ok(Self {
            conn: Arc::new(conn),
            config,
            owned,
        })
    }

    /// A poll store over this database.
    #[must_use]
    pub fn store(&self) -> PollRepository {
        PollRepository::new(Arc::clone(&self.conn))
    }

    /// The underlying connection.
    #[must_use]
    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }

    /// Delete every poll. Options and votes go with them.
    pub async fn reset(&self) -> Result<(), DbErr> {
        self.conn
            .execute_unprepared("TRUNCATE TABLE \"poll\" CASCADE")
            .await?;
        Ok(())
    }

    /// Drop the database if [`TestDatabase::isolated`] created it.
    pub async fn teardown(self) -> Result<(), DbErr> {
        if !self.owned {
            return Ok(());
        }

        let name = self.config.database.clone();
        match Arc::try_unwrap(self.conn) {
            Ok(conn) => conn.close().await?,
            Err(_) => warn!(database = %name, "Connection still shared at teardown"),
        }

        let admin = Database::connect(self.config.url_for("postgres")).await?;
        admin
            .execute_unprepared(&format!("DROP DATABASE IF EXISTS \"{name}\" WITH (FORCE)"))
            .await?;
        admin.close().await?;

        info!(database = %name, "Dropped test database");
        Ok(())
    }
}
