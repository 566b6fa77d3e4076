//! Create, list and drop databases.
//!
//! `CREATE DATABASE` and `DROP DATABASE` cannot take bind parameters, so names
//! are restricted to plain identifiers and always sent quoted.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::fmt;
use thiserror::Error;
use tracing::info;

/// PostgreSQL truncates identifiers longer than this.
const MAX_IDENTIFIER_LEN: usize = 63;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Invalid database name")]
    InvalidName,

    #[error("{0}")]
    Sql(#[from] sqlx::Error),
}

/// A database name that is safe to splice into DDL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseName(String);

impl DatabaseName {
    /// Accepts `^[A-Za-z_][A-Za-z0-9_]*$` up to 63 bytes.
    pub fn parse(name: &str) -> Result<Self, DbError> {
        let mut chars = name.chars();
        let valid_start = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

        if valid_start && valid_rest && name.len() <= MAX_IDENTIFIER_LEN {
            Ok(Self(name.to_string()))
        } else {
            Err(DbError::InvalidName)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl fmt::Display for DatabaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The statements the API issues against the database server.
#[async_trait]
pub trait DatabaseAdmin: Send + Sync {
    /// Names of all non-template databases.
    async fn list_databases(&self) -> Result<Vec<String>, DbError>;

    async fn create_database(&self, name: &DatabaseName) -> Result<(), DbError>;

    async fn drop_database(&self, name: &DatabaseName) -> Result<(), DbError>;
}

/// `DatabaseAdmin` backed by a sqlx connection pool.
pub struct PgDatabaseAdmin {
    pool: PgPool,
}

impl PgDatabaseAdmin {
    /// Build a pool that connects on first use.
    pub fn connect_lazy(dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(dsn)
            .context("Failed to configure database pool")?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl DatabaseAdmin for PgDatabaseAdmin {
    async fn list_databases(&self) -> Result<Vec<String>, DbError> {
        let names = sqlx::query_scalar::<_, String>(
            "SELECT datname FROM pg_database WHERE datistemplate = false ORDER BY datname",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }

    async fn create_database(&self, name: &DatabaseName) -> Result<(), DbError> {
        let statement = format!("CREATE DATABASE {}", name.quoted());
        sqlx::raw_sql(&statement).execute(&self.pool).await?;
        info!(database = %name, "Database created");
        Ok(())
    }

    async fn drop_database(&self, name: &DatabaseName) -> Result<(), DbError> {
        let statement = format!("DROP DATABASE {}", name.quoted());
        sqlx::raw_sql(&statement).execute(&self.pool).await?;
        info!(database = %name, "Database dropped");
        Ok(())
    }
}
