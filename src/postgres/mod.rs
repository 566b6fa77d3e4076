//! Logical database administration on the shared PostgreSQL server.

pub mod admin;

pub use admin::{DatabaseAdmin, DatabaseName, DbError, PgDatabaseAdmin};
