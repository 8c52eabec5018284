//! Collaborator contracts consumed by rollback, and their SQLite implementations.
//!
//! # Responsibility
//! - Define the four narrow interfaces rollback depends on: document store,
//!   attachment history, attachment trash and save pipeline.
//! - Isolate SQLite query details from reconciliation logic.
//!
//! # Invariants
//! - Repository APIs return semantic errors (`NotFound`) in addition to DB
//!   transport errors.
//! - SQLite implementations refuse connections whose schema is not migrated.

use crate::db::migrations::{current_user_version, latest_version};
use crate::db::DbError;
use crate::model::document::DocumentId;
use crate::model::version::Version;
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod attachment_history;
pub mod attachment_trash;
pub mod document_store;
pub mod save_pipeline;

pub type RepoResult<T> = Result<T, RepoError>;

/// Generic repository error for revision store operations.
#[derive(Debug)]
pub enum RepoError {
    /// Requested document or revision does not exist.
    NotFound(String),
    Db(DbError),
    InvalidData(String),
    /// Connection schema is not at the version this binary expects.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(what) => write!(f, "not found: {what}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted revision data: {message}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "connection schema version {actual_version} does not match expected {expected_version}"
            ),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(value: serde_json::Error) -> Self {
        Self::InvalidData(value.to_string())
    }
}

pub(crate) fn ensure_connection_ready(conn: &Connection) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version = current_user_version(conn)?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }
    Ok(())
}

pub(crate) fn parse_version(value: &str, column: &'static str) -> RepoResult<Version> {
    value
        .parse()
        .map_err(|_| RepoError::InvalidData(format!("invalid revision label `{value}` in {column}")))
}

pub(crate) fn parse_size(value: i64, column: &'static str) -> RepoResult<u64> {
    u64::try_from(value)
        .map_err(|_| RepoError::InvalidData(format!("negative size `{value}` in {column}")))
}

pub(crate) fn revision_not_found(document: &DocumentId, version: &Version) -> RepoError {
    RepoError::NotFound(format!("revision {version} of {document}"))
}
