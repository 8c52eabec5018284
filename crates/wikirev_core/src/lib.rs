//! Document revision rollback core.
//! This crate owns the attachment reconciliation invariants of rollback.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{ConfigError, RollbackConfig, TrashSelection};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::attachment::{AttachmentRef, DeletedAttachmentId, DeletedAttachmentRecord};
pub use model::document::{DocumentId, DocumentObject, DocumentSnapshot, ObjectKey};
pub use model::version::{Version, VersionParseError};
pub use repo::attachment_history::{AttachmentHistory, SqliteAttachmentHistory};
pub use repo::attachment_trash::{
    AttachmentTrash, SqliteAttachmentTrash, TrashError, TrashResult, UnavailableTrash,
};
pub use repo::document_store::{DocumentStore, SqliteDocumentStore};
pub use repo::save_pipeline::{SaveError, SavePipeline, SaveResult, SqliteSavePipeline};
pub use repo::{RepoError, RepoResult};
pub use service::assemble::{assemble, AssembledDocument, AssemblyReport, RollbackContext};
pub use service::reconcile::{reconcile, AttachmentDisposition, ReconciliationPlan, RevertAction};
pub use service::rollback_service::{
    RollbackError, RollbackListener, RollbackOutcome, RollbackService,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
