//! Document rollback use-case service.
//!
//! # Responsibility
//! - Roll a document back to a saved revision, reconciling attachments.
//! - Notify registered listeners around the save.
//!
//! # Invariants
//! - Malformed input (bad label, unknown document, unknown revision) fails
//!   before any trash or save call.
//! - A successful rollback produces exactly one new document revision.
//! - Save failures are returned unchanged; nothing is retried.
//! - Collaborators, acting user and time are passed explicitly; no ambient
//!   request state is read.

use crate::config::RollbackConfig;
use crate::model::attachment::DeletedAttachmentRecord;
use crate::model::document::{DocumentId, DocumentSnapshot};
use crate::model::version::{Version, VersionParseError};
use crate::repo::attachment_history::AttachmentHistory;
use crate::repo::attachment_trash::{AttachmentTrash, TrashError, UnavailableTrash};
use crate::repo::document_store::DocumentStore;
use crate::repo::save_pipeline::{SaveError, SavePipeline};
use crate::repo::RepoError;
use crate::service::assemble::{
    assemble, assemble_without_attachments, AssemblyReport, RollbackContext,
};
use crate::service::reconcile::{reconcile, ReconciliationPlan};
use log::{error, info};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Errors from rollback operations.
#[derive(Debug)]
pub enum RollbackError {
    /// Target revision label is malformed.
    InvalidVersion(VersionParseError),
    DocumentNotFound(DocumentId),
    RevisionNotFound {
        document: DocumentId,
        version: Version,
    },
    /// Document store or attachment history failure.
    Store(RepoError),
    /// Trash failure other than `TrashError::Unavailable` during assembly,
    /// or any trash failure when listing deleted attachments.
    Trash(TrashError),
    Save(SaveError),
}

impl Display for RollbackError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidVersion(err) => write!(f, "{err}"),
            Self::DocumentNotFound(document) => write!(f, "document not found: {document}"),
            Self::RevisionNotFound { document, version } => {
                write!(f, "revision {version} of {document} not found")
            }
            Self::Store(err) => write!(f, "{err}"),
            Self::Trash(err) => write!(f, "{err}"),
            Self::Save(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RollbackError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidVersion(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::Trash(err) => Some(err),
            Self::Save(err) => Some(err),
            Self::DocumentNotFound(_) | Self::RevisionNotFound { .. } => None,
        }
    }
}

impl From<VersionParseError> for RollbackError {
    fn from(value: VersionParseError) -> Self {
        Self::InvalidVersion(value)
    }
}

impl From<RepoError> for RollbackError {
    fn from(value: RepoError) -> Self {
        Self::Store(value)
    }
}

/// Hooks called around the save of a rolled-back document.
pub trait RollbackListener {
    /// Called with the assembled document right before it is saved.
    fn rolling_back(&self, _document: &DocumentSnapshot, _target: &Version) {}
    /// Called with the saved document.
    fn rolled_back(&self, _document: &DocumentSnapshot, _target: &Version) {}
}

/// Result of a successful rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackOutcome {
    /// The saved document, carrying its new version.
    pub document: DocumentSnapshot,
    pub plan: ReconciliationPlan,
    pub report: AssemblyReport,
}

/// Rollback facade over the four collaborator implementations.
pub struct RollbackService<D, H, T, S> {
    store: D,
    history: H,
    trash: T,
    saver: S,
    config: RollbackConfig,
    listeners: Vec<Box<dyn RollbackListener>>,
}

impl<D, H, T, S> RollbackService<D, H, T, S>
where
    D: DocumentStore,
    H: AttachmentHistory,
    T: AttachmentTrash,
    S: SavePipeline,
{
    /// Creates a service with the default configuration.
    pub fn new(store: D, history: H, trash: T, saver: S) -> Self {
        Self {
            store,
            history,
            trash,
            saver,
            config: RollbackConfig::default(),
            listeners: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: RollbackConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &RollbackConfig {
        &self.config
    }

    pub fn add_listener(&mut self, listener: Box<dyn RollbackListener>) {
        self.listeners.push(listener);
    }

    /// Rolls `document` back to `target_version` as `actor`, now.
    pub fn rollback_to(
        &self,
        document: &DocumentId,
        target_version: &str,
        actor: &str,
    ) -> Result<RollbackOutcome, RollbackError> {
        self.rollback_to_at(document, target_version, actor, now_epoch_ms())
    }

    /// Rolls `document` back to `target_version` as `actor` at `now` (epoch ms).
    ///
    /// # Errors
    /// - `InvalidVersion`, `DocumentNotFound`, `RevisionNotFound` before any
    ///   reconciliation work.
    /// - `Store` / `Trash` when a collaborator fails in a way that cannot be
    ///   degraded.
    /// - `Save` unchanged from the save pipeline.
    pub fn rollback_to_at(
        &self,
        document: &DocumentId,
        target_version: &str,
        actor: &str,
        now: i64,
    ) -> Result<RollbackOutcome, RollbackError> {
        let started_at = Instant::now();
        let target_version: Version = target_version.parse()?;
        info!(
            "event=rollback module=service status=start document={} target_version={}",
            document, target_version
        );

        let current = self
            .store
            .load_current(document)?
            .ok_or_else(|| RollbackError::DocumentNotFound(document.clone()))?;
        let target = self.load_target(document, &target_version)?;

        let context = RollbackContext {
            actor: actor.to_string(),
            now,
        };
        let (plan, assembled) = if self.config.rollback_attachments {
            let plan = reconcile(document, &target.attachments, &current.attachments, &self.history)?;
            let trash: &dyn AttachmentTrash = if self.config.attachment_trash {
                &self.trash
            } else {
                &UnavailableTrash
            };
            let assembled = assemble(
                &target,
                &current,
                &plan,
                trash,
                &self.history,
                &context,
                self.config.trash_selection,
            )?;
            (plan, assembled)
        } else {
            (
                ReconciliationPlan::default(),
                assemble_without_attachments(&target, &current, &context),
            )
        };

        for listener in &self.listeners {
            listener.rolling_back(&assembled.document, &target_version);
        }

        let comment = self.config.comment_for(&target_version);
        let saved = match self.saver.save(assembled.document, &comment, actor) {
            Ok(saved) => saved,
            Err(err) => {
                error!(
                    "event=rollback module=service status=error document={} target_version={} duration_ms={} error={}",
                    document,
                    target_version,
                    started_at.elapsed().as_millis(),
                    err
                );
                return Err(RollbackError::Save(err));
            }
        };

        for listener in &self.listeners {
            listener.rolled_back(&saved, &target_version);
        }

        let report = assembled.report;
        info!(
            "event=rollback module=service status=ok document={} target_version={} new_version={} trashed={} reverted={} restored={} dropped={} kept_in_place={} duration_ms={}",
            document,
            target_version,
            saved.version,
            report.trashed.len(),
            report.reverted.len(),
            report.restored.len(),
            report.dropped.len(),
            report.kept_in_place.len(),
            started_at.elapsed().as_millis()
        );

        Ok(RollbackOutcome {
            document: saved,
            plan,
            report,
        })
    }

    /// Lists trashed attachments of a document, newest first.
    pub fn deleted_attachments(
        &self,
        document: &DocumentId,
    ) -> Result<Vec<DeletedAttachmentRecord>, RollbackError> {
        if !self.config.attachment_trash {
            return Err(RollbackError::Trash(TrashError::Unavailable));
        }
        self.trash
            .list_all_deletions(document)
            .map_err(RollbackError::Trash)
    }

    /// Lists saved revision labels of a document in ascending order.
    pub fn revisions(&self, document: &DocumentId) -> Result<Vec<Version>, RollbackError> {
        Ok(self.store.list_revisions(document)?)
    }

    fn load_target(
        &self,
        document: &DocumentId,
        version: &Version,
    ) -> Result<DocumentSnapshot, RollbackError> {
        match self.store.load_revision(document, version) {
            Ok(snapshot) => Ok(snapshot),
            // The first revision may predate the archive; it was an empty page.
            Err(RepoError::NotFound(_)) if version.is_first() => {
                Ok(DocumentSnapshot::new_empty(document.clone()))
            }
            Err(RepoError::NotFound(_)) => Err(RollbackError::RevisionNotFound {
                document: document.clone(),
                version: *version,
            }),
            Err(err) => Err(err.into()),
        }
    }
}

fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}
