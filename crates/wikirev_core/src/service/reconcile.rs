//! Attachment reconciliation for document rollback.
//!
//! # Responsibility
//! - Classify every attachment of the target revision and of the current
//!   document into restore, trash, revert or unchanged.
//!
//! # Invariants
//! - Every filename of either side is classified; nothing is dropped silently.
//! - A filename is not an identity across deletion and re-upload: when the
//!   current attachment's history does not contain the exact target revision
//!   (same date and content hash), the current attachment is trashed and the
//!   old one restored.
//! - Classification never touches the trash; it only reads history.

use crate::model::attachment::AttachmentRef;
use crate::model::document::DocumentId;
use crate::model::version::Version;
use crate::repo::attachment_history::AttachmentHistory;
use crate::repo::RepoResult;
use log::debug;
use std::collections::BTreeSet;

/// Revert of a live attachment to an older revision of itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevertAction {
    /// The current attachment.
    pub attachment: AttachmentRef,
    pub target_version: Version,
}

/// Per-filename outcome of reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentDisposition {
    Unchanged,
    Revert,
    /// Deleted since the target revision; bring it back from the trash.
    Restore,
    /// Added since the target revision; archive it.
    Trash,
    /// Recreated under the same filename; archive current, restore old.
    Replace,
}

/// Classification of attachments produced by `reconcile`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationPlan {
    /// Attachments of the target revision to pull back from the trash.
    pub to_restore: Vec<AttachmentRef>,
    /// Current attachments to archive before they are removed.
    pub to_trash: Vec<AttachmentRef>,
    pub to_revert: Vec<RevertAction>,
    /// Filenames left in place.
    pub unchanged: Vec<String>,
}

impl ReconciliationPlan {
    /// True when rollback has nothing to do with attachments.
    pub fn is_empty(&self) -> bool {
        self.to_restore.is_empty() && self.to_trash.is_empty() && self.to_revert.is_empty()
    }

    /// Outcome for one filename, `None` if the filename appears on neither side.
    pub fn disposition(&self, filename: &str) -> Option<AttachmentDisposition> {
        let restored = self.to_restore.iter().any(|a| a.filename == filename);
        let trashed = self.to_trash.iter().any(|a| a.filename == filename);
        match (restored, trashed) {
            (true, true) => return Some(AttachmentDisposition::Replace),
            (true, false) => return Some(AttachmentDisposition::Restore),
            (false, true) => return Some(AttachmentDisposition::Trash),
            (false, false) => {}
        }
        if self.to_revert.iter().any(|r| r.attachment.filename == filename) {
            return Some(AttachmentDisposition::Revert);
        }
        self.unchanged
            .iter()
            .any(|name| name == filename)
            .then_some(AttachmentDisposition::Unchanged)
    }

    /// Every filename mentioned by the plan.
    pub fn filenames(&self) -> BTreeSet<&str> {
        self.to_restore
            .iter()
            .chain(self.to_trash.iter())
            .map(|a| a.filename.as_str())
            .chain(self.to_revert.iter().map(|r| r.attachment.filename.as_str()))
            .chain(self.unchanged.iter().map(String::as_str))
            .collect()
    }
}

/// Classifies attachments of the target revision (`old`) against the current
/// document (`current`).
///
/// # Errors
/// - Propagates history lookup failures other than a missing revision.
pub fn reconcile(
    document: &DocumentId,
    old: &[AttachmentRef],
    current: &[AttachmentRef],
    history: &dyn AttachmentHistory,
) -> RepoResult<ReconciliationPlan> {
    let mut plan = ReconciliationPlan::default();

    for old_attachment in old {
        let filename = old_attachment.filename.as_str();
        let Some(current_attachment) = current.iter().find(|a| a.filename == filename) else {
            debug!("event=reconcile module=service document={document} filename={filename} disposition=restore");
            plan.to_restore.push(old_attachment.clone());
            continue;
        };

        let revision = history.load_revision(document, current_attachment, &old_attachment.version)?;
        let same_lineage = revision
            .as_ref()
            .is_some_and(|revision| revision.same_revision(old_attachment));
        if !same_lineage {
            debug!("event=reconcile module=service document={document} filename={filename} disposition=replace");
            plan.to_restore.push(old_attachment.clone());
            plan.to_trash.push(current_attachment.clone());
            continue;
        }

        if current_attachment.version != old_attachment.version {
            debug!(
                "event=reconcile module=service document={document} filename={filename} disposition=revert from={} to={}",
                current_attachment.version, old_attachment.version
            );
            plan.to_revert.push(RevertAction {
                attachment: current_attachment.clone(),
                target_version: old_attachment.version,
            });
        } else {
            plan.unchanged.push(filename.to_string());
        }
    }

    for current_attachment in current {
        if !old.iter().any(|a| a.filename == current_attachment.filename) {
            debug!(
                "event=reconcile module=service document={document} filename={} disposition=trash",
                current_attachment.filename
            );
            plan.to_trash.push(current_attachment.clone());
        }
    }

    Ok(plan)
}
