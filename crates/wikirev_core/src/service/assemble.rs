//! Assembly of the rolled-back document.
//!
//! # Responsibility
//! - Apply a `ReconciliationPlan` to a clone of the target revision.
//! - Fix up version, author and object-removal metadata for the save pipeline.
//!
//! # Invariants
//! - The target snapshot passed in is never mutated.
//! - An attachment that could not be archived is left in place unmodified,
//!   and nothing is restored over it.
//! - An attachment that cannot be restored is dropped, never fabricated.
//! - Nothing is persisted here except trash records.

use crate::config::TrashSelection;
use crate::model::attachment::{AttachmentRef, DeletedAttachmentRecord};
use crate::model::document::DocumentSnapshot;
use crate::repo::attachment_history::AttachmentHistory;
use crate::repo::attachment_trash::{AttachmentTrash, TrashError};
use crate::service::reconcile::ReconciliationPlan;
use crate::service::rollback_service::RollbackError;
use log::warn;
use std::collections::BTreeSet;

/// Acting user and time of one rollback, passed explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackContext {
    pub actor: String,
    /// Epoch milliseconds.
    pub now: i64,
}

/// What happened to each attachment during assembly, by filename.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssemblyReport {
    pub trashed: Vec<String>,
    pub reverted: Vec<String>,
    pub restored: Vec<String>,
    /// Could not be restored; absent from the result.
    pub dropped: Vec<String>,
    /// Current attachment kept because archiving or reverting was impossible.
    pub kept_in_place: Vec<String>,
}

/// Document ready for the save pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledDocument {
    pub document: DocumentSnapshot,
    pub report: AssemblyReport,
}

/// Builds the document to save from the target revision and a plan.
///
/// # Errors
/// - `RollbackError::Store` when attachment history cannot be read.
/// - `RollbackError::Trash` for trash failures other than `Unavailable`.
pub fn assemble(
    target: &DocumentSnapshot,
    current: &DocumentSnapshot,
    plan: &ReconciliationPlan,
    trash: &dyn AttachmentTrash,
    history: &dyn AttachmentHistory,
    context: &RollbackContext,
    selection: TrashSelection,
) -> Result<AssembledDocument, RollbackError> {
    let mut working = target.clone();
    let mut report = AssemblyReport::default();
    let id = current.id.clone();
    let mut blocked: BTreeSet<String> = BTreeSet::new();

    for attachment in &plan.to_trash {
        match trash.archive(&id, attachment, &context.actor, context.now) {
            Ok(_) => report.trashed.push(attachment.filename.clone()),
            Err(TrashError::Unavailable) => {
                warn!(
                    "event=rollback_trash module=service status=degraded document={} filename={} action=keep_in_place",
                    id, attachment.filename
                );
                working.set_attachment(attachment.clone());
                blocked.insert(attachment.filename.clone());
                report.kept_in_place.push(attachment.filename.clone());
            }
            Err(err) => return Err(RollbackError::Trash(err)),
        }
    }

    for action in &plan.to_revert {
        let current_attachment = &action.attachment;
        match history.load_revision(&id, current_attachment, &action.target_version)? {
            Some(mut revision) => {
                // Saved as the next version after the live one.
                revision.version = current_attachment.version;
                revision.mark_dirty();
                working.set_attachment(revision);
                report.reverted.push(current_attachment.filename.clone());
            }
            None => {
                warn!(
                    "event=rollback_revert module=service status=degraded document={} filename={} missing_version={}",
                    id, current_attachment.filename, action.target_version
                );
                working.set_attachment(current_attachment.clone());
                report.kept_in_place.push(current_attachment.filename.clone());
            }
        }
    }

    for old_attachment in &plan.to_restore {
        let filename = &old_attachment.filename;
        if blocked.contains(filename) {
            continue;
        }

        let records = match trash.list_deletions(&id, filename) {
            Ok(records) => records,
            Err(TrashError::Unavailable) => {
                warn!(
                    "event=rollback_restore module=service status=degraded document={} filename={} reason=trash_unavailable",
                    id, filename
                );
                working.remove_attachment(filename);
                report.dropped.push(filename.clone());
                continue;
            }
            Err(err) => return Err(RollbackError::Trash(err)),
        };

        let Some(record) = select_record(&records, old_attachment, working.date, selection) else {
            warn!(
                "event=rollback_restore module=service status=degraded document={} filename={} reason=no_trash_record",
                id, filename
            );
            working.remove_attachment(filename);
            report.dropped.push(filename.clone());
            continue;
        };

        let restored = record.restore_attachment();
        let mut attachment = match record.revision(&old_attachment.version) {
            Some(revision) => {
                let mut revision = revision.clone();
                revision.version = restored.version;
                revision
            }
            // That exact revision is lost; restore what the trash has.
            None => restored,
        };
        attachment.mark_dirty();
        working
            .attachment_archives
            .insert(filename.clone(), record.revisions.clone());
        working.set_attachment(attachment);
        report.restored.push(filename.clone());
    }

    finish(&mut working, current, context);
    Ok(AssembledDocument {
        document: working,
        report,
    })
}

/// Builds the document to save while leaving the current attachments untouched.
pub fn assemble_without_attachments(
    target: &DocumentSnapshot,
    current: &DocumentSnapshot,
    context: &RollbackContext,
) -> AssembledDocument {
    let mut working = target.clone();
    working.attachments = current.attachments.clone();
    working.attachment_archives.clear();
    finish(&mut working, current, context);
    AssembledDocument {
        document: working,
        report: AssemblyReport::default(),
    }
}

fn finish(working: &mut DocumentSnapshot, current: &DocumentSnapshot, context: &RollbackContext) {
    working.add_objects_to_remove_from(current);
    working.author = context.actor.clone();
    working.version = current.version;
    working.is_new = current.is_new;
    working.content_dirty = true;
    working.date = context.now;
}

/// Picks the trash record to restore `old_attachment` from.
///
/// `records` are newest first. Only records deleted at or after `not_before`
/// qualify; among them, one whose archive holds the exact revision of
/// `old_attachment` wins over the plain policy order.
pub fn select_record<'r>(
    records: &'r [DeletedAttachmentRecord],
    old_attachment: &AttachmentRef,
    not_before: i64,
    selection: TrashSelection,
) -> Option<&'r DeletedAttachmentRecord> {
    let candidates: Vec<&DeletedAttachmentRecord> = match selection {
        TrashSelection::MostRecent => records
            .iter()
            .filter(|record| record.deleted_at >= not_before)
            .collect(),
        TrashSelection::EarliestAfterRevision => records
            .iter()
            .take_while(|record| record.deleted_at >= not_before)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect(),
    };

    candidates
        .iter()
        .find(|record| {
            record
                .revision(&old_attachment.version)
                .is_some_and(|revision| revision.same_revision(old_attachment))
        })
        .or_else(|| candidates.first())
        .copied()
}

#[cfg(test)]
mod tests {
    use super::select_record;
    use crate::config::TrashSelection;
    use crate::model::attachment::{AttachmentRef, DeletedAttachmentRecord};
    use crate::model::document::DocumentId;
    use uuid::Uuid;

    fn old_attachment() -> AttachmentRef {
        AttachmentRef::new("a.png", b"old".to_vec(), "admin", 1).metadata_only()
    }

    fn record(deleted_at: i64, bytes: &[u8]) -> DeletedAttachmentRecord {
        let mut attachment = AttachmentRef::new("a.png", bytes.to_vec(), "admin", 1);
        attachment.clear_dirty();
        DeletedAttachmentRecord {
            id: Uuid::new_v4(),
            document: DocumentId::new("w", "S", "P"),
            filename: "a.png".to_string(),
            deleted_at,
            deleter: "admin".to_string(),
            revisions: vec![attachment.clone()],
            attachment,
        }
    }

    #[test]
    fn most_recent_takes_first_record_not_before_revision() {
        let records = vec![record(300, b"x"), record(200, b"y"), record(100, b"z")];
        let chosen = select_record(&records, &old_attachment(), 150, TrashSelection::MostRecent);
        assert_eq!(chosen.unwrap().deleted_at, 300);
    }

    #[test]
    fn earliest_after_revision_stops_at_first_older_record() {
        let records = vec![record(300, b"x"), record(200, b"y"), record(100, b"z")];
        let chosen = select_record(
            &records,
            &old_attachment(),
            150,
            TrashSelection::EarliestAfterRevision,
        );
        assert_eq!(chosen.unwrap().deleted_at, 200);
    }

    #[test]
    fn record_holding_the_exact_revision_wins() {
        let records = vec![record(300, b"recreated"), record(200, b"old"), record(100, b"old")];
        for selection in [TrashSelection::MostRecent, TrashSelection::EarliestAfterRevision] {
            let chosen = select_record(&records, &old_attachment(), 150, selection).unwrap();
            assert_eq!(chosen.deleted_at, 200);
        }
    }

    #[test]
    fn no_record_when_everything_predates_revision() {
        let records = vec![record(90, b"old"), record(80, b"old")];
        let old = old_attachment();
        assert!(select_record(&records, &old, 100, TrashSelection::MostRecent).is_none());
        assert!(select_record(&records, &old, 100, TrashSelection::EarliestAfterRevision).is_none());
        assert!(select_record(&[], &old, 0, TrashSelection::MostRecent).is_none());
    }
}
