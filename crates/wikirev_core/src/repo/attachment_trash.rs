//! Attachment trash contract and implementations.
//!
//! # Responsibility
//! - Archive attachments (with their revision history) before they are removed.
//! - List deletion records of one document, newest first.
//!
//! # Invariants
//! - The trash is append-only: archiving never replaces an existing record.
//! - Several records may exist for one filename (delete, re-upload, delete).
//! - Listing order is reverse-chronological by deletion date; records deleted
//!   at the same instant are ordered newest insert first.

use crate::model::attachment::{
    ArchivedAttachment, AttachmentRef, DeletedAttachmentId, DeletedAttachmentRecord,
};
use crate::model::document::DocumentId;
use crate::repo::attachment_history::load_all_revisions;
use crate::repo::{ensure_connection_ready, RepoError};
use log::debug;
use rusqlite::{params, Connection, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type TrashResult<T> = Result<T, TrashError>;

/// Error returned by attachment trash operations.
#[derive(Debug)]
pub enum TrashError {
    /// The trash is disabled or not configured.
    Unavailable,
    Repo(RepoError),
}

impl Display for TrashError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable => write!(f, "attachment trash is unavailable"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for TrashError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Unavailable => None,
            Self::Repo(err) => Some(err),
        }
    }
}

impl From<RepoError> for TrashError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<rusqlite::Error> for TrashError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Repo(value.into())
    }
}

/// Recycle bin for deleted attachments.
pub trait AttachmentTrash {
    /// Stores a snapshot of `attachment` and its history, deleted by `actor` at `date`.
    fn archive(
        &self,
        document: &DocumentId,
        attachment: &AttachmentRef,
        actor: &str,
        date: i64,
    ) -> TrashResult<DeletedAttachmentId>;
    /// Lists deletion records of one filename, newest first.
    fn list_deletions(
        &self,
        document: &DocumentId,
        filename: &str,
    ) -> TrashResult<Vec<DeletedAttachmentRecord>>;
    /// Lists deletion records of every attachment of a document, newest first.
    fn list_all_deletions(&self, document: &DocumentId) -> TrashResult<Vec<DeletedAttachmentRecord>>;
}

impl<T: AttachmentTrash + ?Sized> AttachmentTrash for &T {
    fn archive(
        &self,
        document: &DocumentId,
        attachment: &AttachmentRef,
        actor: &str,
        date: i64,
    ) -> TrashResult<DeletedAttachmentId> {
        (**self).archive(document, attachment, actor, date)
    }

    fn list_deletions(
        &self,
        document: &DocumentId,
        filename: &str,
    ) -> TrashResult<Vec<DeletedAttachmentRecord>> {
        (**self).list_deletions(document, filename)
    }

    fn list_all_deletions(&self, document: &DocumentId) -> TrashResult<Vec<DeletedAttachmentRecord>> {
        (**self).list_all_deletions(document)
    }
}

/// Trash used when the recycle bin is disabled: every call is `Unavailable`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableTrash;

impl AttachmentTrash for UnavailableTrash {
    fn archive(
        &self,
        _document: &DocumentId,
        _attachment: &AttachmentRef,
        _actor: &str,
        _date: i64,
    ) -> TrashResult<DeletedAttachmentId> {
        Err(TrashError::Unavailable)
    }

    fn list_deletions(
        &self,
        _document: &DocumentId,
        _filename: &str,
    ) -> TrashResult<Vec<DeletedAttachmentRecord>> {
        Err(TrashError::Unavailable)
    }

    fn list_all_deletions(&self, _document: &DocumentId) -> TrashResult<Vec<DeletedAttachmentRecord>> {
        Err(TrashError::Unavailable)
    }
}

/// SQLite-backed attachment trash.
pub struct SqliteAttachmentTrash<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteAttachmentTrash<'conn> {
    /// Constructs a trash from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> TrashResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl AttachmentTrash for SqliteAttachmentTrash<'_> {
    fn archive(
        &self,
        document: &DocumentId,
        attachment: &AttachmentRef,
        actor: &str,
        date: i64,
    ) -> TrashResult<DeletedAttachmentId> {
        let revisions = load_all_revisions(self.conn, document, &attachment.filename)?;

        let mut snapshot = attachment.clone();
        snapshot.clear_dirty();
        if snapshot.content.is_none() {
            let stored = revisions
                .iter()
                .find(|revision| revision.version == attachment.version)
                .ok_or_else(|| {
                    RepoError::InvalidData(format!(
                        "no stored bytes for {}@{} of {document}",
                        attachment.filename, attachment.version
                    ))
                })?;
            snapshot.content = stored.content.clone();
        }

        let body = ArchivedAttachment {
            attachment: snapshot,
            revisions,
        };
        let body_json = serde_json::to_string(&body).map_err(RepoError::from)?;
        let id = Uuid::new_v4();

        self.conn.execute(
            "INSERT INTO deleted_attachments (
                id,
                wiki,
                space,
                name,
                filename,
                deleted_at,
                deleter,
                snapshot
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                id.to_string(),
                document.wiki,
                document.space,
                document.name,
                attachment.filename,
                date,
                actor,
                body_json,
            ],
        )?;

        debug!(
            "event=trash_archive module=repo status=ok document={} filename={} version={} record={}",
            document, attachment.filename, attachment.version, id
        );
        Ok(id)
    }

    fn list_deletions(
        &self,
        document: &DocumentId,
        filename: &str,
    ) -> TrashResult<Vec<DeletedAttachmentRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, filename, deleted_at, deleter, snapshot
             FROM deleted_attachments
             WHERE wiki = ?1 AND space = ?2 AND name = ?3 AND filename = ?4
             ORDER BY deleted_at DESC, rowid DESC;",
        )?;
        let mut rows = stmt.query(params![
            document.wiki,
            document.space,
            document.name,
            filename
        ])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_record_row(row, document)?);
        }
        Ok(records)
    }

    fn list_all_deletions(&self, document: &DocumentId) -> TrashResult<Vec<DeletedAttachmentRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, filename, deleted_at, deleter, snapshot
             FROM deleted_attachments
             WHERE wiki = ?1 AND space = ?2 AND name = ?3
             ORDER BY deleted_at DESC, rowid DESC;",
        )?;
        let mut rows = stmt.query(params![document.wiki, document.space, document.name])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_record_row(row, document)?);
        }
        Ok(records)
    }
}

fn parse_record_row(row: &Row<'_>, document: &DocumentId) -> TrashResult<DeletedAttachmentRecord> {
    let id_text: String = row.get("id")?;
    let id = Uuid::parse_str(&id_text).map_err(|_| {
        RepoError::InvalidData(format!(
            "invalid uuid value `{id_text}` in deleted_attachments.id"
        ))
    })?;
    let snapshot_json: String = row.get("snapshot")?;
    let body: ArchivedAttachment = serde_json::from_str(&snapshot_json).map_err(|err| {
        RepoError::InvalidData(format!(
            "invalid snapshot in deleted_attachments record {id}: {err}"
        ))
    })?;

    Ok(DeletedAttachmentRecord {
        id,
        document: document.clone(),
        filename: row.get("filename")?,
        deleted_at: row.get("deleted_at")?,
        deleter: row.get("deleter")?,
        attachment: body.attachment,
        revisions: body.revisions,
    })
}
