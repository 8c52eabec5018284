//! Attachment revision history contract and SQLite implementation.
//!
//! # Responsibility
//! - Resolve one historical revision of an attachment, bytes included.
//!
//! # Invariants
//! - A missing revision is `Ok(None)`; only transport or decoding failures are
//!   errors.

use crate::model::attachment::AttachmentRef;
use crate::model::document::DocumentId;
use crate::model::version::Version;
use crate::repo::{ensure_connection_ready, parse_size, parse_version, RepoResult};
use rusqlite::{params, Connection, Row};

/// Read access to the revision archive of attachments.
pub trait AttachmentHistory {
    /// Loads `attachment` as it was at `version`, or `None` when unavailable.
    fn load_revision(
        &self,
        document: &DocumentId,
        attachment: &AttachmentRef,
        version: &Version,
    ) -> RepoResult<Option<AttachmentRef>>;
}

impl<T: AttachmentHistory + ?Sized> AttachmentHistory for &T {
    fn load_revision(
        &self,
        document: &DocumentId,
        attachment: &AttachmentRef,
        version: &Version,
    ) -> RepoResult<Option<AttachmentRef>> {
        (**self).load_revision(document, attachment, version)
    }
}

/// SQLite-backed attachment history.
pub struct SqliteAttachmentHistory<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteAttachmentHistory<'conn> {
    /// Constructs a history provider from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl AttachmentHistory for SqliteAttachmentHistory<'_> {
    fn load_revision(
        &self,
        document: &DocumentId,
        attachment: &AttachmentRef,
        version: &Version,
    ) -> RepoResult<Option<AttachmentRef>> {
        let mut stmt = self.conn.prepare(
            "SELECT filename, version, author, created_at, size, content_hash, content
             FROM attachment_revisions
             WHERE wiki = ?1 AND space = ?2 AND name = ?3 AND filename = ?4 AND version = ?5;",
        )?;
        let mut rows = stmt.query(params![
            document.wiki,
            document.space,
            document.name,
            attachment.filename,
            version.to_string()
        ])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_attachment_row(row, "attachment_revisions", true)?)),
            None => Ok(None),
        }
    }
}

/// Lists every archived revision of one attachment, oldest first.
pub(crate) fn load_all_revisions(
    conn: &Connection,
    document: &DocumentId,
    filename: &str,
) -> RepoResult<Vec<AttachmentRef>> {
    let mut stmt = conn.prepare(
        "SELECT filename, version, author, created_at, size, content_hash, content
         FROM attachment_revisions
         WHERE wiki = ?1 AND space = ?2 AND name = ?3 AND filename = ?4;",
    )?;
    let mut rows = stmt.query(params![document.wiki, document.space, document.name, filename])?;
    let mut revisions = Vec::new();
    while let Some(row) = rows.next()? {
        revisions.push(parse_attachment_row(row, "attachment_revisions", true)?);
    }
    revisions.sort_by(|left, right| left.version.cmp(&right.version));
    Ok(revisions)
}

/// Maps an `attachments` or `attachment_revisions` row.
///
/// `with_content` must match whether the query selected the `content` column.
pub(crate) fn parse_attachment_row(
    row: &Row<'_>,
    table: &'static str,
    with_content: bool,
) -> RepoResult<AttachmentRef> {
    let version_text: String = row.get("version")?;
    let size: i64 = row.get("size")?;
    let content = if with_content {
        Some(row.get::<_, Vec<u8>>("content")?)
    } else {
        None
    };

    Ok(AttachmentRef {
        filename: row.get("filename")?,
        version: parse_version(&version_text, table)?,
        author: row.get("author")?,
        date: row.get("created_at")?,
        size: parse_size(size, table)?,
        content_hash: row.get("content_hash")?,
        content,
        content_dirty: false,
        metadata_dirty: false,
    })
}
