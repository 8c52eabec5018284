//! Document revision store contract and SQLite implementation.
//!
//! # Responsibility
//! - Load the live state of a document.
//! - Load the full snapshot of any saved document revision, including the
//!   attachment list as it was at that revision.
//!
//! # Invariants
//! - Unknown revisions are `RepoError::NotFound`, never an empty snapshot.
//! - Snapshot attachment refs are metadata-only (`content == None`).

use crate::model::attachment::AttachmentRef;
use crate::model::document::{DocumentId, DocumentObject, DocumentSnapshot};
use crate::model::version::Version;
use crate::repo::attachment_history::parse_attachment_row;
use crate::repo::{
    ensure_connection_ready, parse_version, revision_not_found, RepoError, RepoResult,
};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;

/// Read access to documents and their revision archive.
pub trait DocumentStore {
    /// Loads the live state of a document, `None` when it does not exist.
    fn load_current(&self, document: &DocumentId) -> RepoResult<Option<DocumentSnapshot>>;
    /// Loads one saved revision. Fails with `RepoError::NotFound` when unknown.
    fn load_revision(&self, document: &DocumentId, version: &Version) -> RepoResult<DocumentSnapshot>;
    /// Lists saved revision labels in ascending order.
    fn list_revisions(&self, document: &DocumentId) -> RepoResult<Vec<Version>>;
}

impl<T: DocumentStore + ?Sized> DocumentStore for &T {
    fn load_current(&self, document: &DocumentId) -> RepoResult<Option<DocumentSnapshot>> {
        (**self).load_current(document)
    }

    fn load_revision(&self, document: &DocumentId, version: &Version) -> RepoResult<DocumentSnapshot> {
        (**self).load_revision(document, version)
    }

    fn list_revisions(&self, document: &DocumentId) -> RepoResult<Vec<Version>> {
        (**self).list_revisions(document)
    }
}

/// SQLite-backed document store.
pub struct SqliteDocumentStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteDocumentStore<'conn> {
    /// Constructs a store from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl DocumentStore for SqliteDocumentStore<'_> {
    fn load_current(&self, document: &DocumentId) -> RepoResult<Option<DocumentSnapshot>> {
        let head = self
            .conn
            .query_row(
                "SELECT version, author, updated_at, content
                 FROM documents
                 WHERE wiki = ?1 AND space = ?2 AND name = ?3;",
                params![document.wiki, document.space, document.name],
                |row| {
                    Ok((
                        row.get::<_, String>("version")?,
                        row.get::<_, String>("author")?,
                        row.get::<_, i64>("updated_at")?,
                        row.get::<_, String>("content")?,
                    ))
                },
            )
            .optional()?;

        let Some((version_text, author, date, content)) = head else {
            return Ok(None);
        };

        Ok(Some(DocumentSnapshot {
            id: document.clone(),
            version: parse_version(&version_text, "documents.version")?,
            author,
            date,
            content,
            attachments: load_live_attachments(self.conn, document)?,
            objects: load_live_objects(self.conn, document)?,
            objects_to_remove: Vec::new(),
            attachment_archives: BTreeMap::new(),
            content_dirty: false,
            is_new: false,
        }))
    }

    fn load_revision(&self, document: &DocumentId, version: &Version) -> RepoResult<DocumentSnapshot> {
        let row = self
            .conn
            .query_row(
                "SELECT author, updated_at, content, attachments, objects
                 FROM document_revisions
                 WHERE wiki = ?1 AND space = ?2 AND name = ?3 AND version = ?4;",
                params![
                    document.wiki,
                    document.space,
                    document.name,
                    version.to_string()
                ],
                |row| {
                    Ok((
                        row.get::<_, String>("author")?,
                        row.get::<_, i64>("updated_at")?,
                        row.get::<_, String>("content")?,
                        row.get::<_, String>("attachments")?,
                        row.get::<_, String>("objects")?,
                    ))
                },
            )
            .optional()?;

        let (author, date, content, attachments_json, objects_json) =
            row.ok_or_else(|| revision_not_found(document, version))?;

        let attachments: Vec<AttachmentRef> = serde_json::from_str(&attachments_json)
            .map_err(|err| {
                RepoError::InvalidData(format!(
                    "document_revisions.attachments of {document}@{version}: {err}"
                ))
            })?;
        let objects: Vec<DocumentObject> = serde_json::from_str(&objects_json).map_err(|err| {
            RepoError::InvalidData(format!(
                "document_revisions.objects of {document}@{version}: {err}"
            ))
        })?;

        Ok(DocumentSnapshot {
            id: document.clone(),
            version: *version,
            author,
            date,
            content,
            attachments,
            objects,
            objects_to_remove: Vec::new(),
            attachment_archives: BTreeMap::new(),
            content_dirty: false,
            is_new: false,
        })
    }

    fn list_revisions(&self, document: &DocumentId) -> RepoResult<Vec<Version>> {
        let mut stmt = self.conn.prepare(
            "SELECT version
             FROM document_revisions
             WHERE wiki = ?1 AND space = ?2 AND name = ?3;",
        )?;
        let mut rows = stmt.query(params![document.wiki, document.space, document.name])?;
        let mut versions = Vec::new();
        while let Some(row) = rows.next()? {
            let text: String = row.get(0)?;
            versions.push(parse_version(&text, "document_revisions.version")?);
        }
        versions.sort();
        Ok(versions)
    }
}

pub(crate) fn load_live_attachments(conn: &Connection, document: &DocumentId) -> RepoResult<Vec<AttachmentRef>> {
    let mut stmt = conn.prepare(
        "SELECT filename, version, author, created_at, size, content_hash
         FROM attachments
         WHERE wiki = ?1 AND space = ?2 AND name = ?3
         ORDER BY filename ASC;",
    )?;
    let mut rows = stmt.query(params![document.wiki, document.space, document.name])?;
    let mut attachments = Vec::new();
    while let Some(row) = rows.next()? {
        attachments.push(parse_attachment_row(row, "attachments", false)?);
    }
    Ok(attachments)
}

pub(crate) fn load_live_objects(conn: &Connection, document: &DocumentId) -> RepoResult<Vec<DocumentObject>> {
    let mut stmt = conn.prepare(
        "SELECT class_name, number, properties
         FROM document_objects
         WHERE wiki = ?1 AND space = ?2 AND name = ?3
         ORDER BY class_name ASC, number ASC;",
    )?;
    let mut rows = stmt.query(params![document.wiki, document.space, document.name])?;
    let mut objects = Vec::new();
    while let Some(row) = rows.next()? {
        let class_name: String = row.get("class_name")?;
        let number: i64 = row.get("number")?;
        let properties_json: String = row.get("properties")?;
        let number = u32::try_from(number).map_err(|_| {
            RepoError::InvalidData(format!(
                "invalid object number `{number}` in document_objects.number"
            ))
        })?;
        objects.push(DocumentObject {
            class_name,
            number,
            properties: serde_json::from_str(&properties_json)?,
        });
    }
    Ok(objects)
}
