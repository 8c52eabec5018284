//! Save pipeline contract and SQLite implementation.
//!
//! # Responsibility
//! - Persist an assembled document snapshot as a new revision.
//! - Mint attachment revisions for content-dirty attachments.
//!
//! # Invariants
//! - Saves are optimistic: the stored head version must equal the snapshot's
//!   base `version`, otherwise nothing is written.
//! - A save either commits the head, objects, attachments and revision row
//!   together or writes nothing.
//! - Attachment versions only move forward from the newest stored revision.

use crate::model::attachment::AttachmentRef;
use crate::model::document::{DocumentId, DocumentSnapshot};
use crate::model::version::Version;
use crate::repo::document_store::{load_live_attachments, load_live_objects};
use crate::repo::{ensure_connection_ready, parse_version, RepoError};
use log::{info, warn};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type SaveResult<T> = Result<T, SaveError>;

/// Error returned by save pipelines.
#[derive(Debug)]
pub enum SaveError {
    /// Stored head moved since the snapshot was loaded.
    ///
    /// `None` means "no stored document".
    ConcurrentModification {
        document: DocumentId,
        expected: Option<Version>,
        actual: Option<Version>,
    },
    Storage(RepoError),
}

impl Display for SaveError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConcurrentModification {
                document,
                expected,
                actual,
            } => write!(
                f,
                "concurrent modification of {document}: expected head {}, found {}",
                describe_head(expected),
                describe_head(actual)
            ),
            Self::Storage(err) => write!(f, "{err}"),
        }
    }
}

fn describe_head(version: &Option<Version>) -> String {
    version
        .map(|version| version.to_string())
        .unwrap_or_else(|| "none".to_string())
}

impl Error for SaveError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::ConcurrentModification { .. } => None,
            Self::Storage(err) => Some(err),
        }
    }
}

impl From<RepoError> for SaveError {
    fn from(value: RepoError) -> Self {
        Self::Storage(value)
    }
}

impl From<rusqlite::Error> for SaveError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Storage(value.into())
    }
}

/// Persists documents as new revisions.
pub trait SavePipeline {
    /// Saves `document` and returns the stored snapshot with its new version.
    fn save(&self, document: DocumentSnapshot, comment: &str, actor: &str) -> SaveResult<DocumentSnapshot>;
}

impl<T: SavePipeline + ?Sized> SavePipeline for &T {
    fn save(&self, document: DocumentSnapshot, comment: &str, actor: &str) -> SaveResult<DocumentSnapshot> {
        (**self).save(document, comment, actor)
    }
}

/// SQLite-backed save pipeline.
pub struct SqliteSavePipeline<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteSavePipeline<'conn> {
    /// Constructs a save pipeline from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> SaveResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl SavePipeline for SqliteSavePipeline<'_> {
    fn save(&self, document: DocumentSnapshot, comment: &str, actor: &str) -> SaveResult<DocumentSnapshot> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let id = &document.id;

        let new_version = next_document_version(&tx, &document)?;

        tx.execute(
            "INSERT INTO documents (wiki, space, name, version, author, updated_at, content)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (wiki, space, name) DO UPDATE SET
                version = excluded.version,
                author = excluded.author,
                updated_at = excluded.updated_at,
                content = excluded.content;",
            params![
                id.wiki,
                id.space,
                id.name,
                new_version.to_string(),
                actor,
                document.date,
                document.content,
            ],
        )?;

        save_objects(&tx, &document)?;
        save_attachments(&tx, &document)?;

        let attachments = load_live_attachments(&tx, id)?;
        let objects = load_live_objects(&tx, id)?;
        tx.execute(
            "INSERT INTO document_revisions (
                wiki,
                space,
                name,
                version,
                author,
                updated_at,
                content,
                comment,
                attachments,
                objects
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10);",
            params![
                id.wiki,
                id.space,
                id.name,
                new_version.to_string(),
                actor,
                document.date,
                document.content,
                comment,
                serde_json::to_string(&attachments).map_err(RepoError::from)?,
                serde_json::to_string(&objects).map_err(RepoError::from)?,
            ],
        )?;
        tx.commit()?;

        info!(
            "event=document_save module=repo status=ok document={} version={} attachments={} objects={}",
            id,
            new_version,
            attachments.len(),
            objects.len()
        );

        Ok(DocumentSnapshot {
            id: document.id,
            version: new_version,
            author: actor.to_string(),
            date: document.date,
            content: document.content,
            attachments,
            objects,
            objects_to_remove: Vec::new(),
            attachment_archives: BTreeMap::new(),
            content_dirty: false,
            is_new: false,
        })
    }
}

fn next_document_version(conn: &Connection, document: &DocumentSnapshot) -> SaveResult<Version> {
    let id = &document.id;
    let head = conn
        .query_row(
            "SELECT version FROM documents WHERE wiki = ?1 AND space = ?2 AND name = ?3;",
            params![id.wiki, id.space, id.name],
            |row| row.get::<_, String>(0),
        )
        .optional()?
        .map(|text| parse_version(&text, "documents.version"))
        .transpose()?;

    match (head, document.is_new) {
        (None, true) => Ok(Version::FIRST),
        (Some(stored), false) if stored == document.version => stored
            .next_major()
            .ok_or_else(|| exhausted_label(id, "document", &stored)),
        (actual, is_new) => {
            warn!(
                "event=document_save module=repo status=error document={} error_code=concurrent_modification",
                id
            );
            Err(SaveError::ConcurrentModification {
                document: id.clone(),
                expected: (!is_new).then_some(document.version),
                actual,
            })
        }
    }
}

fn save_objects(conn: &Connection, document: &DocumentSnapshot) -> SaveResult<()> {
    let id = &document.id;
    for key in &document.objects_to_remove {
        conn.execute(
            "DELETE FROM document_objects
             WHERE wiki = ?1 AND space = ?2 AND name = ?3 AND class_name = ?4 AND number = ?5;",
            params![id.wiki, id.space, id.name, key.class_name, key.number],
        )?;
    }

    for object in &document.objects {
        conn.execute(
            "INSERT INTO document_objects (wiki, space, name, class_name, number, properties)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (wiki, space, name, class_name, number) DO UPDATE SET
                properties = excluded.properties;",
            params![
                id.wiki,
                id.space,
                id.name,
                object.class_name,
                object.number,
                serde_json::to_string(&object.properties).map_err(RepoError::from)?,
            ],
        )?;
    }
    Ok(())
}

fn save_attachments(conn: &Connection, document: &DocumentSnapshot) -> SaveResult<()> {
    let id = &document.id;
    let listed: BTreeSet<&str> = document.attachment_filenames();

    for live in load_live_attachments(conn, id)? {
        if !listed.contains(live.filename.as_str()) {
            delete_attachment(conn, id, &live.filename)?;
        }
    }

    for (filename, revisions) in &document.attachment_archives {
        conn.execute(
            "DELETE FROM attachment_revisions
             WHERE wiki = ?1 AND space = ?2 AND name = ?3 AND filename = ?4;",
            params![id.wiki, id.space, id.name, filename],
        )?;
        for revision in revisions {
            insert_revision(conn, id, revision, &revision.version)?;
        }
    }

    for attachment in &document.attachments {
        let version = if attachment.content_dirty {
            let version = next_attachment_version(conn, id, attachment)?;
            insert_revision(conn, id, attachment, &version)?;
            version
        } else {
            if !revision_exists(conn, id, &attachment.filename, &attachment.version)? {
                return Err(RepoError::InvalidData(format!(
                    "attachment {}@{} of {id} has no stored revision",
                    attachment.filename, attachment.version
                ))
                .into());
            }
            attachment.version
        };
        upsert_live_attachment(conn, id, attachment, &version)?;
    }
    Ok(())
}

fn next_attachment_version(
    conn: &Connection,
    id: &DocumentId,
    attachment: &AttachmentRef,
) -> SaveResult<Version> {
    let mut stmt = conn.prepare(
        "SELECT version FROM attachment_revisions
         WHERE wiki = ?1 AND space = ?2 AND name = ?3 AND filename = ?4;",
    )?;
    let mut rows = stmt.query(params![id.wiki, id.space, id.name, attachment.filename])?;
    let mut stored = Vec::new();
    while let Some(row) = rows.next()? {
        let text: String = row.get(0)?;
        stored.push(parse_version(&text, "attachment_revisions.version")?);
    }

    if !stored.contains(&attachment.version) {
        return Ok(attachment.version);
    }
    let newest = stored.into_iter().max().unwrap_or(attachment.version);
    newest
        .next_minor()
        .ok_or_else(|| exhausted_label(id, &attachment.filename, &newest))
}

fn exhausted_label(id: &DocumentId, subject: &str, version: &Version) -> SaveError {
    RepoError::InvalidData(format!(
        "revision label {version} of {subject} in {id} cannot be incremented"
    ))
    .into()
}

fn insert_revision(
    conn: &Connection,
    id: &DocumentId,
    attachment: &AttachmentRef,
    version: &Version,
) -> SaveResult<()> {
    let content = attachment.content.as_deref().ok_or_else(|| {
        RepoError::InvalidData(format!(
            "attachment {}@{} of {id} has no content to store",
            attachment.filename, attachment.version
        ))
    })?;
    conn.execute(
        "INSERT INTO attachment_revisions (
            wiki,
            space,
            name,
            filename,
            version,
            author,
            created_at,
            size,
            content_hash,
            content
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10);",
        params![
            id.wiki,
            id.space,
            id.name,
            attachment.filename,
            version.to_string(),
            attachment.author,
            attachment.date,
            content.len() as i64,
            attachment.content_hash,
            content,
        ],
    )?;
    Ok(())
}

fn upsert_live_attachment(
    conn: &Connection,
    id: &DocumentId,
    attachment: &AttachmentRef,
    version: &Version,
) -> SaveResult<()> {
    conn.execute(
        "INSERT INTO attachments (
            wiki,
            space,
            name,
            filename,
            version,
            author,
            created_at,
            size,
            content_hash
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT (wiki, space, name, filename) DO UPDATE SET
            version = excluded.version,
            author = excluded.author,
            created_at = excluded.created_at,
            size = excluded.size,
            content_hash = excluded.content_hash;",
        params![
            id.wiki,
            id.space,
            id.name,
            attachment.filename,
            version.to_string(),
            attachment.author,
            attachment.date,
            attachment.size as i64,
            attachment.content_hash,
        ],
    )?;
    Ok(())
}

fn revision_exists(
    conn: &Connection,
    id: &DocumentId,
    filename: &str,
    version: &Version,
) -> SaveResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM attachment_revisions
            WHERE wiki = ?1 AND space = ?2 AND name = ?3 AND filename = ?4 AND version = ?5
        );",
        params![id.wiki, id.space, id.name, filename, version.to_string()],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn delete_attachment(conn: &Connection, id: &DocumentId, filename: &str) -> SaveResult<()> {
    conn.execute(
        "DELETE FROM attachments
         WHERE wiki = ?1 AND space = ?2 AND name = ?3 AND filename = ?4;",
        params![id.wiki, id.space, id.name, filename],
    )?;
    conn.execute(
        "DELETE FROM attachment_revisions
         WHERE wiki = ?1 AND space = ?2 AND name = ?3 AND filename = ?4;",
        params![id.wiki, id.space, id.name, filename],
    )?;
    Ok(())
}
