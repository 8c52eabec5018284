//! Attachment and deleted-attachment models.
//!
//! # Responsibility
//! - Define the attachment reference owned by one document snapshot.
//! - Define the trash record shape holding a deleted attachment and its archive.
//!
//! # Invariants
//! - `filename` is the unique key of an attachment inside one document.
//! - `content_hash` always describes `content` when content is loaded.
//! - A version label alone does not identify bytes: labels are reused when an
//!   attachment is deleted and uploaded again, so revisions are compared by
//!   their recorded date and content hash.

use crate::model::document::DocumentId;
use crate::model::version::Version;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Stable identifier of one trash record.
pub type DeletedAttachmentId = Uuid;

/// Computes the `sha256:<hex>` digest stored in `content_hash`.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// One attachment as seen by a document snapshot or by the history store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub filename: String,
    pub version: Version,
    pub author: String,
    /// Upload date of this revision, epoch milliseconds.
    pub date: i64,
    pub size: u64,
    pub content_hash: String,
    /// `None` for metadata-only references recorded in document revisions.
    #[serde(default, with = "hex_content", skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<u8>>,
    /// Forces the save pipeline to mint a new attachment revision.
    #[serde(skip)]
    pub content_dirty: bool,
    #[serde(skip)]
    pub metadata_dirty: bool,
}

impl AttachmentRef {
    /// Creates a freshly uploaded attachment at version `1.1`.
    pub fn new(
        filename: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
        author: impl Into<String>,
        date: i64,
    ) -> Self {
        let bytes = bytes.into();
        Self {
            filename: filename.into(),
            version: Version::FIRST,
            author: author.into(),
            date,
            size: bytes.len() as u64,
            content_hash: content_hash(&bytes),
            content: Some(bytes),
            content_dirty: true,
            metadata_dirty: true,
        }
    }

    /// Replaces the bytes of this attachment, as an upload over it would.
    pub fn update_content(&mut self, bytes: impl Into<Vec<u8>>, author: impl Into<String>, date: i64) {
        let bytes = bytes.into();
        self.size = bytes.len() as u64;
        self.content_hash = content_hash(&bytes);
        self.content = Some(bytes);
        self.author = author.into();
        self.date = date;
        self.mark_dirty();
    }

    /// Returns whether `other` records the same bytes saved at the same time.
    pub fn same_revision(&self, other: &AttachmentRef) -> bool {
        self.date == other.date && self.content_hash == other.content_hash
    }

    pub fn mark_dirty(&mut self) {
        self.content_dirty = true;
        self.metadata_dirty = true;
    }

    pub fn clear_dirty(&mut self) {
        self.content_dirty = false;
        self.metadata_dirty = false;
    }

    /// Copy of this reference without its bytes.
    pub fn metadata_only(&self) -> Self {
        Self {
            content: None,
            ..self.clone()
        }
    }
}

/// A deleted attachment retained by the trash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedAttachmentRecord {
    pub id: DeletedAttachmentId,
    pub document: DocumentId,
    pub filename: String,
    /// Deletion date, epoch milliseconds.
    pub deleted_at: i64,
    pub deleter: String,
    /// The attachment as it was when deleted, content included.
    pub attachment: AttachmentRef,
    /// Revision archive of the attachment at deletion time, oldest first.
    pub revisions: Vec<AttachmentRef>,
}

impl DeletedAttachmentRecord {
    /// Finds one revision inside the archived history.
    pub fn revision(&self, version: &Version) -> Option<&AttachmentRef> {
        self.revisions
            .iter()
            .find(|revision| revision.version == *version)
            .or_else(|| (self.attachment.version == *version).then_some(&self.attachment))
    }

    pub fn restore_attachment(&self) -> AttachmentRef {
        self.attachment.clone()
    }
}

/// Serialized body of a trash record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ArchivedAttachment {
    pub attachment: AttachmentRef,
    pub revisions: Vec<AttachmentRef>,
}

mod hex_content {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_some(&hex::encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|text| hex::decode(text).map_err(serde::de::Error::custom))
            .transpose()
    }
}
