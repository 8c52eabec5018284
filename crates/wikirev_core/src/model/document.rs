//! Document identity and snapshot models.
//!
//! # Responsibility
//! - Identify a document by wiki, space and page name.
//! - Hold one in-memory state of a document: content, attachments, objects.
//!
//! # Invariants
//! - Attachments are unique by filename inside one snapshot.
//! - Objects are unique by `ObjectKey` inside one snapshot.
//! - A snapshot loaded from a store is never mutated in place by rollback;
//!   callers clone it first.

use crate::model::attachment::AttachmentRef;
use crate::model::version::Version;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

static DOCUMENT_REF_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([^:\s]+):([^.\s][^.]*)\.(\S.*)$").expect("valid document reference regex")
});

/// Error returned for malformed `wiki:Space.Page` references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentIdParseError(pub String);

impl Display for DocumentIdParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid document reference `{}`; expected wiki:Space.Page",
            self.0
        )
    }
}

impl Error for DocumentIdParseError {}

/// Stable identity of a wiki document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentId {
    pub wiki: String,
    pub space: String,
    pub name: String,
}

impl DocumentId {
    pub fn new(wiki: impl Into<String>, space: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            wiki: wiki.into(),
            space: space.into(),
            name: name.into(),
        }
    }
}

impl FromStr for DocumentId {
    type Err = DocumentIdParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let captures = DOCUMENT_REF_RE
            .captures(value.trim())
            .ok_or_else(|| DocumentIdParseError(value.to_string()))?;
        let name = captures[3].trim_end();
        if name.is_empty() {
            return Err(DocumentIdParseError(value.to_string()));
        }
        Ok(Self::new(&captures[1], &captures[2], name))
    }
}

impl Display for DocumentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}.{}", self.wiki, self.space, self.name)
    }
}

/// Key of one structured object attached to a document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub class_name: String,
    pub number: u32,
}

/// Structured object of a document. Properties are opaque to rollback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentObject {
    pub class_name: String,
    pub number: u32,
    pub properties: BTreeMap<String, String>,
}

impl DocumentObject {
    pub fn new(class_name: impl Into<String>, number: u32) -> Self {
        Self {
            class_name: class_name.into(),
            number,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            class_name: self.class_name.clone(),
            number: self.number,
        }
    }
}

/// One state of a document, either stored or being assembled for save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSnapshot {
    pub id: DocumentId,
    pub version: Version,
    pub author: String,
    /// Date of this revision, epoch milliseconds.
    pub date: i64,
    pub content: String,
    pub attachments: Vec<AttachmentRef>,
    pub objects: Vec<DocumentObject>,
    /// Objects the save pipeline must delete.
    pub objects_to_remove: Vec<ObjectKey>,
    /// Archived attachment histories to put back on save, by filename.
    pub attachment_archives: BTreeMap<String, Vec<AttachmentRef>>,
    pub content_dirty: bool,
    /// True until the document has been saved once.
    pub is_new: bool,
}

impl DocumentSnapshot {
    /// Creates an unsaved, empty document.
    pub fn new_empty(id: DocumentId) -> Self {
        Self {
            id,
            version: Version::FIRST,
            author: String::new(),
            date: 0,
            content: String::new(),
            attachments: Vec::new(),
            objects: Vec::new(),
            objects_to_remove: Vec::new(),
            attachment_archives: BTreeMap::new(),
            content_dirty: true,
            is_new: true,
        }
    }

    pub fn attachment(&self, filename: &str) -> Option<&AttachmentRef> {
        self.attachments
            .iter()
            .find(|attachment| attachment.filename == filename)
    }

    pub fn attachment_mut(&mut self, filename: &str) -> Option<&mut AttachmentRef> {
        self.attachments
            .iter_mut()
            .find(|attachment| attachment.filename == filename)
    }

    /// Replaces the attachment with the same filename, or appends it.
    pub fn set_attachment(&mut self, attachment: AttachmentRef) {
        match self.attachment_mut(&attachment.filename) {
            Some(existing) => *existing = attachment,
            None => self.attachments.push(attachment),
        }
    }

    pub fn remove_attachment(&mut self, filename: &str) -> Option<AttachmentRef> {
        let index = self
            .attachments
            .iter()
            .position(|attachment| attachment.filename == filename)?;
        Some(self.attachments.remove(index))
    }

    pub fn attachment_filenames(&self) -> BTreeSet<&str> {
        self.attachments
            .iter()
            .map(|attachment| attachment.filename.as_str())
            .collect()
    }

    pub fn object(&self, key: &ObjectKey) -> Option<&DocumentObject> {
        self.objects
            .iter()
            .find(|object| object.class_name == key.class_name && object.number == key.number)
    }

    pub fn set_object(&mut self, object: DocumentObject) {
        let key = object.key();
        match self
            .objects
            .iter_mut()
            .find(|existing| existing.key() == key)
        {
            Some(existing) => *existing = object,
            None => self.objects.push(object),
        }
    }

    /// Flags every object of `other` missing from this snapshot for removal.
    pub fn add_objects_to_remove_from(&mut self, other: &DocumentSnapshot) {
        for object in &other.objects {
            let key = object.key();
            if self.object(&key).is_none() && !self.objects_to_remove.contains(&key) {
                self.objects_to_remove.push(key);
            }
        }
    }
}
