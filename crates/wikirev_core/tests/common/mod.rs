#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use uuid::Uuid;
use wikirev_core::{
    AttachmentHistory, AttachmentRef, AttachmentTrash, DeletedAttachmentRecord, DocumentId,
    DocumentObject, DocumentSnapshot, DocumentStore, RepoError, RepoResult, RollbackListener,
    SaveError, SavePipeline, SaveResult, TrashError, TrashResult, Version,
};

pub const ACTOR: &str = "XWiki.Admin";

pub fn doc_id() -> DocumentId {
    DocumentId::new("xwiki", "Sandbox", "WebHome")
}

pub fn version(label: &str) -> Version {
    label.parse().unwrap()
}

/// Stored attachment revision with bytes.
pub fn attachment(filename: &str, label: &str, date: i64, bytes: &[u8]) -> AttachmentRef {
    let mut attachment = AttachmentRef::new(filename, bytes.to_vec(), "XWiki.Alice", date);
    attachment.version = version(label);
    attachment.clear_dirty();
    attachment
}

/// Same revision as `attachment`, as a document snapshot records it.
pub fn attachment_ref(filename: &str, label: &str, date: i64, bytes: &[u8]) -> AttachmentRef {
    attachment(filename, label, date, bytes).metadata_only()
}

pub fn snapshot(label: &str, date: i64, attachments: Vec<AttachmentRef>) -> DocumentSnapshot {
    let mut snapshot = DocumentSnapshot::new_empty(doc_id());
    snapshot.version = version(label);
    snapshot.author = "XWiki.Alice".to_string();
    snapshot.date = date;
    snapshot.content = format!("content of {label}");
    snapshot.attachments = attachments;
    snapshot.content_dirty = false;
    snapshot.is_new = false;
    snapshot
}

pub fn object(class_name: &str, number: u32) -> DocumentObject {
    DocumentObject::new(class_name, number).with_property("title", format!("{class_name}#{number}"))
}

#[derive(Default)]
pub struct MemoryDocumentStore {
    current: RefCell<Option<DocumentSnapshot>>,
    revisions: RefCell<BTreeMap<Version, DocumentSnapshot>>,
}

impl MemoryDocumentStore {
    pub fn new(current: DocumentSnapshot, revisions: Vec<DocumentSnapshot>) -> Self {
        let store = Self::default();
        *store.current.borrow_mut() = Some(current);
        for revision in revisions {
            store.revisions.borrow_mut().insert(revision.version, revision);
        }
        store
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn load_current(&self, document: &DocumentId) -> RepoResult<Option<DocumentSnapshot>> {
        Ok(self
            .current
            .borrow()
            .clone()
            .filter(|snapshot| snapshot.id == *document))
    }

    fn load_revision(&self, document: &DocumentId, version: &Version) -> RepoResult<DocumentSnapshot> {
        self.revisions
            .borrow()
            .get(version)
            .filter(|snapshot| snapshot.id == *document)
            .cloned()
            .ok_or_else(|| RepoError::NotFound(format!("revision {version} of {document}")))
    }

    fn list_revisions(&self, _document: &DocumentId) -> RepoResult<Vec<Version>> {
        Ok(self.revisions.borrow().keys().copied().collect())
    }
}

#[derive(Default)]
pub struct MemoryHistory {
    revisions: RefCell<BTreeMap<(String, Version), AttachmentRef>>,
    broken: Cell<bool>,
}

impl MemoryHistory {
    pub fn with(revisions: Vec<AttachmentRef>) -> Self {
        let history = Self::default();
        for revision in revisions {
            history.insert(revision);
        }
        history
    }

    pub fn insert(&self, revision: AttachmentRef) {
        self.revisions
            .borrow_mut()
            .insert((revision.filename.clone(), revision.version), revision);
    }

    /// Every later lookup fails with a storage error.
    pub fn break_storage(&self) {
        self.broken.set(true);
    }
}

impl AttachmentHistory for MemoryHistory {
    fn load_revision(
        &self,
        _document: &DocumentId,
        attachment: &AttachmentRef,
        version: &Version,
    ) -> RepoResult<Option<AttachmentRef>> {
        if self.broken.get() {
            return Err(RepoError::InvalidData("history offline".to_string()));
        }
        Ok(self
            .revisions
            .borrow()
            .get(&(attachment.filename.clone(), *version))
            .cloned())
    }
}

#[derive(Default)]
pub struct MemoryTrash {
    records: RefCell<Vec<DeletedAttachmentRecord>>,
    unavailable: bool,
    broken: bool,
    calls: Cell<usize>,
}

impl MemoryTrash {
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    /// Every call fails with a storage error.
    pub fn failing() -> Self {
        Self {
            broken: true,
            ..Self::default()
        }
    }

    pub fn with_records(records: Vec<DeletedAttachmentRecord>) -> Self {
        let trash = Self::default();
        *trash.records.borrow_mut() = records;
        trash
    }

    pub fn records(&self) -> Vec<DeletedAttachmentRecord> {
        self.records.borrow().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }

    fn check(&self) -> TrashResult<()> {
        self.calls.set(self.calls.get() + 1);
        if self.unavailable {
            return Err(TrashError::Unavailable);
        }
        if self.broken {
            return Err(TrashError::Repo(RepoError::InvalidData(
                "trash store offline".to_string(),
            )));
        }
        Ok(())
    }
}

pub fn trash_record(
    filename: &str,
    deleted_at: i64,
    attachment: AttachmentRef,
    revisions: Vec<AttachmentRef>,
) -> DeletedAttachmentRecord {
    DeletedAttachmentRecord {
        id: Uuid::new_v4(),
        document: doc_id(),
        filename: filename.to_string(),
        deleted_at,
        deleter: "XWiki.Bob".to_string(),
        attachment,
        revisions,
    }
}

impl AttachmentTrash for MemoryTrash {
    fn archive(
        &self,
        document: &DocumentId,
        attachment: &AttachmentRef,
        actor: &str,
        date: i64,
    ) -> TrashResult<Uuid> {
        self.check()?;
        let record = DeletedAttachmentRecord {
            id: Uuid::new_v4(),
            document: document.clone(),
            filename: attachment.filename.clone(),
            deleted_at: date,
            deleter: actor.to_string(),
            attachment: attachment.clone(),
            revisions: vec![attachment.clone()],
        };
        let id = record.id;
        self.records.borrow_mut().push(record);
        Ok(id)
    }

    fn list_deletions(
        &self,
        document: &DocumentId,
        filename: &str,
    ) -> TrashResult<Vec<DeletedAttachmentRecord>> {
        Ok(self
            .list_all_deletions(document)?
            .into_iter()
            .filter(|record| record.filename == filename)
            .collect())
    }

    fn list_all_deletions(&self, document: &DocumentId) -> TrashResult<Vec<DeletedAttachmentRecord>> {
        self.check()?;
        let mut records: Vec<DeletedAttachmentRecord> = self
            .records
            .borrow()
            .iter()
            .rev()
            .filter(|record| record.document == *document)
            .cloned()
            .collect();
        records.sort_by(|left, right| right.deleted_at.cmp(&left.deleted_at));
        Ok(records)
    }
}

/// Save pipeline that records what it was asked to persist.
#[derive(Default)]
pub struct RecordingSavePipeline {
    saved: RefCell<Vec<(DocumentSnapshot, String, String)>>,
    conflict: Cell<bool>,
}

impl RecordingSavePipeline {
    pub fn conflicting() -> Self {
        let pipeline = Self::default();
        pipeline.conflict.set(true);
        pipeline
    }

    pub fn saved(&self) -> Vec<(DocumentSnapshot, String, String)> {
        self.saved.borrow().clone()
    }

    pub fn last_saved(&self) -> DocumentSnapshot {
        self.saved.borrow().last().map(|(doc, _, _)| doc.clone()).unwrap()
    }
}

impl SavePipeline for RecordingSavePipeline {
    fn save(&self, document: DocumentSnapshot, comment: &str, actor: &str) -> SaveResult<DocumentSnapshot> {
        if self.conflict.get() {
            return Err(SaveError::ConcurrentModification {
                document: document.id.clone(),
                expected: Some(document.version),
                actual: document.version.next_major(),
            });
        }
        self.saved
            .borrow_mut()
            .push((document.clone(), comment.to_string(), actor.to_string()));

        let mut saved = document;
        saved.version = if saved.is_new {
            Version::FIRST
        } else {
            saved.version.next_major().unwrap()
        };
        saved.is_new = false;
        saved.content_dirty = false;
        saved.objects_to_remove.clear();
        saved.attachment_archives.clear();
        for attachment in &mut saved.attachments {
            attachment.clear_dirty();
        }
        Ok(saved)
    }
}

/// Listener appending `phase:version` entries to a shared log.
pub struct EventRecorder(pub Rc<RefCell<Vec<String>>>);

impl RollbackListener for EventRecorder {
    fn rolling_back(&self, document: &DocumentSnapshot, target: &Version) {
        self.0
            .borrow_mut()
            .push(format!("rolling_back:{}:{target}", document.version));
    }

    fn rolled_back(&self, document: &DocumentSnapshot, target: &Version) {
        self.0
            .borrow_mut()
            .push(format!("rolled_back:{}:{target}", document.version));
    }
}
