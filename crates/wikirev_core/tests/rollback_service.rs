mod common;

use common::{
    attachment, attachment_ref, doc_id, object, snapshot, trash_record, version, EventRecorder,
    MemoryDocumentStore, MemoryHistory, MemoryTrash, RecordingSavePipeline, ACTOR,
};
use std::cell::RefCell;
use std::rc::Rc;
use wikirev_core::{
    AttachmentDisposition, DocumentId, RollbackConfig, RollbackError, RollbackService, SaveError,
    TrashError, TrashSelection,
};

const NOW: i64 = 10_000;

struct Fixture {
    store: MemoryDocumentStore,
    history: MemoryHistory,
    trash: MemoryTrash,
    saver: RecordingSavePipeline,
}

impl Fixture {
    fn service(
        &self,
    ) -> RollbackService<&MemoryDocumentStore, &MemoryHistory, &MemoryTrash, &RecordingSavePipeline>
    {
        RollbackService::new(&self.store, &self.history, &self.trash, &self.saver)
    }
}

/// Current 2.1 holds a.png@1.3; revision 1.1 held a.png@1.1 and b.png@1.1.
fn updated_and_deleted_fixture(trash: MemoryTrash) -> Fixture {
    let revision = snapshot(
        "1.1",
        100,
        vec![
            attachment_ref("a.png", "1.1", 100, b"a1"),
            attachment_ref("b.png", "1.1", 100, b"b1"),
        ],
    );
    let current = snapshot("2.1", 300, vec![attachment_ref("a.png", "1.3", 300, b"a3")]);
    Fixture {
        store: MemoryDocumentStore::new(current.clone(), vec![revision, current]),
        history: MemoryHistory::with(vec![
            attachment("a.png", "1.1", 100, b"a1"),
            attachment("a.png", "1.2", 200, b"a2"),
            attachment("a.png", "1.3", 300, b"a3"),
        ]),
        trash,
        saver: RecordingSavePipeline::default(),
    }
}

/// Current 2.1 has no attachments; revision 1.1 held b.png@1.1.
fn deleted_fixture(trash: MemoryTrash) -> Fixture {
    let revision = snapshot("1.1", 100, vec![attachment_ref("b.png", "1.1", 100, b"b1")]);
    let current = snapshot("2.1", 300, Vec::new());
    Fixture {
        store: MemoryDocumentStore::new(current.clone(), vec![revision, current]),
        history: MemoryHistory::default(),
        trash,
        saver: RecordingSavePipeline::default(),
    }
}

#[test]
fn rollback_reverts_updated_attachment_and_drops_unrecoverable_one() {
    let fixture = updated_and_deleted_fixture(MemoryTrash::default());

    let outcome = fixture.service().rollback_to_at(&doc_id(), "1.1", ACTOR, NOW).unwrap();

    assert_eq!(outcome.plan.disposition("a.png"), Some(AttachmentDisposition::Revert));
    assert_eq!(outcome.plan.disposition("b.png"), Some(AttachmentDisposition::Restore));
    assert_eq!(outcome.report.reverted, vec!["a.png".to_string()]);
    assert_eq!(outcome.report.dropped, vec!["b.png".to_string()]);
    assert_eq!(outcome.document.version, version("3.1"));

    let saved = fixture.saver.saved();
    assert_eq!(saved.len(), 1);
    let (document, comment, actor) = &saved[0];
    assert_eq!(comment, "Rollback to version 1.1");
    assert_eq!(actor, ACTOR);
    assert_eq!(document.version, version("2.1"));
    assert_eq!(document.author, ACTOR);
    assert_eq!(document.date, NOW);
    assert_eq!(document.content, "content of 1.1");
    assert!(document.content_dirty);
    assert!(!document.is_new);

    assert_eq!(document.attachments.len(), 1);
    let reverted = document.attachment("a.png").unwrap();
    assert_eq!(reverted.content.as_deref(), Some(&b"a1"[..]));
    assert_eq!(reverted.version, version("1.3"));
    assert_eq!(reverted.date, 100);
    assert!(reverted.content_dirty);
}

#[test]
fn deleted_attachment_is_restored_from_matching_trash_record() {
    let record = trash_record(
        "b.png",
        200,
        attachment("b.png", "1.2", 150, b"b2"),
        vec![
            attachment("b.png", "1.1", 100, b"b1"),
            attachment("b.png", "1.2", 150, b"b2"),
        ],
    );
    let fixture = deleted_fixture(MemoryTrash::with_records(vec![record]));

    let outcome = fixture.service().rollback_to_at(&doc_id(), "1.1", ACTOR, NOW).unwrap();

    assert_eq!(outcome.report.restored, vec!["b.png".to_string()]);
    let document = fixture.saver.last_saved();
    let restored = document.attachment("b.png").unwrap();
    assert_eq!(restored.content.as_deref(), Some(&b"b1"[..]));
    assert_eq!(restored.date, 100);
    assert_eq!(restored.version, version("1.2"));
    assert!(restored.content_dirty);
    assert_eq!(document.attachment_archives["b.png"].len(), 2);
}

#[test]
fn trash_record_without_requested_revision_is_restored_as_is() {
    let record = trash_record(
        "b.png",
        200,
        attachment("b.png", "1.2", 150, b"b2"),
        vec![attachment("b.png", "1.2", 150, b"b2")],
    );
    let fixture = deleted_fixture(MemoryTrash::with_records(vec![record]));

    fixture.service().rollback_to_at(&doc_id(), "1.1", ACTOR, NOW).unwrap();

    let document = fixture.saver.last_saved();
    let restored = document.attachment("b.png").unwrap();
    assert_eq!(restored.content.as_deref(), Some(&b"b2"[..]));
    assert_eq!(restored.version, version("1.2"));
    assert!(restored.content_dirty);
}

#[test]
fn trash_records_older_than_target_revision_are_ignored() {
    let record = trash_record(
        "b.png",
        50,
        attachment("b.png", "1.1", 40, b"b0"),
        vec![attachment("b.png", "1.1", 40, b"b0")],
    );
    let fixture = deleted_fixture(MemoryTrash::with_records(vec![record]));

    let outcome = fixture.service().rollback_to_at(&doc_id(), "1.1", ACTOR, NOW).unwrap();

    assert_eq!(outcome.report.dropped, vec!["b.png".to_string()]);
    assert!(fixture.saver.last_saved().attachments.is_empty());
}

#[test]
fn trash_selection_policy_decides_between_inexact_records() {
    let records = vec![
        trash_record(
            "b.png",
            300,
            attachment("b.png", "1.3", 250, b"late"),
            vec![attachment("b.png", "1.3", 250, b"late")],
        ),
        trash_record(
            "b.png",
            200,
            attachment("b.png", "1.2", 150, b"early"),
            vec![attachment("b.png", "1.2", 150, b"early")],
        ),
    ];

    let most_recent = deleted_fixture(MemoryTrash::with_records(records.clone()));
    most_recent.service().rollback_to_at(&doc_id(), "1.1", ACTOR, NOW).unwrap();
    let restored = most_recent.saver.last_saved().attachment("b.png").cloned().unwrap();
    assert_eq!(restored.content.as_deref(), Some(&b"late"[..]));

    let earliest = deleted_fixture(MemoryTrash::with_records(records));
    let config = RollbackConfig {
        trash_selection: TrashSelection::EarliestAfterRevision,
        ..RollbackConfig::default()
    };
    earliest
        .service()
        .with_config(config)
        .rollback_to_at(&doc_id(), "1.1", ACTOR, NOW)
        .unwrap();
    let restored = earliest.saver.last_saved().attachment("b.png").cloned().unwrap();
    assert_eq!(restored.content.as_deref(), Some(&b"early"[..]));
}

#[test]
fn unavailable_trash_keeps_current_attachments_in_place() {
    let revision = snapshot(
        "1.1",
        100,
        vec![
            attachment_ref("a.png", "1.1", 100, b"original"),
            attachment_ref("gone.txt", "1.1", 100, b"g"),
        ],
    );
    let current_a = attachment_ref("a.png", "1.1", 500, b"recreated");
    let extra = attachment_ref("extra.txt", "1.1", 400, b"x");
    let current = snapshot("3.1", 500, vec![current_a.clone(), extra.clone()]);
    let fixture = Fixture {
        store: MemoryDocumentStore::new(current.clone(), vec![revision, current]),
        history: MemoryHistory::with(vec![
            attachment("a.png", "1.1", 500, b"recreated"),
            attachment("extra.txt", "1.1", 400, b"x"),
        ]),
        trash: MemoryTrash::unavailable(),
        saver: RecordingSavePipeline::default(),
    };

    let outcome = fixture.service().rollback_to_at(&doc_id(), "1.1", ACTOR, NOW).unwrap();

    assert_eq!(outcome.plan.disposition("a.png"), Some(AttachmentDisposition::Replace));
    assert_eq!(
        outcome.report.kept_in_place,
        vec!["a.png".to_string(), "extra.txt".to_string()]
    );
    assert_eq!(outcome.report.dropped, vec!["gone.txt".to_string()]);
    assert!(outcome.report.trashed.is_empty());

    let document = fixture.saver.last_saved();
    assert_eq!(document.attachments, vec![current_a, extra]);
    assert!(document.attachment_archives.is_empty());
}

#[test]
fn disabled_trash_is_never_called() {
    let record = trash_record(
        "b.png",
        200,
        attachment("b.png", "1.1", 100, b"b1"),
        vec![attachment("b.png", "1.1", 100, b"b1")],
    );
    let fixture = deleted_fixture(MemoryTrash::with_records(vec![record]));
    let config = RollbackConfig::from_toml_str("attachment_trash = false").unwrap();
    let service = fixture.service().with_config(config);

    let outcome = service.rollback_to_at(&doc_id(), "1.1", ACTOR, NOW).unwrap();

    assert_eq!(outcome.report.dropped, vec!["b.png".to_string()]);
    assert_eq!(fixture.trash.calls(), 0);
    assert!(matches!(
        service.deleted_attachments(&doc_id()),
        Err(RollbackError::Trash(TrashError::Unavailable))
    ));
}

#[test]
fn attachments_untouched_when_attachment_rollback_is_disabled() {
    let fixture = updated_and_deleted_fixture(MemoryTrash::default());
    let config = RollbackConfig::from_toml_str("rollback_attachments = false").unwrap();

    let outcome = fixture
        .service()
        .with_config(config)
        .rollback_to_at(&doc_id(), "1.1", ACTOR, NOW)
        .unwrap();

    assert!(outcome.plan.is_empty());
    let document = fixture.saver.last_saved();
    assert_eq!(
        document.attachments,
        vec![attachment_ref("a.png", "1.3", 300, b"a3")]
    );
    assert_eq!(document.content, "content of 1.1");
    assert_eq!(fixture.trash.calls(), 0);
}

#[test]
fn objects_added_after_target_are_flagged_for_removal() {
    let mut revision = snapshot("1.1", 100, Vec::new());
    revision.objects = vec![object("Blog.Post", 0)];
    let mut current = snapshot("2.1", 200, Vec::new());
    current.objects = vec![object("Blog.Post", 0), object("Blog.Comment", 0)];
    let fixture = Fixture {
        store: MemoryDocumentStore::new(current.clone(), vec![revision, current]),
        history: MemoryHistory::default(),
        trash: MemoryTrash::default(),
        saver: RecordingSavePipeline::default(),
    };

    fixture.service().rollback_to_at(&doc_id(), "1.1", ACTOR, NOW).unwrap();

    let document = fixture.saver.last_saved();
    assert_eq!(document.objects, vec![object("Blog.Post", 0)]);
    assert_eq!(document.objects_to_remove, vec![object("Blog.Comment", 0).key()]);
}

#[test]
fn rollback_to_current_revision_leaves_attachments_alone() {
    let attachments = vec![
        attachment_ref("a.png", "1.2", 200, b"a2"),
        attachment_ref("b.png", "1.1", 100, b"b1"),
    ];
    let current = snapshot("2.1", 200, attachments.clone());
    let fixture = Fixture {
        store: MemoryDocumentStore::new(current.clone(), vec![current]),
        history: MemoryHistory::with(vec![
            attachment("a.png", "1.2", 200, b"a2"),
            attachment("b.png", "1.1", 100, b"b1"),
        ]),
        trash: MemoryTrash::default(),
        saver: RecordingSavePipeline::default(),
    };

    let outcome = fixture.service().rollback_to_at(&doc_id(), "2.1", ACTOR, NOW).unwrap();

    assert!(outcome.plan.is_empty());
    assert_eq!(outcome.document.version, version("3.1"));
    assert_eq!(fixture.saver.last_saved().attachments, attachments);
    assert_eq!(fixture.trash.calls(), 0);
}

#[test]
fn missing_first_revision_rolls_back_to_empty_document() {
    let current = snapshot("2.1", 200, vec![attachment_ref("a.png", "1.1", 150, b"a1")]);
    let fixture = Fixture {
        store: MemoryDocumentStore::new(current, Vec::new()),
        history: MemoryHistory::with(vec![attachment("a.png", "1.1", 150, b"a1")]),
        trash: MemoryTrash::default(),
        saver: RecordingSavePipeline::default(),
    };

    let outcome = fixture.service().rollback_to_at(&doc_id(), "1.1", ACTOR, NOW).unwrap();

    assert_eq!(outcome.report.trashed, vec!["a.png".to_string()]);
    let document = fixture.saver.last_saved();
    assert!(document.attachments.is_empty());
    assert!(document.content.is_empty());
    assert_eq!(fixture.trash.records().len(), 1);
    assert_eq!(fixture.trash.records()[0].deleter, ACTOR);
    assert_eq!(fixture.trash.records()[0].deleted_at, NOW);
}

#[test]
fn invalid_version_fails_before_any_side_effect() {
    let fixture = updated_and_deleted_fixture(MemoryTrash::default());

    let err = fixture
        .service()
        .rollback_to_at(&doc_id(), "one.two", ACTOR, NOW)
        .unwrap_err();

    assert!(matches!(err, RollbackError::InvalidVersion(_)));
    assert!(fixture.saver.saved().is_empty());
    assert_eq!(fixture.trash.calls(), 0);
}

#[test]
fn unknown_document_and_revision_are_reported() {
    let fixture = updated_and_deleted_fixture(MemoryTrash::default());
    let service = fixture.service();
    let other = DocumentId::new("xwiki", "Sandbox", "Missing");

    assert!(matches!(
        service.rollback_to_at(&other, "1.1", ACTOR, NOW),
        Err(RollbackError::DocumentNotFound(document)) if document == other
    ));
    assert!(matches!(
        service.rollback_to_at(&doc_id(), "7.1", ACTOR, NOW),
        Err(RollbackError::RevisionNotFound { version: missing, .. }) if missing == version("7.1")
    ));
    assert!(fixture.saver.saved().is_empty());
    assert_eq!(fixture.trash.calls(), 0);
}

#[test]
fn save_failure_is_returned_unchanged() {
    let mut fixture = updated_and_deleted_fixture(MemoryTrash::default());
    fixture.saver = RecordingSavePipeline::conflicting();
    let events = Rc::new(RefCell::new(Vec::new()));
    let mut service = fixture.service();
    service.add_listener(Box::new(EventRecorder(Rc::clone(&events))));

    let err = service.rollback_to_at(&doc_id(), "1.1", ACTOR, NOW).unwrap_err();

    assert!(matches!(
        err,
        RollbackError::Save(SaveError::ConcurrentModification { .. })
    ));
    assert_eq!(*events.borrow(), vec!["rolling_back:2.1:1.1".to_string()]);
}

#[test]
fn archive_failure_other_than_unavailable_is_fatal() {
    let current = snapshot("2.1", 200, vec![attachment_ref("a.png", "1.1", 150, b"a1")]);
    let fixture = Fixture {
        store: MemoryDocumentStore::new(current.clone(), vec![snapshot("1.1", 100, Vec::new()), current]),
        history: MemoryHistory::with(vec![attachment("a.png", "1.1", 150, b"a1")]),
        trash: MemoryTrash::failing(),
        saver: RecordingSavePipeline::default(),
    };

    let err = fixture
        .service()
        .rollback_to_at(&doc_id(), "1.1", ACTOR, NOW)
        .unwrap_err();

    assert!(matches!(err, RollbackError::Trash(TrashError::Repo(_))));
    assert_eq!(fixture.trash.calls(), 1);
    assert!(fixture.saver.saved().is_empty());
}

#[test]
fn listing_failure_other_than_unavailable_is_fatal() {
    let fixture = deleted_fixture(MemoryTrash::failing());

    let err = fixture
        .service()
        .rollback_to_at(&doc_id(), "1.1", ACTOR, NOW)
        .unwrap_err();

    assert!(matches!(err, RollbackError::Trash(TrashError::Repo(_))));
    assert_eq!(fixture.trash.calls(), 1);
    assert!(fixture.saver.saved().is_empty());
}

#[test]
fn history_failure_during_revert_is_fatal() {
    let fixture = updated_and_deleted_fixture(MemoryTrash::default());
    fixture.history.break_storage();

    let err = fixture
        .service()
        .rollback_to_at(&doc_id(), "1.1", ACTOR, NOW)
        .unwrap_err();

    assert!(matches!(err, RollbackError::Store(_)));
    assert!(fixture.saver.saved().is_empty());
}

#[test]
fn listeners_see_assembled_then_saved_document() {
    let fixture = updated_and_deleted_fixture(MemoryTrash::default());
    let events = Rc::new(RefCell::new(Vec::new()));
    let mut service = fixture.service();
    service.add_listener(Box::new(EventRecorder(Rc::clone(&events))));

    service.rollback_to_at(&doc_id(), "1.1", ACTOR, NOW).unwrap();

    assert_eq!(
        *events.borrow(),
        vec![
            "rolling_back:2.1:1.1".to_string(),
            "rolled_back:3.1:1.1".to_string()
        ]
    );
}

#[test]
fn configured_comment_prefix_is_used() {
    let fixture = updated_and_deleted_fixture(MemoryTrash::default());
    let config = RollbackConfig::from_toml_str(
        "# rollback settings\ncomment_prefix = \"Restored revision\"\n",
    )
    .unwrap();

    fixture
        .service()
        .with_config(config)
        .rollback_to_at(&doc_id(), "1.1", ACTOR, NOW)
        .unwrap();

    assert_eq!(fixture.saver.saved()[0].1, "Restored revision 1.1");
}

#[test]
fn deleted_attachments_and_revisions_are_listed() {
    let records = vec![
        trash_record("a.png", 100, attachment("a.png", "1.1", 50, b"a"), Vec::new()),
        trash_record("b.png", 300, attachment("b.png", "1.1", 50, b"b"), Vec::new()),
    ];
    let fixture = deleted_fixture(MemoryTrash::with_records(records));
    let service = fixture.service();

    let listed = service.deleted_attachments(&doc_id()).unwrap();
    let filenames: Vec<&str> = listed.iter().map(|r| r.filename.as_str()).collect();
    assert_eq!(filenames, vec!["b.png", "a.png"]);

    assert_eq!(
        service.revisions(&doc_id()).unwrap(),
        vec![version("1.1"), version("2.1")]
    );
}
