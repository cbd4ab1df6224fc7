use std::sync::Arc;

use chrono::{TimeZone, Utc};

use super::common::*;

use crate::workflows::admissions::{
    AdmissionChanges, AdmissionStatus, AdmissionsDesk, DocumentKind, DocumentUpload, EventBus,
    FixedClock, IdentifierKind, InMemoryDocumentStore, InMemoryLedger, LedgerContext,
    LedgerError, LedgerRepository, Priority, RepositoryError, Sequencer,
};

#[test]
fn create_mints_sequential_numbers_and_stores_documents() {
    let harness = harness();
    let (student, course) = seed(&harness);
    let second = harness
        .desk
        .catalog
        .register_student(student_request("stu-2"))
        .expect("second student");

    let first = harness
        .desk
        .admissions
        .create(&counsellor(), admission_request(&student, &course))
        .expect("first admission");
    let next = harness
        .desk
        .admissions
        .create(&counsellor(), admission_request(&second, &course))
        .expect("second admission");

    assert_eq!(first.admission_no.as_str(), "ADM20250001");
    assert_eq!(next.admission_no.as_str(), "ADM20250002");
    assert_eq!(first.status, AdmissionStatus::Pending);
    assert_eq!(first.counsellor.name, "Asha Counsellor");
    assert_eq!(first.submitted_by, counsellor().id);
    assert_eq!(first.documents.len(), 1);
    assert!(first.documents[0]
        .url
        .starts_with("memory://admissions/identity/"));
    assert_eq!(harness.documents.urls().len(), 2);
    assert_eq!(harness.events.count("admission_created"), 2);
}

#[test]
fn second_active_admission_for_the_same_pair_conflicts() {
    let harness = harness();
    let (student, course) = seed(&harness);
    let first = harness
        .desk
        .admissions
        .create(&counsellor(), admission_request(&student, &course))
        .expect("first admission");

    let err = harness
        .desk
        .admissions
        .create(&other_counsellor(), admission_request(&student, &course))
        .unwrap_err();
    match err {
        LedgerError::Conflict(reason) => assert!(reason.contains(first.admission_no.as_str())),
        other => panic!("expected conflict, got {other:?}"),
    }
    assert_eq!(harness.documents.urls().len(), 1);
}

#[test]
fn rejected_admission_frees_the_pair_for_a_new_attempt() {
    let harness = harness();
    let (student, course) = seed(&harness);
    let first = harness
        .desk
        .admissions
        .create(&counsellor(), admission_request(&student, &course))
        .expect("first admission");
    harness
        .desk
        .admissions
        .transition_status(&approver(), &first.admission_no, "rejected", None)
        .expect("rejected");

    let retry = harness
        .desk
        .admissions
        .create(&counsellor(), admission_request(&student, &course))
        .expect("new attempt allowed");
    assert_eq!(retry.admission_no.as_str(), "ADM20250002");
}

#[test]
fn identifier_sequence_restarts_each_year() {
    let ledger = Arc::new(InMemoryLedger::new());
    let documents = Arc::new(InMemoryDocumentStore::new());
    let desk_on = |year: i32| {
        let clock = FixedClock(Utc.with_ymd_and_hms(year, 12, 31, 9, 0, 0).unwrap());
        let ctx = LedgerContext::new(ledger.clone(), documents.clone(), EventBus::new())
            .with_clock(Arc::new(clock))
            .with_sequencer(Sequencer::new(5));
        AdmissionsDesk::new(ctx)
    };
    let december = desk_on(2025);
    let january = desk_on(2026);

    let student = december
        .catalog
        .register_student(student_request("stu-1"))
        .expect("student registered");
    let course = december
        .catalog
        .register_course(course_request("course-1"))
        .expect("course registered");
    let first = december
        .admissions
        .create(&counsellor(), admission_request(&student, &course))
        .expect("created in 2025");
    december
        .admissions
        .transition_status(&approver(), &first.admission_no, "rejected", None)
        .expect("rejected");

    let next = january
        .admissions
        .create(&counsellor(), admission_request(&student, &course))
        .expect("created in 2026");

    assert_eq!(first.admission_no.as_str(), "ADM20250001");
    assert_eq!(next.admission_no.as_str(), "ADM20260001");
}

#[test]
fn inactive_course_and_missing_student_are_refused() {
    let harness = harness();
    let (student, _) = seed(&harness);
    let mut closed = course_request("course-closed");
    closed.active = false;
    let closed = harness
        .desk
        .catalog
        .register_course(closed)
        .expect("course registered");

    let err = harness
        .desk
        .admissions
        .create(&counsellor(), admission_request(&student, &closed))
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)), "{err:?}");

    let mut ghost = admission_request(&student, &closed);
    ghost.student = crate::workflows::admissions::StudentId("stu-missing".to_string());
    let err = harness
        .desk
        .admissions
        .create(&counsellor(), ghost)
        .unwrap_err();
    assert!(matches!(err, LedgerError::NotFound { entity: "student", .. }));
}

#[test]
fn identifier_collisions_are_retried_transparently() {
    let harness = harness_with(CollidingLedger::new(2));
    let (student, course) = seed(&harness);

    let admission = harness
        .desk
        .admissions
        .create(&counsellor(), admission_request(&student, &course))
        .expect("created after retries");
    assert_eq!(admission.admission_no.as_str(), "ADM20250001");
}

#[test]
fn exhausted_retries_surface_try_again_and_clean_up_documents() {
    let harness = harness_with(CollidingLedger::new(50));
    let (student, course) = seed(&harness);

    let err = harness
        .desk
        .admissions
        .create(&counsellor(), admission_request(&student, &course))
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::RetryExhausted {
            kind: IdentifierKind::Admission
        }
    ));
    assert_eq!(err.kind(), "try_again");
    assert!(harness.documents.urls().is_empty());
    assert!(harness
        .ledger
        .active_admission(&student.id, &course.id)
        .expect("query")
        .is_none());
}

#[test]
fn approval_sends_one_confirmation_and_later_edits_do_not_resend() {
    let harness = harness();
    let admission = approved_admission(&harness);

    let sent = harness.mailer.sent();
    assert_eq!(sent.len(), 1);
    let email = &sent[0];
    assert_eq!(email.to, "kiran@example.com");
    assert!(email.bcc_submission_copy);
    assert!(email.subject.contains(admission.admission_no.as_str()));
    for expected in [
        "Kiran Patel",
        "Full Stack Development",
        "Pune Central",
        "Morning Batch A",
        "Asha Counsellor",
        "Skyline Institute",
    ] {
        assert!(email.html_body.contains(expected), "missing {expected}");
    }

    harness
        .desk
        .admissions
        .update(
            &approver(),
            &admission.admission_no,
            AdmissionChanges {
                priority: Some(Priority::High),
                notes: Some("called the parent".to_string()),
                ..AdmissionChanges::default()
            },
        )
        .expect("update approved admission");

    assert_eq!(harness.mailer.sent().len(), 1);
    assert_eq!(harness.events.count("admission_approved"), 1);
}

#[test]
fn mail_failure_does_not_undo_the_approval() {
    let harness = harness();
    harness.mailer.fail();
    let admission = approved_admission(&harness);

    assert_eq!(admission.status, AdmissionStatus::Approved);
    let stored = harness
        .desk
        .admissions
        .get(&admission.admission_no)
        .expect("stored");
    assert_eq!(stored.status, AdmissionStatus::Approved);
    assert_eq!(harness.events.count("admission_approved"), 1);
}

#[test]
fn terminal_states_refuse_further_transitions() {
    let harness = harness();
    let admission = approved_admission(&harness);

    for target in ["rejected", "pending", "waiting_list"] {
        let err = harness
            .desk
            .admissions
            .transition_status(&admin(), &admission.admission_no, target, None)
            .unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)), "{target}: {err:?}");
    }
    let err = harness
        .desk
        .admissions
        .transition_status(&admin(), &admission.admission_no, "approved", None)
        .unwrap_err();
    assert!(err.to_string().contains("already approved"));
    assert_eq!(harness.mailer.sent().len(), 1);
}

#[test]
fn waiting_list_is_terminal_and_aliases_parse() {
    let harness = harness();
    let (student, course) = seed(&harness);
    let admission = harness
        .desk
        .admissions
        .create(&counsellor(), admission_request(&student, &course))
        .expect("created");

    let waiting = harness
        .desk
        .admissions
        .transition_status(
            &counsellor(),
            &admission.admission_no,
            "Waiting-List",
            Some("batch full".to_string()),
        )
        .expect("submitter may waitlist");
    assert_eq!(waiting.status, AdmissionStatus::WaitingList);
    assert_eq!(waiting.status_notes.as_deref(), Some("batch full"));

    let err = harness
        .desk
        .admissions
        .transition_status(&approver(), &admission.admission_no, "approved", None)
        .unwrap_err();
    assert!(matches!(err, LedgerError::Conflict(_)));
    assert!(harness.mailer.sent().is_empty());
}

#[test]
fn unknown_status_is_a_validation_error() {
    let harness = harness();
    let (student, course) = seed(&harness);
    let admission = harness
        .desk
        .admissions
        .create(&counsellor(), admission_request(&student, &course))
        .expect("created");

    match harness
        .desk
        .admissions
        .transition_status(&approver(), &admission.admission_no, "enrolled", None)
    {
        Err(LedgerError::Validation(fields)) => assert_eq!(fields[0].field, "status"),
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn only_submitter_or_approver_may_touch_a_pending_admission() {
    let harness = harness();
    let (student, course) = seed(&harness);
    let admission = harness
        .desk
        .admissions
        .create(&counsellor(), admission_request(&student, &course))
        .expect("created");

    let err = harness
        .desk
        .admissions
        .transition(
            &other_counsellor(),
            &admission.admission_no,
            AdmissionStatus::Approved,
            None,
        )
        .unwrap_err();
    assert!(matches!(err, LedgerError::Forbidden(_)));

    let edited = harness
        .desk
        .admissions
        .update(
            &counsellor(),
            &admission.admission_no,
            AdmissionChanges {
                training_branch: Some("Pune West".to_string()),
                ..AdmissionChanges::default()
            },
        )
        .expect("submitter edits pending admission");
    assert_eq!(edited.training_branch, "Pune West");

    harness
        .desk
        .admissions
        .transition(
            &approver(),
            &admission.admission_no,
            AdmissionStatus::Approved,
            None,
        )
        .expect("approved");
    let err = harness
        .desk
        .admissions
        .update(
            &counsellor(),
            &admission.admission_no,
            AdmissionChanges {
                notes: Some("late edit".to_string()),
                ..AdmissionChanges::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, LedgerError::Forbidden(_)));
}

#[test]
fn blank_branch_edit_is_rejected() {
    let harness = harness();
    let (student, course) = seed(&harness);
    let admission = harness
        .desk
        .admissions
        .create(&counsellor(), admission_request(&student, &course))
        .expect("created");

    let err = harness
        .desk
        .admissions
        .update(
            &counsellor(),
            &admission.admission_no,
            AdmissionChanges {
                training_branch: Some("   ".to_string()),
                ..AdmissionChanges::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));
}

#[test]
fn attach_documents_appends_urls() {
    let harness = harness();
    let (student, course) = seed(&harness);
    let admission = harness
        .desk
        .admissions
        .create(&counsellor(), admission_request(&student, &course))
        .expect("created");

    let updated = harness
        .desk
        .admissions
        .attach_documents(
            &counsellor(),
            &admission.admission_no,
            vec![DocumentUpload {
                kind: DocumentKind::Photo,
                name: "photo.jpg".to_string(),
                content: vec![0xFF, 0xD8, 0xFF],
            }],
        )
        .expect("attached");
    assert_eq!(updated.documents.len(), 2);
    assert!(updated.documents[1]
        .url
        .starts_with("memory://admissions/photos/"));
}

#[test]
fn stale_snapshot_cannot_overwrite_attached_documents() {
    let harness = harness();
    let (student, course) = seed(&harness);
    let admission = harness
        .desk
        .admissions
        .create(&counsellor(), admission_request(&student, &course))
        .expect("created");
    let mut stale = harness
        .ledger
        .fetch_admission(&admission.admission_no)
        .expect("query")
        .expect("stored");

    let attached = harness
        .desk
        .admissions
        .attach_documents(
            &counsellor(),
            &admission.admission_no,
            vec![DocumentUpload {
                kind: DocumentKind::Photo,
                name: "photo.jpg".to_string(),
                content: vec![0xFF, 0xD8, 0xFF],
            }],
        )
        .expect("attached");
    assert!(attached.revision > stale.revision);

    stale.notes = Some("edited from an old form".to_string());
    let err = harness
        .ledger
        .update_admission(stale, AdmissionStatus::Pending)
        .unwrap_err();
    assert!(matches!(err, RepositoryError::StaleRevision));

    let stored = harness
        .desk
        .admissions
        .get(&admission.admission_no)
        .expect("stored");
    assert_eq!(stored.documents.len(), 2);
    assert_eq!(stored.revision, attached.revision);
    assert_eq!(harness.documents.urls().len(), 2);
}

#[test]
fn only_pending_admissions_can_be_deleted() {
    let harness = harness();
    let admission = approved_admission(&harness);

    let err = harness
        .desk
        .admissions
        .delete(&admin(), &admission.admission_no)
        .unwrap_err();
    assert!(matches!(err, LedgerError::Precondition(_)));
    assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
    assert_eq!(harness.documents.urls().len(), 1);
}

#[test]
fn deleting_a_pending_admission_removes_its_documents() {
    let harness = harness();
    let (student, course) = seed(&harness);
    let admission = harness
        .desk
        .admissions
        .create(&counsellor(), admission_request(&student, &course))
        .expect("created");

    harness
        .desk
        .admissions
        .delete(&counsellor(), &admission.admission_no)
        .expect("deleted");

    assert!(harness.documents.urls().is_empty());
    let err = harness
        .desk
        .admissions
        .get(&admission.admission_no)
        .unwrap_err();
    assert!(matches!(err, LedgerError::NotFound { .. }));
    assert_eq!(harness.events.count("admission_deleted"), 1);
}

#[test]
fn failed_delete_keeps_the_documents() {
    let harness = harness_with(CollidingLedger::new(0).approving_before_delete());
    let (student, course) = seed(&harness);
    let admission = harness
        .desk
        .admissions
        .create(&counsellor(), admission_request(&student, &course))
        .expect("created");

    let err = harness
        .desk
        .admissions
        .delete(&counsellor(), &admission.admission_no)
        .unwrap_err();
    assert!(matches!(err, LedgerError::Precondition(_)), "{err:?}");

    let stored = harness
        .ledger
        .fetch_admission(&admission.admission_no)
        .expect("query")
        .expect("still stored");
    assert_eq!(stored.status, AdmissionStatus::Approved);
    assert_eq!(harness.documents.urls(), vec![stored.documents[0].url.clone()]);
    assert_eq!(harness.events.count("admission_deleted"), 0);
}

#[test]
fn document_cleanup_failure_does_not_block_deletion() {
    let harness = harness();
    let (student, course) = seed(&harness);
    let admission = harness
        .desk
        .admissions
        .create(&counsellor(), admission_request(&student, &course))
        .expect("created");

    harness.documents.set_offline(true);
    harness
        .desk
        .admissions
        .delete(&approver(), &admission.admission_no)
        .expect("record removed even though documents could not be");
    assert!(harness
        .ledger
        .fetch_admission(&admission.admission_no)
        .expect("query")
        .is_none());
}

#[test]
fn document_store_outage_at_intake_is_a_server_error() {
    let harness = harness();
    let (student, course) = seed(&harness);
    harness.documents.set_offline(true);

    let err = harness
        .desk
        .admissions
        .create(&counsellor(), admission_request(&student, &course))
        .unwrap_err();
    assert!(matches!(err, LedgerError::Unavailable(_)));
    assert!(harness
        .ledger
        .active_admission(&student.id, &course.id)
        .expect("query")
        .is_none());
}

#[test]
fn datastore_outage_surfaces_as_unavailable() {
    let harness = harness();
    let (student, course) = seed(&harness);
    harness.ledger.set_offline(true);

    let err = harness
        .desk
        .admissions
        .create(&counsellor(), admission_request(&student, &course))
        .unwrap_err();
    assert!(matches!(err, LedgerError::Unavailable(_)));
    assert_eq!(
        err.status_code(),
        axum::http::StatusCode::INTERNAL_SERVER_ERROR
    );
}

#[test]
fn referenced_catalog_records_cannot_be_deleted() {
    let harness = harness();
    let admission = approved_admission(&harness);

    let err = harness
        .desk
        .catalog
        .delete_student(&admin(), &admission.student)
        .unwrap_err();
    assert!(matches!(err, LedgerError::Precondition(_)));
    let err = harness
        .desk
        .catalog
        .delete_course(&admin(), &admission.course)
        .unwrap_err();
    assert!(matches!(err, LedgerError::Precondition(_)));
    let err = harness
        .desk
        .catalog
        .delete_course(&counsellor(), &admission.course)
        .unwrap_err();
    assert!(matches!(err, LedgerError::Forbidden(_)));
}

#[test]
fn unreferenced_student_is_deleted_with_documents() {
    let harness = harness();
    let mut request = student_request("stu-9");
    request.documents.push(DocumentUpload {
        kind: DocumentKind::Qualification,
        name: "marksheet.pdf".to_string(),
        content: b"marks".to_vec(),
    });
    let student = harness
        .desk
        .catalog
        .register_student(request)
        .expect("registered");
    assert_eq!(student.document_urls.len(), 1);

    harness
        .desk
        .catalog
        .delete_student(&approver(), &student.id)
        .expect("deleted");
    assert!(harness.documents.urls().is_empty());
}
