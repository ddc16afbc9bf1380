use std::sync::{Arc, Barrier};
use std::thread;

use chrono::Duration;

use super::common::*;
use crate::workflows::royalty::domain::RoyaltyStatus;
use crate::workflows::royalty::workflow::ApprovalAction;
use crate::workflows::royalty::{Permission, RoyaltyError};

#[test]
fn approvals_advance_in_order_and_each_leaves_one_history_row() {
    let (harness, _) = harness_with(news_draft("400000"));
    let record = calculated(&harness, "a-300", "writer-1");

    harness.clock.advance(Duration::minutes(5));
    harness
        .service
        .editor_confirm(&editor(), record.id)
        .expect("editor confirms");
    harness.clock.advance(Duration::minutes(5));
    harness
        .service
        .manager_approve(&manager(), record.id)
        .expect("manager approves");
    harness.clock.advance(Duration::minutes(5));
    let approved = harness
        .service
        .finance_approve(&finance(), record.id)
        .expect("finance approves");
    harness.clock.advance(Duration::minutes(5));
    let paid = harness
        .service
        .mark_paid(&payer(), record.id, " TX-2026-001 ", at(2026, 3, 1, 17))
        .expect("payer marks paid");

    assert_eq!(approved.status, RoyaltyStatus::FinanceApproved);
    assert_eq!(paid.status, RoyaltyStatus::Paid);
    assert_eq!(paid.payment_ref.as_deref(), Some("TX-2026-001"));
    assert_eq!(paid.paid_at, Some(at(2026, 3, 1, 17)));
    assert_eq!(paid.updated_at, at(2026, 3, 2, 9) + Duration::minutes(20));
    assert_eq!(paid.revision, 5);

    let history = harness.service.history(record.id).expect("history loads");
    let actions: Vec<ApprovalAction> = history.iter().map(|row| row.action_type).collect();
    assert_eq!(
        actions,
        vec![
            ApprovalAction::Calculate,
            ApprovalAction::EditorConfirm,
            ApprovalAction::ManagerApprove,
            ApprovalAction::FinanceApprove,
            ApprovalAction::MarkPaid,
        ]
    );
    for pair in history.windows(2) {
        assert_eq!(pair[0].new_status, pair[1].old_status);
        assert!(pair[0].sequence < pair[1].sequence);
    }
    assert_eq!(history[0].old_status, None);
    assert_eq!(history[1].actor_user_id, "editor");
    assert_eq!(history[4].new_status, Some(RoyaltyStatus::Paid));
}

#[test]
fn approvals_cannot_be_skipped() {
    let (harness, _) = harness_with(news_draft("400000"));
    let record = calculated(&harness, "a-301", "writer-1");

    let err = harness
        .service
        .finance_approve(&admin(), record.id)
        .expect_err("manager approval missing");

    match err {
        RoyaltyError::InvalidStateTransition { status, action, .. } => {
            assert_eq!(status, RoyaltyStatus::Calculated);
            assert_eq!(action, ApprovalAction::FinanceApprove);
        }
        other => panic!("expected invalid transition, got {other:?}"),
    }
}

#[test]
fn status_conflict_is_reported_before_permission() {
    let (harness, _) = harness_with(news_draft("400000"));
    let record = calculated(&harness, "a-302", "writer-1");

    let err = harness
        .service
        .manager_approve(&reader(), record.id)
        .expect_err("wrong status");
    assert!(matches!(err, RoyaltyError::InvalidStateTransition { .. }));

    let err = harness
        .service
        .editor_confirm(&manager(), record.id)
        .expect_err("manager lacks editor permission");
    match err {
        RoyaltyError::PermissionDenied { permission } => {
            assert_eq!(permission, Permission::EditorConfirm)
        }
        other => panic!("expected permission denial, got {other:?}"),
    }
}

#[test]
fn reject_without_reason_changes_nothing() {
    let (harness, _) = harness_with(news_draft("400000"));
    let record = calculated(&harness, "a-303", "writer-1");

    let err = harness
        .service
        .reject(&editor(), record.id, "   ")
        .expect_err("reason required");

    assert!(matches!(
        err,
        RoyaltyError::MissingReason {
            action: ApprovalAction::Reject
        }
    ));
    let stored = harness.service.record(record.id).expect("record loads");
    assert_eq!(stored.status, RoyaltyStatus::Calculated);
    assert_eq!(stored.revision, 1);
    assert_eq!(harness.service.history(record.id).expect("history").len(), 1);
}

#[test]
fn rejected_records_are_terminal() {
    let (harness, _) = harness_with(news_draft("400000"));
    let record = calculated(&harness, "a-304", "writer-1");

    let rejected = harness
        .service
        .reject(&editor(), record.id, "wrong author attached")
        .expect("reject succeeds");
    assert_eq!(rejected.status, RoyaltyStatus::Rejected);

    let history = harness.service.history(record.id).expect("history");
    assert_eq!(
        history.last().and_then(|row| row.reason_note.as_deref()),
        Some("wrong author attached")
    );

    for attempt in [
        harness.service.editor_confirm(&admin(), record.id),
        harness.service.void(&admin(), record.id, "cleanup"),
        harness.service.reject(&admin(), record.id, "again"),
    ] {
        assert!(matches!(
            attempt,
            Err(RoyaltyError::InvalidStateTransition { .. })
        ));
    }
}

#[test]
fn void_needs_its_own_permission() {
    let (harness, _) = harness_with(news_draft("400000"));
    let record = calculated(&harness, "a-305", "writer-1");

    let err = harness
        .service
        .void(&editor(), record.id, "duplicate")
        .expect_err("editor cannot void");
    assert!(matches!(
        err,
        RoyaltyError::PermissionDenied {
            permission: Permission::Void
        }
    ));

    let voider = actor("ops", &["royalties:void"]);
    let voided = harness
        .service
        .void(&voider, record.id, "duplicate")
        .expect("void succeeds");
    assert_eq!(voided.status, RoyaltyStatus::Voided);
}

#[test]
fn mark_paid_requires_a_payment_reference() {
    let (harness, _) = harness_with(news_draft("400000"));
    let record = finance_approved(&harness, "a-306", "writer-1");

    let err = harness
        .service
        .mark_paid(&payer(), record.id, "", at(2026, 3, 1, 17))
        .expect_err("blank reference");

    assert!(matches!(err, RoyaltyError::MissingPaymentReference));
    assert_eq!(
        harness.service.record(record.id).expect("record").status,
        RoyaltyStatus::FinanceApproved
    );
}

#[test]
fn unknown_record_is_not_found() {
    let harness = harness();
    let missing = crate::workflows::royalty::RoyaltyRecordId::generate();

    assert!(matches!(
        harness.service.editor_confirm(&admin(), missing),
        Err(RoyaltyError::RecordNotFound(id)) if id == missing
    ));
    assert!(matches!(
        harness.service.history(missing),
        Err(RoyaltyError::RecordNotFound(_))
    ));
}

#[test]
fn concurrent_confirmations_have_one_winner() {
    let (harness, _) = harness_with(news_draft("400000"));
    let record = calculated(&harness, "a-307", "writer-1");
    let barrier = Arc::new(Barrier::new(4));

    let outcomes: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let service = harness.service.clone();
                let barrier = barrier.clone();
                scope.spawn(move || {
                    barrier.wait();
                    service.editor_confirm(&editor(), record.id)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("thread completes"))
            .collect()
    });

    let winners = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
    assert_eq!(winners, 1);
    assert!(outcomes.iter().filter_map(|outcome| outcome.as_ref().err()).all(
        |err| matches!(err, RoyaltyError::InvalidStateTransition { status, .. } if *status == RoyaltyStatus::EditorConfirmed)
    ));
    assert_eq!(harness.service.history(record.id).expect("history").len(), 2);
}

#[test]
fn listing_filters_and_pages() {
    let (harness, _) = harness_with(news_draft("400000"));
    for (index, author_id) in ["writer-1", "writer-2", "writer-1"].iter().enumerate() {
        calculated(&harness, &format!("a-31{index}"), author_id);
    }
    let march = {
        let mut entry = published("a-320", "writer-1");
        entry.article.published_at = at(2026, 3, 1, 8);
        harness
            .service
            .record_published(&admin(), entry)
            .expect("march record")
    };

    let query = crate::workflows::royalty::RecordQuery {
        filter: crate::workflows::royalty::RecordFilter {
            month: Some("2026-02".parse().expect("month")),
            status: Some(RoyaltyStatus::Calculated),
            author_id: Some(crate::workflows::royalty::AuthorId("writer-1".to_string())),
        },
        page: Some(0),
        size: Some(1),
    };
    let page = harness.service.list_records(query).expect("page loads");
    assert_eq!(page.total, 2);
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.size, 1);

    let all = harness
        .service
        .list_records(crate::workflows::royalty::RecordQuery {
            size: Some(10_000),
            ..Default::default()
        })
        .expect("all records");
    assert_eq!(all.size, 200);
    assert_eq!(all.total, 4);
    assert_eq!(all.items.last().map(|record| record.id), Some(march.id));
}
