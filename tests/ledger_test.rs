mod common;

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use common::{Office, submit_vacation, test_service, used_days};
use leave_tracker::application::{AppError, LedgerOptions};
use leave_tracker::domain::{BalanceEffect, LeaveStatus, TransitionPolicy};
use leave_tracker::storage::{LedgerOutcome, Repository};
use tokio::task::JoinSet;

#[tokio::test]
async fn test_approving_consumes_balance() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let office = Office::create_with_allowances(&service).await?;
    let leave = submit_vacation(&service, &office.alice, 5).await?;

    let result = service.approve_leave(&office.admin(), leave.id).await?;

    assert_eq!(result.old_status, LeaveStatus::Pending);
    assert_eq!(result.leave.status, LeaveStatus::Approved);
    assert_eq!(result.balance.as_ref().map(|b| b.used_days), Some(5));
    assert_eq!(used_days(&service, &office.admin(), "alice").await?, 5);

    let stored = service.get_leave(&office.admin(), leave.id).await?;
    assert_eq!(stored.status, LeaveStatus::Approved);

    Ok(())
}

#[tokio::test]
async fn test_cancelling_approved_leave_restores_balance() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let office = Office::create_with_allowances(&service).await?;
    service.set_allowance("alice", 2024, 20).await?;
    let leave = submit_vacation(&service, &office.alice, 7).await?;

    service.approve_leave(&office.admin(), leave.id).await?;
    assert_eq!(used_days(&service, &office.admin(), "alice").await?, 7);

    let result = service.cancel_leave(&office.admin(), leave.id).await?;
    assert_eq!(result.leave.status, LeaveStatus::Cancelled);
    assert_eq!(used_days(&service, &office.admin(), "alice").await?, 0);

    Ok(())
}

#[tokio::test]
async fn test_approve_cancel_approve_scenario() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let office = Office::create_with_allowances(&service).await?;
    let admin = office.admin();
    let leave = submit_vacation(&service, &office.alice, 5).await?;

    service.approve_leave(&admin, leave.id).await?;
    assert_eq!(used_days(&service, &admin, "alice").await?, 5);

    service.cancel_leave(&admin, leave.id).await?;
    assert_eq!(used_days(&service, &admin, "alice").await?, 0);

    service.approve_leave(&admin, leave.id).await?;
    assert_eq!(used_days(&service, &admin, "alice").await?, 5);

    let balance = service.get_balance(&admin, "alice", 2024).await?.balance;
    assert_eq!(balance.days, 20);
    assert_eq!(balance.remaining(), 15);

    Ok(())
}

#[tokio::test]
async fn test_rejecting_never_touches_balance() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let office = Office::create_with_allowances(&service).await?;
    let leave = submit_vacation(&service, &office.alice, 5).await?;

    let result = service.reject_leave(&office.admin(), leave.id).await?;

    assert_eq!(result.leave.status, LeaveStatus::Rejected);
    assert!(result.balance.is_none());
    assert_eq!(used_days(&service, &office.admin(), "alice").await?, 0);

    Ok(())
}

#[tokio::test]
async fn test_cancelling_pending_leave_does_not_restore_days() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let office = Office::create_with_allowances(&service).await?;
    let approved = submit_vacation(&service, &office.alice, 3).await?;
    let pending = submit_vacation(&service, &office.alice, 4).await?;

    service.approve_leave(&office.admin(), approved.id).await?;
    service.cancel_leave(&office.admin(), pending.id).await?;

    assert_eq!(used_days(&service, &office.admin(), "alice").await?, 3);

    Ok(())
}

#[tokio::test]
async fn test_reapproving_is_a_noop() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let office = Office::create_with_allowances(&service).await?;
    let leave = submit_vacation(&service, &office.alice, 5).await?;

    service.approve_leave(&office.admin(), leave.id).await?;
    let again = service.approve_leave(&office.admin(), leave.id).await?;

    assert_eq!(again.old_status, LeaveStatus::Approved);
    assert!(again.balance.is_none());
    assert_eq!(used_days(&service, &office.admin(), "alice").await?, 5);

    Ok(())
}

#[tokio::test]
async fn test_missing_balance_aborts_transition() -> Result<()> {
    let (service, _temp) = test_service().await?;
    // No allowances set
    let office = Office::create(&service).await?;
    let leave = submit_vacation(&service, &office.alice, 5).await?;

    let result = service.approve_leave(&office.admin(), leave.id).await;

    match result {
        Err(AppError::BalanceRecordNotFound { username, year }) => {
            assert_eq!(username, "alice");
            assert_eq!(year, 2024);
        }
        other => panic!("expected BalanceRecordNotFound, got {:?}", other.err()),
    }

    // Status must be untouched, and no balance record invented
    let stored = service.get_leave(&office.admin(), leave.id).await?;
    assert_eq!(stored.status, LeaveStatus::Pending);
    assert!(matches!(
        service.get_balance(&office.admin(), "alice", 2024).await,
        Err(AppError::BalanceRecordNotFound { .. })
    ));

    Ok(())
}

#[tokio::test]
async fn test_rejection_without_balance_succeeds() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let office = Office::create(&service).await?;
    let leave = submit_vacation(&service, &office.bob, 1).await?;

    let result = service.reject_leave(&office.admin(), leave.id).await?;
    assert_eq!(result.leave.status, LeaveStatus::Rejected);

    Ok(())
}

#[tokio::test]
async fn test_over_approval_is_allowed_by_default() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let office = Office::create(&service).await?;
    service.set_allowance("alice", 2024, 4).await?;
    let leave = submit_vacation(&service, &office.alice, 6).await?;

    let result = service.approve_leave(&office.admin(), leave.id).await?;

    let balance = result.balance.expect("balance was touched");
    assert_eq!(balance.used_days, 6);
    assert!(balance.is_overdrawn());

    Ok(())
}

#[tokio::test]
async fn test_enforced_allowance_rejects_over_approval() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let service = service.with_options(LedgerOptions {
        policy: TransitionPolicy::Permissive,
        enforce_allowance: true,
    });
    let office = Office::create(&service).await?;
    service.set_allowance("alice", 2024, 10).await?;

    let first = submit_vacation(&service, &office.alice, 8).await?;
    let second = submit_vacation(&service, &office.alice, 3).await?;
    service.approve_leave(&office.admin(), first.id).await?;

    let result = service.approve_leave(&office.admin(), second.id).await;
    match result {
        Err(AppError::InsufficientBalance {
            remaining,
            requested,
            ..
        }) => {
            assert_eq!(remaining, 2);
            assert_eq!(requested, 3);
        }
        other => panic!("expected InsufficientBalance, got {:?}", other.err()),
    }

    assert_eq!(used_days(&service, &office.admin(), "alice").await?, 8);
    let stored = service.get_leave(&office.admin(), second.id).await?;
    assert_eq!(stored.status, LeaveStatus::Pending);

    Ok(())
}

#[tokio::test]
async fn test_reopening_approved_leave_does_not_count_twice() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let office = Office::create_with_allowances(&service).await?;
    let admin = office.admin();
    let leave = submit_vacation(&service, &office.alice, 5).await?;
    service.approve_leave(&admin, leave.id).await?;

    let result = service
        .change_status(&admin, leave.id, LeaveStatus::Pending)
        .await?;
    assert_eq!(result.leave.status, LeaveStatus::Pending);
    assert_eq!(result.balance.as_ref().map(|b| b.used_days), Some(0));

    service.approve_leave(&admin, leave.id).await?;
    assert_eq!(used_days(&service, &admin, "alice").await?, 5);

    service.cancel_leave(&admin, leave.id).await?;
    assert_eq!(used_days(&service, &admin, "alice").await?, 0);

    Ok(())
}

#[tokio::test]
async fn test_strict_policy_rejects_leaving_approved_other_than_cancel() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let service = service.with_options(LedgerOptions {
        policy: TransitionPolicy::Strict,
        enforce_allowance: false,
    });
    let office = Office::create_with_allowances(&service).await?;
    let leave = submit_vacation(&service, &office.alice, 5).await?;
    service.approve_leave(&office.admin(), leave.id).await?;

    let result = service.reject_leave(&office.admin(), leave.id).await;
    assert!(matches!(
        result,
        Err(AppError::InvalidTransition {
            from: LeaveStatus::Approved,
            to: LeaveStatus::Rejected
        })
    ));
    assert_eq!(used_days(&service, &office.admin(), "alice").await?, 5);

    service.cancel_leave(&office.admin(), leave.id).await?;
    assert_eq!(used_days(&service, &office.admin(), "alice").await?, 0);

    Ok(())
}

#[tokio::test]
async fn test_employee_cannot_change_status() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let office = Office::create_with_allowances(&service).await?;
    let leave = submit_vacation(&service, &office.alice, 5).await?;

    let result = service.approve_leave(&office.alice.actor(), leave.id).await;
    assert!(matches!(result, Err(AppError::Forbidden(_))));
    assert_eq!(used_days(&service, &office.admin(), "alice").await?, 0);

    Ok(())
}

#[tokio::test]
async fn test_unknown_leave_is_reported() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let office = Office::create(&service).await?;

    let result = service
        .approve_leave(&office.admin(), uuid::Uuid::new_v4())
        .await;
    assert!(matches!(result, Err(AppError::LeaveNotFound(_))));

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_approvals_do_not_lose_updates() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let office = Office::create(&service).await?;
    service.set_allowance("alice", 2024, 100).await?;

    let mut ids = Vec::new();
    let mut expected = 0;
    for days in 1..=8 {
        ids.push(submit_vacation(&service, &office.alice, days).await?.id);
        expected += days;
    }

    let service = Arc::new(service);
    let admin = office.admin();
    let mut tasks = JoinSet::new();
    for id in ids {
        let service = Arc::clone(&service);
        tasks.spawn(async move { service.approve_leave(&admin, id).await });
    }
    while let Some(joined) = tasks.join_next().await {
        joined??;
    }

    assert_eq!(used_days(&service, &admin, "alice").await?, expected);

    Ok(())
}

#[tokio::test]
async fn test_two_concurrent_approvals_for_same_balance() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let office = Office::create_with_allowances(&service).await?;
    let admin = office.admin();
    let first = submit_vacation(&service, &office.bob, 3).await?;
    let second = submit_vacation(&service, &office.bob, 4).await?;

    let (a, b) = tokio::join!(
        service.approve_leave(&admin, first.id),
        service.approve_leave(&admin, second.id)
    );
    a?;
    b?;

    assert_eq!(used_days(&service, &admin, "bob").await?, 7);

    Ok(())
}

#[tokio::test]
async fn test_deleting_approved_leave_releases_days() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let office = Office::create_with_allowances(&service).await?;
    let approved = submit_vacation(&service, &office.alice, 5).await?;
    let pending = submit_vacation(&service, &office.alice, 2).await?;
    service.approve_leave(&office.admin(), approved.id).await?;

    service.delete_leave(&office.admin(), approved.id).await?;
    service.delete_leave(&office.admin(), pending.id).await?;

    assert_eq!(used_days(&service, &office.admin(), "alice").await?, 0);
    assert!(matches!(
        service.get_leave(&office.admin(), approved.id).await,
        Err(AppError::LeaveNotFound(_))
    ));

    Ok(())
}

#[tokio::test]
async fn test_employee_cannot_delete_leave() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let office = Office::create_with_allowances(&service).await?;
    let leave = submit_vacation(&service, &office.alice, 5).await?;

    let result = service.delete_leave(&office.alice.actor(), leave.id).await;
    assert!(matches!(result, Err(AppError::Forbidden(_))));
    assert!(service.get_leave(&office.admin(), leave.id).await.is_ok());

    Ok(())
}

#[tokio::test]
async fn test_racing_approvals_of_one_leave_count_once() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let office = Office::create_with_allowances(&service).await?;
    let admin = office.admin();
    let leave = submit_vacation(&service, &office.alice, 5).await?;

    let (a, b) = tokio::join!(
        service.approve_leave(&admin, leave.id),
        service.approve_leave(&admin, leave.id)
    );

    // The loser either sees the change already committed or trips the
    // status check
    assert!(a.is_ok() || b.is_ok());
    for result in [a, b] {
        if let Err(err) = result {
            assert!(matches!(err, AppError::ConcurrentModification(_)), "{err}");
        }
    }
    assert_eq!(used_days(&service, &admin, "alice").await?, 5);

    Ok(())
}

#[tokio::test]
async fn test_stale_leave_is_not_transitioned() -> Result<()> {
    let (service, temp) = test_service().await?;
    let office = Office::create_with_allowances(&service).await?;
    let admin = office.admin();
    let leave = submit_vacation(&service, &office.alice, 5).await?;

    let stale = service.get_leave(&admin, leave.id).await?;
    service.approve_leave(&admin, leave.id).await?;

    let db_path = temp.path().join("test.db");
    let repo = Repository::connect(&format!("sqlite:{}", db_path.display())).await?;
    let outcome = repo
        .apply_transition(
            &stale,
            LeaveStatus::Approved,
            BalanceEffect::Consume(stale.days),
            Utc::now(),
            false,
        )
        .await?;

    assert!(matches!(outcome, LedgerOutcome::StatusChanged));
    assert_eq!(used_days(&service, &admin, "alice").await?, 5);

    Ok(())
}

#[tokio::test]
async fn test_cancelling_without_balance_keeps_leave_approved() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let office = Office::create_with_allowances(&service).await?;
    let admin = office.admin();
    let leave = submit_vacation(&service, &office.alice, 5).await?;
    service.approve_leave(&admin, leave.id).await?;
    service.remove_allowance("alice", 2024).await?;

    let result = service.cancel_leave(&admin, leave.id).await;
    assert!(matches!(
        result,
        Err(AppError::BalanceRecordNotFound { ref username, year: 2024 }) if username == "alice"
    ));

    let stored = service.get_leave(&admin, leave.id).await?;
    assert_eq!(stored.status, LeaveStatus::Approved);

    Ok(())
}

#[tokio::test]
async fn test_deleting_without_balance_keeps_leave() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let office = Office::create_with_allowances(&service).await?;
    let admin = office.admin();
    let leave = submit_vacation(&service, &office.alice, 5).await?;
    service.approve_leave(&admin, leave.id).await?;
    service.remove_allowance("alice", 2024).await?;

    let result = service.delete_leave(&admin, leave.id).await;
    assert!(matches!(result, Err(AppError::BalanceRecordNotFound { .. })));

    let stored = service.get_leave(&admin, leave.id).await?;
    assert_eq!(stored.status, LeaveStatus::Approved);

    Ok(())
}

#[tokio::test]
async fn test_oversized_days_never_reach_the_ledger() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let office = Office::create(&service).await?;

    assert!(matches!(
        service.set_allowance("alice", 2024, i64::MAX).await,
        Err(AppError::InvalidAllowance(_))
    ));
    service.set_allowance("alice", 2024, 366).await?;

    let result = submit_vacation(&service, &office.alice, i64::MAX).await;
    let err = result.expect_err("oversized request must be refused");
    assert!(matches!(
        err.downcast_ref::<AppError>(),
        Some(AppError::InvalidLeave(_))
    ));

    let year = submit_vacation(&service, &office.alice, 366).await?;
    service.approve_leave(&office.admin(), year.id).await?;
    assert_eq!(used_days(&service, &office.admin(), "alice").await?, 366);

    Ok(())
}
