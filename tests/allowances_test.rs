mod common;

use anyhow::Result;
use common::{Office, submit_vacation, test_service, used_days};
use leave_tracker::application::AppError;
use leave_tracker::domain::{User, UserRole};

#[tokio::test]
async fn test_set_allowance_creates_balance() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let office = Office::create(&service).await?;

    let balance = service.set_allowance("alice", 2024, 25).await?;

    assert_eq!(balance.user_id, office.alice.id);
    assert_eq!(balance.days, 25);
    assert_eq!(balance.used_days, 0);
    assert_eq!(balance.remaining(), 25);

    Ok(())
}

#[tokio::test]
async fn test_updating_allowance_keeps_used_days() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let office = Office::create_with_allowances(&service).await?;
    let leave = submit_vacation(&service, &office.alice, 6).await?;
    service.approve_leave(&office.admin(), leave.id).await?;

    let balance = service.set_allowance("alice", 2024, 30).await?;

    assert_eq!(balance.days, 30);
    assert_eq!(balance.used_days, 6);
    assert_eq!(used_days(&service, &office.admin(), "alice").await?, 6);

    // Still a single record for the pair
    let balances = service.list_balances(&office.admin()).await?;
    let alices: Vec<_> = balances
        .iter()
        .filter(|entry| entry.user.username == "alice")
        .collect();
    assert_eq!(alices.len(), 1);
    assert_eq!(alices[0].balance.days, 30);

    Ok(())
}

#[tokio::test]
async fn test_negative_allowance_is_rejected() -> Result<()> {
    let (service, _temp) = test_service().await?;
    Office::create(&service).await?;

    let result = service.set_allowance("alice", 2024, -1).await;
    assert!(matches!(result, Err(AppError::InvalidAllowance(_))));

    Ok(())
}

#[tokio::test]
async fn test_allowance_needs_known_user_and_year() -> Result<()> {
    let (service, _temp) = test_service().await?;
    Office::create(&service).await?;

    assert!(matches!(
        service.set_allowance("nobody", 2024, 10).await,
        Err(AppError::UserNotFound(_))
    ));
    assert!(matches!(
        service.set_allowance("alice", 2031, 10).await,
        Err(AppError::BusinessYearNotFound(_))
    ));

    Ok(())
}

#[tokio::test]
async fn test_duplicates_are_rejected() -> Result<()> {
    let (service, _temp) = test_service().await?;
    Office::create(&service).await?;

    assert!(matches!(
        service.create_business_year(2024).await,
        Err(AppError::BusinessYearAlreadyExists(2024))
    ));
    assert!(matches!(
        service.create_leave_type("Vacation".into()).await,
        Err(AppError::LeaveTypeAlreadyExists(_))
    ));
    assert!(matches!(
        service
            .create_user(User::new("alice".into(), UserRole::Admin))
            .await,
        Err(AppError::UserAlreadyExists(_))
    ));

    Ok(())
}

#[tokio::test]
async fn test_years_and_types_are_listed_in_order() -> Result<()> {
    let (service, _temp) = test_service().await?;
    Office::create(&service).await?;
    service.create_business_year(2023).await?;

    let years: Vec<i32> = service
        .list_business_years()
        .await?
        .into_iter()
        .map(|y| y.year)
        .collect();
    assert_eq!(years, vec![2023, 2024]);

    let types: Vec<String> = service
        .list_leave_types()
        .await?
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(types, vec!["Sick".to_string(), "Vacation".to_string()]);

    Ok(())
}

#[tokio::test]
async fn test_balance_visibility_follows_role() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let office = Office::create_with_allowances(&service).await?;

    let all = service.list_balances(&office.admin()).await?;
    assert_eq!(all.len(), 2);

    let own = service.list_balances(&office.alice.actor()).await?;
    assert_eq!(own.len(), 1);
    assert_eq!(own[0].user.username, "alice");
    assert_eq!(own[0].year.year, 2024);

    let result = service
        .get_balance(&office.alice.actor(), "bob", 2024)
        .await;
    assert!(matches!(result, Err(AppError::Forbidden(_))));

    let guest = service
        .create_user(User::new("guest".into(), UserRole::None))
        .await?;
    assert!(service.list_balances(&guest.actor()).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_balances_listed_newest_year_first() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let office = Office::create(&service).await?;
    service.create_business_year(2025).await?;
    service.set_allowance("alice", 2024, 20).await?;
    service.set_allowance("alice", 2025, 22).await?;

    let years: Vec<i32> = service
        .list_balances(&office.alice.actor())
        .await?
        .into_iter()
        .map(|entry| entry.year.year)
        .collect();
    assert_eq!(years, vec![2025, 2024]);

    Ok(())
}

#[tokio::test]
async fn test_allowance_is_capped_at_a_year() -> Result<()> {
    let (service, _temp) = test_service().await?;
    Office::create(&service).await?;

    assert!(matches!(
        service.set_allowance("alice", 2024, 367).await,
        Err(AppError::InvalidAllowance(_))
    ));
    assert_eq!(service.set_allowance("alice", 2024, 366).await?.days, 366);

    Ok(())
}

#[tokio::test]
async fn test_remove_allowance() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let office = Office::create_with_allowances(&service).await?;

    let removed = service.remove_allowance("alice", 2024).await?;
    assert_eq!(removed.user_id, office.alice.id);
    assert_eq!(removed.days, 20);

    assert!(matches!(
        service.get_balance(&office.admin(), "alice", 2024).await,
        Err(AppError::BalanceRecordNotFound { .. })
    ));
    assert!(matches!(
        service.remove_allowance("alice", 2024).await,
        Err(AppError::BalanceRecordNotFound { .. })
    ));

    // Bob's record is untouched
    assert_eq!(service.list_balances(&office.admin()).await?.len(), 1);

    Ok(())
}
