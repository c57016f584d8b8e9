// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::NaiveDate;
use leave_tracker::application::{
    LeaveService, NewLeave, Notification, Notifier, NotifyError,
};
use leave_tracker::domain::{Actor, Leave, User, UserRole};
use tempfile::TempDir;

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(LeaveService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let service = LeaveService::init(db_path.to_str().unwrap()).await?;
    Ok((service, temp_dir))
}

/// Helper to parse a date string into NaiveDate
pub fn parse_date(date_str: &str) -> NaiveDate {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d").unwrap()
}

/// Test fixture: one admin, two employees, a business year and leave types
pub struct Office {
    pub admin: User,
    pub alice: User,
    pub bob: User,
}

impl Office {
    /// Create users, business year 2024 and the "Vacation"/"Sick" types.
    pub async fn create(service: &LeaveService) -> Result<Self> {
        let admin = service
            .create_user(
                User::new("boss".into(), UserRole::Admin).with_email("boss@example.com"),
            )
            .await?;
        let alice = service
            .create_user(
                User::new("alice".into(), UserRole::Employee)
                    .with_name("Alice", "Archer")
                    .with_email("alice@example.com"),
            )
            .await?;
        let bob = service
            .create_user(User::new("bob".into(), UserRole::Employee))
            .await?;

        service.create_business_year(2024).await?;
        service.create_leave_type("Vacation".into()).await?;
        service.create_leave_type("Sick".into()).await?;

        Ok(Self { admin, alice, bob })
    }

    /// Same as `create`, plus 20 days of allowance for alice and bob in 2024.
    pub async fn create_with_allowances(service: &LeaveService) -> Result<Self> {
        let office = Self::create(service).await?;
        service.set_allowance("alice", 2024, 20).await?;
        service.set_allowance("bob", 2024, 20).await?;
        Ok(office)
    }

    pub fn admin(&self) -> Actor {
        self.admin.actor()
    }
}

/// Submit a 2024 vacation request for `user` as themselves.
pub async fn submit_vacation(service: &LeaveService, user: &User, days: i64) -> Result<Leave> {
    let leave = service
        .submit_leave(
            &user.actor(),
            NewLeave {
                username: user.username.clone(),
                leave_type: "Vacation".into(),
                year: 2024,
                start_date: parse_date("2024-07-01"),
                end_date: parse_date("2024-07-12"),
                days,
                description: None,
            },
        )
        .await?;
    Ok(leave)
}

/// Used days of `username` in 2024, as the admin sees them.
pub async fn used_days(service: &LeaveService, admin: &Actor, username: &str) -> Result<i64> {
    Ok(service
        .get_balance(admin, username, 2024)
        .await?
        .balance
        .used_days)
}

/// Notifier that keeps everything it was handed.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    pub sent: Arc<Mutex<Vec<Notification>>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Notifier whose transport is always down.
pub struct FailingNotifier;

impl Notifier for FailingNotifier {
    fn notify(&self, _: &Notification) -> Result<(), NotifyError> {
        Err(NotifyError("mail server unavailable".into()))
    }
}
