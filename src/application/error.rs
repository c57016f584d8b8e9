use thiserror::Error;

use crate::domain::{Days, LeaveStatus};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("User already exists: {0}")]
    UserAlreadyExists(String),

    #[error("Business year not found: {0}")]
    BusinessYearNotFound(String),

    #[error("Business year already exists: {0}")]
    BusinessYearAlreadyExists(i32),

    #[error("Leave type not found: {0}")]
    LeaveTypeNotFound(String),

    #[error("Leave type already exists: {0}")]
    LeaveTypeAlreadyExists(String),

    #[error("Leave not found: {0}")]
    LeaveNotFound(String),

    #[error("Invalid leave request: {0}")]
    InvalidLeave(String),

    #[error("Invalid allowance: {0}")]
    InvalidAllowance(String),

    #[error("No leave balance for user {username} in business year {year}")]
    BalanceRecordNotFound { username: String, year: i32 },

    #[error("Insufficient leave balance for {username} in {year}: {remaining} day(s) left, {requested} requested")]
    InsufficientBalance {
        username: String,
        year: i32,
        remaining: Days,
        requested: Days,
    },

    #[error("Cannot move leave from {from} to {to}")]
    InvalidTransition { from: LeaveStatus, to: LeaveStatus },

    #[error("Leave {0} was modified concurrently, reload and retry")]
    ConcurrentModification(String),

    #[error("Not permitted: {0}")]
    Forbidden(String),

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}
