use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{BusinessYearId, Days, LeaveTypeId, MAX_DAYS, UserId};

pub type LeaveId = Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaveStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl LeaveStatus {
    pub const ALL: [LeaveStatus; 4] = [
        LeaveStatus::Pending,
        LeaveStatus::Approved,
        LeaveStatus::Rejected,
        LeaveStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LeaveStatus::Pending => "pending",
            LeaveStatus::Approved => "approved",
            LeaveStatus::Rejected => "rejected",
            LeaveStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(LeaveStatus::Pending),
            "approved" => Some(LeaveStatus::Approved),
            "rejected" => Some(LeaveStatus::Rejected),
            "cancelled" | "canceled" => Some(LeaveStatus::Cancelled),
            _ => None,
        }
    }

    /// Capitalized form for display.
    pub fn label(&self) -> &'static str {
        match self {
            LeaveStatus::Pending => "Pending",
            LeaveStatus::Approved => "Approved",
            LeaveStatus::Rejected => "Rejected",
            LeaveStatus::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for LeaveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A leave request. Starts out pending; its status is then decided by an
/// administrator, and each decision is accounted against the requester's
/// balance for the business year.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Leave {
    pub id: LeaveId,
    pub user_id: UserId,
    pub leave_type_id: LeaveTypeId,
    pub business_year_id: BusinessYearId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Requested day count. Not derived from the date range: weekends and
    /// holidays are the requester's call.
    pub days: Days,
    pub description: Option<String>,
    pub status: LeaveStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Leave {
    pub fn new(
        user_id: UserId,
        leave_type_id: LeaveTypeId,
        business_year_id: BusinessYearId,
        start_date: NaiveDate,
        end_date: NaiveDate,
        days: Days,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            leave_type_id,
            business_year_id,
            start_date,
            end_date,
            days,
            description: None,
            status: LeaveStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Check the request is well-formed before it is persisted.
    pub fn validate(&self) -> Result<(), LeaveValidationError> {
        if self.start_date > self.end_date {
            return Err(LeaveValidationError::EndBeforeStart {
                start_date: self.start_date,
                end_date: self.end_date,
            });
        }
        if self.days <= 0 {
            return Err(LeaveValidationError::NonPositiveDays(self.days));
        }
        if self.days > MAX_DAYS {
            return Err(LeaveValidationError::TooManyDays(self.days));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaveValidationError {
    EndBeforeStart {
        start_date: NaiveDate,
        end_date: NaiveDate,
    },
    NonPositiveDays(Days),
    TooManyDays(Days),
}

impl std::fmt::Display for LeaveValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LeaveValidationError::EndBeforeStart {
                start_date,
                end_date,
            } => write!(
                f,
                "start date {} is after end date {}",
                start_date, end_date
            ),
            LeaveValidationError::NonPositiveDays(days) => {
                write!(f, "requested days must be positive, got {}", days)
            }
            LeaveValidationError::TooManyDays(days) => {
                write!(f, "at most {} days can be requested, got {}", MAX_DAYS, days)
            }
        }
    }
}

impl std::error::Error for LeaveValidationError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn sample_leave(start: &str, end: &str, days: Days) -> Leave {
        Leave::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            date(start),
            date(end),
            days,
        )
    }

    #[test]
    fn test_status_roundtrip() {
        for status in LeaveStatus::ALL {
            assert_eq!(LeaveStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(LeaveStatus::from_str("Canceled"), Some(LeaveStatus::Cancelled));
        assert_eq!(LeaveStatus::from_str("archived"), None);
    }

    #[test]
    fn test_new_leave_is_pending() {
        let leave = sample_leave("2024-03-04", "2024-03-08", 5);
        assert_eq!(leave.status, LeaveStatus::Pending);
        assert!(leave.validate().is_ok());
    }

    #[test]
    fn test_single_day_leave_is_valid() {
        let leave = sample_leave("2024-03-04", "2024-03-04", 1);
        assert!(leave.validate().is_ok());
    }

    #[test]
    fn test_end_before_start_is_rejected() {
        let leave = sample_leave("2024-03-08", "2024-03-04", 5);
        assert!(matches!(
            leave.validate(),
            Err(LeaveValidationError::EndBeforeStart { .. })
        ));
    }

    #[test]
    fn test_zero_days_is_rejected() {
        let leave = sample_leave("2024-03-04", "2024-03-04", 0);
        assert_eq!(
            leave.validate(),
            Err(LeaveValidationError::NonPositiveDays(0))
        );
    }

    #[test]
    fn test_days_are_capped_at_a_year() {
        assert!(sample_leave("2024-01-01", "2024-12-31", 366).validate().is_ok());
        assert_eq!(
            sample_leave("2024-01-01", "2024-12-31", 367).validate(),
            Err(LeaveValidationError::TooManyDays(367))
        );
        assert_eq!(
            sample_leave("2024-01-01", "2024-12-31", i64::MAX).validate(),
            Err(LeaveValidationError::TooManyDays(i64::MAX))
        );
    }
}
