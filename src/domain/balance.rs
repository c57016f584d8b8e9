use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{BusinessYearId, UserId};

/// Leave is counted in whole days.
pub type Days = i64;

/// Upper bound for a single request or a yearly allowance.
pub const MAX_DAYS: Days = 366;

pub type AvailableLeaveId = Uuid;

/// Allotted and consumed leave for one user in one business year.
///
/// `used_days` is only ever moved by status transitions of that user's leave
/// requests. It can exceed `days` when allowance enforcement is off.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailableLeave {
    pub id: AvailableLeaveId,
    pub user_id: UserId,
    pub business_year_id: BusinessYearId,
    pub days: Days,
    pub used_days: Days,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AvailableLeave {
    pub fn new(user_id: UserId, business_year_id: BusinessYearId, days: Days) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            business_year_id,
            days,
            used_days: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Days still available. Negative when over-approved.
    pub fn remaining(&self) -> Days {
        self.days - self.used_days
    }

    pub fn is_overdrawn(&self) -> bool {
        self.used_days > self.days
    }

    /// Whether consuming `requested` more days stays within the allowance.
    pub fn can_consume(&self, requested: Days) -> bool {
        self.used_days + requested <= self.days
    }
}
