use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type LeaveTypeId = Uuid;

/// A named category of leave ("Sick", "Vacation", ...). Carries no rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaveType {
    pub id: LeaveTypeId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl LeaveType {
    pub fn new(name: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            created_at: Utc::now(),
        }
    }
}
