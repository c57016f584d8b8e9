use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type BusinessYearId = Uuid;

/// A business year partitions allowances and requests. One record per year.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessYear {
    pub id: BusinessYearId,
    pub year: i32,
    pub created_at: DateTime<Utc>,
}

impl BusinessYear {
    pub fn new(year: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            year,
            created_at: Utc::now(),
        }
    }
}

impl std::fmt::Display for BusinessYear {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.year)
    }
}
