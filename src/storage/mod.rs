mod repository;

pub use repository::*;

/// SQL migration for users, business years and leave types
pub const MIGRATION_001_INITIAL: &str = include_str!("migrations/001_initial.sql");

/// SQL migration for allowances and leave requests
pub const MIGRATION_002_LEAVES: &str = include_str!("migrations/002_leaves.sql");
