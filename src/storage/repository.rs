use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::{
    AvailableLeave, BalanceEffect, BusinessYear, BusinessYearId, Leave, LeaveId, LeaveStatus,
    LeaveType, LeaveTypeId, User, UserId, UserRole,
};

use super::{MIGRATION_001_INITIAL, MIGRATION_002_LEAVES};

const USER_COLUMNS: &str =
    "id, username, first_name, last_name, email, role, is_superuser, created_at, updated_at";

const BALANCE_COLUMNS: &str =
    "id, user_id, business_year_id, days, used_days, created_at, updated_at";

const LEAVE_COLUMNS: &str = "id, user_id, leave_type_id, business_year_id, start_date, end_date, days, description, status, created_at, updated_at";

/// How long a writer waits for the database lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of a ledger write (status change or deletion with its balance
/// effect). Anything but `Applied` means the transaction was rolled back.
#[derive(Debug, Clone)]
pub enum LedgerOutcome {
    /// Committed. Carries the balance after the change when one was touched.
    Applied { balance: Option<AvailableLeave> },
    /// No allowance exists for the leave's (user, business year).
    BalanceMissing,
    /// Approving would push `used_days` past `days`. Carries the balance as it
    /// was read inside the aborted transaction.
    BalanceExceeded { balance: AvailableLeave },
    /// The leave no longer has the status it was read with.
    StatusChanged,
}

/// Filter for leave listings. `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct LeaveQuery {
    pub user_id: Option<UserId>,
    pub status: Option<LeaveStatus>,
    pub leave_type_id: Option<LeaveTypeId>,
    pub business_year_id: Option<BusinessYearId>,
}

/// Repository for persisting and querying users, allowances and leaves.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database URL (`sqlite:path?mode=rwc` creates the file).
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .context("Invalid database URL")?
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;

        sqlx::query(MIGRATION_002_LEAVES)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 002")?;

        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(database_url: &str) -> Result<Self> {
        let repo = Self::connect(database_url).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    // ========================
    // User operations
    // ========================

    pub async fn save_user(&self, user: &User) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, username, first_name, last_name, email, role, is_superuser, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user.id.to_string())
        .bind(&user.username)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.email)
        .bind(user.role.as_str())
        .bind(user.is_superuser)
        .bind(user.created_at.to_rfc3339())
        .bind(user.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save user")?;
        Ok(())
    }

    pub async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch user")?;

        row.as_ref().map(Self::row_to_user).transpose()
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = ?"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch user by username")?;

        row.as_ref().map(Self::row_to_user).transpose()
    }

    /// List users, optionally restricted to a single id.
    pub async fn list_users(&self, only: Option<UserId>) -> Result<Vec<User>> {
        let rows = match only {
            Some(id) => {
                sqlx::query(&format!(
                    "SELECT {USER_COLUMNS} FROM users WHERE id = ? ORDER BY username"
                ))
                .bind(id.to_string())
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY username"))
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .context("Failed to list users")?;

        rows.iter().map(Self::row_to_user).collect()
    }

    fn row_to_user(row: &SqliteRow) -> Result<User> {
        let role_str: String = row.get("role");

        Ok(User {
            id: parse_id(row, "id")?,
            username: row.get("username"),
            first_name: row.get("first_name"),
            last_name: row.get("last_name"),
            email: row.get("email"),
            role: UserRole::from_str(&role_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid user role: {}", role_str))?,
            is_superuser: row.get::<i32, _>("is_superuser") != 0,
            created_at: parse_timestamp(row, "created_at")?,
            updated_at: parse_timestamp(row, "updated_at")?,
        })
    }

    // ========================
    // Business year & leave type operations
    // ========================

    pub async fn save_business_year(&self, year: &BusinessYear) -> Result<()> {
        sqlx::query("INSERT INTO business_years (id, year, created_at) VALUES (?, ?, ?)")
            .bind(year.id.to_string())
            .bind(year.year)
            .bind(year.created_at.to_rfc3339())
            .execute(&self.pool)
            .await
            .context("Failed to save business year")?;
        Ok(())
    }

    pub async fn get_business_year(&self, id: BusinessYearId) -> Result<Option<BusinessYear>> {
        let row = sqlx::query("SELECT id, year, created_at FROM business_years WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch business year")?;

        row.as_ref().map(Self::row_to_business_year).transpose()
    }

    pub async fn get_business_year_by_year(&self, year: i32) -> Result<Option<BusinessYear>> {
        let row = sqlx::query("SELECT id, year, created_at FROM business_years WHERE year = ?")
            .bind(year)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch business year by year")?;

        row.as_ref().map(Self::row_to_business_year).transpose()
    }

    pub async fn list_business_years(&self) -> Result<Vec<BusinessYear>> {
        let rows = sqlx::query("SELECT id, year, created_at FROM business_years ORDER BY year")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list business years")?;

        rows.iter().map(Self::row_to_business_year).collect()
    }

    fn row_to_business_year(row: &SqliteRow) -> Result<BusinessYear> {
        Ok(BusinessYear {
            id: parse_id(row, "id")?,
            year: row.get("year"),
            created_at: parse_timestamp(row, "created_at")?,
        })
    }

    pub async fn save_leave_type(&self, leave_type: &LeaveType) -> Result<()> {
        sqlx::query("INSERT INTO leave_types (id, name, created_at) VALUES (?, ?, ?)")
            .bind(leave_type.id.to_string())
            .bind(&leave_type.name)
            .bind(leave_type.created_at.to_rfc3339())
            .execute(&self.pool)
            .await
            .context("Failed to save leave type")?;
        Ok(())
    }

    pub async fn get_leave_type(&self, id: LeaveTypeId) -> Result<Option<LeaveType>> {
        let row = sqlx::query("SELECT id, name, created_at FROM leave_types WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch leave type")?;

        row.as_ref().map(Self::row_to_leave_type).transpose()
    }

    pub async fn get_leave_type_by_name(&self, name: &str) -> Result<Option<LeaveType>> {
        let row = sqlx::query("SELECT id, name, created_at FROM leave_types WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch leave type by name")?;

        row.as_ref().map(Self::row_to_leave_type).transpose()
    }

    pub async fn list_leave_types(&self) -> Result<Vec<LeaveType>> {
        let rows = sqlx::query("SELECT id, name, created_at FROM leave_types ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list leave types")?;

        rows.iter().map(Self::row_to_leave_type).collect()
    }

    fn row_to_leave_type(row: &SqliteRow) -> Result<LeaveType> {
        Ok(LeaveType {
            id: parse_id(row, "id")?,
            name: row.get("name"),
            created_at: parse_timestamp(row, "created_at")?,
        })
    }

    // ========================
    // Allowance operations
    // ========================

    /// Create the allowance for (user, year), or replace its `days` if it
    /// exists. `used_days` is never touched here.
    pub async fn upsert_available_leave(&self, balance: &AvailableLeave) -> Result<AvailableLeave> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO available_leaves (id, user_id, business_year_id, days, used_days, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (user_id, business_year_id)
            DO UPDATE SET days = excluded.days, updated_at = excluded.updated_at
            RETURNING {BALANCE_COLUMNS}
            "#
        ))
        .bind(balance.id.to_string())
        .bind(balance.user_id.to_string())
        .bind(balance.business_year_id.to_string())
        .bind(balance.days)
        .bind(balance.used_days)
        .bind(balance.created_at.to_rfc3339())
        .bind(balance.updated_at.to_rfc3339())
        .fetch_one(&self.pool)
        .await
        .context("Failed to save available leave")?;

        Self::row_to_available_leave(&row)
    }

    pub async fn get_available_leave(
        &self,
        user_id: UserId,
        business_year_id: BusinessYearId,
    ) -> Result<Option<AvailableLeave>> {
        let row = sqlx::query(&format!(
            "SELECT {BALANCE_COLUMNS} FROM available_leaves WHERE user_id = ? AND business_year_id = ?"
        ))
        .bind(user_id.to_string())
        .bind(business_year_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch available leave")?;

        row.as_ref().map(Self::row_to_available_leave).transpose()
    }

    /// Remove the allowance for (user, year). Returns it if there was one.
    pub async fn delete_available_leave(
        &self,
        user_id: UserId,
        business_year_id: BusinessYearId,
    ) -> Result<Option<AvailableLeave>> {
        let row = sqlx::query(&format!(
            "DELETE FROM available_leaves WHERE user_id = ? AND business_year_id = ? RETURNING {BALANCE_COLUMNS}"
        ))
        .bind(user_id.to_string())
        .bind(business_year_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to delete available leave")?;

        row.as_ref().map(Self::row_to_available_leave).transpose()
    }

    /// List allowances, optionally for a single user, newest year first.
    pub async fn list_available_leaves(&self, user_id: Option<UserId>) -> Result<Vec<AvailableLeave>> {
        let mut query = format!(
            "SELECT a.{} FROM available_leaves a JOIN business_years y ON y.id = a.business_year_id JOIN users u ON u.id = a.user_id",
            BALANCE_COLUMNS.replace(", ", ", a.")
        );
        if user_id.is_some() {
            query.push_str(" WHERE a.user_id = ?");
        }
        query.push_str(" ORDER BY y.year DESC, u.username");

        let mut sql_query = sqlx::query(&query);
        if let Some(id) = user_id {
            sql_query = sql_query.bind(id.to_string());
        }

        let rows = sql_query
            .fetch_all(&self.pool)
            .await
            .context("Failed to list available leaves")?;

        rows.iter().map(Self::row_to_available_leave).collect()
    }

    fn row_to_available_leave(row: &SqliteRow) -> Result<AvailableLeave> {
        Ok(AvailableLeave {
            id: parse_id(row, "id")?,
            user_id: parse_id(row, "user_id")?,
            business_year_id: parse_id(row, "business_year_id")?,
            days: row.get("days"),
            used_days: row.get("used_days"),
            created_at: parse_timestamp(row, "created_at")?,
            updated_at: parse_timestamp(row, "updated_at")?,
        })
    }

    // ========================
    // Leave operations
    // ========================

    pub async fn save_leave(&self, leave: &Leave) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO leaves (id, user_id, leave_type_id, business_year_id, start_date, end_date, days, description, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(leave.id.to_string())
        .bind(leave.user_id.to_string())
        .bind(leave.leave_type_id.to_string())
        .bind(leave.business_year_id.to_string())
        .bind(leave.start_date.to_string())
        .bind(leave.end_date.to_string())
        .bind(leave.days)
        .bind(&leave.description)
        .bind(leave.status.as_str())
        .bind(leave.created_at.to_rfc3339())
        .bind(leave.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save leave")?;
        Ok(())
    }

    pub async fn get_leave(&self, id: LeaveId) -> Result<Option<Leave>> {
        let row = sqlx::query(&format!("SELECT {LEAVE_COLUMNS} FROM leaves WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch leave")?;

        row.as_ref().map(Self::row_to_leave).transpose()
    }

    /// List leaves matching the query, most recent start date first.
    pub async fn list_leaves(&self, filter: &LeaveQuery) -> Result<Vec<Leave>> {
        let mut query = format!("SELECT {LEAVE_COLUMNS} FROM leaves WHERE 1=1");

        let user_id_str = filter.user_id.map(|id| id.to_string());
        let leave_type_str = filter.leave_type_id.map(|id| id.to_string());
        let year_str = filter.business_year_id.map(|id| id.to_string());

        if user_id_str.is_some() {
            query.push_str(" AND user_id = ?");
        }
        if filter.status.is_some() {
            query.push_str(" AND status = ?");
        }
        if leave_type_str.is_some() {
            query.push_str(" AND leave_type_id = ?");
        }
        if year_str.is_some() {
            query.push_str(" AND business_year_id = ?");
        }
        query.push_str(" ORDER BY start_date DESC, created_at DESC");

        let mut sql_query = sqlx::query(&query);
        if let Some(ref id) = user_id_str {
            sql_query = sql_query.bind(id);
        }
        if let Some(status) = filter.status {
            sql_query = sql_query.bind(status.as_str());
        }
        if let Some(ref id) = leave_type_str {
            sql_query = sql_query.bind(id);
        }
        if let Some(ref id) = year_str {
            sql_query = sql_query.bind(id);
        }

        let rows = sql_query
            .fetch_all(&self.pool)
            .await
            .context("Failed to list leaves")?;

        rows.iter().map(Self::row_to_leave).collect()
    }

    fn row_to_leave(row: &SqliteRow) -> Result<Leave> {
        let status_str: String = row.get("status");

        Ok(Leave {
            id: parse_id(row, "id")?,
            user_id: parse_id(row, "user_id")?,
            leave_type_id: parse_id(row, "leave_type_id")?,
            business_year_id: parse_id(row, "business_year_id")?,
            start_date: parse_date(row, "start_date")?,
            end_date: parse_date(row, "end_date")?,
            days: row.get("days"),
            description: row.get("description"),
            status: LeaveStatus::from_str(&status_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid leave status: {}", status_str))?,
            created_at: parse_timestamp(row, "created_at")?,
            updated_at: parse_timestamp(row, "updated_at")?,
        })
    }

    // ========================
    // Ledger writes
    // ========================

    /// Move `leave` from its current status to `new_status` and apply
    /// `effect` to its balance, in one transaction.
    ///
    /// The status write is a compare-and-set on `leave.status` and is issued
    /// first, so the transaction holds the write lock before the balance is
    /// read. With `enforce_allowance`, an approval checks the balance under
    /// that lock before consuming. `used_days` is adjusted in place, never read
    /// back and rewritten.
    pub async fn apply_transition(
        &self,
        leave: &Leave,
        new_status: LeaveStatus,
        effect: BalanceEffect,
        updated_at: DateTime<Utc>,
        enforce_allowance: bool,
    ) -> Result<LedgerOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;

        let updated = sqlx::query(
            "UPDATE leaves SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(new_status.as_str())
        .bind(updated_at.to_rfc3339())
        .bind(leave.id.to_string())
        .bind(leave.status.as_str())
        .execute(&mut *tx)
        .await
        .context("Failed to update leave status")?;

        if updated.rows_affected() == 0 {
            tx.rollback().await.context("Failed to roll back")?;
            return Ok(LedgerOutcome::StatusChanged);
        }

        if let BalanceEffect::Consume(days) = effect {
            if enforce_allowance {
                let current = Self::fetch_available_leave(&mut tx, leave).await?;
                match current {
                    None => {
                        tx.rollback().await.context("Failed to roll back")?;
                        return Ok(LedgerOutcome::BalanceMissing);
                    }
                    Some(balance) if !balance.can_consume(days) => {
                        tx.rollback().await.context("Failed to roll back")?;
                        return Ok(LedgerOutcome::BalanceExceeded { balance });
                    }
                    Some(_) => {}
                }
            }
        }

        let balance = if effect.touches_balance() {
            match Self::shift_used_days(&mut tx, leave, effect, updated_at).await? {
                Some(balance) => Some(balance),
                None => {
                    tx.rollback().await.context("Failed to roll back")?;
                    return Ok(LedgerOutcome::BalanceMissing);
                }
            }
        } else {
            None
        };

        tx.commit().await.context("Failed to commit transition")?;
        Ok(LedgerOutcome::Applied { balance })
    }

    /// Delete `leave` and apply `effect` to its balance, in one transaction.
    /// Fails with `StatusChanged` if the leave's status moved since it was read.
    pub async fn delete_leave(
        &self,
        leave: &Leave,
        effect: BalanceEffect,
        updated_at: DateTime<Utc>,
    ) -> Result<LedgerOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;

        let deleted = sqlx::query("DELETE FROM leaves WHERE id = ? AND status = ?")
            .bind(leave.id.to_string())
            .bind(leave.status.as_str())
            .execute(&mut *tx)
            .await
            .context("Failed to delete leave")?;

        if deleted.rows_affected() == 0 {
            tx.rollback().await.context("Failed to roll back")?;
            return Ok(LedgerOutcome::StatusChanged);
        }

        let balance = if effect.touches_balance() {
            match Self::shift_used_days(&mut tx, leave, effect, updated_at).await? {
                Some(balance) => Some(balance),
                None => {
                    tx.rollback().await.context("Failed to roll back")?;
                    return Ok(LedgerOutcome::BalanceMissing);
                }
            }
        } else {
            None
        };

        tx.commit().await.context("Failed to commit deletion")?;
        Ok(LedgerOutcome::Applied { balance })
    }

    async fn fetch_available_leave(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        leave: &Leave,
    ) -> Result<Option<AvailableLeave>> {
        let row = sqlx::query(&format!(
            "SELECT {BALANCE_COLUMNS} FROM available_leaves WHERE user_id = ? AND business_year_id = ?"
        ))
        .bind(leave.user_id.to_string())
        .bind(leave.business_year_id.to_string())
        .fetch_optional(&mut **tx)
        .await
        .context("Failed to fetch available leave")?;

        row.as_ref().map(Self::row_to_available_leave).transpose()
    }

    async fn shift_used_days(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        leave: &Leave,
        effect: BalanceEffect,
        updated_at: DateTime<Utc>,
    ) -> Result<Option<AvailableLeave>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE available_leaves
            SET used_days = used_days + ?, updated_at = ?
            WHERE user_id = ? AND business_year_id = ?
            RETURNING {BALANCE_COLUMNS}
            "#
        ))
        .bind(effect.delta())
        .bind(updated_at.to_rfc3339())
        .bind(leave.user_id.to_string())
        .bind(leave.business_year_id.to_string())
        .fetch_optional(&mut **tx)
        .await
        .context("Failed to update used days")?;

        row.as_ref().map(Self::row_to_available_leave).transpose()
    }
}

fn parse_id(row: &SqliteRow, column: &str) -> Result<Uuid> {
    let value: String = row.get(column);
    Uuid::parse_str(&value).with_context(|| format!("Invalid {} value: {}", column, value))
}

fn parse_timestamp(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    let value: String = row.get(column);
    Ok(DateTime::parse_from_rfc3339(&value)
        .with_context(|| format!("Invalid {} timestamp", column))?
        .with_timezone(&Utc))
}

fn parse_date(row: &SqliteRow, column: &str) -> Result<NaiveDate> {
    let value: String = row.get(column);
    NaiveDate::parse_from_str(&value, "%Y-%m-%d")
        .with_context(|| format!("Invalid {} date", column))
}
