use chrono::{NaiveDate, Utc};

use crate::domain::access::{can_act_for, can_administer, can_manage_status, can_view, sees_everything};
use crate::domain::{
    plan_transition, release_on_delete, Actor, AvailableLeave, BusinessYear, Days, Leave,
    LeaveId, LeaveStatus, LeaveType, MAX_DAYS, TransitionError, TransitionPolicy, User, UserRole,
};
use crate::storage::{LeaveQuery, LedgerOutcome, Repository};

use super::{AppError, LeaveEvent, NotificationQueue};

/// Knobs for how strictly the ledger guards balances and transitions.
#[derive(Debug, Clone, Copy, Default)]
pub struct LedgerOptions {
    pub policy: TransitionPolicy,
    /// Refuse approvals that would use more days than allotted.
    pub enforce_allowance: bool,
}

/// Application service providing high-level operations for leave tracking.
/// This is the primary interface for any client (CLI, API, batch job, etc.).
pub struct LeaveService {
    repo: Repository,
    options: LedgerOptions,
    notifications: Option<NotificationQueue>,
}

/// A leave request as submitted by (or for) a user.
pub struct NewLeave {
    pub username: String,
    pub leave_type: String,
    pub year: i32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub days: Days,
    pub description: Option<String>,
}

/// Filter for querying leaves
#[derive(Default)]
pub struct LeaveFilter {
    pub username: Option<String>,
    pub status: Option<LeaveStatus>,
    pub leave_type: Option<String>,
    pub year: Option<i32>,
}

/// Result of a status transition
pub struct TransitionResult {
    pub leave: Leave,
    pub old_status: LeaveStatus,
    /// The balance after the change, when the transition touched it
    pub balance: Option<AvailableLeave>,
}

/// Balance entry for a user and business year
pub struct BalanceEntry {
    pub user: User,
    pub year: BusinessYear,
    pub balance: AvailableLeave,
}

/// Detailed leave information
pub struct LeaveInfo {
    pub leave: Leave,
    pub user: User,
    pub leave_type: LeaveType,
    pub year: BusinessYear,
    pub balance: Option<AvailableLeave>,
}

impl LeaveService {
    /// Create a new leave service with the given repository.
    pub fn new(repo: Repository) -> Self {
        Self {
            repo,
            options: LedgerOptions::default(),
            notifications: None,
        }
    }

    /// Initialize a new database at the given path.
    pub async fn init(database_path: &str) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}?mode=rwc", database_path);
        let repo = Repository::init(&db_url).await?;
        Ok(Self::new(repo))
    }

    /// Connect to an existing database.
    pub async fn connect(database_path: &str) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}", database_path);
        let repo = Repository::connect(&db_url).await?;
        Ok(Self::new(repo))
    }

    pub fn with_options(mut self, options: LedgerOptions) -> Self {
        self.options = options;
        self
    }

    /// Queue notification events on `queue` after each committed change.
    pub fn with_notifications(mut self, queue: NotificationQueue) -> Self {
        self.notifications = Some(queue);
        self
    }

    fn notify(&self, event: LeaveEvent) {
        if let Some(queue) = &self.notifications {
            queue.enqueue(event);
        }
    }

    // ========================
    // Users
    // ========================

    /// Register a user. Usernames are unique.
    pub async fn create_user(&self, user: User) -> Result<User, AppError> {
        if self.repo.get_user_by_username(&user.username).await?.is_some() {
            return Err(AppError::UserAlreadyExists(user.username));
        }

        self.repo.save_user(&user).await?;
        tracing::info!(username = %user.username, role = %user.role, "user created");
        Ok(user)
    }

    /// Get a user by username.
    pub async fn get_user(&self, username: &str) -> Result<User, AppError> {
        self.repo
            .get_user_by_username(username)
            .await?
            .ok_or_else(|| AppError::UserNotFound(username.to_string()))
    }

    /// Users visible to `actor`: everyone for admins, themselves for
    /// employees, nobody otherwise.
    pub async fn list_users(&self, actor: &Actor) -> Result<Vec<User>, AppError> {
        if sees_everything(actor) {
            return Ok(self.repo.list_users(None).await?);
        }
        if actor.role == UserRole::Employee {
            return Ok(self.repo.list_users(Some(actor.user_id)).await?);
        }
        Ok(Vec::new())
    }

    // ========================
    // Business years & leave types
    // ========================

    pub async fn create_business_year(&self, year: i32) -> Result<BusinessYear, AppError> {
        if self.repo.get_business_year_by_year(year).await?.is_some() {
            return Err(AppError::BusinessYearAlreadyExists(year));
        }

        let business_year = BusinessYear::new(year);
        self.repo.save_business_year(&business_year).await?;
        Ok(business_year)
    }

    pub async fn get_business_year(&self, year: i32) -> Result<BusinessYear, AppError> {
        self.repo
            .get_business_year_by_year(year)
            .await?
            .ok_or_else(|| AppError::BusinessYearNotFound(year.to_string()))
    }

    pub async fn list_business_years(&self) -> Result<Vec<BusinessYear>, AppError> {
        Ok(self.repo.list_business_years().await?)
    }

    pub async fn create_leave_type(&self, name: String) -> Result<LeaveType, AppError> {
        if self.repo.get_leave_type_by_name(&name).await?.is_some() {
            return Err(AppError::LeaveTypeAlreadyExists(name));
        }

        let leave_type = LeaveType::new(name);
        self.repo.save_leave_type(&leave_type).await?;
        Ok(leave_type)
    }

    pub async fn get_leave_type(&self, name: &str) -> Result<LeaveType, AppError> {
        self.repo
            .get_leave_type_by_name(name)
            .await?
            .ok_or_else(|| AppError::LeaveTypeNotFound(name.to_string()))
    }

    pub async fn list_leave_types(&self) -> Result<Vec<LeaveType>, AppError> {
        Ok(self.repo.list_leave_types().await?)
    }

    // ========================
    // Allowances
    // ========================

    /// Set how many days `username` is allotted in `year`. Creates the balance
    /// record on first use; afterwards only `days` changes.
    pub async fn set_allowance(
        &self,
        username: &str,
        year: i32,
        days: Days,
    ) -> Result<AvailableLeave, AppError> {
        if days < 0 {
            return Err(AppError::InvalidAllowance(format!(
                "allotted days cannot be negative, got {}",
                days
            )));
        }
        if days > MAX_DAYS {
            return Err(AppError::InvalidAllowance(format!(
                "at most {} days can be allotted, got {}",
                MAX_DAYS, days
            )));
        }

        let user = self.get_user(username).await?;
        let business_year = self.get_business_year(year).await?;

        let balance = self
            .repo
            .upsert_available_leave(&AvailableLeave::new(user.id, business_year.id, days))
            .await?;

        tracing::info!(
            username = %user.username,
            year,
            days = balance.days,
            used_days = balance.used_days,
            "allowance set"
        );
        Ok(balance)
    }

    /// Drop the balance record of `username` for `year`. Approved leaves keep
    /// their status; moving them into or out of approved fails until an
    /// allowance is set again.
    pub async fn remove_allowance(&self, username: &str, year: i32) -> Result<AvailableLeave, AppError> {
        let user = self.get_user(username).await?;
        let business_year = self.get_business_year(year).await?;

        let balance = self
            .repo
            .delete_available_leave(user.id, business_year.id)
            .await?
            .ok_or_else(|| AppError::BalanceRecordNotFound {
                username: user.username.clone(),
                year,
            })?;

        tracing::info!(
            username = %user.username,
            year,
            used_days = balance.used_days,
            "allowance removed"
        );
        Ok(balance)
    }

    /// Get the balance of `username` for `year`, if `actor` may see it.
    pub async fn get_balance(
        &self,
        actor: &Actor,
        username: &str,
        year: i32,
    ) -> Result<BalanceEntry, AppError> {
        let user = self.get_user(username).await?;
        if !can_view(actor, user.id) {
            return Err(AppError::Forbidden(format!(
                "cannot view leave balance of {}",
                username
            )));
        }

        let business_year = self.get_business_year(year).await?;
        let balance = self
            .repo
            .get_available_leave(user.id, business_year.id)
            .await?
            .ok_or_else(|| AppError::BalanceRecordNotFound {
                username: user.username.clone(),
                year,
            })?;

        Ok(BalanceEntry {
            user,
            year: business_year,
            balance,
        })
    }

    /// Balances visible to `actor`.
    pub async fn list_balances(&self, actor: &Actor) -> Result<Vec<BalanceEntry>, AppError> {
        let balances = if sees_everything(actor) {
            self.repo.list_available_leaves(None).await?
        } else if actor.role == UserRole::Employee {
            self.repo.list_available_leaves(Some(actor.user_id)).await?
        } else {
            return Ok(Vec::new());
        };

        let mut entries = Vec::with_capacity(balances.len());
        for balance in balances {
            let user = self
                .repo
                .get_user(balance.user_id)
                .await?
                .ok_or_else(|| AppError::UserNotFound(balance.user_id.to_string()))?;
            let year = self
                .repo
                .get_business_year(balance.business_year_id)
                .await?
                .ok_or_else(|| AppError::BusinessYearNotFound(balance.business_year_id.to_string()))?;
            entries.push(BalanceEntry {
                user,
                year,
                balance,
            });
        }
        Ok(entries)
    }

    // ========================
    // Leave requests
    // ========================

    /// Submit a leave request. It always starts out pending, whoever submits it.
    pub async fn submit_leave(&self, actor: &Actor, request: NewLeave) -> Result<Leave, AppError> {
        let user = self.get_user(&request.username).await?;
        if !can_act_for(actor, user.id) {
            return Err(AppError::Forbidden(format!(
                "cannot request leave for {}",
                user.username
            )));
        }

        let leave_type = self.get_leave_type(&request.leave_type).await?;
        let business_year = self.get_business_year(request.year).await?;

        let mut leave = Leave::new(
            user.id,
            leave_type.id,
            business_year.id,
            request.start_date,
            request.end_date,
            request.days,
        );
        if let Some(description) = request.description.filter(|d| !d.trim().is_empty()) {
            leave = leave.with_description(description);
        }
        leave
            .validate()
            .map_err(|e| AppError::InvalidLeave(e.to_string()))?;

        self.repo.save_leave(&leave).await?;
        tracing::info!(
            leave_id = %leave.id,
            username = %user.username,
            leave_type = %leave_type.name,
            year = business_year.year,
            days = leave.days,
            "leave submitted"
        );

        self.notify(LeaveEvent::Submitted {
            leave: leave.clone(),
            requester: user,
        });
        Ok(leave)
    }

    /// Get a leave by id, if `actor` may see it.
    pub async fn get_leave(&self, actor: &Actor, id: LeaveId) -> Result<Leave, AppError> {
        let leave = self.load_leave(id).await?;
        if !can_view(actor, leave.user_id) {
            return Err(AppError::Forbidden(format!("cannot view leave {}", id)));
        }
        Ok(leave)
    }

    /// Get a leave together with everything it references.
    pub async fn get_leave_info(&self, actor: &Actor, id: LeaveId) -> Result<LeaveInfo, AppError> {
        let leave = self.get_leave(actor, id).await?;

        let user = self
            .repo
            .get_user(leave.user_id)
            .await?
            .ok_or_else(|| AppError::UserNotFound(leave.user_id.to_string()))?;
        let leave_type = self
            .repo
            .get_leave_type(leave.leave_type_id)
            .await?
            .ok_or_else(|| AppError::LeaveTypeNotFound(leave.leave_type_id.to_string()))?;
        let year = self
            .repo
            .get_business_year(leave.business_year_id)
            .await?
            .ok_or_else(|| AppError::BusinessYearNotFound(leave.business_year_id.to_string()))?;
        let balance = self
            .repo
            .get_available_leave(leave.user_id, leave.business_year_id)
            .await?;

        Ok(LeaveInfo {
            leave,
            user,
            leave_type,
            year,
            balance,
        })
    }

    /// List leaves visible to `actor`. Employees only ever get their own.
    pub async fn list_leaves(&self, actor: &Actor, filter: LeaveFilter) -> Result<Vec<Leave>, AppError> {
        let user_id = match &filter.username {
            Some(name) => Some(self.get_user(name).await?.id),
            None => None,
        };

        let user_id = if sees_everything(actor) {
            user_id
        } else if actor.role == UserRole::Employee {
            match user_id {
                Some(id) if id != actor.user_id => {
                    return Err(AppError::Forbidden(
                        "employees can only list their own leaves".to_string(),
                    ));
                }
                _ => Some(actor.user_id),
            }
        } else {
            return Ok(Vec::new());
        };

        let leave_type_id = match &filter.leave_type {
            Some(name) => Some(self.get_leave_type(name).await?.id),
            None => None,
        };
        let business_year_id = match filter.year {
            Some(year) => Some(self.get_business_year(year).await?.id),
            None => None,
        };

        let query = LeaveQuery {
            user_id,
            status: filter.status,
            leave_type_id,
            business_year_id,
        };
        Ok(self.repo.list_leaves(&query).await?)
    }

    // ========================
    // Status transitions
    // ========================

    /// Change a leave's status on behalf of `actor`. Only admins may decide.
    pub async fn change_status(
        &self,
        actor: &Actor,
        id: LeaveId,
        new_status: LeaveStatus,
    ) -> Result<TransitionResult, AppError> {
        if !can_manage_status(actor) {
            return Err(AppError::Forbidden(
                "only administrators can change a leave's status".to_string(),
            ));
        }
        self.apply_status_transition(id, new_status).await
    }

    pub async fn approve_leave(&self, actor: &Actor, id: LeaveId) -> Result<TransitionResult, AppError> {
        self.change_status(actor, id, LeaveStatus::Approved).await
    }

    pub async fn reject_leave(&self, actor: &Actor, id: LeaveId) -> Result<TransitionResult, AppError> {
        self.change_status(actor, id, LeaveStatus::Rejected).await
    }

    pub async fn cancel_leave(&self, actor: &Actor, id: LeaveId) -> Result<TransitionResult, AppError> {
        self.change_status(actor, id, LeaveStatus::Cancelled).await
    }

    /// Move a leave to `new_status` and account for it on the requester's
    /// balance.
    ///
    /// Entering approved consumes `leave.days`; cancelling an approved leave
    /// gives them back. The status write and the balance update commit
    /// together or not at all. A missing balance record aborts the whole
    /// transition with [`AppError::BalanceRecordNotFound`]. Callers are
    /// expected to have authorized the change already.
    pub async fn apply_status_transition(
        &self,
        id: LeaveId,
        new_status: LeaveStatus,
    ) -> Result<TransitionResult, AppError> {
        let leave = self.load_leave(id).await?;
        let old_status = leave.status;

        let effect = plan_transition(old_status, new_status, leave.days, self.options.policy)
            .map_err(|err| match err {
                TransitionError::NotAllowed { from, to } => AppError::InvalidTransition { from, to },
            })?;

        if old_status == new_status {
            return Ok(TransitionResult {
                leave,
                old_status,
                balance: None,
            });
        }

        let requester = self
            .repo
            .get_user(leave.user_id)
            .await?
            .ok_or_else(|| AppError::UserNotFound(leave.user_id.to_string()))?;

        let now = Utc::now();
        let outcome = self
            .repo
            .apply_transition(&leave, new_status, effect, now, self.options.enforce_allowance)
            .await?;

        let balance = match outcome {
            LedgerOutcome::Applied { balance } => balance,
            LedgerOutcome::BalanceMissing => {
                let err = self.balance_missing(&requester, &leave).await?;
                tracing::warn!(leave_id = %leave.id, error = %err, "transition aborted");
                return Err(err);
            }
            LedgerOutcome::BalanceExceeded { balance } => {
                let year = self.year_of(&leave).await?;
                return Err(AppError::InsufficientBalance {
                    username: requester.username,
                    year,
                    remaining: balance.remaining(),
                    requested: leave.days,
                });
            }
            LedgerOutcome::StatusChanged => {
                return Err(AppError::ConcurrentModification(leave.id.to_string()));
            }
        };

        let mut leave = leave;
        leave.status = new_status;
        leave.updated_at = now;

        tracing::info!(
            leave_id = %leave.id,
            username = %requester.username,
            from = %old_status,
            to = %new_status,
            delta = effect.delta(),
            used_days = balance.as_ref().map(|b| b.used_days),
            "leave status changed"
        );

        self.notify(LeaveEvent::StatusChanged {
            leave: leave.clone(),
            requester,
            old_status,
            new_status,
        });

        Ok(TransitionResult {
            leave,
            old_status,
            balance,
        })
    }

    /// Delete a leave. Days of an approved leave go back to the balance in the
    /// same transaction.
    pub async fn delete_leave(&self, actor: &Actor, id: LeaveId) -> Result<Leave, AppError> {
        if !can_administer(actor) {
            return Err(AppError::Forbidden(
                "only administrators can delete leaves".to_string(),
            ));
        }

        let leave = self.load_leave(id).await?;
        let effect = release_on_delete(leave.status, leave.days);

        match self.repo.delete_leave(&leave, effect, Utc::now()).await? {
            LedgerOutcome::Applied { .. } => {}
            LedgerOutcome::BalanceMissing => {
                let requester = self
                    .repo
                    .get_user(leave.user_id)
                    .await?
                    .ok_or_else(|| AppError::UserNotFound(leave.user_id.to_string()))?;
                return Err(self.balance_missing(&requester, &leave).await?);
            }
            LedgerOutcome::BalanceExceeded { .. } | LedgerOutcome::StatusChanged => {
                return Err(AppError::ConcurrentModification(leave.id.to_string()));
            }
        }

        tracing::info!(leave_id = %leave.id, released = -effect.delta(), "leave deleted");
        Ok(leave)
    }

    async fn load_leave(&self, id: LeaveId) -> Result<Leave, AppError> {
        self.repo
            .get_leave(id)
            .await?
            .ok_or_else(|| AppError::LeaveNotFound(id.to_string()))
    }

    async fn year_of(&self, leave: &Leave) -> Result<i32, AppError> {
        Ok(self
            .repo
            .get_business_year(leave.business_year_id)
            .await?
            .ok_or_else(|| AppError::BusinessYearNotFound(leave.business_year_id.to_string()))?
            .year)
    }

    async fn balance_missing(&self, requester: &User, leave: &Leave) -> Result<AppError, AppError> {
        Ok(AppError::BalanceRecordNotFound {
            username: requester.username.clone(),
            year: self.year_of(leave).await?,
        })
    }
}
