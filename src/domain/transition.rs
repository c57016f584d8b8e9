use serde::{Deserialize, Serialize};

use super::{Days, LeaveStatus};

/// Which status changes the ledger accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionPolicy {
    /// Any status may move to any other status.
    #[default]
    Permissive,
    /// An approved leave may only be cancelled, and a decided leave never
    /// returns to pending.
    Strict,
}

impl TransitionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionPolicy::Permissive => "permissive",
            TransitionPolicy::Strict => "strict",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "permissive" => Some(TransitionPolicy::Permissive),
            "strict" => Some(TransitionPolicy::Strict),
            _ => None,
        }
    }

    pub fn allows(&self, from: LeaveStatus, to: LeaveStatus) -> bool {
        if from == to {
            return true;
        }
        match self {
            TransitionPolicy::Permissive => true,
            TransitionPolicy::Strict => match (from, to) {
                (LeaveStatus::Approved, LeaveStatus::Cancelled) => true,
                (LeaveStatus::Approved, _) => false,
                (_, LeaveStatus::Pending) => false,
                _ => true,
            },
        }
    }
}

impl std::fmt::Display for TransitionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a status change does to the requester's `used_days`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceEffect {
    Unchanged,
    /// Entering approved: days are taken from the balance.
    Consume(Days),
    /// Leaving approved (cancelled or back to pending): days go back to the
    /// balance.
    Restore(Days),
}

impl BalanceEffect {
    /// Signed change to apply to `used_days`.
    pub fn delta(&self) -> Days {
        match self {
            BalanceEffect::Unchanged => 0,
            BalanceEffect::Consume(days) => *days,
            BalanceEffect::Restore(days) => -*days,
        }
    }

    pub fn touches_balance(&self) -> bool {
        !matches!(self, BalanceEffect::Unchanged)
    }
}

/// Decide the balance effect of moving a leave of `days` from `current` to
/// `requested`.
///
/// Entering approved consumes. Leaving approved for cancelled or pending
/// restores, so a leave that is approved again later is not counted twice.
/// A rejection never touches the balance, even of an approved leave.
pub fn plan_transition(
    current: LeaveStatus,
    requested: LeaveStatus,
    days: Days,
    policy: TransitionPolicy,
) -> Result<BalanceEffect, TransitionError> {
    if !policy.allows(current, requested) {
        return Err(TransitionError::NotAllowed {
            from: current,
            to: requested,
        });
    }

    let effect = match (current, requested) {
        (LeaveStatus::Approved, LeaveStatus::Approved) => BalanceEffect::Unchanged,
        (_, LeaveStatus::Approved) => BalanceEffect::Consume(days),
        (LeaveStatus::Approved, LeaveStatus::Cancelled | LeaveStatus::Pending) => {
            BalanceEffect::Restore(days)
        }
        _ => BalanceEffect::Unchanged,
    };
    Ok(effect)
}

/// Balance effect of deleting a leave outright: approved days are released.
pub fn release_on_delete(status: LeaveStatus, days: Days) -> BalanceEffect {
    if status == LeaveStatus::Approved {
        BalanceEffect::Restore(days)
    } else {
        BalanceEffect::Unchanged
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    NotAllowed { from: LeaveStatus, to: LeaveStatus },
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransitionError::NotAllowed { from, to } => {
                write!(f, "transition from {} to {} is not allowed", from, to)
            }
        }
    }
}

impl std::error::Error for TransitionError {}
