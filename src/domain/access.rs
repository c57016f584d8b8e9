//! Role-based capability checks, evaluated by the service before it reads or
//! writes on behalf of an actor.

use super::{Actor, UserId, UserRole};

/// Admins and superusers see every record.
pub fn sees_everything(actor: &Actor) -> bool {
    actor.is_superuser || actor.role == UserRole::Admin
}

/// Whether `actor` may view a record owned by `owner`.
pub fn can_view(actor: &Actor, owner: UserId) -> bool {
    if sees_everything(actor) {
        return true;
    }
    actor.role == UserRole::Employee && actor.user_id == owner
}

/// Whether `actor` may create or edit records on behalf of `user`.
pub fn can_act_for(actor: &Actor, user: UserId) -> bool {
    can_view(actor, user)
}

/// Status is read-only for everyone but admins and superusers.
pub fn can_manage_status(actor: &Actor) -> bool {
    sees_everything(actor)
}

/// Users, years, leave types and allowances are administered by admins only.
pub fn can_administer(actor: &Actor) -> bool {
    sees_everything(actor)
}
