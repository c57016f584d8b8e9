pub mod access;
mod balance;
mod business_year;
mod leave;
mod leave_type;
mod transition;
mod user;

pub use balance::*;
pub use business_year::*;
pub use leave::*;
pub use leave_type::*;
pub use transition::*;
pub use user::*;
