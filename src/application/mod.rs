// Application layer: use cases over the repository, shared by every surface
// (CLI today, anything else that needs the ledger tomorrow).

pub mod error;
pub mod notification;
pub mod service;

pub use error::*;
pub use notification::*;
pub use service::*;
