//! Reconciliation core for keeping community roles in step with the rows of a
//! remote table.
//!
//! Network collaborators (the table API and the member-management API) are
//! consumed through the [`sync::RowSource`] and [`sync::MemberDirectory`] traits;
//! concrete HTTP implementations live in their own crates.

pub mod errors;
pub mod sync;

pub use errors::{Error, Result};
