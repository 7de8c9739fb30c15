//! REST client for the remote table that holds member rows.
//!
//! [`TableClient`] pages through the table's row listing and projects each raw
//! row onto the core [`rolesync_core::sync::Row`] model, so it can be plugged
//! into the reconciliation engine as a [`rolesync_core::sync::RowSource`].

mod client;
mod error;
mod types;

pub use client::{TableClient, TableClientConfig};
pub use error::{Result, TableClientError};
pub use types::*;
