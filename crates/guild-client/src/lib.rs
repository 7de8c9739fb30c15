//! REST client for the community platform's guild, role and member endpoints.
//!
//! [`GuildClient`] implements [`rolesync_core::sync::MemberDirectory`] so the
//! role synchronizer can resolve members and add or remove roles.

mod client;
mod error;
mod types;

pub use client::{GuildClient, GuildClientConfig};
pub use error::{GuildClientError, Result};
pub use types::*;
