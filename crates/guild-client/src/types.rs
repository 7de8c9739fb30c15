//! Wire types of the guild API.

use serde::{Deserialize, Serialize};

/// Discriminator value carried by accounts on the unique-username system.
pub const MODERN_DISCRIMINATOR: &str = "0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildResponse {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleResponse {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub discriminator: Option<String>,
}

impl UserResponse {
    /// `username`, or `username#discriminator` for legacy accounts.
    pub fn identity(&self) -> String {
        match self.discriminator.as_deref() {
            Some(disc) if !disc.is_empty() && disc != MODERN_DISCRIMINATOR => {
                format!("{}#{}", self.username, disc)
            }
            _ => self.username.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberResponse {
    pub user: UserResponse,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Error body returned by the guild API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    pub message: String,
    #[serde(default)]
    pub code: Option<i64>,
}

/// Body of a 429 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitResponse {
    pub retry_after: f64,
    #[serde(default)]
    pub global: bool,
}
