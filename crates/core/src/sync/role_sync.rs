//! Role synchronizer: maps rows to role operations and applies them through
//! the member-management collaborator.

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::errors::{DirectoryError, RoleSyncError};

use super::row_model::{Row, LIFE_MEMBER_FLAG};

/// Marks the legacy `name#1234` identity format. Identities containing it are
/// compared case-sensitively.
pub const IDENTITY_DISCRIMINATOR: char = '#';

/// Normalizes a raw identity into the join key used against community members.
pub fn normalize_identity(raw: Option<&str>) -> Option<String> {
    let raw = raw?;
    if raw.contains(IDENTITY_DISCRIMINATOR) {
        Some(raw.to_string())
    } else {
        Some(raw.to_lowercase())
    }
}

pub fn is_life_member(row: &Row) -> bool {
    row.has_flag(LIFE_MEMBER_FLAG)
}

/// The two role categories managed by the sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    Member,
    LifeMember,
}

impl std::fmt::Display for RoleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Member => f.write_str("member"),
            Self::LifeMember => f.write_str("life member"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleOperation {
    Add,
    Remove,
}

impl std::fmt::Display for RoleOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Add => f.write_str("add"),
            Self::Remove => f.write_str("remove"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guild {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildRole {
    pub id: String,
    pub name: String,
}

/// A community member as reported by the collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub user_id: String,
    /// `username`, or `username#discriminator` for legacy accounts.
    pub identity: String,
    pub role_ids: Vec<String>,
}

impl Member {
    pub fn has_role(&self, role_id: &str) -> bool {
        self.role_ids.iter().any(|id| id == role_id)
    }
}

/// Member-management collaborator.
///
/// Lookups return `Ok(None)` when the guild or role does not exist; errors are
/// reserved for transport and API failures.
#[async_trait]
pub trait MemberDirectory: Send + Sync {
    async fn fetch_guild(&self, guild_id: &str) -> Result<Option<Guild>, DirectoryError>;

    async fn fetch_role(
        &self,
        guild: &Guild,
        role_id: &str,
    ) -> Result<Option<GuildRole>, DirectoryError>;

    /// Members whose username starts with `query`.
    async fn search_members(
        &self,
        guild: &Guild,
        query: &str,
    ) -> Result<Vec<Member>, DirectoryError>;

    /// Every member of the guild.
    async fn list_members(&self, guild: &Guild) -> Result<Vec<Member>, DirectoryError>;

    async fn add_role(
        &self,
        guild: &Guild,
        member: &Member,
        role: &GuildRole,
    ) -> Result<(), DirectoryError>;

    async fn remove_role(
        &self,
        guild: &Guild,
        member: &Member,
        role: &GuildRole,
    ) -> Result<(), DirectoryError>;
}

/// Which guild and role ids the role kinds map to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleBindings {
    pub guild_id: String,
    pub member_role_id: String,
    pub life_member_role_id: String,
}

impl RoleBindings {
    pub fn role_id(&self, kind: RoleKind) -> &str {
        match kind {
            RoleKind::Member => &self.member_role_id,
            RoleKind::LifeMember => &self.life_member_role_id,
        }
    }
}

/// Outcome of resolving something through the collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
    Failure(RoleSyncError),
}

impl<T> Lookup<T> {
    fn from_directory(result: Result<Option<T>, DirectoryError>) -> Self {
        match result {
            Ok(Some(value)) => Self::Found(value),
            Ok(None) => Self::NotFound,
            Err(err) => Self::Failure(err.into()),
        }
    }

    fn or_error(self, not_found: impl FnOnce() -> RoleSyncError) -> Result<T, RoleSyncError> {
        match self {
            Self::Found(value) => Ok(value),
            Self::NotFound => Err(not_found()),
            Self::Failure(err) => Err(err),
        }
    }
}

/// One attempted role change. `applied` is false when the member was already
/// in the requested state and no write was issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleChange {
    pub identity: String,
    pub role: RoleKind,
    pub operation: RoleOperation,
    pub applied: bool,
}

/// Result of removing the member role from members absent from the table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneOutcome {
    pub pruned: Vec<String>,
    pub failures: Vec<(String, RoleSyncError)>,
}

pub struct RoleSynchronizer {
    directory: Arc<dyn MemberDirectory>,
    bindings: RoleBindings,
}

impl RoleSynchronizer {
    pub fn new(directory: Arc<dyn MemberDirectory>, bindings: RoleBindings) -> Self {
        Self {
            directory,
            bindings,
        }
    }

    pub fn bindings(&self) -> &RoleBindings {
        &self.bindings
    }

    /// Adds or removes one role on the member matching `identity`.
    pub async fn apply_role(
        &self,
        identity: &str,
        role: RoleKind,
        operation: RoleOperation,
    ) -> Result<RoleChange, RoleSyncError> {
        let identity = normalize_identity(Some(identity)).unwrap_or_default();
        let guild = self.resolve_guild().await?;
        let guild_role = self.resolve_role(&guild, role).await?;
        let member = self
            .resolve_member(&guild, &identity)
            .await
            .or_error(|| RoleSyncError::MemberNotFound {
                identity: identity.clone(),
            })?;

        let holds_role = member.has_role(&guild_role.id);
        let applied = match (operation, holds_role) {
            (RoleOperation::Add, false) => {
                self.directory
                    .add_role(&guild, &member, &guild_role)
                    .await?;
                true
            }
            (RoleOperation::Remove, true) => {
                self.directory
                    .remove_role(&guild, &member, &guild_role)
                    .await?;
                true
            }
            _ => false,
        };

        if applied {
            info!("[RoleSync] {} role '{}' for {}", operation, role, identity);
        } else {
            debug!(
                "[RoleSync] {} role '{}' for {} is a no-op",
                operation, role, identity
            );
        }

        Ok(RoleChange {
            identity,
            role,
            operation,
            applied,
        })
    }

    /// Removes the member role from every holder whose identity is not in
    /// `expected` (a set of normalized identities). The life member role is
    /// never touched.
    pub async fn prune_members(
        &self,
        expected: &HashSet<String>,
    ) -> Result<PruneOutcome, RoleSyncError> {
        let guild = self.resolve_guild().await?;
        let member_role = self.resolve_role(&guild, RoleKind::Member).await?;
        let members = self.directory.list_members(&guild).await?;

        let mut outcome = PruneOutcome::default();
        for member in members
            .iter()
            .filter(|member| member.has_role(&member_role.id))
            .filter(|member| !expected.contains(&member.identity))
        {
            match self
                .directory
                .remove_role(&guild, member, &member_role)
                .await
            {
                Ok(()) => {
                    info!(
                        "[RoleSync] Pruned member role from {} (not in table)",
                        member.identity
                    );
                    outcome.pruned.push(member.identity.clone());
                }
                Err(err) => {
                    warn!(
                        "[RoleSync] Failed to prune member role from {}: {}",
                        member.identity, err
                    );
                    outcome
                        .failures
                        .push((member.identity.clone(), RoleSyncError::from(err)));
                }
            }
        }
        Ok(outcome)
    }

    async fn resolve_guild(&self) -> Result<Guild, RoleSyncError> {
        let guild_id = &self.bindings.guild_id;
        Lookup::from_directory(self.directory.fetch_guild(guild_id).await)
            .or_error(|| RoleSyncError::lookup_failed(format!("guild {} not found", guild_id)))
    }

    async fn resolve_role(&self, guild: &Guild, kind: RoleKind) -> Result<GuildRole, RoleSyncError> {
        let role_id = self.bindings.role_id(kind);
        Lookup::from_directory(self.directory.fetch_role(guild, role_id).await).or_error(|| {
            RoleSyncError::lookup_failed(format!(
                "{} role {} not found in guild {}",
                kind, role_id, guild.id
            ))
        })
    }

    async fn resolve_member(&self, guild: &Guild, identity: &str) -> Lookup<Member> {
        let query = identity
            .split(IDENTITY_DISCRIMINATOR)
            .next()
            .unwrap_or(identity);
        let candidates = match self.directory.search_members(guild, query).await {
            Ok(members) => members,
            Err(err) => return Lookup::Failure(err.into()),
        };

        let mut matches = candidates.into_iter().filter(|member| {
            normalize_identity(Some(member.identity.as_str())).as_deref() == Some(identity)
        });
        match (matches.next(), matches.next()) {
            (Some(member), None) => Lookup::Found(member),
            (None, _) => Lookup::NotFound,
            (Some(_), Some(_)) => Lookup::Failure(RoleSyncError::lookup_failed(format!(
                "identity '{}' matches more than one member",
                identity
            ))),
        }
    }
}
