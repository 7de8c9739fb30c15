//! Offline collaborators for route and scheduler tests.

use std::sync::Arc;

use async_trait::async_trait;
use rolesync_core::errors::DirectoryError;
use rolesync_core::sync::{
    EventDispatcher, Guild, GuildRole, Member, MemberDirectory, ReconcileEngine, ReconcileHandle,
    RoleBindings, RoleSynchronizer, Row, RowPage, RowProjection, RowSource,
};

use crate::main_lib::{AppState, WebhookAuth};

pub(crate) const TEST_SECRET: &str = "s3cret";
pub(crate) const TEST_SECRET_HEADER: &str = "x-webhook-secret";

/// A single-page table.
struct StaticRows(Vec<Row>);

#[async_trait]
impl RowSource for StaticRows {
    async fn fetch_page(&self, _next: Option<&str>) -> rolesync_core::Result<RowPage> {
        Ok(RowPage {
            results: self.0.clone(),
            next: None,
        })
    }
}

/// A guild where every identity resolves to a member holding no roles.
struct OpenGuild;

#[async_trait]
impl MemberDirectory for OpenGuild {
    async fn fetch_guild(&self, guild_id: &str) -> Result<Option<Guild>, DirectoryError> {
        Ok(Some(Guild {
            id: guild_id.to_string(),
            name: "Test".to_string(),
        }))
    }

    async fn fetch_role(
        &self,
        _guild: &Guild,
        role_id: &str,
    ) -> Result<Option<GuildRole>, DirectoryError> {
        Ok(Some(GuildRole {
            id: role_id.to_string(),
            name: role_id.to_string(),
        }))
    }

    async fn search_members(
        &self,
        _guild: &Guild,
        query: &str,
    ) -> Result<Vec<Member>, DirectoryError> {
        Ok(vec![Member {
            user_id: format!("id-{}", query),
            identity: query.to_string(),
            role_ids: Vec::new(),
        }])
    }

    async fn list_members(&self, _guild: &Guild) -> Result<Vec<Member>, DirectoryError> {
        Ok(Vec::new())
    }

    async fn add_role(
        &self,
        _guild: &Guild,
        _member: &Member,
        _role: &GuildRole,
    ) -> Result<(), DirectoryError> {
        Ok(())
    }

    async fn remove_role(
        &self,
        _guild: &Guild,
        _member: &Member,
        _role: &GuildRole,
    ) -> Result<(), DirectoryError> {
        Ok(())
    }
}

pub(crate) fn test_engine(rows: Vec<Row>) -> ReconcileHandle {
    let bindings = RoleBindings {
        guild_id: "100".to_string(),
        member_role_id: "7".to_string(),
        life_member_role_id: "8".to_string(),
    };
    let roles = Arc::new(RoleSynchronizer::new(Arc::new(OpenGuild), bindings));
    ReconcileEngine::new(Arc::new(StaticRows(rows)), EventDispatcher::new(roles)).spawn()
}

pub(crate) fn test_state(rows: Vec<Row>) -> Arc<AppState> {
    Arc::new(AppState::new(
        test_engine(rows),
        RowProjection::default(),
        WebhookAuth::new(TEST_SECRET_HEADER, TEST_SECRET),
    ))
}
