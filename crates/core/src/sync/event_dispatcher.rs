//! Event dispatcher: derives and applies the role side effects of one row event.
//!
//! Role effects per event:
//! - `Created`: add member (and life member when flagged).
//! - `Updated`, identity changed (compared after normalization): remove member from the old identity (a
//!   missing old member is expected after a rename), then add member (and life
//!   member when flagged) to the new identity.
//! - `Updated`, flags changed: add life member when the new row is flagged.
//! - `Deleted`: remove member.
//!
//! The life member role is only ever added here, never removed.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::errors::{RoleFailure, RoleSyncError};

use super::role_sync::{
    is_life_member, normalize_identity, RoleChange, RoleKind, RoleOperation, RoleSynchronizer,
};
use super::row_model::{Row, RowEvent, RowEventKind, RowId};

/// What happened while dispatching one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub row_id: RowId,
    pub kind: RowEventKind,
    pub changes: Vec<RoleChange>,
    pub failures: Vec<RoleFailure>,
}

impl DispatchOutcome {
    fn new(event: &RowEvent) -> Self {
        Self {
            row_id: event.row_id(),
            kind: event.kind(),
            changes: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Serializable summary of a dispatch, for reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchSummary {
    pub row_id: RowId,
    pub kind: RowEventKind,
    pub applied_changes: usize,
    pub failures: Vec<String>,
}

impl From<&DispatchOutcome> for DispatchSummary {
    fn from(outcome: &DispatchOutcome) -> Self {
        Self {
            row_id: outcome.row_id,
            kind: outcome.kind,
            applied_changes: outcome.changes.iter().filter(|c| c.applied).count(),
            failures: outcome.failures.iter().map(|f| f.to_string()).collect(),
        }
    }
}

/// One role operation in a trigger's sequence.
struct RoleStep {
    identity: String,
    role: RoleKind,
    operation: RoleOperation,
    /// Swallow `MemberNotFound` for this step (old identity after a rename).
    tolerate_missing_member: bool,
}

impl RoleStep {
    fn add(identity: &str, role: RoleKind) -> Self {
        Self {
            identity: identity.to_string(),
            role,
            operation: RoleOperation::Add,
            tolerate_missing_member: false,
        }
    }

    fn remove_member(identity: &str) -> Self {
        Self {
            identity: identity.to_string(),
            role: RoleKind::Member,
            operation: RoleOperation::Remove,
            tolerate_missing_member: false,
        }
    }

    fn tolerating_missing_member(mut self) -> Self {
        self.tolerate_missing_member = true;
        self
    }
}

/// Steps granting membership to `row`'s identity.
fn grant_steps(identity: &str, row: &Row) -> Vec<RoleStep> {
    let mut steps = vec![RoleStep::add(identity, RoleKind::Member)];
    if is_life_member(row) {
        steps.push(RoleStep::add(identity, RoleKind::LifeMember));
    }
    steps
}

#[derive(Clone)]
pub struct EventDispatcher {
    roles: Arc<RoleSynchronizer>,
}

impl EventDispatcher {
    pub fn new(roles: Arc<RoleSynchronizer>) -> Self {
        Self { roles }
    }

    pub fn roles(&self) -> &RoleSynchronizer {
        &self.roles
    }

    /// Attempts every role effect of `event`. Never fails: role errors are
    /// logged and collected in the outcome.
    pub async fn dispatch(&self, event: &RowEvent) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::new(event);
        debug!(
            "[RoleSync] Dispatching {} event for row {}",
            outcome.kind, outcome.row_id
        );

        match event {
            RowEvent::Created(row) => {
                if let Some(identity) = normalize_identity(row.identity()) {
                    self.run(&mut outcome, grant_steps(&identity, row)).await;
                } else {
                    debug!("[RoleSync] Row {} has no identity; nothing to grant", row.id);
                }
            }
            RowEvent::Updated { new, old } => {
                let new_identity = normalize_identity(new.identity());
                let old_identity = normalize_identity(old.identity());

                if new_identity != old_identity {
                    let mut steps = Vec::new();
                    if let Some(old_identity) = old_identity.as_deref() {
                        steps.push(RoleStep::remove_member(old_identity).tolerating_missing_member());
                    }
                    if let Some(identity) = new_identity.as_deref() {
                        steps.extend(grant_steps(identity, new));
                    }
                    self.run(&mut outcome, steps).await;
                }

                if new.flags != old.flags && is_life_member(new) {
                    if let Some(identity) = new_identity.as_deref() {
                        self.run(&mut outcome, vec![RoleStep::add(identity, RoleKind::LifeMember)])
                            .await;
                    }
                }
            }
            RowEvent::Deleted(old) => {
                if let Some(identity) = normalize_identity(old.identity()) {
                    self.run(&mut outcome, vec![RoleStep::remove_member(&identity)])
                        .await;
                }
            }
        }

        outcome
    }

    /// Runs one trigger's steps in order.
    ///
    /// A lookup failure abandons only its own step. A missing member skips the
    /// remaining steps for that identity. A network failure abandons the rest
    /// of this trigger.
    async fn run(&self, outcome: &mut DispatchOutcome, steps: Vec<RoleStep>) {
        let mut unresolved: Option<String> = None;
        for step in steps {
            if unresolved.as_deref() == Some(step.identity.as_str()) {
                continue;
            }
            match self
                .roles
                .apply_role(&step.identity, step.role, step.operation)
                .await
            {
                Ok(change) => outcome.changes.push(change),
                Err(err) if step.tolerate_missing_member && err.is_member_not_found() => {
                    debug!(
                        "[RoleSync] Row {}: previous identity {} no longer resolves; skipping removal",
                        outcome.row_id, step.identity
                    );
                }
                Err(err) => {
                    warn!(
                        "[RoleSync] Row {}: failed to {} role '{}' for {}: {}",
                        outcome.row_id, step.operation, step.role, step.identity, err
                    );
                    let abandon_trigger = matches!(err, RoleSyncError::Network(_));
                    if err.is_member_not_found() {
                        unresolved = Some(step.identity.clone());
                    }
                    outcome.failures.push(RoleFailure {
                        row_id: outcome.row_id,
                        identity: step.identity,
                        role: step.role,
                        error: err,
                    });
                    if abandon_trigger {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::row_model::{Flag, LIFE_MEMBER_FLAG};
    use crate::sync::tests::{FakeDirectory, FakeFailure};

    fn dispatcher(directory: Arc<FakeDirectory>) -> EventDispatcher {
        EventDispatcher::new(Arc::new(RoleSynchronizer::new(
            directory,
            FakeDirectory::bindings(),
        )))
    }

    fn life(row: Row) -> Row {
        row.with_flag(Flag::new(LIFE_MEMBER_FLAG))
    }

    #[tokio::test]
    async fn created_grants_member_and_life_member() {
        let directory = Arc::new(FakeDirectory::with_members(&["bob"]));
        let outcome = dispatcher(directory.clone())
            .dispatch(&RowEvent::Created(life(Row::new(1).with_identity("Bob"))))
            .await;

        assert!(outcome.is_clean());
        assert_eq!(
            directory.added(),
            vec![
                ("bob".to_string(), RoleKind::Member),
                ("bob".to_string(), RoleKind::LifeMember)
            ]
        );
    }

    #[tokio::test]
    async fn created_without_identity_is_a_no_op() {
        let directory = Arc::new(FakeDirectory::with_members(&["bob"]));
        let outcome = dispatcher(directory.clone())
            .dispatch(&RowEvent::Created(life(Row::new(1))))
            .await;

        assert!(outcome.is_clean());
        assert!(outcome.changes.is_empty());
        assert_eq!(directory.call_count(), 0);
    }

    #[tokio::test]
    async fn dispatching_the_same_create_twice_is_idempotent() {
        let directory = Arc::new(FakeDirectory::with_members(&["bob"]));
        let dispatcher = dispatcher(directory.clone());
        let event = RowEvent::Created(Row::new(1).with_identity("bob"));

        let first = dispatcher.dispatch(&event).await;
        let second = dispatcher.dispatch(&event).await;

        assert!(first.is_clean() && second.is_clean());
        assert!(first.changes[0].applied);
        assert!(!second.changes[0].applied);
        assert_eq!(directory.added().len(), 1);
    }

    #[tokio::test]
    async fn rename_swallows_missing_old_member_and_grants_new() {
        let directory = Arc::new(FakeDirectory::with_members(&["newname"]));
        let outcome = dispatcher(directory.clone())
            .dispatch(&RowEvent::Updated {
                new: Row::new(1).with_identity("newname"),
                old: Row::new(1).with_identity("oldname"),
            })
            .await;

        assert!(outcome.is_clean());
        assert!(directory.removed().is_empty());
        assert_eq!(
            directory.added(),
            vec![("newname".to_string(), RoleKind::Member)]
        );
    }

    #[tokio::test]
    async fn rename_removes_member_from_resolvable_old_identity() {
        let directory = Arc::new(FakeDirectory::with_members(&["oldname", "newname"]));
        directory.grant("oldname", RoleKind::Member);
        directory.grant("oldname", RoleKind::LifeMember);

        let outcome = dispatcher(directory.clone())
            .dispatch(&RowEvent::Updated {
                new: life(Row::new(1).with_identity("newname")),
                old: life(Row::new(1).with_identity("oldname")),
            })
            .await;

        assert!(outcome.is_clean());
        assert_eq!(
            directory.removed(),
            vec![("oldname".to_string(), RoleKind::Member)]
        );
        assert!(directory.holds("oldname", RoleKind::LifeMember));
        assert!(directory.holds("newname", RoleKind::Member));
        assert!(directory.holds("newname", RoleKind::LifeMember));
    }

    #[tokio::test]
    async fn becoming_life_member_adds_only_life_role() {
        let directory = Arc::new(FakeDirectory::with_members(&["bob"]));
        directory.grant("bob", RoleKind::Member);

        let outcome = dispatcher(directory.clone())
            .dispatch(&RowEvent::Updated {
                new: life(Row::new(1).with_identity("bob")),
                old: Row::new(1).with_identity("bob"),
            })
            .await;

        assert!(outcome.is_clean());
        assert_eq!(
            directory.added(),
            vec![("bob".to_string(), RoleKind::LifeMember)]
        );
        assert!(directory.removed().is_empty());
    }

    #[tokio::test]
    async fn losing_life_member_flag_revokes_nothing() {
        let directory = Arc::new(FakeDirectory::with_members(&["bob"]));
        directory.grant("bob", RoleKind::Member);
        directory.grant("bob", RoleKind::LifeMember);

        let outcome = dispatcher(directory.clone())
            .dispatch(&RowEvent::Updated {
                new: Row::new(1).with_identity("bob"),
                old: life(Row::new(1).with_identity("bob")),
            })
            .await;

        assert!(outcome.is_clean());
        assert!(outcome.changes.is_empty());
        assert_eq!(directory.call_count(), 0);
    }

    #[tokio::test]
    async fn deleted_removes_member_but_keeps_life_member() {
        let directory = Arc::new(FakeDirectory::with_members(&["bob"]));
        directory.grant("bob", RoleKind::Member);
        directory.grant("bob", RoleKind::LifeMember);

        let outcome = dispatcher(directory.clone())
            .dispatch(&RowEvent::Deleted(life(Row::new(1).with_identity("bob"))))
            .await;

        assert!(outcome.is_clean());
        assert_eq!(directory.removed(), vec![("bob".to_string(), RoleKind::Member)]);
        assert!(directory.holds("bob", RoleKind::LifeMember));
    }

    #[tokio::test]
    async fn deleted_member_not_found_is_reported() {
        let directory = Arc::new(FakeDirectory::with_members(&[]));
        let outcome = dispatcher(directory)
            .dispatch(&RowEvent::Deleted(Row::new(4).with_identity("gone")))
            .await;

        assert_eq!(outcome.failures.len(), 1);
        assert!(outcome.failures[0].error.is_member_not_found());
    }

    #[tokio::test]
    async fn failure_in_one_trigger_does_not_block_the_other() {
        let directory = Arc::new(FakeDirectory::with_members(&["newname", "oldname"]));
        directory.grant("oldname", RoleKind::Member);
        directory.fail_on("oldname", FakeFailure::Network);

        let outcome = dispatcher(directory.clone())
            .dispatch(&RowEvent::Updated {
                new: life(Row::new(1).with_identity("newname")),
                old: Row::new(1).with_identity("oldname"),
            })
            .await;

        // Trigger 1 stops at the failed removal; trigger 2 still grants life member.
        assert_eq!(outcome.failures.len(), 1);
        assert!(matches!(
            outcome.failures[0].error,
            RoleSyncError::Network(_)
        ));
        assert_eq!(
            directory.added(),
            vec![("newname".to_string(), RoleKind::LifeMember)]
        );
    }

    #[tokio::test]
    async fn no_event_sequence_removes_life_member() {
        let directory = Arc::new(FakeDirectory::with_members(&["a", "b", "c"]));
        for name in ["a", "b", "c"] {
            directory.grant(name, RoleKind::Member);
            directory.grant(name, RoleKind::LifeMember);
        }
        let dispatcher = dispatcher(directory.clone());

        let events = vec![
            RowEvent::Updated {
                new: Row::new(1).with_identity("b"),
                old: life(Row::new(1).with_identity("a")),
            },
            RowEvent::Updated {
                new: Row::new(1),
                old: life(Row::new(1).with_identity("b")),
            },
            RowEvent::Deleted(life(Row::new(2).with_identity("c"))),
        ];
        for event in &events {
            dispatcher.dispatch(event).await;
        }

        assert!(directory
            .removed()
            .iter()
            .all(|(_, role)| *role == RoleKind::Member));
        for name in ["a", "b", "c"] {
            assert!(directory.holds(name, RoleKind::LifeMember));
        }
    }

    #[tokio::test]
    async fn missing_member_role_still_attempts_life_member() {
        let directory = Arc::new(FakeDirectory::with_members(&["bob"]));
        directory.hide_role(RoleKind::Member);

        let outcome = dispatcher(directory.clone())
            .dispatch(&RowEvent::Created(life(Row::new(1).with_identity("bob"))))
            .await;

        assert_eq!(outcome.failures.len(), 1);
        assert!(matches!(
            outcome.failures[0].error,
            RoleSyncError::LookupFailed(_)
        ));
        assert!(directory.holds("bob", RoleKind::LifeMember));
        assert!(!directory.holds("bob", RoleKind::Member));
    }

    #[tokio::test]
    async fn network_failure_abandons_rest_of_trigger() {
        let directory = Arc::new(FakeDirectory::with_members(&["bob"]));
        directory.fail_on("bob", FakeFailure::Network);

        let outcome = dispatcher(directory.clone())
            .dispatch(&RowEvent::Created(life(Row::new(1).with_identity("bob"))))
            .await;

        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].role, RoleKind::Member);
        assert_eq!(directory.call_count(), 1);
    }

    #[tokio::test]
    async fn unknown_member_is_reported_once_per_identity() {
        let directory = Arc::new(FakeDirectory::with_members(&[]));

        let outcome = dispatcher(directory.clone())
            .dispatch(&RowEvent::Created(life(Row::new(1).with_identity("ghost"))))
            .await;

        assert_eq!(outcome.failures.len(), 1);
        assert!(outcome.failures[0].error.is_member_not_found());
        assert_eq!(directory.call_count(), 0);
    }

    #[tokio::test]
    async fn case_only_rename_keeps_member_role() {
        let directory = Arc::new(FakeDirectory::with_members(&["bob"]));
        directory.grant("bob", RoleKind::Member);

        let outcome = dispatcher(directory.clone())
            .dispatch(&RowEvent::Updated {
                new: Row::new(1).with_identity("bob"),
                old: Row::new(1).with_identity("Bob"),
            })
            .await;

        assert!(outcome.is_clean());
        assert!(outcome.changes.is_empty());
        assert_eq!(directory.call_count(), 0);
        assert!(directory.holds("bob", RoleKind::Member));
    }
}
