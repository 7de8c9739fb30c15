//! Reconciliation driver.
//!
//! A single engine task owns the row store and processes one command at a
//! time (full refresh, push notification, status query), so a refresh and a
//! notification never interleave their updates of the same row. Inside one
//! command, events for different rows run concurrently and each row store
//! commit happens as soon as that event's role sync settles.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::errors::{Error, Result};

use super::diff_engine::diff_rows;
use super::event_dispatcher::{DispatchOutcome, DispatchSummary, EventDispatcher};
use super::reconcile_scheduler::RetryClass;
use super::role_sync::normalize_identity;
use super::row_model::{Row, RowEvent, RowId, RowPage};
use super::row_notification::{NotificationType, RowNotification};
use super::row_store::RowStore;

/// Paginated read access to the remote table.
#[async_trait]
pub trait RowSource: Send + Sync {
    /// Fetches the first page when `next` is `None`, otherwise the page `next` points to.
    async fn fetch_page(&self, next: Option<&str>) -> Result<RowPage>;
}

/// Follows `next` links until exhausted and concatenates every page.
pub async fn fetch_all_rows(source: &dyn RowSource) -> Result<Vec<Row>> {
    let mut rows = Vec::new();
    let mut next: Option<String> = None;
    let mut pages = 0_usize;

    loop {
        let page = source.fetch_page(next.as_deref()).await?;
        pages += 1;
        rows.extend(page.results);
        match page.next {
            Some(url) if next.as_deref() == Some(url.as_str()) => {
                return Err(Error::fetch(
                    format!("Pagination did not advance past {}", url),
                    RetryClass::Permanent,
                ));
            }
            Some(url) => next = Some(url),
            None => break,
        }
    }

    debug!(
        "[RoleSync] Fetched {} rows across {} page(s)",
        rows.len(),
        pages
    );
    Ok(rows)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub fetched: usize,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub pruned: usize,
    pub failures: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationReport {
    pub batch_id: Uuid,
    pub event_type: NotificationType,
    pub received: usize,
    pub skipped: usize,
    pub dispatched: Vec<DispatchSummary>,
}

impl NotificationReport {
    pub fn failure_count(&self) -> usize {
        self.dispatched.iter().map(|d| d.failures.len()).sum()
    }
}

/// Lightweight engine status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub rows_cached: usize,
    pub refreshes_completed: u64,
    pub notifications_processed: u64,
    pub last_refresh: Option<RefreshReport>,
    pub last_error: Option<String>,
}

enum Command {
    Refresh {
        reply: oneshot::Sender<Result<RefreshReport>>,
    },
    Notification {
        batch_id: Uuid,
        notification: RowNotification,
        reply: Option<oneshot::Sender<NotificationReport>>,
    },
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
}

/// Cloneable front door to a spawned [`ReconcileEngine`].
#[derive(Clone)]
pub struct ReconcileHandle {
    sender: mpsc::UnboundedSender<Command>,
}

impl ReconcileHandle {
    /// Runs a full refresh and waits for its report.
    pub async fn refresh(&self) -> Result<RefreshReport> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(Command::Refresh { reply })
            .map_err(|_| Error::EngineStopped)?;
        response.await.map_err(|_| Error::EngineStopped)?
    }

    /// Queues a notification and returns its batch id without waiting for role sync.
    pub fn notify(&self, notification: RowNotification) -> Result<Uuid> {
        let batch_id = Uuid::new_v4();
        self.sender
            .send(Command::Notification {
                batch_id,
                notification,
                reply: None,
            })
            .map_err(|_| Error::EngineStopped)?;
        Ok(batch_id)
    }

    /// Queues a notification and waits until every event in it has settled.
    pub async fn notify_and_wait(&self, notification: RowNotification) -> Result<NotificationReport> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(Command::Notification {
                batch_id: Uuid::new_v4(),
                notification,
                reply: Some(reply),
            })
            .map_err(|_| Error::EngineStopped)?;
        response.await.map_err(|_| Error::EngineStopped)
    }

    pub async fn status(&self) -> Result<EngineStatus> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(Command::Status { reply })
            .map_err(|_| Error::EngineStopped)?;
        response.await.map_err(|_| Error::EngineStopped)
    }
}

pub struct ReconcileEngine {
    store: RowStore,
    source: Arc<dyn RowSource>,
    dispatcher: EventDispatcher,
    refreshes_completed: u64,
    notifications_processed: u64,
    last_refresh: Option<RefreshReport>,
    last_error: Option<String>,
}

impl ReconcileEngine {
    pub fn new(source: Arc<dyn RowSource>, dispatcher: EventDispatcher) -> Self {
        Self {
            store: RowStore::new(),
            source,
            dispatcher,
            refreshes_completed: 0,
            notifications_processed: 0,
            last_refresh: None,
            last_error: None,
        }
    }

    pub fn store(&self) -> &RowStore {
        &self.store
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            rows_cached: self.store.len(),
            refreshes_completed: self.refreshes_completed,
            notifications_processed: self.notifications_processed,
            last_refresh: self.last_refresh.clone(),
            last_error: self.last_error.clone(),
        }
    }

    /// Moves the engine onto its own task. Must be called inside a tokio runtime.
    pub fn spawn(self) -> ReconcileHandle {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(self.run(receiver));
        ReconcileHandle { sender }
    }

    async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<Command>) {
        info!("[RoleSync] Reconciliation engine started");
        while let Some(command) = receiver.recv().await {
            match command {
                Command::Refresh { reply } => {
                    let result = self.refresh().await;
                    let _ = reply.send(result);
                }
                Command::Notification {
                    batch_id,
                    notification,
                    reply,
                } => {
                    let report = self.apply_notification(batch_id, notification).await;
                    if let Some(reply) = reply {
                        let _ = reply.send(report);
                    }
                }
                Command::Status { reply } => {
                    let _ = reply.send(self.status());
                }
            }
        }
        info!("[RoleSync] Reconciliation engine stopped (all handles dropped)");
    }

    /// Full refresh: fetch every page, diff against the store, dispatch the
    /// diff, then prune member roles of identities missing from the table.
    pub async fn refresh(&mut self) -> Result<RefreshReport> {
        let started_at = Utc::now();
        let timer = Instant::now();

        let fresh = match fetch_all_rows(self.source.as_ref()).await {
            Ok(rows) => rows,
            Err(err) => {
                warn!("[RoleSync] Full refresh aborted: {}", err);
                self.last_error = Some(err.to_string());
                return Err(err);
            }
        };

        let diff = diff_rows(self.store.rows(), &fresh);
        let (created, updated, deleted) =
            (diff.created.len(), diff.updated.len(), diff.deleted.len());
        debug!(
            "[RoleSync] Refresh diff: created={} updated={} deleted={}",
            created, updated, deleted
        );

        let outcomes =
            dispatch_and_commit(&self.dispatcher, &mut self.store, diff.into_events()).await;
        let mut failures: Vec<String> = outcomes
            .iter()
            .flat_map(|outcome| outcome.failures.iter().map(ToString::to_string))
            .collect();

        let expected: HashSet<String> = fresh
            .iter()
            .filter_map(|row| normalize_identity(row.identity()))
            .collect();
        let pruned = match self.dispatcher.roles().prune_members(&expected).await {
            Ok(outcome) => {
                failures.extend(
                    outcome
                        .failures
                        .iter()
                        .map(|(identity, err)| format!("prune {}: {}", identity, err)),
                );
                outcome.pruned.len()
            }
            Err(err) => {
                warn!("[RoleSync] Prune skipped: {}", err);
                failures.push(format!("prune: {}", err));
                0
            }
        };

        let report = RefreshReport {
            started_at,
            finished_at: Utc::now(),
            duration_ms: timer.elapsed().as_millis() as i64,
            fetched: fresh.len(),
            created,
            updated,
            deleted,
            pruned,
            failures,
        };
        info!(
            "[RoleSync] Refresh complete fetched={} created={} updated={} deleted={} pruned={} failures={} duration_ms={}",
            report.fetched,
            report.created,
            report.updated,
            report.deleted,
            report.pruned,
            report.failures.len(),
            report.duration_ms
        );

        self.refreshes_completed += 1;
        self.last_error = None;
        self.last_refresh = Some(report.clone());
        Ok(report)
    }

    /// Incremental path: dispatch the events carried by one notification.
    pub async fn apply_notification(
        &mut self,
        batch_id: Uuid,
        notification: RowNotification,
    ) -> NotificationReport {
        let event_type = notification.event_type();
        let received = notification.len();
        let (events, skipped) = self.events_for_notification(batch_id, notification);
        debug!(
            "[RoleSync] Notification {} ({}): {} item(s), {} event(s), {} skipped",
            batch_id,
            event_type,
            received,
            events.len(),
            skipped
        );

        let outcomes = dispatch_and_commit(&self.dispatcher, &mut self.store, events).await;
        self.notifications_processed += 1;

        NotificationReport {
            batch_id,
            event_type,
            received,
            skipped,
            dispatched: outcomes.iter().map(DispatchSummary::from).collect(),
        }
    }

    fn events_for_notification(
        &self,
        batch_id: Uuid,
        notification: RowNotification,
    ) -> (Vec<RowEvent>, usize) {
        let mut events = Vec::new();
        let mut skipped = 0;

        match notification {
            RowNotification::Created { items } => {
                for row in latest_by_id(items) {
                    if self.store.get(row.id) == Some(&row) {
                        debug!(
                            "[RoleSync] Notification {}: row {} already cached, duplicate create",
                            batch_id, row.id
                        );
                        skipped += 1;
                        continue;
                    }
                    events.push(RowEvent::Created(row));
                }
            }
            RowNotification::Updated { items, old_items } => {
                let mut old_by_id: HashMap<RowId, Row> =
                    old_items.into_iter().map(|row| (row.id, row)).collect();
                for row in latest_by_id(items) {
                    let Some(old) = old_by_id.remove(&row.id) else {
                        warn!(
                            "[RoleSync] Notification {}: no previous value for row {}, skipping",
                            batch_id, row.id
                        );
                        skipped += 1;
                        continue;
                    };
                    if self.store.get(row.id) == Some(&row) {
                        debug!(
                            "[RoleSync] Notification {}: row {} already up to date, duplicate update",
                            batch_id, row.id
                        );
                        skipped += 1;
                        continue;
                    }
                    events.push(RowEvent::Updated { new: row, old });
                }
            }
            RowNotification::Deleted { row_ids } => {
                let mut seen = HashSet::new();
                for id in row_ids {
                    if !seen.insert(id) {
                        continue;
                    }
                    match self.store.get(id) {
                        Some(old) => events.push(RowEvent::Deleted(old.clone())),
                        None => {
                            info!(
                                "[RoleSync] Notification {}: deleted row {} is not cached, skipping",
                                batch_id, id
                            );
                            skipped += 1;
                        }
                    }
                }
            }
        }

        (events, skipped)
    }
}

/// Drops earlier duplicates of the same row id, keeping the last occurrence.
fn latest_by_id(rows: Vec<Row>) -> Vec<Row> {
    let mut seen = HashSet::new();
    let mut latest: Vec<Row> = rows
        .into_iter()
        .rev()
        .filter(|row| seen.insert(row.id))
        .collect();
    latest.reverse();
    latest
}

/// Dispatches `events` concurrently and commits each to the store once its
/// role sync has settled, whatever the outcome.
async fn dispatch_and_commit(
    dispatcher: &EventDispatcher,
    store: &mut RowStore,
    events: Vec<RowEvent>,
) -> Vec<DispatchOutcome> {
    let mut in_flight: FuturesUnordered<_> = events
        .into_iter()
        .map(move |event| async move {
            let outcome = dispatcher.dispatch(&event).await;
            (event, outcome)
        })
        .collect();

    let mut outcomes = Vec::new();
    while let Some((event, outcome)) = in_flight.next().await {
        store.apply_event(&event);
        outcomes.push(outcome);
    }
    outcomes
}
