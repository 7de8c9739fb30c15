//! Diff between the cached rows and a freshly fetched full snapshot.

use std::collections::HashMap;

use super::row_model::{Row, RowEvent, RowId};

/// Created/updated/deleted partitions of a snapshot diff.
///
/// Partitions are sorted by row id so refresh logs are stable; dispatch does
/// not depend on the order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowDiff {
    pub created: Vec<Row>,
    /// `(new, old)` pairs.
    pub updated: Vec<(Row, Row)>,
    pub deleted: Vec<Row>,
}

impl RowDiff {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len()
    }

    /// Events in dispatch order: creates, then updates, then deletes.
    pub fn into_events(self) -> Vec<RowEvent> {
        let mut events = Vec::with_capacity(self.len());
        events.extend(self.created.into_iter().map(RowEvent::Created));
        events.extend(
            self.updated
                .into_iter()
                .map(|(new, old)| RowEvent::Updated { new, old }),
        );
        events.extend(self.deleted.into_iter().map(RowEvent::Deleted));
        events
    }
}

/// Computes the minimal set of row events that turns `previous` into `fresh`.
///
/// `fresh` must be the complete table. If it lists an id twice the last
/// occurrence wins.
pub fn diff_rows(previous: &HashMap<RowId, Row>, fresh: &[Row]) -> RowDiff {
    let fresh_by_id: HashMap<RowId, &Row> = fresh.iter().map(|row| (row.id, row)).collect();

    let mut diff = RowDiff::default();

    for (id, row) in &fresh_by_id {
        match previous.get(id) {
            None => diff.created.push((*row).clone()),
            Some(old) if old != *row => diff.updated.push(((*row).clone(), old.clone())),
            Some(_) => {}
        }
    }

    for (id, old) in previous {
        if !fresh_by_id.contains_key(id) {
            diff.deleted.push(old.clone());
        }
    }

    diff.created.sort_by_key(|row| row.id);
    diff.updated.sort_by_key(|(new, _)| new.id);
    diff.deleted.sort_by_key(|row| row.id);
    diff
}
