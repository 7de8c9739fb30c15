//! In-memory cache of the last-known remote table contents.

use std::collections::{BTreeSet, HashMap};

use super::row_model::{Row, RowEvent, RowId};

/// Mapping `RowId -> Row`. Not synchronized; the reconciliation engine is its
/// only owner and serializes every mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowStore {
    rows: HashMap<RowId, Row>,
}

impl RowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: RowId) -> Option<&Row> {
        self.rows.get(&id)
    }

    pub fn set(&mut self, id: RowId, row: Row) -> Option<Row> {
        self.rows.insert(id, row)
    }

    pub fn delete(&mut self, id: RowId) -> Option<Row> {
        self.rows.remove(&id)
    }

    pub fn keys(&self) -> BTreeSet<RowId> {
        self.rows.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Read-only view used as the "previous" side of a diff.
    pub fn rows(&self) -> &HashMap<RowId, Row> {
        &self.rows
    }

    /// Commits the row-level effect of an event whose role sync was attempted.
    pub fn apply_event(&mut self, event: &RowEvent) {
        match event {
            RowEvent::Created(row) | RowEvent::Updated { new: row, .. } => {
                self.set(row.id, row.clone());
            }
            RowEvent::Deleted(old) => {
                self.delete(old.id);
            }
        }
    }
}

impl FromIterator<Row> for RowStore {
    fn from_iter<I: IntoIterator<Item = Row>>(iter: I) -> Self {
        Self {
            rows: iter.into_iter().map(|row| (row.id, row)).collect(),
        }
    }
}
