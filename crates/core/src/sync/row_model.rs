//! Row domain model, row-level events and the projection of raw table rows.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::errors::{Error, Result};

/// Stable identifier of a row in the remote table.
pub type RowId = i64;

/// Flag value that marks a row as a life member.
pub const LIFE_MEMBER_FLAG: &str = "Life Member";

/// Default column names used when projecting raw rows.
pub const DEFAULT_IDENTITY_FIELD: &str = "Discord";
pub const DEFAULT_FLAGS_FIELD: &str = "Flags";

/// One tagged marker on a row (a multi-select option on the table side).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Flag {
    pub id: Option<i64>,
    pub value: String,
}

impl Flag {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            id: None,
            value: value.into(),
        }
    }

    pub fn with_id(id: i64, value: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            value: value.into(),
        }
    }
}

/// Narrow view of a remote table row: only the fields that drive role assignment.
///
/// Equality is structural over all three fields. Flags are a set, so two
/// snapshots that list the same flags in a different order compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    pub id: RowId,
    pub identity: Option<String>,
    pub flags: BTreeSet<Flag>,
}

impl Row {
    pub fn new(id: RowId) -> Self {
        Self {
            id,
            identity: None,
            flags: BTreeSet::new(),
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn with_flag(mut self, flag: Flag) -> Self {
        self.flags.insert(flag);
        self
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn has_flag(&self, value: &str) -> bool {
        self.flags.iter().any(|flag| flag.value == value)
    }
}

/// Kind of a row-level change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowEventKind {
    Created,
    Updated,
    Deleted,
}

impl std::fmt::Display for RowEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        };
        f.write_str(name)
    }
}

/// Unit of work handed to the event dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowEvent {
    Created(Row),
    Updated { new: Row, old: Row },
    Deleted(Row),
}

impl RowEvent {
    pub fn row_id(&self) -> RowId {
        match self {
            Self::Created(row) | Self::Deleted(row) => row.id,
            Self::Updated { new, .. } => new.id,
        }
    }

    pub fn kind(&self) -> RowEventKind {
        match self {
            Self::Created(_) => RowEventKind::Created,
            Self::Updated { .. } => RowEventKind::Updated,
            Self::Deleted(_) => RowEventKind::Deleted,
        }
    }
}

/// One page of a paginated row listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowPage {
    pub results: Vec<Row>,
    pub next: Option<String>,
}

/// Projects raw JSON rows of an arbitrary table schema onto [`Row`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowProjection {
    pub identity_field: String,
    pub flags_field: String,
}

impl Default for RowProjection {
    fn default() -> Self {
        Self {
            identity_field: DEFAULT_IDENTITY_FIELD.to_string(),
            flags_field: DEFAULT_FLAGS_FIELD.to_string(),
        }
    }
}

impl RowProjection {
    pub fn new(identity_field: impl Into<String>, flags_field: impl Into<String>) -> Self {
        Self {
            identity_field: identity_field.into(),
            flags_field: flags_field.into(),
        }
    }

    pub fn project(&self, raw: &serde_json::Value) -> Result<Row> {
        let object = raw
            .as_object()
            .ok_or_else(|| Error::projection("row is not a JSON object"))?;

        let id = object
            .get("id")
            .and_then(|value| value.as_i64())
            .ok_or_else(|| Error::projection("row is missing an integer 'id'"))?;

        let identity = match object.get(&self.identity_field) {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(value)) => {
                let trimmed = value.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Some(other) => {
                return Err(Error::projection(format!(
                    "row {}: field '{}' is not a string ({})",
                    id, self.identity_field, other
                )))
            }
        };

        let flags = match object.get(&self.flags_field) {
            None | Some(serde_json::Value::Null) => BTreeSet::new(),
            Some(serde_json::Value::Array(options)) => options
                .iter()
                .map(|option| project_flag(id, option))
                .collect::<Result<BTreeSet<_>>>()?,
            Some(other) => {
                return Err(Error::projection(format!(
                    "row {}: field '{}' is not a list ({})",
                    id, self.flags_field, other
                )))
            }
        };

        Ok(Row {
            id,
            identity,
            flags,
        })
    }

    pub fn project_all(&self, raw_rows: &[serde_json::Value]) -> Result<Vec<Row>> {
        raw_rows.iter().map(|raw| self.project(raw)).collect()
    }
}

fn project_flag(row_id: RowId, option: &serde_json::Value) -> Result<Flag> {
    match option {
        serde_json::Value::String(value) => Ok(Flag::new(value.clone())),
        serde_json::Value::Object(fields) => {
            let value = fields
                .get("value")
                .and_then(|value| value.as_str())
                .ok_or_else(|| {
                    Error::projection(format!("row {}: flag option without 'value'", row_id))
                })?;
            Ok(Flag {
                id: fields.get("id").and_then(|id| id.as_i64()),
                value: value.to_string(),
            })
        }
        other => Err(Error::projection(format!(
            "row {}: unsupported flag option {}",
            row_id, other
        ))),
    }
}
