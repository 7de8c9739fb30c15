//! Push notification payloads for row changes.

use serde::{Deserialize, Serialize};

use crate::errors::Result;

use super::row_model::{Row, RowId, RowProjection};

/// Wire shape of a row-change notification, before projection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event_type")]
pub enum RawRowNotification {
    #[serde(rename = "rows.created")]
    Created { items: Vec<serde_json::Value> },

    #[serde(rename = "rows.updated")]
    Updated {
        items: Vec<serde_json::Value>,
        old_items: Vec<serde_json::Value>,
    },

    #[serde(rename = "rows.deleted")]
    Deleted { row_ids: Vec<RowId> },
}

impl RawRowNotification {
    pub fn project(self, projection: &RowProjection) -> Result<RowNotification> {
        Ok(match self {
            Self::Created { items } => RowNotification::Created {
                items: projection.project_all(&items)?,
            },
            Self::Updated { items, old_items } => RowNotification::Updated {
                items: projection.project_all(&items)?,
                old_items: projection.project_all(&old_items)?,
            },
            Self::Deleted { row_ids } => RowNotification::Deleted { row_ids },
        })
    }
}

/// A projected batch of row changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowNotification {
    Created { items: Vec<Row> },
    Updated { items: Vec<Row>, old_items: Vec<Row> },
    Deleted { row_ids: Vec<RowId> },
}

impl RowNotification {
    pub fn event_type(&self) -> NotificationType {
        match self {
            Self::Created { .. } => NotificationType::RowsCreated,
            Self::Updated { .. } => NotificationType::RowsUpdated,
            Self::Deleted { .. } => NotificationType::RowsDeleted,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Created { items } | Self::Updated { items, .. } => items.len(),
            Self::Deleted { row_ids } => row_ids.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationType {
    #[serde(rename = "rows.created")]
    RowsCreated,
    #[serde(rename = "rows.updated")]
    RowsUpdated,
    #[serde(rename = "rows.deleted")]
    RowsDeleted,
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RowsCreated => f.write_str("rows.created"),
            Self::RowsUpdated => f.write_str("rows.updated"),
            Self::RowsDeleted => f.write_str("rows.deleted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::row_model::LIFE_MEMBER_FLAG;

    #[test]
    fn parses_and_projects_updated_payload() {
        let body = r#"{
            "table_id": 12,
            "database_id": 3,
            "workspace_id": 1,
            "event_id": "c7ed4a3c-3b5c-4a53-9b3e-8f5f2f0f8c7e",
            "event_type": "rows.updated",
            "items": [{"id": 1, "Discord": "Bob", "Flags": [{"id": 1, "value": "Life Member"}]}],
            "old_items": [{"id": 1, "Discord": "Bob", "Flags": []}]
        }"#;

        let raw: RawRowNotification = serde_json::from_str(body).expect("parse notification");
        let notification = raw
            .project(&RowProjection::default())
            .expect("project notification");

        match notification {
            RowNotification::Updated { items, old_items } => {
                assert!(items[0].has_flag(LIFE_MEMBER_FLAG));
                assert!(old_items[0].flags.is_empty());
            }
            other => panic!("expected update, got {:?}", other),
        }
    }

    #[test]
    fn parses_deleted_payload() {
        let raw: RawRowNotification =
            serde_json::from_str(r#"{"event_type": "rows.deleted", "row_ids": [4, 5]}"#)
                .expect("parse notification");
        let notification = raw.project(&RowProjection::default()).expect("project");

        assert_eq!(notification.event_type(), NotificationType::RowsDeleted);
        assert_eq!(notification.len(), 2);
    }

    #[test]
    fn rejects_unknown_event_type() {
        let result = serde_json::from_str::<RawRowNotification>(
            r#"{"event_type": "field.created", "field": {}}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn notification_type_serializes_to_wire_name() {
        assert_eq!(
            serde_json::to_string(&NotificationType::RowsUpdated).expect("serialize"),
            "\"rows.updated\""
        );
    }
}
