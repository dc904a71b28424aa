//! Durable snapshot format for the pending-operation queue.
//!
//! The station writes whatever is still queued to a JSON file on controlled
//! shutdown and rehydrates it at the next start. Field names here are the
//! on-disk contract; keep them stable across releases.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::operation::{Operation, OperationKind};

/// Version stamped into every snapshot. Readers refuse a different major.
pub const SNAPSHOT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueSnapshot {
    pub version: String,
    pub items: Vec<PersistedOperation>,
}

impl QueueSnapshot {
    pub fn new(items: Vec<PersistedOperation>) -> Self {
        Self {
            version: SNAPSHOT_VERSION.to_string(),
            items,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Snapshots from a different major version are discarded rather than
    /// guessed at.
    pub fn is_compatible(&self) -> bool {
        major_component(&self.version) == major_component(SNAPSHOT_VERSION)
    }
}

fn major_component(version: &str) -> Option<&str> {
    version.split('.').next().filter(|major| !major.is_empty())
}

/// One queued operation as written to disk. The remote-action reference is
/// carried as its symbolic kind name and rebound when the dispatcher next
/// executes it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistedOperation {
    pub id: Uuid,
    #[serde(flatten)]
    pub kind: PersistedKind,
    pub post_success_delay_seconds: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind")]
pub enum PersistedKind {
    AppendRow {
        values: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    DeleteRow {
        start_index: u32,
    },
    Reconnect,
    Custom {
        name: String,
    },
}

impl From<&Operation> for PersistedOperation {
    fn from(op: &Operation) -> Self {
        let kind = match &op.kind {
            OperationKind::AppendRow { values } => PersistedKind::AppendRow {
                values: values.clone(),
            },
            OperationKind::DeleteRow { start_index } => PersistedKind::DeleteRow {
                start_index: *start_index,
            },
            OperationKind::Reconnect => PersistedKind::Reconnect,
            OperationKind::Custom { name } => PersistedKind::Custom { name: name.clone() },
        };
        Self {
            id: op.id,
            kind,
            post_success_delay_seconds: op.post_success_delay.as_secs_f64(),
        }
    }
}

impl From<PersistedOperation> for Operation {
    fn from(persisted: PersistedOperation) -> Self {
        let kind = match persisted.kind {
            PersistedKind::AppendRow { values } => OperationKind::AppendRow { values },
            PersistedKind::DeleteRow { start_index } => OperationKind::DeleteRow { start_index },
            PersistedKind::Reconnect => OperationKind::Reconnect,
            PersistedKind::Custom { name } => OperationKind::Custom { name },
        };
        Self {
            id: persisted.id,
            kind,
            post_success_delay: std::time::Duration::from_secs_f64(
                persisted.post_success_delay_seconds.max(0.0),
            ),
        }
    }
}
