use std::fmt;
use std::time::Duration;

use uuid::Uuid;

/// Cooldown after a successful remote call so a burst of scans cannot max
/// out the spreadsheet API quota.
pub const DEFAULT_COURTESY_DELAY: Duration = Duration::from_secs(4);

/// One unit of remote spreadsheet work queued for the dispatch worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub id: Uuid,
    pub kind: OperationKind,
    /// How long the worker rests after this operation succeeds.
    pub post_success_delay: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationKind {
    /// Insert a row of cell values at the top of the worksheet.
    AppendRow { values: Vec<String> },
    /// Delete the worksheet row at a 1-based index.
    DeleteRow { start_index: u32 },
    /// Tear down and re-establish the spreadsheet session.
    Reconnect,
    /// A kind this station has no remote action for. Kept so a snapshot
    /// written by a newer minor version can still name what it held.
    Custom { name: String },
}

impl Operation {
    pub fn append_row(values: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: OperationKind::AppendRow { values },
            post_success_delay: DEFAULT_COURTESY_DELAY,
        }
    }

    pub fn delete_row(start_index: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: OperationKind::DeleteRow { start_index },
            post_success_delay: DEFAULT_COURTESY_DELAY,
        }
    }

    /// Overrides the post-success cooldown. Stations behind a paid quota
    /// tier shorten it; tests shrink it to milliseconds.
    pub fn with_post_success_delay(mut self, delay: Duration) -> Self {
        self.post_success_delay = delay;
        self
    }

    /// Reconnects skip the courtesy delay; authorization does not count
    /// against the per-sheet quota.
    pub fn reconnect() -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: OperationKind::Reconnect,
            post_success_delay: Duration::ZERO,
        }
    }
}

impl OperationKind {
    pub fn name(&self) -> &str {
        match self {
            OperationKind::AppendRow { .. } => "AppendRow",
            OperationKind::DeleteRow { .. } => "DeleteRow",
            OperationKind::Reconnect => "Reconnect",
            OperationKind::Custom { name } => name,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::AppendRow { values } => {
                write!(f, "AppendRow({})", values.join(", "))
            }
            OperationKind::DeleteRow { start_index } => {
                write!(f, "DeleteRow({start_index})")
            }
            OperationKind::Reconnect => write!(f, "Reconnect"),
            OperationKind::Custom { name } => write!(f, "Custom({name})"),
        }
    }
}
