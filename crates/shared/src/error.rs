use std::time::Duration;

use thiserror::Error;

/// Failure classes surfaced by the remote spreadsheet capability.
///
/// Only the dispatch worker observes these; it maps each class onto its
/// retry policy and never lets a raw transport error reach the foreground.
#[derive(Debug, Clone, Error)]
pub enum RemoteApiError {
    /// The remote API asked us to slow down. Retried against a bounded
    /// failure budget.
    #[error("remote API rate limit exceeded")]
    RateLimited {
        /// Server-provided hint for when to try again, if any.
        retry_after: Option<Duration>,
    },

    /// Credentials are missing or malformed, the spreadsheet id is invalid,
    /// or the worksheet does not exist. Permanent; never retried.
    #[error("spreadsheet access failure: {0}")]
    Access(String),

    /// The remote API rejected the call for a reason we do not have a
    /// policy for.
    #[error("unhandled remote API error {code}: {message}")]
    Api { code: u16, message: String },

    /// Socket-level or timeout failure between the station and the API.
    #[error("transport failure reaching remote API: {0}")]
    Transport(String),
}

impl RemoteApiError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, RemoteApiError::RateLimited { .. })
    }

    pub fn is_access(&self) -> bool {
        matches!(self, RemoteApiError::Access(_))
    }
}
