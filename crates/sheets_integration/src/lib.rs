//! Remote spreadsheet capability.
//!
//! The station core only sees the [`SheetsConnector`] / [`SheetSession`]
//! traits; the Google implementation lives behind them so tests can script
//! sessions without a network.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use shared::error::RemoteApiError;

mod auth;
mod google;

pub use auth::ServiceAccountKey;
pub use google::GoogleSheetsConnector;

/// Where the station writes its scans.
#[derive(Debug, Clone)]
pub struct SheetsConfig {
    /// Path to the service-account credentials JSON file.
    pub credentials_path: PathBuf,
    /// Spreadsheet key as it appears in the document URL.
    pub spreadsheet_id: String,
    /// Title of the destination worksheet inside the spreadsheet.
    pub sheet_name: String,
}

/// An authenticated handle to one worksheet.
///
/// A successful call mutates remote state exactly once; retry policy is the
/// caller's concern.
#[async_trait]
pub trait SheetSession: Send + Sync {
    /// Inserts a row of cell values at the top of the worksheet.
    async fn append_row(&self, values: &[String]) -> Result<(), RemoteApiError>;

    /// Deletes the worksheet row at a 1-based index.
    async fn delete_row(&self, start_index: u32) -> Result<(), RemoteApiError>;
}

impl std::fmt::Debug for dyn SheetSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SheetSession")
    }
}

/// Creates [`SheetSession`]s. Connecting validates credentials, the
/// spreadsheet id and the worksheet title; any of those missing is an
/// [`RemoteApiError::Access`] failure.
#[async_trait]
pub trait SheetsConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn SheetSession>, RemoteApiError>;
}
