use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use url::Url;

use shared::error::RemoteApiError;

use crate::auth::{ServiceAccountKey, TokenProvider};
use crate::{SheetSession, SheetsConfig, SheetsConnector};

const DEFAULT_API_BASE: &str = "https://sheets.googleapis.com/";

/// Connector for the Google Sheets v4 API.
pub struct GoogleSheetsConnector {
    http: Client,
    config: SheetsConfig,
    api_base: Url,
    token_url: Option<Url>,
}

impl GoogleSheetsConnector {
    pub fn new(config: SheetsConfig) -> Self {
        Self {
            http: Client::new(),
            config,
            api_base: Url::parse(DEFAULT_API_BASE).expect("default api base parses"),
            token_url: None,
        }
    }

    /// Points the connector at alternative endpoints. Used by tests and by
    /// deployments routed through a proxy.
    pub fn with_endpoints(mut self, api_base: Url, token_url: Url) -> Self {
        self.api_base = api_base;
        self.token_url = Some(token_url);
        self
    }

    fn resolve_token_url(&self, key: &ServiceAccountKey) -> Result<Url, RemoteApiError> {
        if let Some(url) = &self.token_url {
            return Ok(url.clone());
        }
        Url::parse(&key.token_uri).map_err(|err| {
            RemoteApiError::Access(format!(
                "credentials file carries an invalid token_uri '{}': {err}",
                key.token_uri
            ))
        })
    }
}

#[async_trait]
impl SheetsConnector for GoogleSheetsConnector {
    async fn connect(&self) -> Result<Arc<dyn SheetSession>, RemoteApiError> {
        if self.config.spreadsheet_id.trim().is_empty() {
            return Err(RemoteApiError::Access("spreadsheet id is not set".into()));
        }

        let key = ServiceAccountKey::load(&self.config.credentials_path)?;
        let token_url = self.resolve_token_url(&key)?;
        let tokens = Arc::new(TokenProvider::new(self.http.clone(), key, token_url));
        // Fetch a token up front so bad credentials fail the connect, not
        // the first queued scan.
        tokens.bearer().await?;
        self.establish(tokens).await
    }
}

impl GoogleSheetsConnector {
    /// Resolves the worksheet title to its sheet id and hands back a live
    /// session bound to it.
    async fn establish(
        &self,
        tokens: Arc<TokenProvider>,
    ) -> Result<Arc<dyn SheetSession>, RemoteApiError> {
        let metadata_url = self
            .api_base
            .join(&format!(
                "v4/spreadsheets/{}?fields=sheets.properties",
                self.config.spreadsheet_id
            ))
            .map_err(|err| RemoteApiError::Access(format!("invalid spreadsheet id: {err}")))?;

        let response = self
            .http
            .get(metadata_url)
            .bearer_auth(tokens.bearer().await?)
            .send()
            .await
            .map_err(transport)?;
        let response = check_status(response).await?;
        let metadata: SpreadsheetMetadata = response.json().await.map_err(transport)?;

        let sheet_id = metadata
            .sheets
            .iter()
            .find(|sheet| sheet.properties.title == self.config.sheet_name)
            .map(|sheet| sheet.properties.sheet_id)
            .ok_or_else(|| {
                RemoteApiError::Access(format!(
                    "cannot find sheet named '{}' in spreadsheet '{}'",
                    self.config.sheet_name, self.config.spreadsheet_id
                ))
            })?;

        info!(
            spreadsheet_id = %self.config.spreadsheet_id,
            sheet = %self.config.sheet_name,
            "spreadsheet access successful"
        );

        Ok(Arc::new(GoogleSheetSession {
            http: self.http.clone(),
            tokens,
            api_base: self.api_base.clone(),
            spreadsheet_id: self.config.spreadsheet_id.clone(),
            sheet_id,
        }))
    }
}

#[derive(Debug, Deserialize)]
struct SpreadsheetMetadata {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    sheet_id: i64,
    title: String,
}

struct GoogleSheetSession {
    http: Client,
    tokens: Arc<TokenProvider>,
    api_base: Url,
    spreadsheet_id: String,
    sheet_id: i64,
}

impl GoogleSheetSession {
    async fn batch_update(&self, requests: serde_json::Value) -> Result<(), RemoteApiError> {
        let url = self
            .api_base
            .join(&format!("v4/spreadsheets/{}:batchUpdate", self.spreadsheet_id))
            .map_err(|err| RemoteApiError::Access(format!("invalid spreadsheet id: {err}")))?;
        let response = self
            .http
            .post(url)
            .bearer_auth(self.tokens.bearer().await?)
            .json(&json!({ "requests": requests }))
            .send()
            .await
            .map_err(transport)?;
        check_status(response).await?;
        Ok(())
    }
}

#[async_trait]
impl SheetSession for GoogleSheetSession {
    async fn append_row(&self, values: &[String]) -> Result<(), RemoteApiError> {
        // New scans land in row 1 so "remove last barcode" is always a
        // delete of row 1.
        let cells: Vec<serde_json::Value> = values
            .iter()
            .map(|value| json!({ "userEnteredValue": { "stringValue": value } }))
            .collect();
        self.batch_update(json!([
            {
                "insertDimension": {
                    "range": {
                        "sheetId": self.sheet_id,
                        "dimension": "ROWS",
                        "startIndex": 0,
                        "endIndex": 1
                    },
                    "inheritFromBefore": false
                }
            },
            {
                "updateCells": {
                    "start": { "sheetId": self.sheet_id, "rowIndex": 0, "columnIndex": 0 },
                    "rows": [{ "values": cells }],
                    "fields": "userEnteredValue"
                }
            }
        ]))
        .await
    }

    async fn delete_row(&self, start_index: u32) -> Result<(), RemoteApiError> {
        if start_index == 0 {
            return Err(RemoteApiError::Api {
                code: 400,
                message: "row indexes are 1-based".to_string(),
            });
        }
        self.batch_update(json!([
            {
                "deleteDimension": {
                    "range": {
                        "sheetId": self.sheet_id,
                        "dimension": "ROWS",
                        "startIndex": start_index - 1,
                        "endIndex": start_index
                    }
                }
            }
        ]))
        .await
    }
}

fn transport(err: reqwest::Error) -> RemoteApiError {
    RemoteApiError::Transport(err.to_string())
}

/// Maps a non-success response onto the shared failure taxonomy.
async fn check_status(response: Response) -> Result<Response, RemoteApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_secs);
    let message = read_error_message(response).await;

    match status {
        StatusCode::TOO_MANY_REQUESTS => Err(RemoteApiError::RateLimited { retry_after }),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
            Err(RemoteApiError::Access(format!("{status}: {message}")))
        }
        _ => Err(RemoteApiError::Api {
            code: status.as_u16(),
            message,
        }),
    }
}

async fn read_error_message(response: Response) -> String {
    let raw = response.text().await.unwrap_or_default();
    serde_json::from_str::<serde_json::Value>(&raw)
        .ok()
        .and_then(|body| {
            body.get("error")?
                .get("message")
                .and_then(|message| message.as_str())
                .map(str::to_string)
        })
        .unwrap_or(raw)
}

#[cfg(test)]
#[path = "tests/google_tests.rs"]
mod tests;
