use std::{collections::HashMap, env, fs, path::Path};

use serde::Deserialize;

use shared::domain::DEFAULT_BARCODE_PATTERN;
use station_core::connectivity::DEFAULT_PROBE_ADDR;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub spreadsheet_id: String,
    pub sheet_name: String,
    pub credentials_path: String,
    pub queue_path: String,
    pub history_path: String,
    pub barcode_pattern: String,
    pub probe_addr: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            spreadsheet_id: String::new(),
            sheet_name: "Scan".into(),
            credentials_path: "credentials.json".into(),
            queue_path: "./data/queue.json".into(),
            history_path: "scan_history.log".into(),
            barcode_pattern: DEFAULT_BARCODE_PATTERN.into(),
            probe_addr: DEFAULT_PROBE_ADDR.into(),
        }
    }
}

pub fn load_settings(path: &Path) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        apply_file_overrides(&mut settings, &raw);
    }
    apply_env_overrides(&mut settings);

    settings
}

fn apply_file_overrides(settings: &mut Settings, raw: &str) {
    if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(raw) {
        if let Some(v) = file_cfg.get("spreadsheet_id") {
            settings.spreadsheet_id = v.clone();
        }
        if let Some(v) = file_cfg.get("sheet_name") {
            settings.sheet_name = v.clone();
        }
        if let Some(v) = file_cfg.get("credentials_path") {
            settings.credentials_path = v.clone();
        }
        if let Some(v) = file_cfg.get("queue_path") {
            settings.queue_path = v.clone();
        }
        if let Some(v) = file_cfg.get("history_path") {
            settings.history_path = v.clone();
        }
        if let Some(v) = file_cfg.get("barcode_pattern") {
            settings.barcode_pattern = v.clone();
        }
        if let Some(v) = file_cfg.get("probe_addr") {
            settings.probe_addr = v.clone();
        }
    }
}

fn apply_env_overrides(settings: &mut Settings) {
    if let Ok(v) = env::var("STATION__SPREADSHEET_ID") {
        settings.spreadsheet_id = v;
    }
    if let Ok(v) = env::var("STATION__SHEET_NAME") {
        settings.sheet_name = v;
    }
    if let Ok(v) = env::var("STATION__CREDENTIALS_PATH") {
        settings.credentials_path = v;
    }
    if let Ok(v) = env::var("STATION__QUEUE_PATH") {
        settings.queue_path = v;
    }
    if let Ok(v) = env::var("STATION__HISTORY_PATH") {
        settings.history_path = v;
    }
    if let Ok(v) = env::var("STATION__BARCODE_PATTERN") {
        settings.barcode_pattern = v;
    }
    if let Ok(v) = env::var("STATION__PROBE_ADDR") {
        settings.probe_addr = v;
    }
}
