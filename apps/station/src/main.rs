use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};

use shared::domain::BarcodeGrammar;
use shared::operation::Operation;
use sheets_integration::{GoogleSheetsConnector, SheetsConfig};
use station_core::{
    connectivity::{TcpProbe, DEFAULT_PROBE_TIMEOUT},
    DispatcherConfig, StationController, StationEvent,
};
use storage::QueueStore;

mod config;
mod recent;

use recent::{DisplayRow, RecentScans};

const REMOVE_COMMAND: &str = "remove last barcode";
const RETRY_COMMAND: &str = "retry connection";

#[derive(Parser, Debug)]
struct Args {
    /// Station configuration file.
    #[arg(long, default_value = "station.toml")]
    config: PathBuf,
    /// Override the spreadsheet key from the configuration.
    #[arg(long)]
    spreadsheet_id: Option<String>,
    /// Override the destination worksheet name.
    #[arg(long)]
    sheet_name: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let mut settings = config::load_settings(&args.config);
    if let Some(id) = args.spreadsheet_id {
        settings.spreadsheet_id = id;
    }
    if let Some(name) = args.sheet_name {
        settings.sheet_name = name;
    }

    info!(
        sheet = %settings.sheet_name,
        queue = %settings.queue_path,
        "starting scanning station"
    );

    let grammar = BarcodeGrammar::new(&settings.barcode_pattern)
        .context("configured barcode pattern does not compile")?;

    let connector = Arc::new(GoogleSheetsConnector::new(SheetsConfig {
        credentials_path: PathBuf::from(&settings.credentials_path),
        spreadsheet_id: settings.spreadsheet_id.clone(),
        sheet_name: settings.sheet_name.clone(),
    }));
    let probe = Arc::new(TcpProbe::new(
        settings.probe_addr.clone(),
        DEFAULT_PROBE_TIMEOUT,
    ));
    let store = QueueStore::new(&settings.queue_path);

    let controller =
        StationController::start(connector, probe, store, DispatcherConfig::default())?;

    // Status line + termination watcher. Resolves to `true` when the
    // worker escalated fatally.
    let mut events = controller.subscribe_events();
    let mut watcher = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(StationEvent::StatusChanged(status)) => {
                    let label = status.label();
                    if !label.is_empty() {
                        eprintln!("!! {label}");
                    }
                }
                Ok(StationEvent::OperationCompleted { id, kind }) => {
                    debug!(%id, %kind, "operation flushed to spreadsheet");
                }
                Ok(StationEvent::DispatcherTerminated { fatal }) => return fatal,
                Err(err) => {
                    warn!(error = %err, "event stream ended");
                    return false;
                }
            }
        }
    });

    let mut recent = RecentScans::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("Scan here:");

    let fatal = loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(input) => {
                    handle_input(
                        input.trim(),
                        &grammar,
                        &controller,
                        &mut recent,
                        Path::new(&settings.history_path),
                    );
                }
                None => {
                    info!("input closed; shutting down");
                    break false;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received; shutting down");
                break false;
            }
            fatal = &mut watcher => {
                break fatal.unwrap_or(false);
            }
        }
    };

    controller.shutdown().await?;

    if fatal {
        // Nonzero exit so the process supervisor restarts the station.
        error!("station stopped after a fatal dispatcher escalation");
        bail!("dispatcher terminated abnormally");
    }
    Ok(())
}

/// Routes one line of wedge input: command phrases first, then barcode
/// parsing. Invalid scans are displayed but never queued.
fn handle_input(
    input: &str,
    grammar: &BarcodeGrammar,
    controller: &StationController,
    recent: &mut RecentScans,
    history_path: &Path,
) {
    if input.is_empty() {
        return;
    }

    match input {
        REMOVE_COMMAND => {
            let latest_is_valid = recent.latest().map(|row| !row.is_invalid());
            if latest_is_valid == Some(true) {
                controller.submit(Operation::delete_row(1));
            }
            recent.rotate_up();
        }
        RETRY_COMMAND => {
            controller.submit(Operation::reconnect());
        }
        raw => {
            let scanned_at = Local::now();
            match grammar.parse(raw, scanned_at) {
                Ok(record) => {
                    controller.submit(Operation::append_row(vec![record.raw.clone()]));
                    if let Err(err) = append_history(history_path, &record.scanned_at_label(), raw)
                    {
                        warn!(error = %err, "could not append scan history");
                    }
                    recent.rotate_down(DisplayRow::from_scan(&record));
                }
                Err(err) => {
                    debug!(%raw, error = %err, "rejected scan");
                    recent.rotate_down(DisplayRow::invalid(scanned_at));
                }
            }
        }
    }

    render(recent, input);
}

fn render(recent: &RecentScans, last_input: &str) {
    println!("Previous scan: \"{last_input}\"");
    for row in recent.visible_rows() {
        println!("  {:<18} {:<28} {}", row.id_label, row.detail, row.scanned_label);
    }
}

fn append_history(path: &Path, timestamp_label: &str, raw: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open history log '{}'", path.display()))?;
    writeln!(file, "{timestamp_label},{raw}")
        .with_context(|| format!("failed to write history log '{}'", path.display()))?;
    Ok(())
}
