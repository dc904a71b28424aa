use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use clap::{Parser, Subcommand};
use regex::Regex;

use shared::domain::SCAN_TIMESTAMP_FORMAT;

/// Search form of the barcode grammar: no anchors, no trailing comma, so
/// it finds the id anywhere in a history line.
const BARCODE_SEARCH_PATTERN: &str = r"(?i)(pp[0-9]{4,5}|eph[0-9]{4}|[0-9]{4,5})[A-Za-z]{0,2}-[0-9]{5,6}";

#[derive(Parser, Debug)]
struct Cli {
    /// Scan history log written by the station.
    #[arg(long, default_value = "scan_history.log")]
    history: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Count scans per standard between two timestamps.
    ScanCount {
        /// Inclusive start, e.g. "10/26/21 04:50".
        since: String,
        /// Inclusive end; defaults to now.
        until: Option<String>,
        /// Write "barcode,count" lines here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::ScanCount {
            since,
            until,
            output,
        } => {
            let since = parse_timestamp(&since)?;
            let until = match until {
                Some(raw) => parse_timestamp(&raw)?,
                None => Local::now().naive_local(),
            };

            let raw = fs::read_to_string(&cli.history).with_context(|| {
                format!("failed to read history log '{}'", cli.history.display())
            })?;
            let counts = count_scans(raw.lines(), since, until);

            let mut report = String::new();
            for (barcode, count) in &counts {
                report.push_str(&format!("{barcode},{count}\n"));
            }
            match output {
                Some(path) => fs::write(&path, report)
                    .with_context(|| format!("failed to write report '{}'", path.display()))?,
                None => print!("{report}"),
            }
        }
    }

    Ok(())
}

fn parse_timestamp(raw: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, SCAN_TIMESTAMP_FORMAT)
        .with_context(|| format!("'{raw}' does not match \"{SCAN_TIMESTAMP_FORMAT}\""))
}

fn count_scans<'a>(
    lines: impl Iterator<Item = &'a str>,
    since: NaiveDateTime,
    until: NaiveDateTime,
) -> BTreeMap<String, u64> {
    let pattern = Regex::new(BARCODE_SEARCH_PATTERN).expect("search pattern compiles");
    let mut counts = BTreeMap::new();

    for line in lines {
        let Some((timestamp, rest)) = line.split_once(',') else {
            continue;
        };
        let Ok(scanned_at) = NaiveDateTime::parse_from_str(timestamp, SCAN_TIMESTAMP_FORMAT)
        else {
            continue;
        };
        if scanned_at < since || scanned_at > until {
            continue;
        }
        if let Some(captures) = pattern.captures(rest) {
            *counts.entry(captures[1].to_string()).or_insert(0) += 1;
        }
    }

    counts
}
