use chrono::{DateTime, Local, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Grammar for a prepped-standard barcode: a standard id (`pp1234`,
/// `eph1234` or a bare 4-5 digit id, optionally suffixed with letters),
/// a `MMDDYY` expiration group and a trailing comma emitted by the wedge.
pub const DEFAULT_BARCODE_PATTERN: &str =
    r"^(?i)(pp[0-9]{4,5}|eph[0-9]{4}|[0-9]{4,5})[A-Za-z]{0,2}-([0-9]{5,6}),$";

/// Timestamp format used for the scan display and the history log.
pub const SCAN_TIMESTAMP_FORMAT: &str = "%m/%d/%y %H:%M";

/// Expiration dates render long-form.
pub const EXPIRATION_FORMAT: &str = "%m/%d/%Y";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScanParseError {
    #[error("barcode does not match the standard grammar")]
    Grammar,
    #[error("barcode expiration group is not a valid date: {0}")]
    Expiration(String),
}

/// Compiled barcode grammar. The pattern is configurable per station so a
/// site can accept additional id prefixes without a rebuild.
#[derive(Debug, Clone)]
pub struct BarcodeGrammar {
    pattern: Regex,
}

impl BarcodeGrammar {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }

    pub fn parse(&self, raw: &str, scanned_at: DateTime<Local>) -> Result<ScanRecord, ScanParseError> {
        let captures = self.pattern.captures(raw).ok_or(ScanParseError::Grammar)?;
        let standard_id = captures[1].to_string();
        let expires = parse_expiration_group(&captures[2])?;
        Ok(ScanRecord {
            raw: raw.to_string(),
            standard_id,
            expires,
            scanned_at,
        })
    }
}

impl Default for BarcodeGrammar {
    fn default() -> Self {
        Self::new(DEFAULT_BARCODE_PATTERN).expect("default barcode pattern compiles")
    }
}

/// One accepted scan of a prepped-standard barcode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRecord {
    /// The raw string exactly as the scanner delivered it.
    pub raw: String,
    /// The standard id captured from the barcode.
    pub standard_id: String,
    /// Expiration date encoded in the barcode.
    pub expires: NaiveDate,
    /// Wall-clock time the scan was accepted at the station.
    pub scanned_at: DateTime<Local>,
}

impl ScanRecord {
    pub fn scanned_at_label(&self) -> String {
        self.scanned_at.format(SCAN_TIMESTAMP_FORMAT).to_string()
    }

    pub fn expiration_label(&self) -> String {
        self.expires.format(EXPIRATION_FORMAT).to_string()
    }
}

/// The expiration group is `MMDDYY`. Early labels printed a 5-digit group
/// with the leading zero of the day dropped; reinsert it before parsing.
fn parse_expiration_group(group: &str) -> Result<NaiveDate, ScanParseError> {
    let normalized = if group.len() == 5 {
        let mut s = group.to_string();
        s.insert(2, '0');
        s
    } else {
        group.to_string()
    };
    NaiveDate::parse_from_str(&normalized, "%m%d%y")
        .map_err(|_| ScanParseError::Expiration(group.to_string()))
}
