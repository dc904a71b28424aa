use std::collections::VecDeque;

use chrono::{DateTime, Local};

use shared::domain::{ScanRecord, SCAN_TIMESTAMP_FORMAT};

/// The display only shows ten rows, but keep twenty so "remove last
/// barcode" can rotate older entries back up.
pub const RECENT_CAPACITY: usize = 20;
pub const DISPLAY_ROWS: usize = 10;

pub const INVALID_LABEL: &str = "Invalid Barcode!";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayRow {
    pub id_label: String,
    pub detail: String,
    pub scanned_label: String,
}

impl DisplayRow {
    pub fn from_scan(record: &ScanRecord) -> Self {
        Self {
            id_label: record.standard_id.clone(),
            detail: format!("Expires: {}", record.expiration_label()),
            scanned_label: format!("Scanned: {}", record.scanned_at_label()),
        }
    }

    pub fn invalid(scanned_at: DateTime<Local>) -> Self {
        Self {
            id_label: INVALID_LABEL.to_string(),
            detail: "This barcode is not from a prepped standard.".to_string(),
            scanned_label: format!("Scanned: {}", scanned_at.format(SCAN_TIMESTAMP_FORMAT)),
        }
    }

    pub fn is_invalid(&self) -> bool {
        self.id_label == INVALID_LABEL
    }
}

/// Fixed-length rotating list of the latest scans, newest first.
#[derive(Debug, Default)]
pub struct RecentScans {
    rows: VecDeque<DisplayRow>,
}

impl RecentScans {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rotate the list down: the new row lands on top, the oldest falls
    /// off the bottom.
    pub fn rotate_down(&mut self, row: DisplayRow) {
        self.rows.push_front(row);
        self.rows.truncate(RECENT_CAPACITY);
    }

    /// Rotate the list up, dropping the most recent entry.
    pub fn rotate_up(&mut self) -> Option<DisplayRow> {
        self.rows.pop_front()
    }

    pub fn latest(&self) -> Option<&DisplayRow> {
        self.rows.front()
    }

    pub fn visible_rows(&self) -> impl Iterator<Item = &DisplayRow> {
        self.rows.iter().take(DISPLAY_ROWS)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn row(tag: &str) -> DisplayRow {
        DisplayRow {
            id_label: tag.to_string(),
            detail: String::new(),
            scanned_label: String::new(),
        }
    }

    #[test]
    fn newest_scan_sits_on_top() {
        let mut recent = RecentScans::new();
        recent.rotate_down(row("a"));
        recent.rotate_down(row("b"));
        assert_eq!(recent.latest().unwrap().id_label, "b");
    }

    #[test]
    fn list_is_bounded() {
        let mut recent = RecentScans::new();
        for i in 0..(RECENT_CAPACITY + 5) {
            recent.rotate_down(row(&i.to_string()));
        }
        assert_eq!(recent.visible_rows().count(), DISPLAY_ROWS);
        assert_eq!(recent.rows.len(), RECENT_CAPACITY);
    }

    #[test]
    fn rotate_up_undoes_the_latest_entry() {
        let mut recent = RecentScans::new();
        recent.rotate_down(row("keep"));
        recent.rotate_down(row("undo"));
        let removed = recent.rotate_up().unwrap();
        assert_eq!(removed.id_label, "undo");
        assert_eq!(recent.latest().unwrap().id_label, "keep");
    }

    #[test]
    fn invalid_rows_are_flagged() {
        let scanned_at = Local.with_ymd_and_hms(2022, 3, 14, 9, 26, 0).unwrap();
        assert!(DisplayRow::invalid(scanned_at).is_invalid());
    }
}
