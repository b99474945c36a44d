//! Plain-text experiment notes (`experiment.log`)
//!
//! Notes are append-only: configuration `key=value` lines, `#` separator
//! lines, timestamps, and a fixed-width statistics table with one row per
//! rank.

use crate::Result;
use chrono::Local;
use std::fmt::Display;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Notes file name inside a directory
pub const NOTES_FILE: &str = "experiment.log";

const SEPARATOR_WIDTH: usize = 100;
const COLUMN_WIDTH: usize = 18;

/// Append-only notes file
#[derive(Debug, Clone)]
pub struct NotesLog {
    path: PathBuf,
}

impl NotesLog {
    /// Notes file inside `dir`
    #[must_use]
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(NOTES_FILE),
        }
    }

    /// Path of the notes file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append raw lines
    ///
    /// # Errors
    /// Returns error if the file cannot be opened or written
    pub fn append<S: AsRef<str>>(&self, lines: &[S]) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        for line in lines {
            writeln!(file, "{}", line.as_ref())?;
        }
        Ok(())
    }

    /// Append one `key=value` line per entry
    ///
    /// # Errors
    /// Returns error if the file cannot be written
    pub fn take_note<K: Display, V: Display>(&self, entries: &[(K, V)]) -> Result<()> {
        let lines: Vec<String> = entries.iter().map(|(k, v)| format!("{k}={v}")).collect();
        self.append(&lines)
    }

    /// Append a `#` separator line
    ///
    /// # Errors
    /// Returns error if the file cannot be written
    pub fn separator(&self) -> Result<()> {
        self.append(&["#".repeat(SEPARATOR_WIDTH)])
    }

    /// Append `label= <local time>`
    ///
    /// # Errors
    /// Returns error if the file cannot be written
    pub fn timestamp(&self, label: &str) -> Result<()> {
        self.append(&[format!("{label}= {}", Local::now().format("%Y-%m-%d %H:%M:%S%.6f"))])
    }

    /// Append one fixed-width table row
    ///
    /// # Errors
    /// Returns error if the file cannot be written
    pub fn table_row<S: AsRef<str>>(&self, cells: &[S]) -> Result<()> {
        let row: String = cells
            .iter()
            .map(|cell| format!("{:<width$}", cell.as_ref(), width = COLUMN_WIDTH))
            .collect();
        self.append(&[row.trim_end()])
    }

    /// Whole notes file
    ///
    /// # Errors
    /// Returns error if the file cannot be read
    pub fn read_to_string(&self) -> Result<String> {
        Ok(fs::read_to_string(&self.path)?)
    }
}

/// Format seconds as `H:MM:SS`, dropping fractions
#[must_use]
pub fn format_elapsed(seconds: f64) -> String {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let total = seconds.max(0.0) as u64;
    format!("{}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(0.4), "0:00:00");
        assert_eq!(format_elapsed(61.9), "0:01:01");
        assert_eq!(format_elapsed(3725.0), "1:02:05");
        assert_eq!(format_elapsed(-3.0), "0:00:00");
    }

    #[test]
    fn test_notes_append_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let notes = NotesLog::new(dir.path());
        notes.take_note(&[("n_perturbs", "20"), ("epsilon", "0.015")]).unwrap();
        notes.separator().unwrap();
        notes.table_row(&["k", "Min. Silhouette"]).unwrap();

        let text = notes.read_to_string().unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "n_perturbs=20");
        assert_eq!(lines[1], "epsilon=0.015");
        assert_eq!(lines[2], "#".repeat(100));
        assert!(lines[3].starts_with("k "));
        assert!(lines[3].ends_with("Min. Silhouette"));
    }

    #[test]
    fn test_timestamp_line() {
        let dir = tempfile::tempdir().unwrap();
        let notes = NotesLog::new(dir.path());
        notes.timestamp("start_time").unwrap();
        assert!(notes.read_to_string().unwrap().starts_with("start_time= "));
        assert_eq!(notes.path().file_name().unwrap(), NOTES_FILE);
    }
}
