//! Persisted experiment artifacts
//!
//! ## Layout
//!
//! ```text
//! save_path/
//! ├── experiment.log                      run start time and configuration
//! └── {name}_{P}perts_{iters}iters_{eps}eps/
//!     ├── experiment.log                  configuration, stats table, end time
//!     ├── AR_k={k}.json.zst               one compressed archive per rank
//!     └── {experiment}_summary.json       plot-ready series
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use rescalk::experiment::{experiment_name, ExperimentDir};
//!
//! let name = experiment_name("toy", 20, 100, 0.015);
//! let dir = ExperimentDir::create(std::path::Path::new("."), &name)?;
//! dir.notes().separator()?;
//! # Ok::<(), rescalk::Error>(())
//! ```

mod archive;
mod notes;
mod summary;

pub use archive::{Compression, RankArchive};
pub use notes::{format_elapsed, NotesLog, NOTES_FILE};
pub use summary::{CollectedFactors, PlotSeries, RankSummary};

use crate::consensus::RankResult;
use crate::Result;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// `"{name}_{P}perts_{iters}iters_{eps}eps"`
#[must_use]
pub fn experiment_name(name: &str, n_perturbs: usize, n_iters: usize, epsilon: f64) -> String {
    format!("{name}_{n_perturbs}perts_{n_iters}iters_{epsilon}eps")
}

/// Directory receiving one experiment's artifacts
#[derive(Debug, Clone)]
pub struct ExperimentDir {
    name: String,
    path: PathBuf,
    notes: NotesLog,
}

impl ExperimentDir {
    /// Create `root/name`; an existing directory is reused
    ///
    /// # Errors
    /// Returns error if the directory cannot be created
    pub fn create(root: &Path, name: &str) -> Result<Self> {
        let path = root.join(name);
        match fs::create_dir(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!(path = %path.display(), "reusing experiment directory");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(Self {
            name: name.to_string(),
            notes: NotesLog::new(&path),
            path,
        })
    }

    /// Experiment name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Notes log inside the directory
    #[must_use]
    pub const fn notes(&self) -> &NotesLog {
        &self.notes
    }

    /// Persist the archive of one rank
    ///
    /// # Errors
    /// Returns error if the archive cannot be written
    pub fn write_rank(&self, result: &RankResult, compression: Compression) -> Result<PathBuf> {
        RankArchive {
            k: result.k,
            a: result.a.clone(),
            r: result.r.clone(),
            sils_all: result.sils_all.clone(),
            error: result.err_reg,
            errors: result.errors.clone(),
        }
        .write(&self.path, compression)
    }

    /// Persist the summary series
    ///
    /// # Errors
    /// Returns error if the series cannot be written
    pub fn write_summary(&self, series: &PlotSeries) -> Result<PathBuf> {
        series.write(&self.path, &self.name)
    }
}
