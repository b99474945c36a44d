//! Per-rank statistics rows and the plot-ready summary series

use crate::consensus::RankResult;
use crate::Result;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Statistics of one rank
///
/// The unit gathered across nodes in a multi-node run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankSummary {
    /// Rank
    pub k: usize,
    /// Minimum per-cluster mean silhouette
    pub sils_min: f64,
    /// Mean of per-cluster mean silhouettes
    pub sils_mean: f64,
    /// Standard deviation of per-cluster mean silhouettes
    pub sils_std: f64,
    /// Mean trial error
    pub err_mean: f64,
    /// Standard deviation of trial errors
    pub err_std: f64,
    /// Consensus reconstruction error
    pub err_reg: f64,
    /// Per-trial errors in seed order
    pub errors: Vec<f64>,
    /// Seconds since the run started when this rank finished
    pub elapsed_seconds: f64,
}

impl RankSummary {
    /// Statistics row of an aggregated rank
    #[must_use]
    pub fn from_result(result: &RankResult, elapsed_seconds: f64) -> Self {
        Self {
            k: result.k,
            sils_min: result.sils_min,
            sils_mean: result.sils_mean,
            sils_std: result.sils_std,
            err_mean: result.err_mean,
            err_std: result.err_std,
            err_reg: result.err_reg,
            errors: result.errors.to_vec(),
            elapsed_seconds,
        }
    }
}

/// Consensus factors of one rank, returned when output collection is on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectedFactors {
    /// Rank
    pub k: usize,
    /// Consensus entity factor
    #[serde(rename = "A")]
    pub a: Array2<f64>,
    /// Regressed relation cores
    #[serde(rename = "R")]
    pub r: Vec<Array2<f64>>,
}

impl CollectedFactors {
    /// Copy the consensus factors out of an aggregated rank
    #[must_use]
    pub fn from_result(result: &RankResult) -> Self {
        Self {
            k: result.k,
            a: result.a.clone(),
            r: result.r.clone(),
        }
    }
}

/// Column-oriented series for plotting stability and error against `k`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlotSeries {
    /// Ranks, ascending
    #[serde(rename = "Ks")]
    pub ks: Vec<usize>,
    /// Minimum silhouettes
    pub sils_min: Vec<f64>,
    /// Mean silhouettes
    pub sils_mean: Vec<f64>,
    /// Silhouette standard deviations
    pub sils_std: Vec<f64>,
    /// Consensus errors
    pub err_reg: Vec<f64>,
    /// Mean trial errors
    pub err_mean: Vec<f64>,
    /// Trial error standard deviations
    pub err_std: Vec<f64>,
}

impl PlotSeries {
    /// Transpose rank rows into series
    #[must_use]
    pub fn from_rows(rows: &[RankSummary]) -> Self {
        Self {
            ks: rows.iter().map(|r| r.k).collect(),
            sils_min: rows.iter().map(|r| r.sils_min).collect(),
            sils_mean: rows.iter().map(|r| r.sils_mean).collect(),
            sils_std: rows.iter().map(|r| r.sils_std).collect(),
            err_reg: rows.iter().map(|r| r.err_reg).collect(),
            err_mean: rows.iter().map(|r| r.err_mean).collect(),
            err_std: rows.iter().map(|r| r.err_std).collect(),
        }
    }

    /// `{experiment}_summary.json`
    #[must_use]
    pub fn file_name(experiment: &str) -> String {
        format!("{experiment}_summary.json")
    }

    /// Write the series into `dir`, returning its path
    ///
    /// # Errors
    /// Returns error if serialization or the write fails
    pub fn write(&self, dir: &Path, experiment: &str) -> Result<PathBuf> {
        let path = dir.join(Self::file_name(experiment));
        fs::write(&path, serde_json::to_vec_pretty(self)?)?;
        Ok(path)
    }

    /// Read a series written by [`PlotSeries::write`]
    ///
    /// # Errors
    /// Returns error if the file is missing or malformed
    pub fn read(path: &Path) -> Result<Self> {
        Ok(serde_json::from_slice(&fs::read(path)?)?)
    }
}
