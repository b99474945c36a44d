//! Run controller
//!
//! [`RescalkBuilder::build`] validates the configuration and resolves
//! resources; [`Rescalk::fit`] then walks the candidate ranks in ascending
//! order, running the trials of each rank, aggregating them, persisting the
//! artifacts and finally merging the reports of every node.

use crate::backend::ExecutionDevice;
use crate::cluster::{chunk_ranks, merge_reports, Communicator, NodeReport};
use crate::config::RescalkConfig;
use crate::consensus::{aggregate, RankResult};
use crate::dataset::RelationalDataset;
use crate::experiment::{
    experiment_name, format_elapsed, CollectedFactors, Compression, ExperimentDir, NotesLog,
    PlotSeries, RankSummary,
};
use crate::init::InitMode;
use crate::kernel::{FactorizationKernel, KernelMethod, KernelParams, RescalFroMu};
use crate::resources::{resolve, EffectiveSettings, Resources};
use crate::scheduler::TrialScheduler;
use crate::trial::TrialContext;
use crate::{Error, ParallelBackend, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, info_span, warn};

/// Outcome of a run, produced on the coordinating node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    /// Experiment name
    pub experiment: String,
    /// One row per requested rank, ascending
    pub rows: Vec<RankSummary>,
    /// Wall-clock seconds for the whole run
    pub total_seconds: f64,
    /// Plot series, when requested
    pub plot_data: Option<PlotSeries>,
    /// Consensus factors per rank, when collected
    pub factors: Option<Vec<CollectedFactors>>,
    /// Largest rank whose minimum silhouette clears the threshold
    pub k_predict: Option<usize>,
    /// Worker count and residency actually used
    pub settings: EffectiveSettings,
}

/// Largest `k` whose `sils_min` is at least `sill_thresh`
#[must_use]
pub fn predict_k(rows: &[RankSummary], sill_thresh: f64) -> Option<usize> {
    rows.iter()
        .filter(|row| row.sils_min >= sill_thresh)
        .map(|row| row.k)
        .max()
}

/// Check candidate ranks and return them ascending
///
/// # Errors
/// Returns [`Error::Configuration`] if the list is empty, repeats a rank,
/// or holds a rank outside `1..=n_entities`
pub fn validate_ranks(ks: &[usize], n_entities: usize) -> Result<Vec<usize>> {
    let mut violations = Vec::new();
    if ks.is_empty() {
        violations.push("at least one candidate rank is required".to_string());
    }
    let unique: BTreeSet<usize> = ks.iter().copied().collect();
    if unique.len() != ks.len() {
        violations.push(format!("candidate ranks must be unique: {ks:?}"));
    }
    for &k in &unique {
        if k == 0 || k > n_entities {
            violations.push(format!("rank {k} outside 1..={n_entities}"));
        }
    }
    if violations.is_empty() {
        Ok(unique.into_iter().collect())
    } else {
        Err(Error::Configuration(violations))
    }
}

/// Builder for [`Rescalk`]
#[derive(Debug, Default)]
pub struct RescalkBuilder {
    config: RescalkConfig,
    kernel: Option<Arc<dyn FactorizationKernel>>,
    transport: Option<Arc<dyn Communicator>>,
    resources: Option<Resources>,
}

impl RescalkBuilder {
    /// Start from a loaded configuration
    #[must_use]
    pub fn from_config(config: RescalkConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Perturbed trials per rank
    #[must_use]
    pub fn n_perturbs(mut self, n_perturbs: usize) -> Self {
        self.config.n_perturbs = n_perturbs;
        self
    }

    /// Kernel iterations per trial
    #[must_use]
    pub fn n_iters(mut self, n_iters: usize) -> Self {
        self.config.n_iters = n_iters;
        self
    }

    /// Perturbation noise level
    #[must_use]
    pub fn epsilon(mut self, epsilon: f64) -> Self {
        self.config.epsilon = epsilon;
        self
    }

    /// Concurrent trials; negative counts back from the available resources
    #[must_use]
    pub fn n_jobs(mut self, n_jobs: i64) -> Self {
        self.config.n_jobs = n_jobs;
        self
    }

    /// Cluster nodes; more than one requires [`RescalkBuilder::transport`]
    #[must_use]
    pub fn n_nodes(mut self, n_nodes: usize) -> Self {
        self.config.n_nodes = n_nodes;
        self
    }

    /// Entity factor initialization
    #[must_use]
    pub fn init(mut self, init: InitMode) -> Self {
        self.config.init = init;
        self
    }

    /// Run trials on GPUs
    #[must_use]
    pub fn use_gpu(mut self, use_gpu: bool) -> Self {
        self.config.use_gpu = use_gpu;
        self
    }

    /// Root directory for artifacts
    #[must_use]
    pub fn save_path(mut self, save_path: impl Into<PathBuf>) -> Self {
        self.config.save_path = save_path.into();
        self
    }

    /// Write archives, notes and the summary series
    #[must_use]
    pub fn save_output(mut self, save_output: bool) -> Self {
        self.config.save_output = save_output;
        self
    }

    /// Return the plot series
    #[must_use]
    pub fn get_plot_data(mut self, get_plot_data: bool) -> Self {
        self.config.get_plot_data = get_plot_data;
        self
    }

    /// Return consensus factors
    #[must_use]
    pub fn collect_output(mut self, collect_output: bool) -> Self {
        self.config.collect_output = collect_output;
        self
    }

    /// Predict the rank from silhouettes
    #[must_use]
    pub fn predict_k(mut self, predict_k: bool) -> Self {
        self.config.predict_k = predict_k;
        self
    }

    /// Per-rank progress at `info`
    #[must_use]
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.config.verbose = verbose;
        self
    }

    /// Per-iteration kernel progress
    #[must_use]
    pub fn rescal_verbose(mut self, rescal_verbose: bool) -> Self {
        self.config.rescal_verbose = rescal_verbose;
        self
    }

    /// Silhouette threshold for rank prediction
    #[must_use]
    pub fn sill_thresh(mut self, sill_thresh: f64) -> Self {
        self.config.sill_thresh = sill_thresh;
        self
    }

    /// Solver selection
    #[must_use]
    pub fn kernel_method(mut self, kernel_method: KernelMethod) -> Self {
        self.config.kernel_method = kernel_method;
        self
    }

    /// Extra parameters for user kernels
    #[must_use]
    pub fn kernel_params(mut self, kernel_params: serde_json::Value) -> Self {
        self.config.kernel_params = kernel_params;
        self
    }

    /// Compute reconstruction errors
    #[must_use]
    pub fn calculate_error(mut self, calculate_error: bool) -> Self {
        self.config.calculate_error = calculate_error;
        self
    }

    /// How trials are spread over workers
    #[must_use]
    pub fn parallel_backend(mut self, parallel_backend: ParallelBackend) -> Self {
        self.config.parallel_backend = parallel_backend;
        self
    }

    /// Archive compression
    #[must_use]
    pub fn compression(mut self, compression: Compression) -> Self {
        self.config.compression = compression;
        self
    }

    /// Use a custom solver (selects [`KernelMethod::Func`])
    #[must_use]
    pub fn kernel(mut self, kernel: Arc<dyn FactorizationKernel>) -> Self {
        self.kernel = Some(kernel);
        self.config.kernel_method = KernelMethod::Func;
        self
    }

    /// Transport connecting the nodes of a multi-node run
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Communicator>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Override detected resources
    #[must_use]
    pub fn resources(mut self, resources: Resources) -> Self {
        self.resources = Some(resources);
        self
    }

    /// Validate every option and resolve resources
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] listing every violation
    pub fn build(self) -> Result<Rescalk> {
        let config = self.config;
        let mut violations = config.violations();

        match &self.transport {
            None if config.n_nodes > 1 => violations.push(format!(
                "n_nodes={} requires a transport, none was given",
                config.n_nodes
            )),
            Some(t) if t.size() != config.n_nodes => violations.push(format!(
                "n_nodes={} but the transport connects {} nodes",
                config.n_nodes,
                t.size()
            )),
            _ => {}
        }

        let kernel: Option<Arc<dyn FactorizationKernel>> = match config.kernel_method {
            KernelMethod::RescalFroMu => Some(Arc::new(RescalFroMu)),
            KernelMethod::Func => {
                if self.kernel.is_none() {
                    violations.push("kernel_method 'func' requires a kernel".to_string());
                }
                self.kernel
            }
        };

        let settings = if config.n_jobs == 0 {
            None
        } else {
            let available = self.resources.unwrap_or_else(Resources::detect);
            match resolve(config.n_jobs, config.use_gpu, config.n_perturbs, available) {
                Ok(settings) => Some(settings),
                Err(Error::Configuration(mut more)) => {
                    violations.append(&mut more);
                    None
                }
                Err(e) => return Err(e),
            }
        };

        let (Some(kernel), Some(settings), true) = (kernel, settings, violations.is_empty()) else {
            return Err(Error::Configuration(violations));
        };

        let context = TrialContext {
            kernel,
            params: KernelParams {
                n_iters: config.n_iters,
                verbose: config.rescal_verbose,
                extra: config.kernel_params.clone(),
            },
            epsilon: config.epsilon,
            init: config.init,
            calculate_error: config.calculate_error,
        };
        let scheduler = TrialScheduler::new(
            context,
            config.n_perturbs,
            settings.n_jobs,
            settings.use_gpu,
            config.parallel_backend,
        )?;

        Ok(Rescalk {
            config,
            settings,
            scheduler,
            transport: self.transport.filter(|t| t.size() > 1),
        })
    }
}

/// Automatic rank selection for RESCAL
#[derive(Debug)]
pub struct Rescalk {
    config: RescalkConfig,
    settings: EffectiveSettings,
    scheduler: TrialScheduler,
    transport: Option<Arc<dyn Communicator>>,
}

impl Rescalk {
    /// Start building a run
    #[must_use]
    pub fn builder() -> RescalkBuilder {
        RescalkBuilder::default()
    }

    /// Validated configuration
    #[must_use]
    pub const fn config(&self) -> &RescalkConfig {
        &self.config
    }

    /// Resolved resources
    #[must_use]
    pub const fn settings(&self) -> &EffectiveSettings {
        &self.settings
    }

    fn node(&self) -> (usize, usize) {
        self.transport
            .as_ref()
            .map_or((0, 1), |t| (t.rank(), t.size()))
    }

    /// Factorize `dataset` at every rank in `ks` and score each rank
    ///
    /// In a multi-node run every node calls `fit` with the same arguments;
    /// each runs its round-robin share of `ks`. Only the coordinator (node 0)
    /// returns `Some`.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] for invalid ranks; any trial,
    /// clustering, IO or transport failure aborts the run
    pub fn fit(
        &self,
        dataset: &RelationalDataset,
        ks: &[usize],
        name: &str,
        note: &str,
    ) -> Result<Option<RunResult>> {
        let all_ks = validate_ranks(ks, dataset.n_entities())?;
        let (node, n_nodes) = self.node();
        let is_coordinator = node == 0;
        let my_ks = if n_nodes > 1 {
            chunk_ranks(&all_ks, n_nodes)
                .into_iter()
                .nth(node)
                .unwrap_or_default()
        } else {
            all_ks.clone()
        };
        let experiment = experiment_name(name, self.config.n_perturbs, self.config.n_iters, self.config.epsilon);
        info!(%experiment, node, ks = ?my_ks, "starting rank selection");

        let dir = if self.config.save_output {
            Some(self.prepare_output(dataset, &experiment, &all_ks, name, note, is_coordinator)?)
        } else {
            None
        };

        let device = if self.settings.use_gpu {
            ExecutionDevice::Gpu(0)
        } else {
            ExecutionDevice::Cpu
        };
        let start = Instant::now();
        let mut rows = Vec::with_capacity(my_ks.len());
        let mut factors = Vec::new();

        for &k in &my_ks {
            let _span = info_span!("rank", k).entered();
            let trials = self.scheduler.run_rank(dataset, k)?;
            let result = aggregate(trials, dataset, k, device, self.config.calculate_error)?;
            let row = RankSummary::from_result(&result, start.elapsed().as_secs_f64());
            self.report_rank(&row);

            if let Some(dir) = &dir {
                self.persist_rank(dir, &result)?;
                // multi-node rows are written by the coordinator after the merge
                if self.transport.is_none() {
                    dir.notes().table_row(&self.stats_row(&row))?;
                }
            }
            if self.config.collect_output {
                factors.push(CollectedFactors::from_result(&result));
            }
            rows.push(row);
        }

        let (rows, factors) = match &self.transport {
            Some(transport) => {
                let report = NodeReport { node, rows, factors };
                let Some(merged) = gather_reports(transport.as_ref(), &report)? else {
                    debug!(node, "node report sent to coordinator");
                    return Ok(None);
                };
                merged
            }
            None => (rows, factors),
        };

        let total_seconds = start.elapsed().as_secs_f64();
        if let Some(dir) = &dir {
            let notes = dir.notes();
            if self.transport.is_some() {
                for row in &rows {
                    notes.table_row(&self.stats_row(row))?;
                }
            }
            notes.separator()?;
            notes.timestamp("end_time")?;
            notes.append(&[format!("total_time= {total_seconds} (seconds)")])?;
            notes.separator()?;
            dir.write_summary(&PlotSeries::from_rows(&rows))?;
        }

        let k_predict = if self.config.predict_k {
            let predicted = predict_k(&rows, self.config.sill_thresh);
            if predicted.is_none() {
                warn!(sill_thresh = self.config.sill_thresh, "no rank reached the silhouette threshold");
            }
            predicted
        } else {
            None
        };
        info!(total_seconds, ?k_predict, "rank selection complete");

        Ok(Some(RunResult {
            experiment,
            plot_data: self.config.get_plot_data.then(|| PlotSeries::from_rows(&rows)),
            factors: self.config.collect_output.then_some(factors),
            rows,
            total_seconds,
            k_predict,
            settings: self.settings.clone(),
        }))
    }

    fn prepare_output(
        &self,
        dataset: &RelationalDataset,
        experiment: &str,
        ks: &[usize],
        name: &str,
        note: &str,
        is_coordinator: bool,
    ) -> Result<ExperimentDir> {
        let dir = ExperimentDir::create(&self.config.save_path, experiment)?;
        if !is_coordinator {
            return Ok(dir);
        }

        let run_notes = NotesLog::new(&self.config.save_path);
        run_notes.separator()?;
        run_notes.timestamp("start_time")?;
        run_notes.separator()?;
        run_notes.take_note(&self.config.note_entries())?;

        let notes = dir.notes();
        let data_type = if dataset.is_sparse() { "sparse" } else { "dense" };
        let mut entries = vec![
            ("Ks", format!("{ks:?}")),
            ("data_type", data_type.to_string()),
            ("experiment_name", name.to_string()),
            ("note", note.to_string()),
        ];
        entries.extend(self.config.note_entries());
        entries.push(("effective_n_jobs", self.settings.n_jobs.to_string()));
        notes.take_note(&entries)?;
        notes.separator()?;
        notes.table_row(&self.stats_header())?;
        Ok(dir)
    }

    fn stats_header(&self) -> Vec<&'static str> {
        let mut header = vec!["k", "Min. Silhouette", "Mean Silhouette"];
        if self.config.calculate_error {
            header.extend(["Mean Error", "STD Error"]);
        }
        header.push("Time Elapsed");
        header
    }

    fn stats_row(&self, row: &RankSummary) -> Vec<String> {
        let mut cells = vec![
            row.k.to_string(),
            format!("{:.3}", row.sils_min),
            format!("{:.3}", row.sils_mean),
        ];
        if self.config.calculate_error {
            cells.push(format!("{:.3}", row.err_mean));
            cells.push(format!("{:.3}", row.err_std));
        }
        cells.push(format_elapsed(row.elapsed_seconds));
        cells
    }

    fn persist_rank(&self, dir: &ExperimentDir, result: &RankResult) -> Result<()> {
        let path = dir.write_rank(result, self.config.compression)?;
        debug!(path = %path.display(), "rank archive written");
        Ok(())
    }

    fn report_rank(&self, row: &RankSummary) {
        if self.config.verbose {
            info!(
                k = row.k,
                sils_min = row.sils_min,
                err_mean = row.err_mean,
                err_reg = row.err_reg,
                "rank complete"
            );
        } else {
            debug!(
                k = row.k,
                sils_min = row.sils_min,
                err_mean = row.err_mean,
                err_reg = row.err_reg,
                "rank complete"
            );
        }
    }
}

type Merged = (Vec<RankSummary>, Vec<CollectedFactors>);

/// Barrier, gather every node's report at node 0 and merge there
fn gather_reports(transport: &dyn Communicator, report: &NodeReport) -> Result<Option<Merged>> {
    transport.barrier()?;
    let payload = serde_json::to_vec(report)?;
    let Some(payloads) = transport.gather(payload, 0)? else {
        return Ok(None);
    };
    let reports = payloads
        .iter()
        .map(|bytes| {
            serde_json::from_slice::<NodeReport>(bytes)
                .map_err(|e| Error::Transport(format!("malformed node report: {e}")))
        })
        .collect::<Result<Vec<_>>>()?;
    merge_reports(reports).map(Some)
}
