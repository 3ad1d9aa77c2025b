//! Agreement between a reconstruction and known spatial expression, and
//! the append-only results log that collects one line per run.

use crate::data::ReconstructedExpression;
use crate::error::ReconstructionError;

use log::{info, warn};
use matrix_util::common_io::mkdir;
use matrix_util::ndarray_util::pearson;
use ndarray::prelude::*;
use fd_lock::RwLock;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Mutex;

pub const RESULTS_LOG_HEADER: &str = "num_cells,num_markers,pearson_correlation";

/// Runs whose reconstruction carries no more total mass than this are
/// not logged
pub const DEFAULT_MIN_TOTAL_MASS: f64 = 1.0;

#[derive(Debug, Clone, PartialEq)]
pub struct AccuracyReport {
    /// `(gene row, Pearson r)` for every evaluated gene with variance on
    /// both sides
    pub per_gene: Vec<(usize, f64)>,
    /// mean over `per_gene`; NaN if empty
    pub mean: f64,
    /// evaluated genes left out for having no variance
    pub undefined_genes: usize,
}

/// Per-gene Pearson correlation across locations.
///
/// * `sdge` - reconstruction, genes x locations
/// * `truth` - known expression in the same gene and location order
/// * `genes` - rows to evaluate; all genes when `None`
pub fn evaluate(
    sdge: &ReconstructedExpression,
    truth: &Array2<f64>,
    genes: Option<&[usize]>,
) -> anyhow::Result<AccuracyReport> {
    if sdge.num_locations() != truth.ncols() {
        return Err(ReconstructionError::shape(
            "ground-truth locations",
            sdge.num_locations(),
            truth.ncols(),
        )
        .into());
    }
    if sdge.num_genes() != truth.nrows() {
        return Err(
            ReconstructionError::shape("ground-truth genes", sdge.num_genes(), truth.nrows())
                .into(),
        );
    }

    let all: Vec<usize>;
    let genes = match genes {
        Some(g) => g,
        None => {
            all = (0..sdge.num_genes()).collect();
            &all
        }
    };
    if let Some(&g) = genes.iter().find(|&&g| g >= sdge.num_genes()) {
        return Err(ReconstructionError::InvalidInput(format!(
            "gene row {} out of range for {} genes",
            g,
            sdge.num_genes()
        ))
        .into());
    }

    let mut per_gene = Vec::with_capacity(genes.len());
    let mut undefined_genes = 0;
    for &g in genes {
        match pearson(sdge.values().row(g), truth.row(g)) {
            Some(r) => per_gene.push((g, r)),
            None => undefined_genes += 1,
        }
    }

    let mean = if per_gene.is_empty() {
        f64::NAN
    } else {
        per_gene.iter().map(|(_, r)| r).sum::<f64>() / per_gene.len() as f64
    };

    if undefined_genes > 0 {
        warn!(
            "{} of {} genes have no variance; left out of the mean",
            undefined_genes,
            genes.len()
        );
    }
    info!("mean Pearson correlation over {} genes: {:.4}", per_gene.len(), mean);

    Ok(AccuracyReport {
        per_gene,
        mean,
        undefined_genes,
    })
}

/// One line of the results log
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunRecord {
    pub num_cells: usize,
    pub num_markers: usize,
    pub mean_pearson: f64,
    /// total mass of the reconstruction
    pub total_mass: f64,
}

impl RunRecord {
    pub fn is_degenerate(&self, min_total_mass: f64) -> bool {
        !(self.total_mass > min_total_mass) || self.mean_pearson.is_nan()
    }

    fn to_line(&self) -> String {
        format!(
            "{},{},{:.2}",
            self.num_cells, self.num_markers, self.mean_pearson
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutcome {
    Appended,
    SkippedDegenerate,
}

static RESULTS_LOG_LOCK: Mutex<()> = Mutex::new(());

/// Append `record` to the log at `path`, writing the header first if the
/// file is new or empty. Degenerate runs are not written.
pub fn append_results_log(
    path: &str,
    record: &RunRecord,
    min_total_mass: f64,
) -> anyhow::Result<LogOutcome> {
    if record.is_degenerate(min_total_mass) {
        warn!(
            "skipping degenerate run ({} cells, {} markers): total mass {:.4e}, mean r {}",
            record.num_cells, record.num_markers, record.total_mass, record.mean_pearson
        );
        return Ok(LogOutcome::SkippedDegenerate);
    }

    // threads of this process
    let _guard = RESULTS_LOG_LOCK
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    mkdir(path)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| anyhow::anyhow!("cannot open results log {}: {}", path, e))?;

    // other processes; held across the emptiness check and the write
    let mut lock = RwLock::new(file);
    let mut file = lock
        .write()
        .map_err(|e| anyhow::anyhow!("cannot lock results log {}: {}", path, e))?;
    let is_new = file.metadata()?.len() == 0;

    let mut text = String::new();
    if is_new {
        text.push_str(RESULTS_LOG_HEADER);
        text.push('\n');
    }
    text.push_str(&record.to_line());
    text.push('\n');
    file.write_all(text.as_bytes())?;
    file.flush()?;

    info!("appended to {}: {}", path, record.to_line());
    Ok(LogOutcome::Appended)
}
