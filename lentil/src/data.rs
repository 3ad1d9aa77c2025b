//! Fixed-shape containers passed between the reconstruction stages.
//!
//! Every container checks its shape and value constraints when it is
//! built, so later stages only have to check that shapes agree with
//! each other.

use crate::error::ReconstructionError;
use ndarray::prelude::*;

/// Cells (rows, N) by genes (columns, G); finite and non-negative
#[derive(Debug, Clone)]
pub struct ExpressionMatrix {
    values: Array2<f64>,
    gene_names: Vec<Box<str>>,
}

impl ExpressionMatrix {
    pub fn new(values: Array2<f64>) -> anyhow::Result<Self> {
        let gene_names = (0..values.ncols())
            .map(|g| format!("gene_{}", g).into_boxed_str())
            .collect();
        Self::with_gene_names(values, gene_names)
    }

    pub fn with_gene_names(values: Array2<f64>, gene_names: Vec<Box<str>>) -> anyhow::Result<Self> {
        if values.nrows() == 0 || values.ncols() == 0 {
            return Err(ReconstructionError::InvalidInput(format!(
                "empty expression matrix ({} cells x {} genes)",
                values.nrows(),
                values.ncols()
            ))
            .into());
        }
        if gene_names.len() != values.ncols() {
            return Err(
                ReconstructionError::shape("gene names", values.ncols(), gene_names.len()).into(),
            );
        }
        if let Some(((i, g), x)) = values
            .indexed_iter()
            .find(|(_, x)| !x.is_finite() || **x < 0.0)
        {
            return Err(ReconstructionError::InvalidInput(format!(
                "expression of cell {} gene {} is {}; expected finite and non-negative",
                i, g, x
            ))
            .into());
        }
        Ok(Self { values, gene_names })
    }

    pub fn num_cells(&self) -> usize {
        self.values.nrows()
    }

    pub fn num_genes(&self) -> usize {
        self.values.ncols()
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn gene_names(&self) -> &[Box<str>] {
        &self.gene_names
    }

    pub fn gene_index(&self, name: &str) -> Option<usize> {
        self.gene_names.iter().position(|g| g.as_ref() == name)
    }

    /// N x |genes| sub-matrix of the given gene columns
    pub fn select_genes(&self, genes: &[usize]) -> Array2<f64> {
        self.values.select(Axis(1), genes)
    }

    /// A new matrix restricted to the given cells (rows)
    pub fn select_cells(&self, cells: &[usize]) -> Self {
        Self {
            values: self.values.select(Axis(0), cells),
            gene_names: self.gene_names.clone(),
        }
    }
}

/// Target positions (rows, M) by spatial dimensions (columns)
#[derive(Debug, Clone, PartialEq)]
pub struct LocationMatrix {
    coords: Array2<f64>,
}

impl LocationMatrix {
    pub fn new(coords: Array2<f64>) -> anyhow::Result<Self> {
        if coords.nrows() == 0 || coords.ncols() == 0 {
            return Err(ReconstructionError::InvalidInput(format!(
                "empty location matrix ({} x {})",
                coords.nrows(),
                coords.ncols()
            ))
            .into());
        }
        if coords.iter().any(|x| !x.is_finite()) {
            return Err(
                ReconstructionError::InvalidInput("non-finite location coordinate".into()).into(),
            );
        }
        Ok(Self { coords })
    }

    pub fn num_locations(&self) -> usize {
        self.coords.nrows()
    }

    pub fn dims(&self) -> usize {
        self.coords.ncols()
    }

    pub fn coords(&self) -> &Array2<f64> {
        &self.coords
    }

    pub fn select_locations(&self, rows: &[usize]) -> Self {
        Self {
            coords: self.coords.select(Axis(0), rows),
        }
    }

    /// All coordinates multiplied by `factor`
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            coords: &self.coords * factor,
        }
    }
}

/// Gene columns measured in both spaces
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerIndexSet {
    markers: Vec<usize>,
    num_genes: usize,
}

impl MarkerIndexSet {
    pub fn new(mut markers: Vec<usize>, num_genes: usize) -> anyhow::Result<Self> {
        markers.sort_unstable();
        markers.dedup();
        if let Some(&g) = markers.iter().find(|&&g| g >= num_genes) {
            return Err(ReconstructionError::InvalidInput(format!(
                "marker index {} out of range for {} genes",
                g, num_genes
            ))
            .into());
        }
        Ok(Self { markers, num_genes })
    }

    pub fn empty(num_genes: usize) -> Self {
        Self {
            markers: vec![],
            num_genes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn indices(&self) -> &[usize] {
        &self.markers
    }

    /// Genes to be reconstructed: every gene that is not a marker
    pub fn complement(&self) -> Vec<usize> {
        (0..self.num_genes)
            .filter(|g| self.markers.binary_search(g).is_err())
            .collect()
    }
}

/// Pairwise dissimilarities between two point sets
#[derive(Debug, Clone, PartialEq)]
pub struct CostMatrix {
    values: Array2<f64>,
}

impl CostMatrix {
    /// Square cost within one space: symmetric, zero diagonal,
    /// finite and non-negative
    pub fn symmetric(values: Array2<f64>) -> anyhow::Result<Self> {
        let nn = values.nrows();
        if nn != values.ncols() {
            return Err(ReconstructionError::shape(
                "square cost",
                format!("{} x {}", nn, nn),
                format!("{} x {}", nn, values.ncols()),
            )
            .into());
        }
        check_finite_nonneg(&values)?;
        for i in 0..nn {
            if values[(i, i)] != 0.0 {
                return Err(ReconstructionError::InvalidInput(format!(
                    "cost diagonal at {} is {}",
                    i,
                    values[(i, i)]
                ))
                .into());
            }
            for j in (i + 1)..nn {
                if values[(i, j)] != values[(j, i)] {
                    return Err(ReconstructionError::InvalidInput(format!(
                        "cost is not symmetric at ({}, {})",
                        i, j
                    ))
                    .into());
                }
            }
        }
        Ok(Self { values })
    }

    /// Cost between two different point sets (N x M); finite and non-negative
    pub fn rectangular(values: Array2<f64>) -> anyhow::Result<Self> {
        check_finite_nonneg(&values)?;
        Ok(Self { values })
    }

    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.values.ncols()
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }
}

fn check_finite_nonneg(values: &Array2<f64>) -> anyhow::Result<()> {
    if let Some(((i, j), x)) = values
        .indexed_iter()
        .find(|(_, x)| !x.is_finite() || **x < 0.0)
    {
        return Err(ReconstructionError::InvalidInput(format!(
            "cost at ({}, {}) is {}; expected finite and non-negative",
            i, j, x
        ))
        .into());
    }
    Ok(())
}

/// Normalized non-negative weights over cells or locations
#[derive(Debug, Clone, PartialEq)]
pub struct Distribution {
    weights: Array1<f64>,
}

impl Distribution {
    /// Callers go through `distribution::uniform` or `distribution::from_weights`
    pub(crate) fn from_normalized(weights: Array1<f64>) -> Self {
        Self { weights }
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn weights(&self) -> &Array1<f64> {
        &self.weights
    }
}

/// Transport plan between N cells and M locations
#[derive(Debug, Clone, PartialEq)]
pub struct Coupling {
    values: Array2<f64>,
}

impl Coupling {
    pub(crate) fn from_values(values: Array2<f64>) -> Self {
        Self { values }
    }

    pub fn num_cells(&self) -> usize {
        self.values.nrows()
    }

    pub fn num_locations(&self) -> usize {
        self.values.ncols()
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn row_sums(&self) -> Array1<f64> {
        self.values.sum_axis(Axis(1))
    }

    pub fn col_sums(&self) -> Array1<f64> {
        self.values.sum_axis(Axis(0))
    }

    /// Largest deviation of the row and column sums from `p` and `q`
    pub fn marginal_error(&self, p: &Distribution, q: &Distribution) -> f64 {
        let row_err = (&self.row_sums() - p.weights()).mapv(f64::abs);
        let col_err = (&self.col_sums() - q.weights()).mapv(f64::abs);
        row_err
            .iter()
            .chain(col_err.iter())
            .fold(0_f64, |acc, &x| acc.max(x))
    }

    /// Entries at or above `threshold`
    pub fn support(&self, threshold: f64) -> Array2<bool> {
        self.values.mapv(|x| x >= threshold)
    }
}

/// Spatially resolved expression: genes (rows) by locations (columns)
#[derive(Debug, Clone, PartialEq)]
pub struct ReconstructedExpression {
    values: Array2<f64>,
    gene_names: Vec<Box<str>>,
}

impl ReconstructedExpression {
    pub(crate) fn new(values: Array2<f64>, gene_names: Vec<Box<str>>) -> Self {
        Self { values, gene_names }
    }

    pub fn num_genes(&self) -> usize {
        self.values.nrows()
    }

    pub fn num_locations(&self) -> usize {
        self.values.ncols()
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn gene_names(&self) -> &[Box<str>] {
        &self.gene_names
    }

    /// Sum of all entries
    pub fn total_mass(&self) -> f64 {
        self.values.sum()
    }
}
