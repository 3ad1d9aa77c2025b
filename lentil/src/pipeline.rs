//! One reconstruction run: costs, marginals, coupling, projection.

use crate::accuracy::{evaluate, AccuracyReport, RunRecord};
use crate::cost::{expression_cost_genes, CostConfig, CostMatrixBuilder};
use crate::data::*;
use crate::distribution::space_distributions;
use crate::gromov::{AdjustedGwSolver, GwConfig, GwSolution};
use crate::projection::project;

use log::info;
use ndarray::prelude::*;

/// Everything a run reads
pub struct ReconstructionInput<'a> {
    pub expression: &'a ExpressionMatrix,
    pub locations: &'a LocationMatrix,
    pub markers: &'a MarkerIndexSet,
    /// genes allowed in the expression cost; all non-markers when `None`
    pub cost_genes: Option<&'a [usize]>,
    /// locations x markers; `None` uses the cells themselves, which
    /// needs `cell_aligned`
    pub marker_reference: Option<&'a Array2<f64>>,
    /// location `i` is where cell `i` was measured
    pub cell_aligned: bool,
    pub cell_weights: Option<&'a [f64]>,
    pub location_weights: Option<&'a [f64]>,
}

impl<'a> ReconstructionInput<'a> {
    pub fn new(
        expression: &'a ExpressionMatrix,
        locations: &'a LocationMatrix,
        markers: &'a MarkerIndexSet,
    ) -> Self {
        Self {
            expression,
            locations,
            markers,
            cost_genes: None,
            marker_reference: None,
            cell_aligned: false,
            cell_weights: None,
            location_weights: None,
        }
    }
}

pub struct ReconstructionOutput {
    pub num_cells: usize,
    pub num_locations: usize,
    pub num_markers: usize,
    /// genes that went into the expression cost
    pub cost_genes: Vec<usize>,
    pub solution: GwSolution,
    pub sdge: ReconstructedExpression,
}

impl ReconstructionOutput {
    pub fn coupling(&self) -> &Coupling {
        &self.solution.coupling
    }

    /// The results-log line for this run given its accuracy
    pub fn run_record(&self, accuracy: &AccuracyReport) -> RunRecord {
        RunRecord {
            num_cells: self.num_cells,
            num_markers: self.num_markers,
            mean_pearson: accuracy.mean,
            total_mass: self.sdge.total_mass(),
        }
    }
}

pub struct Reconstruction {
    costs: CostMatrixBuilder,
    solver: AdjustedGwSolver,
}

impl Reconstruction {
    pub fn new(cost: CostConfig, gw: GwConfig) -> anyhow::Result<Self> {
        Ok(Self {
            costs: CostMatrixBuilder::new(cost),
            solver: AdjustedGwSolver::new(gw)?,
        })
    }

    pub fn solver(&self) -> &AdjustedGwSolver {
        &self.solver
    }

    pub fn run(&self, input: &ReconstructionInput) -> anyhow::Result<ReconstructionOutput> {
        let num_cells = input.expression.num_cells();
        let num_locations = input.locations.num_locations();

        let costs = self.costs.build(
            input.expression,
            input.locations,
            input.markers,
            input.cost_genes,
            input.marker_reference,
            input.cell_aligned,
        )?;

        let (p, q) = space_distributions(
            num_cells,
            num_locations,
            input.cell_weights,
            input.location_weights,
        )?;

        info!(
            "reconstructing {} cells onto {} locations with {} markers (alpha = {})",
            num_cells,
            num_locations,
            input.markers.len(),
            self.solver.config().alpha
        );
        let solution = self.solver.solve(
            &costs.expression,
            &costs.locations,
            costs.markers.as_ref(),
            &p,
            &q,
        )?;

        let sdge = project(input.expression, &solution.coupling)?;

        let cost_genes = expression_cost_genes(input.markers, input.cost_genes);

        Ok(ReconstructionOutput {
            num_cells,
            num_locations,
            num_markers: input.markers.len(),
            cost_genes,
            solution,
            sdge,
        })
    }
}

/// Accuracy against the cells' own expression when every cell sits at
/// its own location (cell-aligned geometry), over the reconstructed
/// (non-marker) genes
pub fn evaluate_cell_aligned(
    output: &ReconstructionOutput,
    expression: &ExpressionMatrix,
    markers: &MarkerIndexSet,
) -> anyhow::Result<AccuracyReport> {
    let truth = expression.values().t().as_standard_layout().into_owned();
    evaluate(&output.sdge, &truth, Some(&markers.complement()))
}
