//! Dissimilarities within expression space, within physical space,
//! and between them through marker genes.

use crate::data::*;
use crate::error::ReconstructionError;

use clap::ValueEnum;
use log::info;
use matrix_util::knn_graph::{KnnGraph, KnnGraphArgs};
use matrix_util::traits::{DistanceOps, MatOps};
use ndarray::prelude::*;

/// Edge weights of the kNN graph over cells
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
#[clap(rename_all = "lowercase")]
pub enum EdgeMetric {
    Euclidean,
    /// `1 - pearson` between expression profiles
    Correlation,
    /// Euclidean neighbours, unit edge weights (hop counts)
    Connectivity,
}

/// What to do with cell pairs the kNN graph cannot connect
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
#[clap(rename_all = "lowercase")]
pub enum UnreachablePolicy {
    /// fail with `DisconnectedGraph`
    Fail,
    /// use the largest finite geodesic distance
    Clamp,
}

/// Distance between target positions
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
#[clap(rename_all = "lowercase")]
pub enum LocationMetric {
    Euclidean,
    /// shortest paths over a kNN graph of the positions
    Geodesic,
}

#[derive(Debug, Clone)]
pub struct CostConfig {
    /// neighbours per point in the kNN graphs
    pub knn: usize,
    pub edge_metric: EdgeMetric,
    pub unreachable: UnreachablePolicy,
    pub location_metric: LocationMetric,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            knn: 5,
            edge_metric: EdgeMetric::Euclidean,
            unreachable: UnreachablePolicy::Fail,
            location_metric: LocationMetric::Euclidean,
        }
    }
}

/// The three costs a reconstruction needs
#[derive(Debug)]
pub struct SpaceCosts {
    /// N x N, cells in expression space
    pub expression: CostMatrix,
    /// M x M, target positions
    pub locations: CostMatrix,
    /// N x M linear term; `None` without markers
    pub markers: Option<CostMatrix>,
}

pub struct CostMatrixBuilder {
    config: CostConfig,
}

impl CostMatrixBuilder {
    pub fn new(config: CostConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CostConfig {
        &self.config
    }

    /// Pairwise distances between target positions (M x M)
    pub fn location_cost(&self, locations: &LocationMatrix) -> anyhow::Result<CostMatrix> {
        let euclidean = locations.coords().pairwise_euclidean_rows();
        let cost = match self.config.location_metric {
            LocationMetric::Euclidean => euclidean,
            LocationMetric::Geodesic => knn_geodesic(
                &euclidean,
                self.config.knn,
                false,
                self.config.unreachable,
            )?,
        };
        CostMatrix::symmetric(cost)
    }

    /// Geodesic distances between cells over a kNN graph in
    /// expression space (N x N).
    ///
    /// * `expression` - cells x genes, already restricted to the
    ///   genes that are not markers
    pub fn expression_cost(&self, expression: &Array2<f64>) -> anyhow::Result<CostMatrix> {
        if expression.ncols() == 0 {
            return Err(ReconstructionError::InvalidInput(
                "no genes left to build the expression cost".into(),
            )
            .into());
        }

        let (dist, unit) = match self.config.edge_metric {
            EdgeMetric::Euclidean => (expression.pairwise_euclidean_rows(), false),
            EdgeMetric::Correlation => (expression.pairwise_correlation_distance_rows(), false),
            EdgeMetric::Connectivity => (expression.pairwise_euclidean_rows(), true),
        };

        let geo = knn_geodesic(&dist, self.config.knn, unit, self.config.unreachable)?;
        CostMatrix::symmetric(geo)
    }

    /// Distances between cells using only marker genes (N x N), each
    /// marker scaled by its own maximum first
    ///
    /// * `markers` - cells x markers
    pub fn marker_cost(&self, markers: &Array2<f64>) -> anyhow::Result<CostMatrix> {
        if markers.ncols() == 0 {
            return Err(ReconstructionError::EmptyMarkerSet.into());
        }
        let scaled = markers.scale_columns_by_max();
        CostMatrix::symmetric(scaled.pairwise_euclidean_rows())
    }

    /// Distances from every cell to every location in marker space
    /// (N x M). Each side is scaled per marker by its own maximum.
    ///
    /// * `cells` - cells x markers
    /// * `reference` - locations x markers, the same markers in the same order
    pub fn marker_cost_between(
        &self,
        cells: &Array2<f64>,
        reference: &Array2<f64>,
    ) -> anyhow::Result<CostMatrix> {
        if cells.ncols() == 0 {
            return Err(ReconstructionError::EmptyMarkerSet.into());
        }
        if cells.ncols() != reference.ncols() {
            return Err(
                ReconstructionError::shape("reference markers", cells.ncols(), reference.ncols())
                    .into(),
            );
        }
        let cells = cells.scale_columns_by_max();
        let reference = reference.scale_columns_by_max();
        CostMatrix::rectangular(cells.cross_euclidean_rows(&reference)?)
    }

    /// Build all costs for one run.
    ///
    /// * `cost_genes` - genes allowed in the expression cost (e.g. the
    ///   highly variable ones); markers are always left out
    /// * `marker_reference` - locations x markers; when `None` the
    ///   cells themselves are the reference
    /// * `cell_aligned` - location `i` is where cell `i` was measured;
    ///   required to use the cells as their own marker reference
    pub fn build(
        &self,
        expression: &ExpressionMatrix,
        locations: &LocationMatrix,
        markers: &MarkerIndexSet,
        cost_genes: Option<&[usize]>,
        marker_reference: Option<&Array2<f64>>,
        cell_aligned: bool,
    ) -> anyhow::Result<SpaceCosts> {
        let genes = expression_cost_genes(markers, cost_genes);
        info!(
            "expression cost over {} cells and {} genes (k = {})",
            expression.num_cells(),
            genes.len(),
            self.config.knn
        );
        let expression_cost = self.expression_cost(&expression.select_genes(&genes))?;

        info!("location cost over {} positions", locations.num_locations());
        let location_cost = self.location_cost(locations)?;

        let marker_cost = if markers.is_empty() {
            None
        } else {
            let cell_markers = expression.select_genes(markers.indices());
            let cost = match marker_reference {
                Some(reference) => {
                    if reference.nrows() != locations.num_locations() {
                        return Err(ReconstructionError::shape(
                            "marker reference rows",
                            locations.num_locations(),
                            reference.nrows(),
                        )
                        .into());
                    }
                    self.marker_cost_between(&cell_markers, reference)?
                }
                None => {
                    if expression.num_cells() != locations.num_locations() {
                        return Err(ReconstructionError::shape(
                            "cell-aligned locations",
                            expression.num_cells(),
                            locations.num_locations(),
                        )
                        .into());
                    }
                    if !cell_aligned {
                        return Err(ReconstructionError::InvalidInput(
                            "markers without a reference need one location per cell, in cell order"
                                .into(),
                        )
                        .into());
                    }
                    self.marker_cost(&cell_markers)?
                }
            };
            info!("marker cost over {} markers", markers.len());
            Some(cost)
        };

        Ok(SpaceCosts {
            expression: expression_cost,
            locations: location_cost,
            markers: marker_cost,
        })
    }
}

/// Genes that enter the expression cost: the non-markers, restricted
/// to `allowed` when given
pub fn expression_cost_genes(markers: &MarkerIndexSet, allowed: Option<&[usize]>) -> Vec<usize> {
    let mut genes = markers.complement();
    if let Some(allowed) = allowed {
        genes.retain(|g| allowed.contains(g));
    }
    genes
}

fn knn_geodesic(
    dist: &Array2<f64>,
    knn: usize,
    unit_weights: bool,
    unreachable: UnreachablePolicy,
) -> anyhow::Result<Array2<f64>> {
    if knn == 0 {
        return Err(ReconstructionError::InvalidParameter("knn must be positive".into()).into());
    }
    if dist.nrows() < 2 {
        return Err(ReconstructionError::InvalidInput(format!(
            "a kNN graph needs at least two points, got {}",
            dist.nrows()
        ))
        .into());
    }

    let graph = KnnGraph::from_distance_matrix(
        dist,
        &KnnGraphArgs {
            knn,
            ..Default::default()
        },
    )?;

    let components = graph.num_components();
    let mut geo = graph.geodesic_distances(unit_weights);

    if components > 1 {
        match unreachable {
            UnreachablePolicy::Fail => {
                return Err(ReconstructionError::DisconnectedGraph { components }.into());
            }
            UnreachablePolicy::Clamp => {
                let sentinel = geo.max_finite().unwrap_or(0.0);
                info!(
                    "{} components; unreachable pairs set to {:.4}",
                    components, sentinel
                );
                geo.mapv_inplace(|d| if d.is_finite() { d } else { sentinel });
            }
        }
    }
    Ok(geo)
}
