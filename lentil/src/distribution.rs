use crate::data::Distribution;
use crate::error::ReconstructionError;
use ndarray::prelude::*;

/// Uniform weights `1/n` over `n` points
pub fn uniform(n: usize) -> anyhow::Result<Distribution> {
    if n == 0 {
        return Err(ReconstructionError::InvalidDistribution("zero points".into()).into());
    }
    Ok(Distribution::from_normalized(Array1::from_elem(
        n,
        1.0 / n as f64,
    )))
}

/// Renormalize externally supplied non-negative weights to sum 1
pub fn from_weights(weights: &[f64]) -> anyhow::Result<Distribution> {
    if let Some((i, w)) = weights
        .iter()
        .enumerate()
        .find(|(_, w)| !w.is_finite() || **w < 0.0)
    {
        return Err(ReconstructionError::InvalidDistribution(format!(
            "weight {} is {}",
            i, w
        ))
        .into());
    }
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return Err(ReconstructionError::InvalidDistribution("weights sum to zero".into()).into());
    }
    Ok(Distribution::from_normalized(
        weights.iter().map(|w| w / total).collect(),
    ))
}

/// Source (cells) and target (locations) marginals; uniform unless
/// weights are supplied, in which case their lengths must match
pub fn space_distributions(
    num_cells: usize,
    num_locations: usize,
    cell_weights: Option<&[f64]>,
    location_weights: Option<&[f64]>,
) -> anyhow::Result<(Distribution, Distribution)> {
    let p = match cell_weights {
        Some(w) if w.len() != num_cells => {
            return Err(ReconstructionError::shape("cell weights", num_cells, w.len()).into())
        }
        Some(w) => from_weights(w)?,
        None => uniform(num_cells)?,
    };
    let q = match location_weights {
        Some(w) if w.len() != num_locations => {
            return Err(
                ReconstructionError::shape("location weights", num_locations, w.len()).into(),
            )
        }
        Some(w) => from_weights(w)?,
        None => uniform(num_locations)?,
    };
    Ok((p, q))
}
