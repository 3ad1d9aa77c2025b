use crate::data::LocationMatrix;
use crate::error::ReconstructionError;
use ndarray::prelude::*;

/// Smallest `s` with `s * s >= n`
fn grid_side(n: usize) -> usize {
    let mut side = (n as f64).sqrt() as usize;
    while side * side < n {
        side += 1;
    }
    side
}

/// Square lattice of integer positions holding at least `num_locations`
/// points, `side = ceil(sqrt(num_locations))`, enumerated row by row
pub fn square_grid(num_locations: usize) -> anyhow::Result<LocationMatrix> {
    if num_locations == 0 {
        return Err(ReconstructionError::InvalidParameter(
            "a target grid needs at least one location".into(),
        )
        .into());
    }
    let side = grid_side(num_locations);
    let coords = Array2::from_shape_fn((side * side, 2), |(i, d)| match d {
        0 => (i / side) as f64,
        _ => (i % side) as f64,
    });
    LocationMatrix::new(coords)
}
