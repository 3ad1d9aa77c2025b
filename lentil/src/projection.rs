use crate::data::{Coupling, ExpressionMatrix, ReconstructedExpression};
use crate::error::ReconstructionError;

/// Spatial expression `X' T` (genes x locations): every location gets the
/// coupling-weighted mixture of the cells sent to it. The coupling is
/// used as is, without renormalization.
pub fn project(
    expression: &ExpressionMatrix,
    coupling: &Coupling,
) -> anyhow::Result<ReconstructedExpression> {
    if expression.num_cells() != coupling.num_cells() {
        return Err(ReconstructionError::shape(
            "coupling rows",
            expression.num_cells(),
            coupling.num_cells(),
        )
        .into());
    }
    let sdge = expression.values().t().dot(coupling.values());
    Ok(ReconstructedExpression::new(
        sdge,
        expression.gene_names().to_vec(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::error_kind;
    use approx::assert_abs_diff_eq;
    use ndarray::prelude::*;

    fn toy() -> (ExpressionMatrix, Coupling) {
        let expr = ExpressionMatrix::new(array![[1.0, 0.0, 2.0], [3.0, 1.0, 0.0]]).unwrap();
        let coupling = Coupling::from_values(array![[0.25, 0.25, 0.0], [0.0, 0.25, 0.25]]);
        (expr, coupling)
    }

    #[test]
    fn mixes_cells_by_coupling() {
        let (expr, coupling) = toy();
        let sdge = project(&expr, &coupling).unwrap();
        assert_eq!((sdge.num_genes(), sdge.num_locations()), (3, 3));
        assert_abs_diff_eq!(
            sdge.values().clone(),
            array![
                [0.25, 1.0, 0.75],
                [0.0, 0.25, 0.25],
                [0.5, 0.5, 0.0]
            ],
            epsilon = 1e-12
        );
        assert_eq!(sdge.gene_names(), expr.gene_names());
    }

    #[test]
    fn repeated_projection_is_bit_identical() {
        let (expr, coupling) = toy();
        let first = project(&expr, &coupling).unwrap();
        let second = project(&expr, &coupling).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn cell_count_must_match() {
        let (expr, _) = toy();
        let coupling = Coupling::from_values(Array2::from_elem((3, 2), 1.0 / 6.0));
        let err = project(&expr, &coupling).unwrap_err();
        assert!(matches!(
            error_kind(&err),
            Some(ReconstructionError::ShapeMismatch { .. })
        ));
    }
}
