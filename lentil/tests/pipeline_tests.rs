use approx::assert_abs_diff_eq;
use lentil::accuracy::{append_results_log, LogOutcome, DEFAULT_MIN_TOTAL_MASS};
use lentil::cost::{CostConfig, UnreachablePolicy};
use lentil::data::{ExpressionMatrix, LocationMatrix, MarkerIndexSet};
use lentil::error::{error_kind, ReconstructionError};
use lentil::gromov::GwConfig;
use lentil::grid::square_grid;
use lentil::output::write_outputs;
use lentil::pipeline::{evaluate_cell_aligned, Reconstruction, ReconstructionInput};
use ndarray::prelude::*;

/// Six cells on a line; genes: x, 5 - x, x^2 + 1, 10 - x
fn line_cells() -> (ExpressionMatrix, LocationMatrix) {
    let expr = Array2::from_shape_fn((6, 4), |(i, g)| {
        let x = i as f64;
        match g {
            0 => x,
            1 => 5.0 - x,
            2 => x * x + 1.0,
            _ => 10.0 - x,
        }
    });
    let names = ["m1", "m2", "a", "b"]
        .iter()
        .map(|&s| s.into())
        .collect();
    let locations = Array2::from_shape_fn((6, 2), |(i, d)| if d == 0 { i as f64 } else { 0.0 });
    (
        ExpressionMatrix::with_gene_names(expr, names).unwrap(),
        LocationMatrix::new(locations).unwrap(),
    )
}

#[test]
fn markers_only_run_is_logged() {
    let (expr, locations) = line_cells();
    let markers = MarkerIndexSet::new(vec![0, 1], expr.num_genes()).unwrap();

    let reconstruction = Reconstruction::new(
        CostConfig::default(),
        GwConfig {
            alpha: 1.0,
            ..Default::default()
        },
    )
    .unwrap();
    let mut input = ReconstructionInput::new(&expr, &locations, &markers);
    input.cell_aligned = true;
    let output = reconstruction.run(&input).unwrap();

    assert_eq!(output.num_markers, 2);
    assert_eq!(output.cost_genes, vec![2, 3]);
    assert_abs_diff_eq!(
        output.coupling().values().clone(),
        Array2::eye(6) / 6.0,
        epsilon = 1e-9
    );
    assert_eq!((output.sdge.num_genes(), output.sdge.num_locations()), (4, 6));

    let accuracy = evaluate_cell_aligned(&output, &expr, &markers).unwrap();
    assert_eq!(accuracy.per_gene.len(), 2);
    assert_abs_diff_eq!(accuracy.mean, 1.0, epsilon = 1e-9);

    let dir = tempfile::tempdir().unwrap();
    let out_dir = dir.path().join("out");
    let paths = write_outputs(
        out_dir.to_str().unwrap(),
        6,
        &output.sdge,
        &locations,
        &output.cost_genes,
    )
    .unwrap();
    assert!(paths.sdge.ends_with("sdge_6_cells_6_locations.txt"));
    let sdge_text = std::fs::read_to_string(&paths.sdge).unwrap();
    assert_eq!(sdge_text.lines().count(), 4);

    let log = dir.path().join("results.txt");
    let log = log.to_str().unwrap();
    let outcome =
        append_results_log(log, &output.run_record(&accuracy), DEFAULT_MIN_TOTAL_MASS).unwrap();
    assert_eq!(outcome, LogOutcome::Appended);
    assert_eq!(
        std::fs::read_to_string(log).unwrap(),
        "num_cells,num_markers,pearson_correlation\n6,2,1.00\n"
    );
}

#[test]
fn de_novo_run_orders_a_line() {
    let expr = ExpressionMatrix::new(Array2::from_shape_fn((4, 2), |(i, g)| {
        (i * (g + 1)) as f64
    }))
    .unwrap();
    let locations =
        LocationMatrix::new(Array2::from_shape_fn((4, 1), |(i, _)| i as f64)).unwrap();
    let markers = MarkerIndexSet::empty(2);
    let weights = [0.4, 0.3, 0.2, 0.1];

    let mut input = ReconstructionInput::new(&expr, &locations, &markers);
    input.cell_weights = Some(&weights);
    input.location_weights = Some(&weights);

    let reconstruction = Reconstruction::new(
        CostConfig {
            knn: 2,
            ..Default::default()
        },
        GwConfig::default(),
    )
    .unwrap();
    let output = reconstruction.run(&input).unwrap();

    assert!(output.solution.converged);
    assert_abs_diff_eq!(
        output.coupling().values().clone(),
        Array2::from_diag(&arr1(&weights)),
        epsilon = 1e-6
    );
    let history = &output.solution.objective_history;
    assert!(history.windows(2).all(|w| w[1] <= w[0] + 1e-12));
}

#[test]
fn self_markers_need_cell_aligned_locations() {
    let (expr, _) = line_cells();
    let markers = MarkerIndexSet::new(vec![0], expr.num_genes()).unwrap();
    let grid = LocationMatrix::new(array![[0.0, 0.0], [0.0, 1.0], [1.0, 0.0], [1.0, 1.0]]).unwrap();

    let reconstruction = Reconstruction::new(CostConfig::default(), GwConfig::default()).unwrap();
    let err = reconstruction
        .run(&ReconstructionInput::new(&expr, &grid, &markers))
        .err()
        .unwrap();
    assert!(matches!(
        error_kind(&err),
        Some(ReconstructionError::ShapeMismatch { .. })
    ));
}

#[test]
fn self_markers_on_a_generated_lattice_are_rejected() {
    // nine cells and a 3 x 3 lattice: counts agree, positions are unrelated
    let expr = ExpressionMatrix::new(Array2::from_shape_fn((9, 3), |(i, g)| {
        ((i + 1) * (g + 2) % 7) as f64
    }))
    .unwrap();
    let lattice = square_grid(9).unwrap();
    assert_eq!(lattice.num_locations(), expr.num_cells());
    let markers = MarkerIndexSet::new(vec![0], expr.num_genes()).unwrap();

    let reconstruction = Reconstruction::new(
        CostConfig {
            knn: 3,
            unreachable: UnreachablePolicy::Clamp,
            ..Default::default()
        },
        GwConfig {
            alpha: 0.5,
            ..Default::default()
        },
    )
    .unwrap();
    let err = reconstruction
        .run(&ReconstructionInput::new(&expr, &lattice, &markers))
        .err()
        .unwrap();
    assert!(matches!(
        error_kind(&err),
        Some(ReconstructionError::InvalidInput(_))
    ));
}
