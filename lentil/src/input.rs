//! Reading expression, gene lists and geometry, and choosing which
//! cells and marker genes take part in a run.

use crate::data::{ExpressionMatrix, LocationMatrix, MarkerIndexSet};
use crate::error::ReconstructionError;

use log::{info, warn};
use matrix_util::common_io::{read_lines, Delimiter};
use matrix_util::ndarray_io::read_named_table;
use matrix_util::traits::IoOps;
use ndarray::prelude::*;
use rand::Rng;
use std::collections::HashMap;

///
/// Read a digital gene expression table with a header row.
///
/// * `file` - whitespace delimited, plain or gzipped
/// * `genes_in_rows` - the first column holds gene names and the header
///   names the cells; otherwise every row is a cell and the header names
///   the genes
///
pub fn read_expression(file: &str, genes_in_rows: bool) -> anyhow::Result<ExpressionMatrix> {
    let table = read_named_table(file, genes_in_rows)?;
    let (values, gene_names) = if genes_in_rows {
        (table.data.reversed_axes(), table.row_names)
    } else {
        (table.data, table.col_names)
    };
    let values = values.as_standard_layout().into_owned();
    info!(
        "read {} cells x {} genes from {}",
        values.nrows(),
        values.ncols(),
        file
    );
    ExpressionMatrix::with_gene_names(values, gene_names)
}

/// One gene name per line; blank lines are ignored
pub fn read_gene_list(file: &str) -> anyhow::Result<Vec<Box<str>>> {
    Ok(read_lines(file)?
        .into_iter()
        .map(|s| s.trim().to_owned().into_boxed_str())
        .filter(|s| !s.is_empty())
        .collect())
}

/// Columns of the named genes, in the order given; names missing from
/// the expression table are dropped with a warning
pub fn gene_indices(expression: &ExpressionMatrix, names: &[Box<str>]) -> Vec<usize> {
    let lookup: HashMap<&str, usize> = expression
        .gene_names()
        .iter()
        .enumerate()
        .map(|(g, name)| (name.as_ref(), g))
        .collect();

    let found: Vec<usize> = names
        .iter()
        .filter_map(|n| lookup.get(n.as_ref()).copied())
        .collect();

    if found.len() < names.len() {
        warn!(
            "{} of {} listed genes are not in the expression table",
            names.len() - found.len(),
            names.len()
        );
    }
    found
}

///
/// Read target coordinates: a numeric table whose first line is a header.
///
/// * `columns` - coordinate columns to keep (e.g. x and z of x y z);
///   all columns when `None`
///
pub fn read_geometry(file: &str, columns: Option<&[usize]>) -> anyhow::Result<LocationMatrix> {
    let coords = Array2::<f64>::read_file_delim(file, Delimiter::Whitespace, Some(0))?;
    let coords = match columns {
        Some(cols) => {
            if let Some(&c) = cols.iter().find(|&&c| c >= coords.ncols()) {
                return Err(ReconstructionError::InvalidInput(format!(
                    "{}: geometry column {} requested, {} available",
                    file,
                    c,
                    coords.ncols()
                ))
                .into());
            }
            coords.select(Axis(1), cols)
        }
        None => coords,
    };
    info!(
        "read {} locations in {} dimensions from {}",
        coords.nrows(),
        coords.ncols(),
        file
    );
    LocationMatrix::new(coords)
}

///
/// Read marker expression measured at the target locations: a table
/// with a header of gene names and one row per location.
///
/// Returns locations x markers, with columns in the order of `markers`.
///
pub fn read_marker_reference(
    file: &str,
    expression: &ExpressionMatrix,
    markers: &MarkerIndexSet,
) -> anyhow::Result<Array2<f64>> {
    let table = read_named_table(file, false)?;
    let lookup: HashMap<&str, usize> = table
        .col_names
        .iter()
        .enumerate()
        .map(|(c, name)| (name.as_ref(), c))
        .collect();

    let mut columns = Vec::with_capacity(markers.len());
    for &g in markers.indices() {
        let name = expression.gene_names()[g].as_ref();
        let c = lookup.get(name).copied().ok_or_else(|| {
            ReconstructionError::InvalidInput(format!(
                "{}: marker gene `{}` has no reference column",
                file, name
            ))
        })?;
        columns.push(c);
    }

    let reference = table.data.select(Axis(1), &columns);
    if reference.iter().any(|x| !x.is_finite() || *x < 0.0) {
        return Err(ReconstructionError::InvalidInput(format!(
            "{}: negative or non-finite marker expression",
            file
        ))
        .into());
    }
    info!(
        "read {} markers at {} locations from {}",
        reference.ncols(),
        reference.nrows(),
        file
    );
    Ok(reference)
}

/// `num_cells` distinct indices out of `0..num_total` in increasing
/// order; everything when `num_cells >= num_total`
pub fn subsample_cells<R: Rng>(num_total: usize, num_cells: usize, rng: &mut R) -> Vec<usize> {
    if num_cells >= num_total {
        return (0..num_total).collect();
    }
    let mut cells = rand::seq::index::sample(rng, num_total, num_cells).into_vec();
    cells.sort_unstable();
    cells
}

/// Markers given by gene name; unknown names are an error
pub fn markers_by_name(
    expression: &ExpressionMatrix,
    names: &[Box<str>],
) -> anyhow::Result<MarkerIndexSet> {
    let mut markers = Vec::with_capacity(names.len());
    for name in names {
        let g = expression.gene_index(name).ok_or_else(|| {
            ReconstructionError::InvalidInput(format!("marker gene `{}` not found", name))
        })?;
        markers.push(g);
    }
    MarkerIndexSet::new(markers, expression.num_genes())
}

/// `num_markers` distinct genes drawn at random
pub fn random_markers<R: Rng>(
    num_genes: usize,
    num_markers: usize,
    rng: &mut R,
) -> anyhow::Result<MarkerIndexSet> {
    if num_markers > num_genes {
        return Err(ReconstructionError::InvalidParameter(format!(
            "{} markers requested from {} genes",
            num_markers, num_genes
        ))
        .into());
    }
    let markers = rand::seq::index::sample(rng, num_genes, num_markers).into_vec();
    MarkerIndexSet::new(markers, num_genes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::io::Write;

    fn write_tmp(dir: &tempfile::TempDir, name: &str, text: &str) -> String {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(text.as_bytes()).unwrap();
        path.to_str().unwrap().to_string()
    }

    #[test]
    fn expression_in_both_layouts() {
        let dir = tempfile::tempdir().unwrap();
        let by_gene = write_tmp(
            &dir,
            "dge.txt",
            "GENE\tc1\tc2\tc3\nsna\t1\t0\t2\nftz\t0\t5\t1\n",
        );
        let expr = read_expression(&by_gene, true).unwrap();
        assert_eq!((expr.num_cells(), expr.num_genes()), (3, 2));
        assert_eq!(expr.gene_index("ftz"), Some(1));
        assert_eq!(expr.values()[(1, 1)], 5.0);

        let by_cell = write_tmp(&dir, "cells.txt", "sna ftz\n1 0\n0 5\n2 1\n");
        let same = read_expression(&by_cell, false).unwrap();
        assert_eq!(same.values(), expr.values());
        assert_eq!(same.gene_names(), expr.gene_names());

        let negative = write_tmp(&dir, "neg.txt", "a b\n1 -2\n");
        assert!(read_expression(&negative, false).is_err());
    }

    #[test]
    fn gene_list_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let dge = write_tmp(&dir, "dge.txt", "a b c\n1 2 3\n4 5 6\n");
        let list = write_tmp(&dir, "hvg.txt", "c\n\nzz\na\n");
        let expr = read_expression(&dge, false).unwrap();
        let names = read_gene_list(&list).unwrap();
        assert_eq!(names.len(), 3);
        assert_eq!(gene_indices(&expr, &names), vec![2, 0]);

        let markers = markers_by_name(&expr, &names[..1]).unwrap();
        assert_eq!(markers.indices(), &[2]);
        assert!(markers_by_name(&expr, &names).is_err());
    }

    #[test]
    fn geometry_columns() {
        let dir = tempfile::tempdir().unwrap();
        let geo = write_tmp(&dir, "geometry.txt", "x y z\n1 2 3\n4 5 6\n");
        let xz = read_geometry(&geo, Some(&[0, 2])).unwrap();
        assert_eq!(xz.coords(), &array![[1.0, 3.0], [4.0, 6.0]]);
        assert_eq!(read_geometry(&geo, None).unwrap().dims(), 3);
        assert!(read_geometry(&geo, Some(&[3])).is_err());
    }

    #[test]
    fn seeded_sampling_is_reproducible() {
        let a = subsample_cells(100, 10, &mut StdRng::seed_from_u64(7));
        let b = subsample_cells(100, 10, &mut StdRng::seed_from_u64(7));
        assert_eq!(a, b);
        assert_eq!(a.len(), 10);
        assert!(a.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(subsample_cells(5, 10, &mut StdRng::seed_from_u64(7)).len(), 5);

        let markers = random_markers(20, 4, &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(markers.len(), 4);
        assert!(random_markers(3, 4, &mut StdRng::seed_from_u64(1)).is_err());
    }

    #[test]
    fn marker_reference_follows_marker_order() {
        let dir = tempfile::tempdir().unwrap();
        let dge = write_tmp(&dir, "dge.txt", "sna ftz eve\n1 2 3\n4 5 6\n");
        let atlas = write_tmp(&dir, "atlas.txt", "eve other sna\n7 0 1\n8 0 2\n9 0 3\n");
        let expr = read_expression(&dge, false).unwrap();

        let markers = MarkerIndexSet::new(vec![2, 0], expr.num_genes()).unwrap();
        let reference = read_marker_reference(&atlas, &expr, &markers).unwrap();
        // marker indices are kept sorted: sna then eve
        assert_eq!(reference, array![[1.0, 7.0], [2.0, 8.0], [3.0, 9.0]]);

        let missing = MarkerIndexSet::new(vec![1], expr.num_genes()).unwrap();
        assert!(read_marker_reference(&atlas, &expr, &missing).is_err());
    }
}
