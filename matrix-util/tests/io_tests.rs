use matrix_util::common_io::{create_temp_dir_file, read_lines, write_lines};
use matrix_util::ndarray_io::read_named_table;
use matrix_util::traits::IoOps;
use ndarray::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn runif(nrow: usize, ncol: usize, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array2::from_shape_fn((nrow, ncol), |_| rng.random::<f64>())
}

#[test]
fn ndarray_io_test() -> anyhow::Result<()> {
    let xx = runif(20, 7, 1);

    let tsv_file = create_temp_dir_file("txt.gz")?;
    xx.write_file_delim(tsv_file.to_str().unwrap(), "\t", 4)?;

    let yy = Array2::<f64>::read_file_delim(tsv_file.to_str().unwrap(), "\t", None)?;

    assert_eq!(xx.dim(), yy.dim());
    // four decimals in scientific notation
    approx::assert_relative_eq!(xx, yy, max_relative = 1e-4);

    Ok(())
}

#[test]
fn scientific_format_on_disk() -> anyhow::Result<()> {
    let xx = array![[1234.5678, 0.0], [-0.000123456, 1.0]];
    let file = create_temp_dir_file("txt")?;
    xx.write_file_delim(file.to_str().unwrap(), "\t", 4)?;

    let lines = read_lines(file.to_str().unwrap())?;
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0].as_ref(), "1.2346e3\t0.0000e0");
    assert_eq!(lines[1].as_ref(), "-1.2346e-4\t1.0000e0");
    Ok(())
}

#[test]
fn named_table_with_row_names() -> anyhow::Result<()> {
    let file = create_temp_dir_file("txt")?;
    let lines = vec![
        "gene\tcell_a\tcell_b\tcell_c",
        "# comment lines are ignored",
        "g1\t1\t0\t2.5",
        "g2\t0\t3\t1",
    ];
    write_lines(&lines, file.to_str().unwrap())?;

    let table = read_named_table(file.to_str().unwrap(), true)?;
    assert_eq!(table.data.dim(), (2, 3));
    assert_eq!(table.row_names.len(), 2);
    assert_eq!(table.row_names[1].as_ref(), "g2");
    assert_eq!(table.col_names.len(), 3);
    assert_eq!(table.col_names[0].as_ref(), "cell_a");
    assert_eq!(table.data[(0, 2)], 2.5);
    Ok(())
}

#[test]
fn named_table_rejects_ragged_rows() -> anyhow::Result<()> {
    let file = create_temp_dir_file("txt")?;
    let lines = vec!["a b c", "1 2 3", "4 5"];
    write_lines(&lines, file.to_str().unwrap())?;
    assert!(read_named_table(file.to_str().unwrap(), false).is_err());

    let lines = vec!["a b", "1 x"];
    write_lines(&lines, file.to_str().unwrap())?;
    assert!(read_named_table(file.to_str().unwrap(), false).is_err());
    Ok(())
}
