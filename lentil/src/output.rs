use crate::data::{LocationMatrix, ReconstructedExpression};
use crate::error::ReconstructionError;

use log::info;
use matrix_util::common_io::{mkdir, remove_file, write_lines};
use matrix_util::traits::IoOps;
use std::path::Path;

const STAGE_SUFFIX: &str = ".partial";

/// Where one run's artifacts go
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    /// genes x locations
    pub sdge: String,
    /// locations x dims
    pub grid: String,
    pub genes: String,
    /// genes that went into the expression cost
    pub cost_genes: String,
}

impl OutputPaths {
    pub fn new(out_dir: &str, num_cells: usize, num_locations: usize) -> Self {
        let join = |name: String| -> String {
            Path::new(out_dir).join(name).to_string_lossy().into_owned()
        };
        Self {
            sdge: join(format!(
                "sdge_{}_cells_{}_locations.txt",
                num_cells, num_locations
            )),
            grid: join(format!(
                "grid_{}_cells_{}_locations.txt",
                num_cells, num_locations
            )),
            genes: join("genes.txt".to_string()),
            cost_genes: join("high_var_genes.txt".to_string()),
        }
    }

    fn all(&self) -> [&str; 4] {
        [&self.sdge, &self.grid, &self.genes, &self.cost_genes]
    }

    /// Delete whatever of this run's outputs exists
    pub fn remove_all(&self) -> anyhow::Result<()> {
        for file in self.all() {
            remove_file(file)?;
        }
        Ok(())
    }
}

///
/// Write the reconstruction, the locations used and the gene names.
/// Everything is written under staged names first and only renamed into
/// place once all writes went through; a failed run leaves nothing behind.
///
/// * `out_dir` - output directory, created if needed
/// * `num_cells` - cells that went into the reconstruction (for the file names)
/// * `cost_genes` - sDGE rows of the genes used for the expression cost
///
pub fn write_outputs(
    out_dir: &str,
    num_cells: usize,
    sdge: &ReconstructedExpression,
    locations: &LocationMatrix,
    cost_genes: &[usize],
) -> anyhow::Result<OutputPaths> {
    let paths = OutputPaths::new(out_dir, num_cells, locations.num_locations());
    let cost_gene_names = cost_genes
        .iter()
        .map(|&g| {
            sdge.gene_names().get(g).ok_or_else(|| {
                ReconstructionError::InvalidInput(format!(
                    "cost gene row {} out of range for {} genes",
                    g,
                    sdge.num_genes()
                ))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let staged = paths.all().map(|p| format!("{}{}", p, STAGE_SUFFIX));

    let written = (|| -> anyhow::Result<()> {
        for file in &staged {
            mkdir(file)?;
        }
        sdge.values().write_file_delim(&staged[0], " ", 4)?;
        locations.coords().write_file_delim(&staged[1], " ", 4)?;
        write_lines(sdge.gene_names(), &staged[2])?;
        write_lines(&cost_gene_names, &staged[3])?;
        for (from, to) in staged.iter().zip(paths.all()) {
            std::fs::rename(from, to)?;
        }
        Ok(())
    })();

    if let Err(err) = written {
        for file in staged.iter() {
            remove_file(file)?;
        }
        return Err(err);
    }

    info!(
        "wrote {}, {}, {} and {}",
        paths.sdge, paths.grid, paths.genes, paths.cost_genes
    );
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::prelude::*;

    #[test]
    fn file_names_carry_the_sizes() {
        let paths = OutputPaths::new("out", 500, 529);
        assert!(paths.sdge.ends_with("sdge_500_cells_529_locations.txt"));
        assert!(paths.grid.ends_with("grid_500_cells_529_locations.txt"));
        assert!(paths.genes.ends_with("/genes.txt"));
        assert!(paths.cost_genes.ends_with("high_var_genes.txt"));
    }

    #[test]
    fn outputs_are_written_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path().join("run");
        let out_dir = out_dir.to_str().unwrap();

        let sdge = ReconstructedExpression::new(
            array![[1.5, 0.0], [0.25, 2.0]],
            vec!["sna".into(), "ftz".into()],
        );
        let locations = LocationMatrix::new(array![[0.0, 0.0], [0.0, 1.0]]).unwrap();
        let paths = write_outputs(out_dir, 2, &sdge, &locations, &[1]).unwrap();

        let text = std::fs::read_to_string(&paths.sdge).unwrap();
        assert_eq!(text, "1.5000e0 0.0000e0\n2.5000e-1 2.0000e0\n");
        let genes = std::fs::read_to_string(&paths.genes).unwrap();
        assert_eq!(genes, "sna\nftz\n");
        let cost_genes = std::fs::read_to_string(&paths.cost_genes).unwrap();
        assert_eq!(cost_genes, "ftz\n");
        assert!(Path::new(&paths.grid).is_file());

        let leftovers = std::fs::read_dir(out_dir)
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .ends_with(STAGE_SUFFIX)
            })
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn bad_cost_gene_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path().join("run");
        let out_dir = out_dir.to_str().unwrap();

        let sdge = ReconstructedExpression::new(array![[1.0, 2.0]], vec!["sna".into()]);
        let locations = LocationMatrix::new(array![[0.0], [1.0]]).unwrap();
        assert!(write_outputs(out_dir, 2, &sdge, &locations, &[3]).is_err());
        assert!(!Path::new(out_dir).exists());
    }

    #[test]
    fn remove_all_clears_a_finished_run() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path().join("run");
        let out_dir = out_dir.to_str().unwrap();

        let sdge = ReconstructedExpression::new(array![[1.0, 2.0]], vec!["sna".into()]);
        let locations = LocationMatrix::new(array![[0.0], [1.0]]).unwrap();
        let paths = write_outputs(out_dir, 2, &sdge, &locations, &[0]).unwrap();
        assert!(Path::new(&paths.cost_genes).is_file());

        paths.remove_all().unwrap();
        assert_eq!(std::fs::read_dir(out_dir).unwrap().count(), 0);
    }
}
