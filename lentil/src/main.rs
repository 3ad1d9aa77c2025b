use lentil::accuracy::{append_results_log, LogOutcome, DEFAULT_MIN_TOTAL_MASS};
use lentil::cost::{CostConfig, EdgeMetric, LocationMetric, UnreachablePolicy};
use lentil::data::{ExpressionMatrix, LocationMatrix, MarkerIndexSet};
use lentil::error::ReconstructionError;
use lentil::gromov::{GwConfig, GwLoss};
use lentil::grid::square_grid;
use lentil::input::*;
use lentil::output::write_outputs;
use lentil::pipeline::{evaluate_cell_aligned, Reconstruction, ReconstructionInput};
use lentil::sinkhorn::{SinkhornConfig, SinkhornMethod};

use clap::{Args, Parser, Subcommand};
use indicatif::ParallelProgressIterator;
use log::{info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use ndarray::prelude::*;
use rayon::prelude::*;

/// LENTIL
#[derive(Parser, Debug)]
#[command(
    version,
    about = "LENTIL",
    long_about = "Spatial reconstruction of single-cell expression\n\n\
                  LENTIL places dissociated single cells into a tissue by aligning the\n\
                  geometry of expression space (kNN geodesics between cells) with the\n\
                  geometry of physical space through an entropic Gromov-Wasserstein\n\
                  coupling, optionally anchored by a few marker genes of known\n\
                  spatial pattern.",
    term_width = 80
)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Reconstruct spatial expression once",
        long_about = "Reconstruct spatial expression for one choice of alpha.\n\n\
                      Pipeline stages:\n\
                      1. Read expression (and geometry, gene list)\n\
                      2. Subsample cells and choose markers\n\
                      3. Expression, location and marker costs\n\
                      4. Adjusted Gromov-Wasserstein coupling\n\
                      5. Project expression through the coupling\n\
                      6. Evaluate against cell-aligned geometry, if any\n\n\
                      Outputs (in --out):\n\
                      - sdge_{N}_cells_{M}_locations.txt: genes x locations\n\
                      - grid_{N}_cells_{M}_locations.txt: locations x dims\n\
                      - genes.txt: gene names in sDGE row order"
    )]
    Reconstruct(ReconstructArgs),

    #[command(
        about = "Reconstruct for several alphas in parallel",
        long_about = "Run independent reconstructions over a list of alpha values.\n\n\
                      Needs cell-aligned geometry (one coordinate row per cell) so that\n\
                      every run can be scored. Each run appends one line to the results\n\
                      log; degenerate runs are skipped and counted."
    )]
    Sweep(SweepArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    #[arg(required = true, help = "Expression table (whitespace delimited, header row)")]
    dge_file: Box<str>,

    #[arg(long, default_value_t = false,
          help = "Genes are rows (first column = gene names); otherwise cells are rows")]
    genes_in_rows: bool,

    #[arg(long,
          help = "Genes used for the expression cost, one per line (e.g. highly variable genes)")]
    gene_list: Option<Box<str>>,

    #[arg(long, short = 'g',
          help = "Target geometry table (header row); a square grid when omitted",
          long_help = "Target geometry table with a header row.\n\
                       With one row per cell the geometry is cell-aligned: it is subsampled\n\
                       along with the cells and serves as ground truth.\n\
                       Without it a square grid of ceil(sqrt(N))^2 positions is used.")]
    geometry: Option<Box<str>>,

    #[arg(long, value_delimiter(','),
          help = "Geometry columns to use (comma separated, 0-based)")]
    geometry_columns: Option<Vec<usize>>,

    #[arg(long, short = 'n', help = "Number of cells to keep (random subsample)")]
    num_cells: Option<usize>,

    #[arg(long, short = 'm', value_delimiter(','),
          help = "Marker genes by name (comma separated)")]
    markers: Option<Vec<Box<str>>>,

    #[arg(long, default_value_t = 0,
          help = "Number of random marker genes when --markers is not given")]
    num_markers: usize,

    #[arg(long,
          help = "Marker expression at the target locations (header = gene names)",
          long_help = "Marker expression measured at the target locations: a table with a\n\
                       header of gene names and one row per geometry row. Needed to use\n\
                       markers unless the geometry is cell-aligned.")]
    marker_reference: Option<Box<str>>,

    #[arg(short = 'k', long, default_value_t = 5,
          help = "Nearest neighbours in the expression kNN graph")]
    knn: usize,

    #[arg(long, value_enum, default_value = "euclidean",
          help = "Edge weights of the expression kNN graph")]
    edge_metric: EdgeMetric,

    #[arg(long, value_enum, default_value = "euclidean",
          help = "Distance between target positions")]
    location_metric: LocationMetric,

    #[arg(long, default_value_t = false,
          help = "Map cell pairs the kNN graph cannot connect to the largest geodesic")]
    clamp_unreachable: bool,

    #[arg(long, default_value_t = 5e-4, help = "Entropic regularization")]
    epsilon: f64,

    #[arg(long, default_value_t = 1e-9,
          help = "Stop when the coupling changes less than this (Frobenius)")]
    tol: f64,

    #[arg(long, default_value_t = 1000, help = "Maximum outer iterations")]
    max_iter: usize,

    #[arg(long, value_enum, default_value = "square-loss", help = "GW loss")]
    loss: GwLoss,

    #[arg(long, value_enum, default_value = "logdomain",
          help = "Sinkhorn updates for every inner transport")]
    sinkhorn: SinkhornMethod,

    #[arg(long, default_value_t = 42, help = "Random seed for cell and marker sampling")]
    seed: u64,

    #[arg(long, short, default_value = "output", help = "Output directory")]
    out: Box<str>,

    #[arg(long, help = "Results log to append `num_cells,num_markers,pearson` lines to")]
    results_log: Option<Box<str>>,

    #[arg(long, default_value_t = DEFAULT_MIN_TOTAL_MASS,
          help = "Runs whose sDGE mass is at most this are not logged")]
    min_total_mass: f64,

    #[arg(long, help = "Number of threads (default: all CPUs)")]
    threads: Option<usize>,

    #[arg(long, default_value_t = false, help = "Show a progress bar")]
    show_progress: bool,

    #[arg(long, short, help = "Enable verbose logging (sets RUST_LOG=info)")]
    verbose: bool,
}

impl RunArgs {
    fn cost_config(&self) -> CostConfig {
        CostConfig {
            knn: self.knn,
            edge_metric: self.edge_metric,
            unreachable: if self.clamp_unreachable {
                UnreachablePolicy::Clamp
            } else {
                UnreachablePolicy::Fail
            },
            location_metric: self.location_metric,
        }
    }

    fn gw_config(&self, alpha: f64) -> GwConfig {
        GwConfig {
            alpha,
            epsilon: self.epsilon,
            tol: self.tol,
            max_iter: self.max_iter,
            loss: self.loss,
            sinkhorn: SinkhornConfig {
                method: self.sinkhorn,
                ..Default::default()
            },
            show_progress: self.show_progress,
        }
    }
}

#[derive(Args, Debug)]
struct ReconstructArgs {
    #[command(flatten)]
    run: RunArgs,

    #[arg(long, short = 'a', default_value_t = 0.0,
          help = "Weight of the marker cost (0 = de novo, 1 = markers only)")]
    alpha: f64,
}

#[derive(Args, Debug)]
struct SweepArgs {
    #[command(flatten)]
    run: RunArgs,

    #[arg(long, required = true, value_delimiter(','),
          help = "Alpha values (comma separated)")]
    alphas: Vec<f64>,
}

/// Inputs after subsampling and marker choice
struct Prepared {
    expression: ExpressionMatrix,
    locations: LocationMatrix,
    /// one location per cell, in cell order
    cell_aligned: bool,
    markers: MarkerIndexSet,
    /// locations x markers
    marker_reference: Option<Array2<f64>>,
    cost_genes: Option<Vec<usize>>,
}

impl Prepared {
    fn input(&self) -> ReconstructionInput<'_> {
        let mut input = ReconstructionInput::new(&self.expression, &self.locations, &self.markers);
        input.cost_genes = self.cost_genes.as_deref();
        input.marker_reference = self.marker_reference.as_ref();
        input.cell_aligned = self.cell_aligned;
        input
    }
}

fn init(args: &RunArgs) -> anyhow::Result<()> {
    if args.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let num_threads = args.threads.unwrap_or_else(num_cpus::get).max(1);
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build_global()?;
    Ok(())
}

fn prepare(args: &RunArgs) -> anyhow::Result<Prepared> {
    let mut rng = StdRng::seed_from_u64(args.seed);

    let expression = read_expression(&args.dge_file, args.genes_in_rows)?;
    let geometry = match &args.geometry {
        Some(file) => Some(read_geometry(file, args.geometry_columns.as_deref())?),
        None => None,
    };
    let cell_aligned = geometry
        .as_ref()
        .is_some_and(|g| g.num_locations() == expression.num_cells());

    let num_total = expression.num_cells();
    let cells = subsample_cells(num_total, args.num_cells.unwrap_or(num_total), &mut rng);
    let expression = if cells.len() < num_total {
        info!("kept {} of {} cells", cells.len(), num_total);
        expression.select_cells(&cells)
    } else {
        expression
    };

    let locations = match geometry {
        Some(g) if cell_aligned => g.select_locations(&cells),
        Some(g) => g,
        None => square_grid(expression.num_cells())?,
    };

    let markers = match &args.markers {
        Some(names) => markers_by_name(&expression, names)?,
        None if args.num_markers > 0 => {
            random_markers(expression.num_genes(), args.num_markers, &mut rng)?
        }
        None => MarkerIndexSet::empty(expression.num_genes()),
    };
    if !markers.is_empty() {
        let names: Vec<&str> = markers
            .indices()
            .iter()
            .map(|&g| expression.gene_names()[g].as_ref())
            .collect();
        info!("markers: {}", names.join(","));
    }

    let marker_reference = match &args.marker_reference {
        Some(file) if !markers.is_empty() => {
            let reference = read_marker_reference(file, &expression, &markers)?;
            if cell_aligned && reference.nrows() == num_total {
                Some(reference.select(Axis(0), &cells))
            } else {
                Some(reference)
            }
        }
        Some(_) => {
            warn!("no markers chosen; --marker-reference ignored");
            None
        }
        None => None,
    };

    if !markers.is_empty() && marker_reference.is_none() && !cell_aligned {
        return Err(ReconstructionError::InvalidInput(
            "markers need cell-aligned geometry (-g with one row per cell) or --marker-reference"
                .into(),
        )
        .into());
    }

    let cost_genes = match &args.gene_list {
        Some(file) => Some(gene_indices(&expression, &read_gene_list(file)?)),
        None => None,
    };

    Ok(Prepared {
        expression,
        locations,
        cell_aligned,
        markers,
        marker_reference,
        cost_genes,
    })
}

fn reconstruct(args: &ReconstructArgs) -> anyhow::Result<()> {
    let run = &args.run;
    init(run)?;
    let data = prepare(run)?;

    let reconstruction = Reconstruction::new(run.cost_config(), run.gw_config(args.alpha))?;
    let output = reconstruction.run(&data.input())?;
    if !output.solution.converged {
        warn!(
            "using the last iterate after {} iterations",
            output.solution.iterations
        );
    }

    let accuracy = if data.cell_aligned {
        let accuracy = evaluate_cell_aligned(&output, &data.expression, &data.markers)?;
        info!(
            "mean Pearson correlation {:.4} ({} genes without variance)",
            accuracy.mean, accuracy.undefined_genes
        );
        Some(accuracy)
    } else {
        if run.results_log.is_some() {
            warn!("no cell-aligned geometry to score against; results log left untouched");
        }
        None
    };

    let paths = write_outputs(
        &run.out,
        output.num_cells,
        &output.sdge,
        &data.locations,
        &output.cost_genes,
    )?;

    if let (Some(accuracy), Some(log_file)) = (&accuracy, &run.results_log) {
        let record = output.run_record(accuracy);
        if let Err(err) = append_results_log(log_file, &record, run.min_total_mass) {
            paths.remove_all()?;
            return Err(err);
        }
    }

    info!("done");
    Ok(())
}

fn sweep(args: &SweepArgs) -> anyhow::Result<()> {
    let run = &args.run;
    init(run)?;
    let data = prepare(run)?;

    if !data.cell_aligned {
        return Err(ReconstructionError::InvalidInput(
            "a sweep needs cell-aligned geometry (one coordinate row per cell)".into(),
        )
        .into());
    }
    let log_file = run
        .results_log
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("a sweep needs --results-log"))?;

    let outcomes = args
        .alphas
        .par_iter()
        .progress_count(args.alphas.len() as u64)
        .map(|&alpha| -> anyhow::Result<LogOutcome> {
            let reconstruction = Reconstruction::new(run.cost_config(), run.gw_config(alpha))?;
            let output = reconstruction.run(&data.input())?;
            let accuracy = evaluate_cell_aligned(&output, &data.expression, &data.markers)?;
            info!("alpha = {}: mean Pearson {:.4}", alpha, accuracy.mean);
            append_results_log(log_file, &output.run_record(&accuracy), run.min_total_mass)
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let skipped = outcomes
        .iter()
        .filter(|&&o| o == LogOutcome::SkippedDegenerate)
        .count();
    if skipped > 0 {
        warn!("{} of {} runs were degenerate and not logged", skipped, outcomes.len());
    }
    info!(
        "logged {} of {} runs to {}",
        outcomes.len() - skipped,
        outcomes.len(),
        log_file
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.commands {
        Commands::Reconstruct(args) => {
            reconstruct(args)?;
        }
        Commands::Sweep(args) => {
            sweep(args)?;
        }
    }

    Ok(())
}
