//! tfdraw CLI

mod job;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tf_tree::{BinMapper, Dataset, DrawPlan, Histogram, transpose};

#[derive(Parser)]
#[command(name = "tfdraw")]
#[command(about = "tfdraw - fill many histograms in one pass and unroll 2D histograms")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a YAML draw job over a dataset
    Draw {
        /// Job file (YAML)
        #[arg(short, long)]
        config: PathBuf,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Threads, overriding the job (1 = single sequential pass, 0 = auto).
        #[arg(long)]
        threads: Option<usize>,
    },

    /// Unroll a 2D histogram into a 1D histogram
    Unroll {
        /// Histogram JSON (one histogram, a list, or a draw output)
        #[arg(short, long)]
        input: PathBuf,

        /// Name of the 2D histogram
        #[arg(long)]
        name: String,

        /// Drop under/overflow cells instead of merging them into the reserved bins
        #[arg(long)]
        no_flow: bool,

        /// Number the cells y fastest
        #[arg(long)]
        transpose: bool,

        /// Divide each bin by the width of its cell along the fastest axis
        #[arg(long)]
        divide_by_width: bool,

        /// Output file (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Roll an unrolled 1D histogram back onto a 2D grid
    Rollup {
        /// Histogram JSON holding the unrolled histogram
        #[arg(short, long)]
        input: PathBuf,

        /// Name of the unrolled histogram
        #[arg(long)]
        name: String,

        /// Histogram JSON holding the reference 2D histogram
        #[arg(long)]
        axes: PathBuf,

        /// Name of the reference 2D histogram
        #[arg(long)]
        axes_name: String,

        /// The input was unrolled with y fastest
        #[arg(long)]
        transposed: bool,

        /// Output file (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print version
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).with_target(false).init();

    match cli.command {
        Commands::Draw { config, output, threads } => cmd_draw(&config, output.as_ref(), threads),
        Commands::Unroll { input, name, no_flow, transpose, divide_by_width, output } => {
            cmd_unroll(&input, &name, !no_flow, transpose, divide_by_width, output.as_ref())
        }
        Commands::Rollup { input, name, axes, axes_name, transposed, output } => {
            cmd_rollup(&input, &name, &axes, &axes_name, transposed, output.as_ref())
        }
        Commands::Version => {
            println!("tfdraw {}", tf_core::VERSION);
            Ok(())
        }
    }
}

fn cmd_draw(config: &Path, output: Option<&PathBuf>, threads: Option<usize>) -> Result<()> {
    let job = job::Job::load(config)?;
    let threads = threads.unwrap_or(job.threads);

    tracing::info!(path = %job.dataset.display(), "loading dataset");
    let dataset = Dataset::from_manifest(&job.dataset)
        .with_context(|| format!("loading dataset {}", job.dataset.display()))?;
    let corrections = job.corrections()?;
    let plan = DrawPlan::new(job.selection.as_str(), &job.draws, &[])?;
    tracing::info!(
        sources = dataset.sources().len(),
        entries = dataset.entries(),
        draws = plan.len(),
        "draw plan ready"
    );

    let result = if threads == 1 {
        plan.run(&dataset, &corrections)?
    } else {
        if threads > 0 {
            // Best-effort; if a global pool already exists, keep going.
            let _ = rayon::ThreadPoolBuilder::new().num_threads(threads).build_global();
        }
        plan.run_partitioned(&dataset, &corrections)?
    };
    tracing::info!(
        selected = result.summary.selected,
        fills = result.summary.fills,
        rate = result.summary.rate(),
        "draw complete"
    );

    write_json(output, serde_json::to_value(&result)?)
}

/// Histogram files hold one histogram, a list, or a draw output.
#[derive(Deserialize)]
#[serde(untagged)]
enum HistogramFile {
    One(Histogram),
    Many(Vec<Histogram>),
    Output { histograms: Vec<Histogram> },
}

fn read_histogram(path: &Path, name: &str) -> Result<Histogram> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading histograms {}", path.display()))?;
    let file: HistogramFile = serde_json::from_str(&text)
        .with_context(|| format!("parsing histograms {}", path.display()))?;
    let all = match file {
        HistogramFile::One(h) => vec![h],
        HistogramFile::Many(hs) | HistogramFile::Output { histograms: hs } => hs,
    };
    match all.into_iter().find(|h| h.name() == name) {
        Some(h) => Ok(h),
        None => bail!("no histogram named '{}' in {}", name, path.display()),
    }
}

fn cmd_unroll(
    input: &Path,
    name: &str,
    include_flow: bool,
    transposed: bool,
    divide_by_width: bool,
    output: Option<&PathBuf>,
) -> Result<()> {
    let hist = read_histogram(input, name)?;
    let Some(h2) = hist.as_2d() else {
        bail!("histogram '{}' is 1D, nothing to unroll", name);
    };
    let mapper = BinMapper::from_histogram(h2);
    let mut flat = mapper.flatten(h2, include_flow)?;
    if transposed {
        flat = transpose(&flat, mapper.nx(), mapper.ny())?;
    }
    if divide_by_width {
        mapper.divide_by_bin_width(&mut flat, transposed)?;
    }
    tracing::info!(name = %flat.name, bins = flat.n_bins(), transposed, "unrolled");
    write_json(output, serde_json::to_value(Histogram::from(flat))?)
}

fn cmd_rollup(
    input: &Path,
    name: &str,
    axes: &Path,
    axes_name: &str,
    transposed: bool,
    output: Option<&PathBuf>,
) -> Result<()> {
    let reference = read_histogram(axes, axes_name)?;
    let Some(grid) = reference.as_2d() else {
        bail!("reference histogram '{}' is not 2D", axes_name);
    };
    let mapper = BinMapper::from_histogram(grid);
    let hist = read_histogram(input, name)?;
    let Some(flat) = hist.as_1d() else {
        bail!("histogram '{}' is not 1D", name);
    };
    let rolled = if transposed {
        mapper.unflatten(&transpose(flat, mapper.ny(), mapper.nx())?)?
    } else {
        mapper.unflatten(flat)?
    };
    write_json(output, serde_json::to_value(Histogram::from(rolled))?)
}

fn write_json(output: Option<&PathBuf>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}
