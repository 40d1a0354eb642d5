use bagdiv::{
    divs_cross_alloc, divs_self_alloc, matrix_io, utils, DivOptions, Estimator, IndexKind,
};
use clap::Parser;
use clap_verbosity_flag::Verbosity;
use eyre::{Result, WrapErr};
use human_panic::setup_panic;
use indicatif::ProgressBar;

/// Estimate divergences between bags of sample points.
///
/// Bags are CSV matrices (one point per row) separated by blank lines.
/// One result matrix is written per estimator, blank-line separated, in
/// the order the estimators were given: entry (i, j) estimates the
/// divergence from x bag i to y bag j.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// CSV file of x bags; '-' reads stdin
    #[clap(short, long)]
    x_bags: String,

    /// CSV file of y bags; omit to compare the x bags to themselves
    #[clap(short, long)]
    y_bags: Option<String>,

    /// Output file for the result matrices; '-' writes stdout
    #[clap(short, long, default_value = "-")]
    results: String,

    /// Divergence estimators, e.g. l2, bc, alpha:0.9, renyi:0.999:0.95
    #[clap(short = 'f', long = "div-func", required = true)]
    div_funcs: Vec<String>,

    /// Which nearest neighbor to base the estimates on
    #[clap(short, long, default_value_t = 3)]
    k: usize,

    /// The nearest-neighbor index to use. Options: linear, kdtree
    #[clap(short, long, default_value = "kdtree")]
    index: String,

    /// Max kd-tree leaves checked per query; searches exhaustively if
    /// not set
    #[clap(long)]
    checks: Option<usize>,

    /// Worker threads; 0 uses one thread per hardware thread
    #[clap(short = 'T', long, default_value_t = 0)]
    num_threads: usize,

    /// Update the progress bar every N completed bag pairs; 0 disables it
    #[clap(long, default_value_t = 50)]
    progress_every: usize,

    #[clap(flatten)]
    verbose: Verbosity,
}

fn main() -> Result<()> {
    setup_panic!();

    let args = Args::parse();
    env_logger::Builder::new()
        .filter_level(args.verbose.log_level_filter())
        .init();

    let estimators = args
        .div_funcs
        .iter()
        .map(|spec| spec.parse::<Estimator>())
        .collect::<bagdiv::Result<Vec<_>>>()?;
    let index: IndexKind = args.index.parse()?;

    let x_bags = matrix_io::read_bags(utils::stdin_or_file(dash_to_none(&args.x_bags))?)
        .wrap_err("failed to read x bags")?;
    log::info!("read {} x bags", x_bags.len());

    let y_bags = match &args.y_bags {
        Some(path) => {
            let bags = matrix_io::read_bags(utils::stdin_or_file(dash_to_none(path))?)
                .wrap_err("failed to read y bags")?;
            log::info!("read {} y bags", bags.len());
            Some(bags)
        }
        None => None,
    };

    let num_pairs = match &y_bags {
        Some(y) => x_bags.len() * y.len(),
        None => x_bags.len() * (x_bags.len() + 1) / 2,
    };
    let bar = if args.progress_every > 0 {
        ProgressBar::new(num_pairs as u64)
    } else {
        ProgressBar::hidden()
    };
    let on_progress = {
        let bar = bar.clone();
        move |remaining: usize| bar.set_position((num_pairs - remaining) as u64)
    };

    let opts = DivOptions::default()
        .k(args.k)
        .index(index)
        .checks(args.checks)
        .num_threads(args.num_threads)
        .show_progress(args.progress_every)
        .progress(&on_progress);

    let results = match &y_bags {
        Some(y) => divs_cross_alloc(&x_bags, y, &estimators, &opts)?,
        None => divs_self_alloc(&x_bags, &estimators, &opts)?,
    };
    bar.finish_and_clear();

    let writer = utils::stdout_or_file(dash_to_none(&args.results))?;
    matrix_io::write_matrices(writer, &results)?;
    Ok(())
}

fn dash_to_none(path: &str) -> Option<&str> {
    if path == "-" {
        None
    } else {
        Some(path)
    }
}
