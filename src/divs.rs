//! Pairwise divergence driver.
//!
//! Both entry points share the same shape: validate everything up front,
//! build one index per bag, precompute the within-bag ρ vectors, then fan
//! the (i, j) pair jobs out over a worker pool. Workers only read shared
//! state; each output cell is written exactly once after the jobs
//! complete, so the numbers are identical for any thread count.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use itertools::Itertools;
use ndarray::Array2;
use rayon::prelude::*;

use crate::estimator::Estimator;
use crate::knn::{BagIndex, IndexKind};
use crate::{Error, Result};

/// One sample of points from an unknown distribution: `points × dim`,
/// row-major.
pub type Bag = Array2<f32>;

/// Called with the number of pair jobs still outstanding. Invoked under a
/// lock and possibly from any worker thread; implementations must not
/// block back into the engine.
pub type ProgressFn<'a> = dyn Fn(usize) + Sync + 'a;

pub struct DivOptions<'a> {
    k: usize,
    index: IndexKind,
    checks: Option<usize>,
    num_threads: usize,
    show_progress: usize,
    progress: Option<&'a ProgressFn<'a>>,
}

impl<'a> Default for DivOptions<'a> {
    fn default() -> Self {
        DivOptions {
            k: 3,
            index: IndexKind::KdTree,
            checks: None,
            num_threads: 0,
            show_progress: 0,
            progress: None,
        }
    }
}

impl<'a> DivOptions<'a> {
    /// Which neighbor to measure distances to. Must be at least 1; the
    /// L2 estimator needs at least 2.
    pub fn k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn index(mut self, index: IndexKind) -> Self {
        self.index = index;
        self
    }

    /// Max kd-tree leaves visited per query; `None` searches exhaustively.
    pub fn checks(mut self, checks: Option<usize>) -> Self {
        self.checks = checks;
        self
    }

    /// 0 means one worker per hardware thread.
    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    /// Report progress every `every` completed pair jobs; 0 is silent.
    pub fn show_progress(mut self, every: usize) -> Self {
        self.show_progress = every;
        self
    }

    pub fn progress(mut self, callback: &'a ProgressFn<'a>) -> Self {
        self.progress = Some(callback);
        self
    }
}

/// Divergences of every bag against every other bag in the same group.
///
/// Writes `estimators.len()` matrices of shape m×m into `results`, where
/// entry `[f][i][j]` estimates d_f(P_i, P_j). Pairs below the diagonal
/// share their cross-neighbor queries with the mirrored pair above it.
pub fn divs_self(
    bags: &[Bag],
    estimators: &[Estimator],
    opts: &DivOptions,
    results: &mut [Array2<f64>],
) -> Result<()> {
    let k = validate_common(bags, estimators, opts)?;
    let m = bags.len();
    validate_results(results, estimators.len(), m, m)?;
    if estimators.is_empty() {
        return Ok(());
    }

    let dim = bags[0].ncols();
    let threads = resolve_threads(opts.num_threads);
    log::info!(
        "computing {} divergence matrices over {m} bags on {threads} thread(s)",
        estimators.len()
    );

    let jobs: Vec<(usize, usize)> = (0..m)
        .flat_map(|i| (0..=i).map(move |j| (i, j)))
        .collect();
    let progress = Progress::new(jobs.len(), opts.show_progress, opts.progress);

    if threads == 1 {
        // no pool, no locks: straight through the job list
        let indices = build_indices(bags, opts.index)?;
        let rhos = compute_rhos(bags, &indices, k, opts.checks)?;
        for &(i, j) in &jobs {
            let out = self_job(bags, &indices, &rhos, estimators, opts, dim, k, i, j)?;
            write_job(results, out);
            progress.bump();
        }
    } else {
        let pool = build_pool(threads)?;
        let outs = pool.install(|| -> Result<Vec<JobOut>> {
            let indices = bags
                .par_iter()
                .map(|bag| BagIndex::build(bag.view(), opts.index))
                .collect::<Result<Vec<_>>>()?;
            let rhos = par_compute_rhos(bags, &indices, k, opts.checks)?;
            log::debug!("indices and rho vectors ready; {} pair jobs", jobs.len());
            jobs.par_iter()
                .map(|&(i, j)| {
                    let out = self_job(bags, &indices, &rhos, estimators, opts, dim, k, i, j)?;
                    progress.bump();
                    Ok(out)
                })
                .collect()
        })?;
        for out in outs {
            write_job(results, out);
        }
    }
    Ok(())
}

/// Divergences of every bag in `x_bags` against every bag in `y_bags`.
///
/// Writes `estimators.len()` matrices of shape m×n into `results`, entry
/// `[f][i][j]` estimating d_f(P_i, Q_j).
pub fn divs_cross(
    x_bags: &[Bag],
    y_bags: &[Bag],
    estimators: &[Estimator],
    opts: &DivOptions,
    results: &mut [Array2<f64>],
) -> Result<()> {
    let k = validate_common(x_bags, estimators, opts)?;
    validate_common(y_bags, estimators, opts)?;
    if x_bags[0].ncols() != y_bags[0].ncols() {
        return Err(Error::invalid(format!(
            "x bags have dimension {} but y bags have {}",
            x_bags[0].ncols(),
            y_bags[0].ncols()
        )));
    }
    let m = x_bags.len();
    let n = y_bags.len();
    validate_results(results, estimators.len(), m, n)?;
    if estimators.is_empty() {
        return Ok(());
    }

    let dim = x_bags[0].ncols();
    let threads = resolve_threads(opts.num_threads);
    log::info!(
        "computing {} divergence matrices for {m}×{n} bag pairs on {threads} thread(s)",
        estimators.len()
    );

    let jobs: Vec<(usize, usize)> = (0..m).cartesian_product(0..n).collect();
    let progress = Progress::new(jobs.len(), opts.show_progress, opts.progress);

    if threads == 1 {
        let x_indices = build_indices(x_bags, opts.index)?;
        let y_indices = build_indices(y_bags, opts.index)?;
        let x_rhos = compute_rhos(x_bags, &x_indices, k, opts.checks)?;
        let y_rhos = compute_rhos(y_bags, &y_indices, k, opts.checks)?;
        for &(i, j) in &jobs {
            let out = cross_job(
                x_bags, y_bags, &x_indices, &y_indices, &x_rhos, &y_rhos, estimators, opts,
                dim, k, i, j,
            )?;
            write_job(results, out);
            progress.bump();
        }
    } else {
        let pool = build_pool(threads)?;
        let outs = pool.install(|| -> Result<Vec<JobOut>> {
            let x_indices = x_bags
                .par_iter()
                .map(|bag| BagIndex::build(bag.view(), opts.index))
                .collect::<Result<Vec<_>>>()?;
            let y_indices = y_bags
                .par_iter()
                .map(|bag| BagIndex::build(bag.view(), opts.index))
                .collect::<Result<Vec<_>>>()?;
            let x_rhos = par_compute_rhos(x_bags, &x_indices, k, opts.checks)?;
            let y_rhos = par_compute_rhos(y_bags, &y_indices, k, opts.checks)?;
            log::debug!("indices and rho vectors ready; {} pair jobs", jobs.len());
            jobs.par_iter()
                .map(|&(i, j)| {
                    let out = cross_job(
                        x_bags, y_bags, &x_indices, &y_indices, &x_rhos, &y_rhos, estimators,
                        opts, dim, k, i, j,
                    )?;
                    progress.bump();
                    Ok(out)
                })
                .collect()
        })?;
        for out in outs {
            write_job(results, out);
        }
    }
    Ok(())
}

/// [`divs_self`] with the result grid allocated for the caller.
pub fn divs_self_alloc(
    bags: &[Bag],
    estimators: &[Estimator],
    opts: &DivOptions,
) -> Result<Vec<Array2<f64>>> {
    let m = bags.len();
    let mut results = vec![Array2::zeros((m, m)); estimators.len()];
    divs_self(bags, estimators, opts, &mut results)?;
    Ok(results)
}

/// [`divs_cross`] with the result grid allocated for the caller.
pub fn divs_cross_alloc(
    x_bags: &[Bag],
    y_bags: &[Bag],
    estimators: &[Estimator],
    opts: &DivOptions,
) -> Result<Vec<Array2<f64>>> {
    let mut results = vec![Array2::zeros((x_bags.len(), y_bags.len())); estimators.len()];
    divs_cross(x_bags, y_bags, estimators, opts, &mut results)?;
    Ok(results)
}

struct JobOut {
    i: usize,
    j: usize,
    vals: Vec<f64>,
    /// The mirrored (j, i) values in self mode when i != j.
    mirror: Option<Vec<f64>>,
}

fn write_job(results: &mut [Array2<f64>], out: JobOut) {
    for (f, v) in out.vals.iter().enumerate() {
        results[f][[out.i, out.j]] = *v;
    }
    if let Some(mirror) = out.mirror {
        for (f, v) in mirror.iter().enumerate() {
            results[f][[out.j, out.i]] = *v;
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn self_job(
    bags: &[Bag],
    indices: &[BagIndex],
    rhos: &[Vec<f32>],
    estimators: &[Estimator],
    opts: &DivOptions,
    dim: usize,
    k: usize,
    i: usize,
    j: usize,
) -> Result<JobOut> {
    if i == j {
        // the cross statistic of a bag against itself is its plain k-NN
        // distance, neighbor-at-self included
        let nu = indices[i].kth_distances(bags[i].view(), k, opts.checks)?;
        let vals = apply_all(estimators, &rhos[i], &nu, &rhos[i], &nu, dim, k, i, j)?;
        Ok(JobOut {
            i,
            j,
            vals,
            mirror: None,
        })
    } else {
        let nu_x = indices[j].kth_distances(bags[i].view(), k, opts.checks)?;
        let nu_y = indices[i].kth_distances(bags[j].view(), k, opts.checks)?;
        let vals = apply_all(estimators, &rhos[i], &nu_x, &rhos[j], &nu_y, dim, k, i, j)?;
        let mirror = apply_all(estimators, &rhos[j], &nu_y, &rhos[i], &nu_x, dim, k, j, i)?;
        Ok(JobOut {
            i,
            j,
            vals,
            mirror: Some(mirror),
        })
    }
}

#[allow(clippy::too_many_arguments)]
fn cross_job(
    x_bags: &[Bag],
    y_bags: &[Bag],
    x_indices: &[BagIndex],
    y_indices: &[BagIndex],
    x_rhos: &[Vec<f32>],
    y_rhos: &[Vec<f32>],
    estimators: &[Estimator],
    opts: &DivOptions,
    dim: usize,
    k: usize,
    i: usize,
    j: usize,
) -> Result<JobOut> {
    let nu_x = y_indices[j].kth_distances(x_bags[i].view(), k, opts.checks)?;
    let nu_y = x_indices[i].kth_distances(y_bags[j].view(), k, opts.checks)?;
    let vals = apply_all(estimators, &x_rhos[i], &nu_x, &y_rhos[j], &nu_y, dim, k, i, j)?;
    Ok(JobOut {
        i,
        j,
        vals,
        mirror: None,
    })
}

#[allow(clippy::too_many_arguments)]
fn apply_all(
    estimators: &[Estimator],
    rho_x: &[f32],
    nu_x: &[f32],
    rho_y: &[f32],
    nu_y: &[f32],
    dim: usize,
    k: usize,
    i: usize,
    j: usize,
) -> Result<Vec<f64>> {
    estimators
        .iter()
        .map(|est| {
            let v = est.apply(rho_x, nu_x, rho_y, nu_y, dim, k)?;
            if v.is_finite() {
                Ok(v)
            } else {
                Err(Error::NumericalFailure {
                    name: est.name(),
                    i,
                    j,
                })
            }
        })
        .collect()
}

fn build_indices<'b>(bags: &'b [Bag], kind: IndexKind) -> Result<Vec<BagIndex<'b>>> {
    bags.iter()
        .map(|bag| BagIndex::build(bag.view(), kind))
        .collect()
}

/// Within-bag k-NN distances, one vector per bag. Queried with k+1
/// because each point sits in its own index at distance zero.
fn compute_rhos(
    bags: &[Bag],
    indices: &[BagIndex],
    k: usize,
    checks: Option<usize>,
) -> Result<Vec<Vec<f32>>> {
    bags.iter()
        .zip(indices)
        .map(|(bag, index)| index.kth_distances(bag.view(), k + 1, checks))
        .collect()
}

fn par_compute_rhos(
    bags: &[Bag],
    indices: &[BagIndex],
    k: usize,
    checks: Option<usize>,
) -> Result<Vec<Vec<f32>>> {
    bags.par_iter()
        .zip(indices)
        .map(|(bag, index)| index.kth_distances(bag.view(), k + 1, checks))
        .collect()
}

fn validate_common(bags: &[Bag], estimators: &[Estimator], opts: &DivOptions) -> Result<usize> {
    if opts.k == 0 {
        return Err(Error::invalid("k must be at least 1"));
    }
    if bags.is_empty() {
        return Err(Error::invalid("at least one bag is required"));
    }
    let dim = bags[0].ncols();
    if dim == 0 {
        return Err(Error::invalid("bags must have at least one column"));
    }
    for (i, bag) in bags.iter().enumerate() {
        if bag.ncols() != dim {
            return Err(Error::invalid(format!(
                "bag {i} has dimension {} but bag 0 has {dim}",
                bag.ncols()
            )));
        }
        if bag.nrows() < opts.k + 1 {
            return Err(Error::invalid(format!(
                "bag {i} has {} points; k = {} needs at least {}",
                bag.nrows(),
                opts.k,
                opts.k + 1
            )));
        }
    }
    for est in estimators {
        est.validate(opts.k)?;
    }
    Ok(opts.k)
}

fn validate_results(
    results: &[Array2<f64>],
    num_estimators: usize,
    rows: usize,
    cols: usize,
) -> Result<()> {
    if results.len() != num_estimators {
        return Err(Error::invalid(format!(
            "expected {num_estimators} result matrices, got {}",
            results.len()
        )));
    }
    for (f, matrix) in results.iter().enumerate() {
        if matrix.nrows() != rows || matrix.ncols() != cols {
            return Err(Error::invalid(format!(
                "result matrix {f} is {}×{}, expected {rows}×{cols}",
                matrix.nrows(),
                matrix.ncols()
            )));
        }
    }
    Ok(())
}

fn resolve_threads(requested: usize) -> usize {
    if requested == 0 {
        num_cpus::get().max(1)
    } else {
        requested
    }
}

fn build_pool(threads: usize) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| Error::invalid(format!("could not build worker pool: {e}")))
}

/// Completed-job counter plus the serialized progress callback. The lock
/// holds the last reported remaining-count so callers only ever observe a
/// strictly decreasing sequence.
struct Progress<'a> {
    total: usize,
    every: usize,
    done: AtomicUsize,
    last: Mutex<usize>,
    callback: Option<&'a ProgressFn<'a>>,
}

impl<'a> Progress<'a> {
    fn new(total: usize, every: usize, callback: Option<&'a ProgressFn<'a>>) -> Self {
        Progress {
            total,
            every,
            done: AtomicUsize::new(0),
            last: Mutex::new(usize::MAX),
            callback,
        }
    }

    fn bump(&self) {
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        if self.every == 0 || done % self.every != 0 {
            return;
        }
        let Some(callback) = self.callback else {
            return;
        };
        let remaining = self.total - done;
        if let Ok(mut last) = self.last.lock() {
            if remaining < *last {
                *last = remaining;
                callback(remaining);
            }
        }
    }
}
