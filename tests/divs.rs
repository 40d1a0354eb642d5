//! End-to-end properties of the pairwise driver on Gaussian bags.

use bagdiv::{
    divs_cross_alloc, divs_self_alloc, DivOptions, Error, Estimator, IndexKind,
};
use float_eq::assert_float_eq;
use ndarray::Array2;
use rand::distributions::Distribution;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use statrs::distribution::Normal;

const BAGS_PER_GROUP: usize = 5;
const POINTS_PER_BAG: usize = 128;
const DIM: usize = 2;

fn gaussian_bags(rng: &mut SmallRng, count: usize, mean: f64) -> Vec<Array2<f32>> {
    let normal = Normal::new(mean, 1.0).unwrap();
    (0..count)
        .map(|_| Array2::from_shape_fn((POINTS_PER_BAG, DIM), |_| normal.sample(rng) as f32))
        .collect()
}

/// Two groups of bags drawn from two separated 2-D Gaussians.
fn two_groups() -> (Vec<Array2<f32>>, Vec<Array2<f32>>) {
    let mut rng = SmallRng::seed_from_u64(2456);
    let x = gaussian_bags(&mut rng, BAGS_PER_GROUP, 0.0);
    let y = gaussian_bags(&mut rng, BAGS_PER_GROUP, 2.0);
    (x, y)
}

fn estimators() -> Vec<Estimator> {
    vec![
        Estimator::l2(0.99).unwrap(),
        Estimator::renyi(0.999, 0.99).unwrap(),
        Estimator::hellinger(0.99).unwrap(),
        Estimator::bc(0.99).unwrap(),
    ]
}

#[test]
fn every_cell_is_written() {
    let (x, y) = two_groups();
    let bags: Vec<_> = x.into_iter().chain(y).collect();
    let ests = estimators();
    let opts = DivOptions::default();

    let mut results = vec![Array2::from_elem((bags.len(), bags.len()), f64::NAN); ests.len()];
    bagdiv::divs_self(&bags, &ests, &opts, &mut results).unwrap();
    for matrix in &results {
        assert!(matrix.iter().all(|v| v.is_finite()));
    }
}

#[test]
fn results_do_not_depend_on_thread_count() {
    let (x, y) = two_groups();
    let bags: Vec<_> = x.into_iter().chain(y).collect();
    let ests = estimators();

    let baseline =
        divs_self_alloc(&bags, &ests, &DivOptions::default().num_threads(1)).unwrap();
    for threads in [2, 50] {
        let other =
            divs_self_alloc(&bags, &ests, &DivOptions::default().num_threads(threads)).unwrap();
        for (a, b) in baseline.iter().zip(&other) {
            for (u, v) in a.iter().zip(b.iter()) {
                assert_float_eq!(*u, *v, abs <= 1e-6);
            }
        }
    }
}

#[test]
fn linear_index_matches_kdtree() {
    let (x, _) = two_groups();
    let ests = estimators();

    let kd = divs_self_alloc(&x, &ests, &DivOptions::default().index(IndexKind::KdTree)).unwrap();
    let lin =
        divs_self_alloc(&x, &ests, &DivOptions::default().index(IndexKind::Linear)).unwrap();
    for (a, b) in kd.iter().zip(&lin) {
        for (u, v) in a.iter().zip(b.iter()) {
            assert_float_eq!(*u, *v, rmax <= 1e-3, abs <= 1e-5);
        }
    }
}

#[test]
fn cross_mode_equals_upper_right_block_of_self_mode() {
    let (x, y) = two_groups();
    let ests = estimators();
    let opts = DivOptions::default();

    let all: Vec<_> = x.iter().cloned().chain(y.iter().cloned()).collect();
    let whole = divs_self_alloc(&all, &ests, &opts).unwrap();
    let cross = divs_cross_alloc(&x, &y, &ests, &opts).unwrap();

    for (f, matrix) in cross.iter().enumerate() {
        assert_eq!(matrix.shape(), &[BAGS_PER_GROUP, BAGS_PER_GROUP]);
        for i in 0..BAGS_PER_GROUP {
            for j in 0..BAGS_PER_GROUP {
                assert_float_eq!(
                    matrix[[i, j]],
                    whole[f][[i, BAGS_PER_GROUP + j]],
                    rmax <= 1e-3,
                    abs <= 1e-5
                );
            }
        }
    }
}

#[test]
fn self_mode_diagonal_equals_cross_of_itself() {
    let (x, _) = two_groups();
    let ests = estimators();
    let opts = DivOptions::default();

    let own = divs_self_alloc(&x, &ests, &opts).unwrap();
    let cross = divs_cross_alloc(&x, &x, &ests, &opts).unwrap();
    for (f, matrix) in cross.iter().enumerate() {
        for i in 0..BAGS_PER_GROUP {
            assert_float_eq!(matrix[[i, i]], own[f][[i, i]], abs <= 1e-9);
        }
    }
}

#[test]
fn l2_self_mode_is_symmetric() {
    let (x, y) = two_groups();
    let bags: Vec<_> = x.into_iter().chain(y).collect();
    let ests = vec![Estimator::l2(0.99).unwrap()];

    let results = divs_self_alloc(&bags, &ests, &DivOptions::default()).unwrap();
    let matrix = &results[0];
    for i in 0..bags.len() {
        for j in 0..bags.len() {
            assert_float_eq!(matrix[[i, j]], matrix[[j, i]], rmax <= 1e-6, abs <= 1e-9);
        }
    }
}

// The Bhattacharyya estimate averages different ratio sets in the two
// directions, so it is only statistically symmetric; bags drawn from the
// same distribution keep the directional difference small.
#[test]
fn bc_self_mode_is_statistically_symmetric() {
    let (x, _) = two_groups();
    let ests = vec![Estimator::bc(0.99).unwrap()];

    let results = divs_self_alloc(&x, &ests, &DivOptions::default()).unwrap();
    let matrix = &results[0];
    for i in 0..BAGS_PER_GROUP {
        for j in 0..BAGS_PER_GROUP {
            assert_float_eq!(matrix[[i, j]], matrix[[j, i]], abs <= 0.35);
        }
    }
}

#[test]
fn separated_groups_diverge_more_than_twins() {
    let (x, y) = two_groups();
    let ests = vec![Estimator::hellinger(0.99).unwrap()];

    let cross = divs_cross_alloc(&x, &y, &ests, &DivOptions::default()).unwrap();
    let within = divs_self_alloc(&x, &ests, &DivOptions::default()).unwrap();

    let mean_cross = cross[0].iter().sum::<f64>() / cross[0].len() as f64;
    let off_diag: Vec<f64> = (0..BAGS_PER_GROUP)
        .flat_map(|i| {
            let matrix = &within[0];
            (0..BAGS_PER_GROUP)
                .filter(move |&j| j != i)
                .map(move |j| matrix[[i, j]])
                .collect::<Vec<_>>()
        })
        .collect();
    let mean_within = off_diag.iter().sum::<f64>() / off_diag.len() as f64;

    // bags two standard deviations apart are far more distinguishable
    // than bags from the same Gaussian
    assert!(mean_cross > mean_within);
}

#[test]
fn degenerate_bag_reports_numerical_failure() {
    let mut rng = SmallRng::seed_from_u64(7);
    let normal = gaussian_bags(&mut rng, 1, 0.0).remove(0);
    // every within-bag distance of a constant bag is zero, which drives
    // the Renyi log-ratio to infinity
    let constant = Array2::from_elem((POINTS_PER_BAG, DIM), 1.0f32);
    let bags = vec![constant, normal];
    let ests = vec![Estimator::renyi(0.999, 0.99).unwrap()];

    let err = divs_self_alloc(&bags, &ests, &DivOptions::default()).unwrap_err();
    assert!(matches!(err, Error::NumericalFailure { .. }));
}
