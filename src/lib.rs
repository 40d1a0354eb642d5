//! Nonparametric divergence estimation between bags of sample points.
//!
//! Each distribution is known only through an i.i.d. sample of real
//! vectors. Divergences (L2, α, Bhattacharyya, Hellinger, Rényi-α,
//! linear) are estimated from k-nearest-neighbor distances within and
//! across bags and returned as one matrix per estimator.

pub mod divs;
pub mod estimator;
pub mod gamma;
pub mod knn;
pub mod matrix_io;
pub mod stats;
pub mod utils;

mod error;

pub use divs::{
    divs_cross, divs_cross_alloc, divs_self, divs_self_alloc, Bag, DivOptions, ProgressFn,
};
pub use error::{Error, Result};
pub use estimator::Estimator;
pub use knn::{BagIndex, IndexKind};
