use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A caller-supplied parameter is outside the domain the estimators
    /// are defined on: k too small, alpha == 1, a misshapen output grid,
    /// bags of mismatched dimension, and so on.
    #[error("invalid parameter: {0}")]
    InvalidDomain(String),

    /// The result of an exact computation does not fit in an f64.
    #[error("overflow: {0}")]
    Overflow(String),

    /// An estimator produced NaN or infinity after tail-clipping; carries
    /// the first observed offender.
    #[error("estimator {name} produced a non-finite value for pair ({i}, {j})")]
    NumericalFailure { name: String, i: usize, j: usize },

    /// Reserved for a future cancellation hook; never issued today.
    #[error("computation interrupted")]
    Interrupted,
}

impl Error {
    pub(crate) fn invalid<S: Into<String>>(msg: S) -> Self {
        Error::InvalidDomain(msg.into())
    }
}
