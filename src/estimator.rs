//! The divergence estimator family.
//!
//! Every estimator consumes the same four neighbor-distance vectors
//! (ρ_x, ν_x, ρ_y, ν_y) even when it ignores some of them; the uniform
//! shape keeps the pairwise driver simple. Estimates follow the
//! k-NN divergence estimators of Poczos & Schneider; Monte-Carlo terms
//! are tail-clipped with [`fix_terms`](crate::stats::fix_terms) before
//! averaging.

use std::fmt;
use std::str::FromStr;

use crate::gamma::{ln_gamma, ln_unit_ball_volume};
use crate::stats::{fix_terms, mean};
use crate::{Error, Result};

pub const DEFAULT_ALPHA: f64 = 0.999;
pub const DEFAULT_UB: f64 = 0.99;

#[derive(Clone, Debug, PartialEq)]
pub enum Estimator {
    /// Plug-in estimate of sqrt(∫ (p - q)^2). Needs k >= 2.
    L2 { ub: f64 },
    /// ∫ p^α q^(1-α) for α != 1.
    Alpha { alpha: f64, ub: f64 },
    /// Bhattacharyya coefficient, the α = 1/2 special case.
    Bc { ub: f64 },
    /// sqrt(1 - BC), clamped to 0 when the coefficient estimate exceeds 1.
    Hellinger { ub: f64 },
    /// Rényi-α divergence log(α-div) / (α - 1), clamped at 0.
    Renyi { alpha: f64, ub: f64 },
    /// Linear functional ∫ qp.
    Linear { ub: f64 },
}

impl Estimator {
    pub fn l2(ub: f64) -> Result<Self> {
        check_ub(ub)?;
        Ok(Estimator::L2 { ub })
    }

    pub fn alpha(alpha: f64, ub: f64) -> Result<Self> {
        check_alpha(alpha)?;
        check_ub(ub)?;
        Ok(Estimator::Alpha { alpha, ub })
    }

    pub fn bc(ub: f64) -> Result<Self> {
        check_ub(ub)?;
        Ok(Estimator::Bc { ub })
    }

    pub fn hellinger(ub: f64) -> Result<Self> {
        check_ub(ub)?;
        Ok(Estimator::Hellinger { ub })
    }

    pub fn renyi(alpha: f64, ub: f64) -> Result<Self> {
        check_alpha(alpha)?;
        check_ub(ub)?;
        Ok(Estimator::Renyi { alpha, ub })
    }

    pub fn linear(ub: f64) -> Result<Self> {
        check_ub(ub)?;
        Ok(Estimator::Linear { ub })
    }

    pub fn name(&self) -> String {
        self.to_string()
    }

    /// Tail-clipping quantile bound.
    pub fn ub(&self) -> f64 {
        match *self {
            Estimator::L2 { ub }
            | Estimator::Alpha { ub, .. }
            | Estimator::Bc { ub }
            | Estimator::Hellinger { ub }
            | Estimator::Renyi { ub, .. }
            | Estimator::Linear { ub } => ub,
        }
    }

    /// Checks that this estimator is well-defined for the given k. Runs
    /// before any worker starts so misconfiguration never reaches the
    /// pair loop.
    pub fn validate(&self, k: usize) -> Result<()> {
        let kf = k as f64;
        match *self {
            Estimator::L2 { .. } if k < 2 => {
                Err(Error::invalid("the L2 estimator needs k >= 2"))
            }
            Estimator::Alpha { alpha, .. } | Estimator::Renyi { alpha, .. }
                if kf + 1.0 - alpha <= 0.0 || kf + alpha - 1.0 <= 0.0 =>
            {
                Err(Error::invalid(format!(
                    "alpha = {alpha} is out of range for k = {k}"
                )))
            }
            _ => Ok(()),
        }
    }

    /// Evaluates the estimator on one pair of bags. `rho_*` are
    /// within-bag k-NN distances, `nu_*` cross-bag; `dim` is the point
    /// dimension shared by both bags.
    pub fn apply(
        &self,
        rho_x: &[f32],
        nu_x: &[f32],
        rho_y: &[f32],
        nu_y: &[f32],
        dim: usize,
        k: usize,
    ) -> Result<f64> {
        match *self {
            Estimator::L2 { ub } => l2_estimate(rho_x, nu_x, rho_y, nu_y, dim, k, ub),
            Estimator::Alpha { alpha, ub } => {
                alpha_estimate(rho_x, nu_x, rho_y.len(), dim, k, alpha, ub)
            }
            Estimator::Bc { ub } => alpha_estimate(rho_x, nu_x, rho_y.len(), dim, k, 0.5, ub),
            Estimator::Hellinger { ub } => {
                let bc = alpha_estimate(rho_x, nu_x, rho_y.len(), dim, k, 0.5, ub)?;
                Ok(if bc < 1.0 { (1.0 - bc).sqrt() } else { 0.0 })
            }
            Estimator::Renyi { alpha, ub } => {
                let est = alpha_estimate(rho_x, nu_x, rho_y.len(), dim, k, alpha, ub)?;
                // f64::max ignores NaN, so an ill-posed log-ratio clamps to 0
                Ok(f64::max(0.0, est.ln() / (alpha - 1.0)))
            }
            Estimator::Linear { ub } => linear_estimate(nu_x, rho_y.len(), dim, k, ub),
        }
    }
}

impl fmt::Display for Estimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Estimator::L2 { .. } => write!(f, "L2 divergence"),
            Estimator::Alpha { alpha, .. } => write!(f, "Alpha {alpha} divergence"),
            Estimator::Bc { .. } => write!(f, "Bhattacharyya coefficient"),
            Estimator::Hellinger { .. } => write!(f, "Hellinger divergence"),
            Estimator::Renyi { alpha, .. } => write!(f, "Renyi-{alpha} divergence"),
            Estimator::Linear { .. } => write!(f, "Linear divergence"),
        }
    }
}

/// Parses an estimator spec of the form `name:arg1:arg2`, e.g. `l2`,
/// `alpha:0.8`, `renyi:0.999:0.95`. Arguments default to α = 0.999 and
/// ub = 0.99.
impl FromStr for Estimator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut tokens = s.split(':');
        let kind = tokens.next().unwrap_or_default();
        let args = tokens
            .map(|t| {
                t.parse::<f64>().map_err(|_| {
                    Error::invalid(format!("bad numeric argument '{t}' in estimator spec '{s}'"))
                })
            })
            .collect::<Result<Vec<f64>>>()?;

        let too_many =
            || Error::invalid(format!("too many arguments in estimator spec '{s}'"));

        match kind {
            "alpha" => match args[..] {
                [] => Estimator::alpha(DEFAULT_ALPHA, DEFAULT_UB),
                [alpha] => Estimator::alpha(alpha, DEFAULT_UB),
                [alpha, ub] => Estimator::alpha(alpha, ub),
                _ => Err(too_many()),
            },
            "bc" => match args[..] {
                [] => Estimator::bc(DEFAULT_UB),
                [ub] => Estimator::bc(ub),
                _ => Err(too_many()),
            },
            "hellinger" => match args[..] {
                [] => Estimator::hellinger(DEFAULT_UB),
                [ub] => Estimator::hellinger(ub),
                _ => Err(too_many()),
            },
            "l2" => match args[..] {
                [] => Estimator::l2(DEFAULT_UB),
                [ub] => Estimator::l2(ub),
                _ => Err(too_many()),
            },
            "linear" => match args[..] {
                [] => Estimator::linear(DEFAULT_UB),
                [ub] => Estimator::linear(ub),
                _ => Err(too_many()),
            },
            "renyi" => match args[..] {
                [] => Estimator::renyi(DEFAULT_ALPHA, DEFAULT_UB),
                [alpha] => Estimator::renyi(alpha, DEFAULT_UB),
                [alpha, ub] => Estimator::renyi(alpha, ub),
                _ => Err(too_many()),
            },
            "" => Err(Error::invalid("empty estimator spec")),
            _ => Err(Error::invalid(format!("unknown estimator '{kind}'"))),
        }
    }
}

fn check_ub(ub: f64) -> Result<()> {
    if ub > 0.0 && ub <= 1.0 {
        Ok(())
    } else {
        Err(Error::invalid(format!(
            "tail-clipping bound ub = {ub} must lie in (0, 1]"
        )))
    }
}

fn check_alpha(alpha: f64) -> Result<()> {
    if alpha.is_finite() && alpha != 1.0 {
        Ok(())
    } else {
        Err(Error::invalid(format!(
            "alpha = {alpha} is not usable; the estimator is undefined at alpha = 1"
        )))
    }
}

/// ln of the leading coefficient (k-1)/V_d, assembled in log space so it
/// stays finite at dimensions where Γ(d/2 + 1) itself would overflow.
fn ln_knn_coefficient(dim: usize, k: usize) -> Result<f64> {
    Ok((k as f64 - 1.0).ln() - ln_unit_ball_volume(dim)?)
}

fn l2_estimate(
    rho_x: &[f32],
    nu_x: &[f32],
    rho_y: &[f32],
    nu_y: &[f32],
    dim: usize,
    k: usize,
    ub: f64,
) -> Result<f64> {
    if k < 2 {
        return Err(Error::invalid("the L2 estimator needs k >= 2"));
    }
    let n = rho_x.len();
    let m = rho_y.len();
    let d = dim as f64;
    let ln_c = ln_knn_coefficient(dim, k)?;
    let term = |x: f32| (ln_c - d * f64::from(x).ln()).exp();

    // sqrt ∫ (p - q)^2 = sqrt(∫ p^2 - ∫ qp - ∫ pq + ∫ q^2)
    let res = if n == m {
        // equal-size bags: clip the combined per-index sum
        let mut combined: Vec<f64> = (0..n)
            .map(|i| {
                term(rho_x[i]) / (n as f64 - 1.0) + term(rho_y[i]) / (m as f64 - 1.0)
                    - term(nu_x[i]) / m as f64
                    - term(nu_y[i]) / n as f64
            })
            .collect();
        fix_terms(&mut combined, ub);
        mean(&combined)
    } else {
        let mut pp: Vec<f64> = rho_x.iter().map(|&x| term(x) / (n as f64 - 1.0)).collect();
        let mut qp: Vec<f64> = nu_x.iter().map(|&x| term(x) / m as f64).collect();
        let mut pq: Vec<f64> = nu_y.iter().map(|&x| term(x) / n as f64).collect();
        let mut qq: Vec<f64> = rho_y.iter().map(|&x| term(x) / (m as f64 - 1.0)).collect();
        for terms in [&mut pp, &mut qp, &mut pq, &mut qq] {
            fix_terms(terms, ub);
        }
        mean(&pp) - mean(&qp) - mean(&pq) + mean(&qq)
    };

    Ok(if res > 0.0 { res.sqrt() } else { 0.0 })
}

/// Shared core of the Alpha / BC / Hellinger / Rényi estimators:
/// ∫ p^α q^(1-α) from the ρ/ν ratio statistics. `m` is the size of the
/// bag the ν distances were measured against.
fn alpha_estimate(
    rho: &[f32],
    nu: &[f32],
    m: usize,
    dim: usize,
    k: usize,
    alpha: f64,
    ub: f64,
) -> Result<f64> {
    let n = rho.len();
    let mut ratios: Vec<f64> = rho
        .iter()
        .zip(nu)
        .map(|(&r, &v)| f64::from(r / v))
        .collect();
    fix_terms(&mut ratios, ub);

    let exponent = dim as f64 * (1.0 - alpha);
    let total: f64 = ratios.iter().map(|x| x.powf(exponent)).sum();

    let kf = k as f64;
    let ln_coef =
        2.0 * ln_gamma(kf)? - ln_gamma(kf + 1.0 - alpha)? - ln_gamma(kf + alpha - 1.0)?;

    Ok(total / n as f64
        * ln_coef.exp()
        * ((n as f64 - 1.0) / m as f64).powf(1.0 - alpha))
}

fn linear_estimate(nu: &[f32], m: usize, dim: usize, k: usize, ub: f64) -> Result<f64> {
    let n = nu.len();
    let d = dim as f64;
    let mut terms: Vec<f64> = nu
        .iter()
        .map(|&x| (-d * f64::from(x).ln()).exp())
        .collect();
    fix_terms(&mut terms, ub);

    let total: f64 = terms.iter().sum();
    let ln_c = ln_knn_coefficient(dim, k)?;
    Ok(total / n as f64 * ln_c.exp() / m as f64)
}
