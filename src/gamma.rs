//! Gamma and log-gamma, plus the log-volume of the unit d-ball.
//!
//! The estimator coefficients only ever need these in log space, which is
//! what keeps high-dimensional inputs from overflowing; `gamma` itself is
//! limited to arguments below 172 and says so instead of returning
//! infinity.

use std::f64::consts::PI;

use crate::{Error, Result};

/// Power-series coefficients for 1/Γ(x) on |x| <= 1, from Zhang & Jin,
/// "Computation of Special Functions" (1996).
const GAMMA_SERIES: [f64; 25] = [
    1.0,
    0.5772156649015329,
    -0.6558780715202538,
    -0.420026350340952e-1,
    0.1665386113822915,
    -0.421977345555443e-1,
    -0.9621971527877e-2,
    0.7218943246663e-2,
    -0.11651675918591e-2,
    -0.2152416741149e-3,
    0.1280502823882e-3,
    -0.201348547807e-4,
    -0.12504934821e-5,
    0.1133027232e-5,
    -0.2056338417e-6,
    0.6116095e-8,
    0.50020075e-8,
    -0.11812746e-8,
    0.1043427e-9,
    0.77823e-11,
    -0.36968e-11,
    0.51e-12,
    -0.206e-13,
    -0.54e-14,
    0.14e-14,
];

/// Asymptotic (Stirling) series coefficients for ln Γ.
const LN_GAMMA_SERIES: [f64; 10] = [
    8.333333333333333e-02,
    -2.777777777777778e-03,
    7.936507936507937e-04,
    -5.952380952380952e-04,
    8.417508417508418e-04,
    -1.917526917526918e-03,
    6.410256410256410e-03,
    -2.955065359477124e-02,
    1.796443723688307e-01,
    -1.39243221690590,
];

/// Γ(x) for real x.
///
/// Positive integers and half-integers are computed exactly (factorial and
/// double-factorial products); everything else goes through the recurrence
/// and the 25-term series. Fails with `InvalidDomain` for nonpositive
/// integers and with `Overflow` for x > 171, where the result no longer
/// fits in an f64; use [`ln_gamma`] there.
pub fn gamma(x: f64) -> Result<f64> {
    if x.abs() > 171.0 {
        return Err(Error::Overflow(format!(
            "gamma({x}) exceeds f64 range; use ln_gamma"
        )));
    }

    if x == x.floor() {
        if x <= 0.0 {
            return Err(Error::invalid(format!(
                "gamma is not defined for nonpositive integer {x}"
            )));
        }
        // gamma(n) = (n-1)!
        let mut ga = 1.0;
        let mut i = 2.0;
        while i < x {
            ga *= i;
            i += 1.0;
        }
        return Ok(ga);
    }

    if x > 0.0 && (x - 0.5) == (x - 0.5).floor() {
        // gamma(n + 1/2) = sqrt(pi) * (1 - 1/2) * (2 - 1/2) * ... * (n - 1/2)
        let mut ga = PI.sqrt();
        let mut i = 1.0;
        while i < x {
            ga *= i - 0.5;
            i += 1.0;
        }
        return Ok(ga);
    }

    // Reduce |x| into [0, 1] with the recurrence, evaluate the series
    // there, then undo the reduction (reflecting for negative x).
    let mut z = x;
    let mut r = 1.0;
    let reduced = x.abs() > 1.0;
    if reduced {
        z = x.abs();
        let m = z.floor();
        let mut k = 1.0;
        while k <= m {
            r *= z - k;
            k += 1.0;
        }
        z -= m;
    }

    let mut gr = GAMMA_SERIES[24];
    for k in (0..24).rev() {
        gr = gr * z + GAMMA_SERIES[k];
    }
    let mut ga = 1.0 / (gr * z);

    if reduced {
        ga *= r;
        if x < 0.0 {
            ga = -PI / (x * ga * (PI * x).sin());
        }
    }
    Ok(ga)
}

/// ln Γ(x) for x > 0, via Stirling's series for x >= 7 and the recurrence
/// below that. Fails with `InvalidDomain` for x <= 0.
pub fn ln_gamma(x: f64) -> Result<f64> {
    if x <= 0.0 {
        return Err(Error::invalid(format!(
            "ln_gamma is not defined for nonpositive argument {x}"
        )));
    }
    if x == 1.0 || x == 2.0 {
        return Ok(0.0);
    }

    let shift = if x <= 7.0 { (7.0 - x).floor() + 1.0 } else { 0.0 };
    let x0 = x + shift;

    let x2 = 1.0 / (x0 * x0);
    let mut gl0 = LN_GAMMA_SERIES[9];
    for k in (0..9).rev() {
        gl0 = gl0 * x2 + LN_GAMMA_SERIES[k];
    }
    let mut gl = gl0 / x0 + 0.5 * (2.0 * PI).ln() + (x0 - 0.5) * x0.ln() - x0;

    // Walk the recurrence back down to the requested argument.
    let mut xw = x0;
    let mut k = 0.0;
    while k < shift {
        gl -= (xw - 1.0).ln();
        xw -= 1.0;
        k += 1.0;
    }
    Ok(gl)
}

/// ln V_d where V_d = pi^(d/2) / Γ(d/2 + 1) is the volume of the unit
/// d-dimensional Euclidean ball. Stays finite for every dimension.
pub fn ln_unit_ball_volume(dim: usize) -> Result<f64> {
    let half_d = dim as f64 / 2.0;
    Ok(half_d * PI.ln() - ln_gamma(half_d + 1.0)?)
}

#[cfg(test)]
mod test {
    use float_eq::assert_float_eq;

    use super::*;

    #[test]
    fn gamma_integers() {
        assert_float_eq!(gamma(1.0).unwrap(), 1.0, abs <= 1e-10);
        assert_float_eq!(gamma(2.0).unwrap(), 1.0, abs <= 1e-10);
        assert_float_eq!(gamma(3.0).unwrap(), 2.0, abs <= 1e-10);
        assert_float_eq!(gamma(4.0).unwrap(), 6.0, abs <= 1e-10);
        assert_float_eq!(gamma(5.0).unwrap(), 24.0, abs <= 1e-10);
        assert_float_eq!(gamma(13.0).unwrap(), 479_001_600.0, abs <= 1e-10);
    }

    #[test]
    fn gamma_half_integers() {
        assert_float_eq!(gamma(0.5).unwrap(), PI.sqrt(), abs <= 1e-10);
        assert_float_eq!(gamma(1.5).unwrap(), 0.886_226_925_452_758, rmax <= 1e-14);
        assert_float_eq!(gamma(2.5).unwrap(), 1.329_340_388_179_137, rmax <= 1e-14);
        assert_float_eq!(gamma(3.5).unwrap(), 3.323_350_970_447_843, rmax <= 1e-14);
        assert_float_eq!(gamma(4.5).unwrap(), 11.631_728_396_567_450, rmax <= 1e-14);
        assert_float_eq!(gamma(13.5).unwrap(), 1_710_542_068.319_572, abs <= 5e-6);
    }

    #[test]
    fn gamma_general_arguments() {
        assert_float_eq!(gamma(1.123_456_78).unwrap(), 0.942_309_030_392_057, rmax <= 1e-13);
        assert_float_eq!(gamma(7.1525).unwrap(), 959.701_709_437_015, rmax <= 1e-12);
        // reflection: gamma(-0.5) = -2 sqrt(pi)
        assert_float_eq!(gamma(-0.5).unwrap(), -2.0 * PI.sqrt(), rmax <= 1e-12);
    }

    #[test]
    fn gamma_rejects_poles_and_overflow() {
        assert!(gamma(0.0).is_err());
        assert!(gamma(-3.0).is_err());
        assert!(matches!(gamma(172.0), Err(Error::Overflow(_))));
    }

    #[test]
    fn ln_gamma_small_arguments() {
        assert_float_eq!(ln_gamma(1.0).unwrap(), 0.0, abs <= 1e-15);
        assert_float_eq!(ln_gamma(2.0).unwrap(), 0.0, abs <= 1e-15);
        assert_float_eq!(ln_gamma(3.0).unwrap(), 2.0f64.ln(), abs <= 1e-14);
        assert_float_eq!(ln_gamma(5.0).unwrap(), 24.0f64.ln(), abs <= 1e-14);
        assert_float_eq!(ln_gamma(0.5).unwrap(), PI.ln() / 2.0, abs <= 1e-10);
        assert_float_eq!(ln_gamma(1.5).unwrap(), -0.120_782_237_635_245, abs <= 5e-14);
        assert_float_eq!(ln_gamma(4.5).unwrap(), 2.453_736_570_842_442, abs <= 5e-14);
    }

    #[test]
    fn ln_gamma_large_arguments() {
        assert_float_eq!(ln_gamma(13.0).unwrap(), 479_001_600.0f64.ln(), abs <= 1e-10);
        assert_float_eq!(ln_gamma(10_000.0).unwrap(), 82_099.717_496_442_38, abs <= 1e-10);
        assert_float_eq!(ln_gamma(852.5).unwrap(), 4_897.862_610_487_247, rmax <= 1e-12);
        assert_float_eq!(ln_gamma(62_314.156).unwrap(), 625_626.029_513_272_2, rmax <= 1e-12);
    }

    #[test]
    fn ln_gamma_rejects_nonpositive() {
        assert!(ln_gamma(0.0).is_err());
        assert!(ln_gamma(-1.5).is_err());
    }

    #[test]
    fn exp_ln_gamma_matches_gamma() {
        let mut x = 0.1;
        while x <= 100.0 {
            let g = gamma(x).unwrap();
            let lg = ln_gamma(x).unwrap();
            assert_float_eq!(lg.exp(), g, rmax <= 1e-10);
            x += 0.37;
        }
    }

    #[test]
    fn ball_volumes() {
        // V_1 = 2, V_2 = pi, V_3 = 4 pi / 3
        assert_float_eq!(ln_unit_ball_volume(1).unwrap().exp(), 2.0, rmax <= 1e-12);
        assert_float_eq!(ln_unit_ball_volume(2).unwrap().exp(), PI, rmax <= 1e-12);
        assert_float_eq!(
            ln_unit_ball_volume(3).unwrap().exp(),
            4.0 * PI / 3.0,
            rmax <= 1e-12
        );
        // stays finite where gamma(d/2 + 1) would overflow
        assert!(ln_unit_ball_volume(1000).unwrap().is_finite());
    }
}
