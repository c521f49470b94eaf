//! Paired significance testing for the validation gate.
//!
//! Student-t tail probabilities are computed exactly through the regularized
//! incomplete beta function rather than a normal approximation, since
//! evaluation sets can be small (tens of samples).

use serde::{Deserialize, Serialize};

/// Result of a two-sided paired t-test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PairedTest {
    /// Mean of `baseline - candidate`; positive when the candidate errs less.
    pub mean_difference: f64,
    pub statistic: f64,
    pub degrees_of_freedom: f64,
    pub p_value: f64,
}

/// Two-sided paired t-test on `baseline[i] - candidate[i]`.
///
/// Returns `None` when the samples differ in length or there are fewer than
/// two pairs. When every difference is identical the statistic is undefined:
/// a non-zero constant difference is treated as certain (`p = 0`), a zero
/// difference as no evidence (`p = 1`).
#[allow(clippy::cast_precision_loss)]
pub fn paired_t_test(baseline: &[f64], candidate: &[f64]) -> Option<PairedTest> {
    if baseline.len() != candidate.len() || baseline.len() < 2 {
        return None;
    }

    let n = baseline.len() as f64;
    let diffs: Vec<f64> = baseline.iter().zip(candidate).map(|(b, c)| b - c).collect();
    let mean = diffs.iter().sum::<f64>() / n;
    let variance = diffs.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let df = n - 1.0;

    let se = (variance / n).sqrt();
    if se <= f64::EPSILON * mean.abs().max(1.0) {
        let p_value = if mean.abs() > 0.0 { 0.0 } else { 1.0 };
        let statistic = if mean > 0.0 {
            f64::INFINITY
        } else if mean < 0.0 {
            f64::NEG_INFINITY
        } else {
            0.0
        };
        return Some(PairedTest {
            mean_difference: mean,
            statistic,
            degrees_of_freedom: df,
            p_value,
        });
    }

    let t = mean / se;
    Some(PairedTest {
        mean_difference: mean,
        statistic: t,
        degrees_of_freedom: df,
        p_value: student_t_two_sided(t, df),
    })
}

/// `P(|T| >= |t|)` for Student's t with `df` degrees of freedom.
pub fn student_t_two_sided(t: f64, df: f64) -> f64 {
    if !t.is_finite() {
        return 0.0;
    }
    let x = df / (df + t * t);
    regularized_incomplete_beta(df / 2.0, 0.5, x).clamp(0.0, 1.0)
}

/// `I_x(a, b)`.
pub fn regularized_incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }

    let ln_front = ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln();
    let front = ln_front.exp();

    // The continued fraction converges fastest on this side of the mean.
    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_continued_fraction(a, b, x) / a
    } else {
        1.0 - front * beta_continued_fraction(b, a, 1.0 - x) / b
    }
}

/// Modified Lentz evaluation of the incomplete beta continued fraction.
#[allow(clippy::cast_precision_loss)]
fn beta_continued_fraction(a: f64, b: f64, x: f64) -> f64 {
    const MAX_ITERATIONS: u32 = 300;
    const EPS: f64 = 1e-14;
    const TINY: f64 = 1e-300;

    let guard = |v: f64| if v.abs() < TINY { TINY } else { v };

    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;

    let mut c = 1.0;
    let mut d = 1.0 / guard(1.0 - qab * x / qap);
    let mut h = d;

    for m in 1..=MAX_ITERATIONS {
        let m = f64::from(m);
        let m2 = 2.0 * m;

        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 / guard(1.0 + aa * d);
        c = guard(1.0 + aa / c);
        h *= d * c;

        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 / guard(1.0 + aa * d);
        c = guard(1.0 + aa / c);
        let delta = d * c;
        h *= delta;

        if (delta - 1.0).abs() < EPS {
            break;
        }
    }

    h
}

/// Lanczos approximation of `ln Γ(x)` (g = 7, n = 9).
#[allow(clippy::cast_precision_loss)]
pub fn ln_gamma(x: f64) -> f64 {
    const G: f64 = 7.0;
    const COEFFICIENTS: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];

    if x < 0.5 {
        // Reflection formula.
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin().abs()).ln() - ln_gamma(1.0 - x);
    }

    let x = x - 1.0;
    let t = x + G + 0.5;
    let series = COEFFICIENTS
        .iter()
        .enumerate()
        .skip(1)
        .fold(COEFFICIENTS[0], |acc, (i, c)| acc + c / (x + i as f64));

    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + series.ln()
}
