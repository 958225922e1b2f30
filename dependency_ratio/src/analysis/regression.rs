/// Ordinary least squares trend models.
///
/// Fits total_dep_ratio against the year index (2011 → 1 … 2021 → 11),
/// either for the statewide aggregate or independently per geography.
/// Slope inference uses a two-sided Student-t test with n − 2 degrees of
/// freedom.
///
/// # Minimum group size
/// Groups with fewer than `min_years` distinct years are reported as
/// `InsufficientData`. This is a reporting threshold, configured through
/// `PipelineConfig::min_regression_years`, not a statistical minimum.

use crate::geography::Geography;
use crate::model::{PipelineError, RecordSet};
use serde::Serialize;
use std::f64::consts::PI;

// ---------------------------------------------------------------------------
// Fit result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendFit {
    pub n: usize,
    pub slope: f64,
    pub intercept: f64,
    pub slope_std_error: f64,
    pub intercept_std_error: f64,
    pub r_squared: f64,
    pub t_statistic: f64,
    /// Two-sided p-value for H0: slope = 0. NaN when n = 2.
    pub p_value: f64,
    /// Fitted x domain; predictions outside it are extrapolations.
    pub x_min: f64,
    pub x_max: f64,
}

impl TrendFit {
    /// Point prediction at `x`. Outside `[x_min, x_max]` this is an
    /// extrapolation and should be read as lower confidence.
    pub fn predict(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }

    pub fn is_extrapolation(&self, x: f64) -> bool {
        x < self.x_min || x > self.x_max
    }
}

/// Fits y = intercept + slope·x. Returns `None` for fewer than two points
/// or when every x is identical.
pub fn fit_ols(points: &[(f64, f64)]) -> Option<TrendFit> {
    let n = points.len();
    if n < 2 {
        return None;
    }
    let nf = n as f64;

    let x_mean = points.iter().map(|p| p.0).sum::<f64>() / nf;
    let y_mean = points.iter().map(|p| p.1).sum::<f64>() / nf;

    let sxx: f64 = points.iter().map(|(x, _)| (x - x_mean).powi(2)).sum();
    if sxx == 0.0 {
        return None;
    }
    let sxy: f64 = points.iter().map(|(x, y)| (x - x_mean) * (y - y_mean)).sum();
    let sst: f64 = points.iter().map(|(_, y)| (y - y_mean).powi(2)).sum();

    let slope = sxy / sxx;
    let intercept = y_mean - slope * x_mean;

    let sse: f64 = points
        .iter()
        .map(|(x, y)| (y - (intercept + slope * x)).powi(2))
        .sum();
    let r_squared = if sst > 0.0 { 1.0 - sse / sst } else { 1.0 };

    let df = n - 2;
    let (slope_std_error, intercept_std_error, t_statistic, p_value) = if df == 0 {
        (f64::NAN, f64::NAN, f64::NAN, f64::NAN)
    } else {
        let sigma_sq = sse / df as f64;
        let se_slope = (sigma_sq / sxx).sqrt();
        let se_intercept = (sigma_sq * (1.0 / nf + x_mean * x_mean / sxx)).sqrt();
        if se_slope == 0.0 {
            // Exact fit
            if slope == 0.0 {
                (se_slope, se_intercept, 0.0, 1.0)
            } else {
                (se_slope, se_intercept, f64::INFINITY.copysign(slope), 0.0)
            }
        } else {
            let t = slope / se_slope;
            (se_slope, se_intercept, t, student_t_two_sided_p(t, df as f64))
        }
    };

    let x_min = points.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
    let x_max = points.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);

    Some(TrendFit {
        n,
        slope,
        intercept,
        slope_std_error,
        intercept_std_error,
        r_squared,
        t_statistic,
        p_value,
        x_min,
        x_max,
    })
}

// ---------------------------------------------------------------------------
// Record-set trends
// ---------------------------------------------------------------------------

/// Fits total_dep_ratio against year index for one geography.
pub fn fit_geography(
    records: &RecordSet,
    geography: Geography,
    min_years: usize,
) -> Result<TrendFit, PipelineError> {
    // RecordSet holds at most one record per key, so each point is a
    // distinct year.
    let points: Vec<(f64, f64)> = records
        .for_geography(geography)
        .map(|r| (r.year.index() as f64, r.total_dep_ratio))
        .collect();

    let insufficient = || PipelineError::InsufficientData {
        geography,
        observed: points.len(),
        required: min_years,
    };

    if points.len() < min_years {
        return Err(insufficient());
    }
    fit_ols(&points).ok_or_else(insufficient)
}

/// Trend of the statewide aggregate.
pub fn statewide_trend(records: &RecordSet, min_years: usize) -> Result<TrendFit, PipelineError> {
    fit_geography(records, Geography::statewide(), min_years)
}

/// One geography's independent fit, or the reason it could not be fitted.
#[derive(Debug, Clone, PartialEq)]
pub struct GeographyTrend {
    pub geography: Geography,
    pub fit: Result<TrendFit, PipelineError>,
}

/// Fits each requested geography independently. A failing group does not
/// affect the others.
pub fn geography_trends(
    records: &RecordSet,
    geographies: &[Geography],
    min_years: usize,
) -> Vec<GeographyTrend> {
    geographies
        .iter()
        .map(|&geography| GeographyTrend {
            geography,
            fit: fit_geography(records, geography, min_years),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Student-t distribution
// ---------------------------------------------------------------------------

/// P(|T| ≥ |t|) for T ~ Student-t with `df` degrees of freedom.
pub fn student_t_two_sided_p(t: f64, df: f64) -> f64 {
    if t.is_nan() || df <= 0.0 {
        return f64::NAN;
    }
    if t.is_infinite() {
        return 0.0;
    }
    let x = df / (df + t * t);
    regularized_incomplete_beta(x, df / 2.0, 0.5).clamp(0.0, 1.0)
}

/// I_x(a, b), evaluated with the continued fraction on whichever side
/// converges faster.
fn regularized_incomplete_beta(x: f64, a: f64, b: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    let ln_front = ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln();
    let front = ln_front.exp();
    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_continued_fraction(x, a, b) / a
    } else {
        1.0 - front * beta_continued_fraction(1.0 - x, b, a) / b
    }
}

fn beta_continued_fraction(x: f64, a: f64, b: f64) -> f64 {
    const MAX_ITER: usize = 300;
    const EPS: f64 = 3.0e-14;
    const TINY: f64 = 1.0e-300;

    let guard = |v: f64| if v.abs() < TINY { TINY } else { v };

    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;
    let mut c = 1.0;
    let mut d = 1.0 / guard(1.0 - qab * x / qap);
    let mut h = d;

    for m in 1..=MAX_ITER {
        let m = m as f64;
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

/// ln Γ(x) via the Lanczos approximation (g = 7, n = 9).
fn ln_gamma(x: f64) -> f64 {
    if x <= 0.0 {
        return f64::INFINITY;
    }
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
        return PI.ln() - (PI * x).sin().ln() - ln_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let t = x + 7.5;
    let mut a = COEFFICIENTS[0];
    for (i, &coeff) in COEFFICIENTS.iter().enumerate().skip(1) {
        a += coeff / (x + i as f64);
    }
    0.5 * (2.0 * PI).ln() + t.ln() * (x + 0.5) - t + a.ln()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BracketCounts, Record, Year};

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() < tol
    }

    fn series(geography: Geography, values: &[f64]) -> Vec<Record> {
        Year::all()
            .zip(values)
            .map(|(year, &v)| Record {
                year,
                geography,
                counts: BracketCounts::default(),
                total_dep_ratio: v,
                child_dep_ratio: 0.0,
                aged_dep_ratio: v,
            })
            .collect()
    }

    #[test]
    fn test_exact_line_is_recovered() {
        let points: Vec<_> = (1..=11).map(|x| (x as f64, 3.0 + 0.5 * x as f64)).collect();
        let fit = fit_ols(&points).unwrap();
        assert!(close(fit.slope, 0.5, 1e-12));
        assert!(close(fit.intercept, 3.0, 1e-12));
        assert!(close(fit.r_squared, 1.0, 1e-12));
        assert!(fit.p_value < 1e-12);
    }

    #[test]
    fn test_known_regression_values() {
        // x = 1..5, y = [2, 4, 5, 4, 5]: slope 0.6, intercept 2.2
        let points = [(1.0, 2.0), (2.0, 4.0), (3.0, 5.0), (4.0, 4.0), (5.0, 5.0)];
        let fit = fit_ols(&points).unwrap();
        assert!(close(fit.slope, 0.6, 1e-12));
        assert!(close(fit.intercept, 2.2, 1e-12));
        // SSE = 2.4, sigma^2 = 0.8, Sxx = 10
        assert!(close(fit.slope_std_error, (0.08f64).sqrt(), 1e-12));
        assert!(close(fit.intercept_std_error, (0.8f64 * (0.2 + 9.0 / 10.0)).sqrt(), 1e-12));
        assert!(close(fit.r_squared, 0.6, 1e-12));
        // t = 2.1213 with 3 df
        assert!(close(fit.p_value, 0.1240, 1e-3), "p = {}", fit.p_value);
    }

    #[test]
    fn test_student_t_reference_values() {
        // Cauchy (df = 1): P(|T| > 1) = 0.5
        assert!(close(student_t_two_sided_p(1.0, 1.0), 0.5, 1e-9));
        assert!(close(student_t_two_sided_p(0.0, 5.0), 1.0, 1e-12));
        assert!(close(student_t_two_sided_p(2.228, 10.0), 0.05, 1e-3));
        assert!(close(student_t_two_sided_p(-2.228, 10.0), 0.05, 1e-3));
        assert!(close(student_t_two_sided_p(1.96, 10_000.0), 0.05, 1e-3));
    }

    #[test]
    fn test_ln_gamma_reference_values() {
        assert!(close(ln_gamma(1.0), 0.0, 1e-10));
        assert!(close(ln_gamma(5.0), 24f64.ln(), 1e-10));
        assert!(close(ln_gamma(0.5), PI.sqrt().ln(), 1e-10));
    }

    #[test]
    fn test_two_points_fit_without_inference() {
        let fit = fit_ols(&[(1.0, 1.0), (2.0, 3.0)]).unwrap();
        assert!(close(fit.slope, 2.0, 1e-12));
        assert!(fit.p_value.is_nan());
        assert!(fit_ols(&[(1.0, 1.0)]).is_none());
        assert!(fit_ols(&[(1.0, 1.0), (1.0, 2.0)]).is_none());
    }

    #[test]
    fn test_predictions_and_extrapolation_flag() {
        let points: Vec<_> = (1..=11).map(|x| (x as f64, 50.0 + x as f64)).collect();
        let fit = fit_ols(&points).unwrap();
        assert!(close(fit.predict(12.0), 62.0, 1e-9));
        assert!(fit.is_extrapolation(12.0));
        assert!(!fit.is_extrapolation(6.0));
    }

    #[test]
    fn test_statewide_slope_sign_matches_monotonic_series() {
        let rising = [58.1, 58.6, 59.2, 59.9, 60.3, 61.0, 61.8, 62.4, 63.1, 63.5, 64.2];
        let records = RecordSet::from_records(series(Geography::statewide(), &rising)).unwrap();
        let fit = statewide_trend(&records, 3).unwrap();
        assert_eq!(fit.n, 11);
        assert!(fit.slope > 0.0, "rising series should fit a positive slope");

        let falling: Vec<f64> = rising.iter().rev().copied().collect();
        let records = RecordSet::from_records(series(Geography::statewide(), &falling)).unwrap();
        let fit = statewide_trend(&records, 3).unwrap();
        assert!(fit.slope < 0.0, "falling series should fit a negative slope");
    }

    #[test]
    fn test_too_few_years_is_insufficient_data() {
        let garfield = Geography::find("Garfield County").unwrap();
        let records = RecordSet::from_records(series(garfield, &[70.0, 71.0])).unwrap();
        assert_eq!(
            fit_geography(&records, garfield, 3),
            Err(PipelineError::InsufficientData {
                geography: garfield,
                observed: 2,
                required: 3,
            })
        );
        // The threshold is configurable
        assert!(fit_geography(&records, garfield, 2).is_ok());
    }

    #[test]
    fn test_geography_trends_are_independent() {
        let king = Geography::find("King County").unwrap();
        let ferry = Geography::find("Ferry County").unwrap();
        let mut rows = series(king, &[40.0, 41.0, 41.5, 42.0, 43.0]);
        rows.extend(series(ferry, &[80.0]));
        let records = RecordSet::from_records(rows).unwrap();

        let trends = geography_trends(&records, &[king, ferry], 3);
        assert_eq!(trends.len(), 2);
        assert_eq!(trends[0].geography, king);
        assert!(trends[0].fit.is_ok());
        assert!(matches!(
            trends[1].fit,
            Err(PipelineError::InsufficientData { observed: 1, .. })
        ));
    }
}
