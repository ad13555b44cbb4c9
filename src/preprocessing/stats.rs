//! Descriptive statistics over columns with missing values
//!
//! Every function skips `NaN` entries.

fn present(values: &[f64]) -> impl Iterator<Item = f64> + '_ {
    values.iter().copied().filter(|v| !v.is_nan())
}

pub fn mean(values: &[f64]) -> f64 {
    let (sum, n) = present(values).fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        f64::NAN
    } else {
        sum / n as f64
    }
}

/// Sample standard deviation; 0 with fewer than two values.
pub fn sample_std(values: &[f64]) -> f64 {
    let xs: Vec<f64> = present(values).collect();
    if xs.len() < 2 {
        return 0.0;
    }
    let m = xs.iter().sum::<f64>() / xs.len() as f64;
    let var = xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (xs.len() - 1) as f64;
    var.sqrt()
}

/// Population standard deviation; `NaN` when empty.
pub fn population_std(values: &[f64]) -> f64 {
    let xs: Vec<f64> = present(values).collect();
    if xs.is_empty() {
        return f64::NAN;
    }
    let m = xs.iter().sum::<f64>() / xs.len() as f64;
    (xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / xs.len() as f64).sqrt()
}

pub fn min(values: &[f64]) -> f64 {
    present(values).fold(f64::NAN, f64::min)
}

pub fn max(values: &[f64]) -> f64 {
    present(values).fold(f64::NAN, f64::max)
}

/// Quantile with linear interpolation between closest ranks.
pub fn quantile(values: &[f64], q: f64) -> f64 {
    let mut xs: Vec<f64> = present(values).collect();
    if xs.is_empty() {
        return f64::NAN;
    }
    xs.sort_by(f64::total_cmp);
    let pos = q.clamp(0.0, 1.0) * (xs.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    xs[lo] + (xs[hi] - xs[lo]) * (pos - lo as f64)
}

pub fn median(values: &[f64]) -> f64 {
    quantile(values, 0.5)
}

/// Percentile rank in (0, 1] of every value within its column. Ties share
/// their average rank; missing values stay missing.
pub fn percentile_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).filter(|&i| !values[i].is_nan()).collect();
    let n = order.len();
    let mut ranks = vec![f64::NAN; values.len()];
    if n == 0 {
        return ranks;
    }
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut start = 0;
    while start < n {
        let mut end = start;
        while end + 1 < n && values[order[end + 1]] == values[order[start]] {
            end += 1;
        }
        // 1-based ranks start+1 ..= end+1
        let avg = (start + end + 2) as f64 / 2.0;
        for &i in &order[start..=end] {
            ranks[i] = avg / n as f64;
        }
        start = end + 1;
    }
    ranks
}

/// Least-squares slope of `ys` against their index; 0 with fewer than two points.
pub fn ols_slope(ys: &[f64]) -> f64 {
    let points: Vec<(f64, f64)> = ys
        .iter()
        .enumerate()
        .filter(|(_, y)| !y.is_nan())
        .map(|(x, &y)| (x as f64, y))
        .collect();
    ols_slope_xy(&points)
}

/// Least-squares slope over explicit `(x, y)` points.
pub fn ols_slope_xy(points: &[(f64, f64)]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    let n = points.len() as f64;
    let mx = points.iter().map(|p| p.0).sum::<f64>() / n;
    let my = points.iter().map(|p| p.1).sum::<f64>() / n;
    let sxx: f64 = points.iter().map(|p| (p.0 - mx).powi(2)).sum();
    if sxx == 0.0 {
        return 0.0;
    }
    let sxy: f64 = points.iter().map(|p| (p.0 - mx) * (p.1 - my)).sum();
    sxy / sxx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_std_skip_missing() {
        let xs = [1.0, f64::NAN, 3.0];
        assert_eq!(mean(&xs), 2.0);
        assert!((sample_std(&xs) - 2f64.sqrt()).abs() < 1e-12);
        assert_eq!(population_std(&xs), 1.0);
        assert_eq!(sample_std(&[5.0]), 0.0);
        assert!(mean(&[f64::NAN]).is_nan());
    }

    #[test]
    fn test_quantile_interpolates() {
        let xs = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile(&xs, 0.0), 1.0);
        assert_eq!(quantile(&xs, 0.25), 1.75);
        assert_eq!(median(&xs), 2.5);
        assert_eq!(quantile(&xs, 1.0), 4.0);
    }

    #[test]
    fn test_percentile_ranks_average_ties() {
        let ranks = percentile_ranks(&[10.0, 20.0, 20.0, f64::NAN, 5.0]);
        assert_eq!(ranks[4], 0.25);
        assert_eq!(ranks[0], 0.5);
        assert_eq!(ranks[1], 0.875);
        assert_eq!(ranks[2], 0.875);
        assert!(ranks[3].is_nan());
    }

    #[test]
    fn test_ols_slope() {
        assert_eq!(ols_slope(&[1.0, 3.0, 5.0]), 2.0);
        assert_eq!(ols_slope(&[7.0]), 0.0);
        assert_eq!(ols_slope_xy(&[(2.0, 1.0), (2.0, 5.0)]), 0.0);
    }
}
