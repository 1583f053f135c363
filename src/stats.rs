//! ## Descriptive Statistics
//!
//! Small numeric kernels used by the fitted transformers. All of them skip missing values
//! (`None`) the same way the column readers in [`crate::table`] report them.
//!
//! - Quantiles use linear interpolation between closest ranks: for `n` sorted values the
//!   `q`-quantile sits at position `q * (n - 1)`.
//! - The standard deviation is the sample standard deviation (`n - 1` denominator).
//! - Pearson correlation uses pairwise-complete observations and is `NaN` when either
//!   column is constant over those observations.

use crate::exceptions::{PreplineError, PreplineResult};

fn present(values: &[Option<f64>]) -> Vec<f64> {
    values.iter().flatten().copied().collect()
}

fn non_empty(values: Vec<f64>, what: &str) -> PreplineResult<Vec<f64>> {
    if values.is_empty() {
        return Err(PreplineError::InvalidData(format!(
            "cannot compute {} of a column without values",
            what
        )));
    }
    Ok(values)
}

/// Arithmetic mean of the present values.
pub fn mean(values: &[Option<f64>]) -> PreplineResult<f64> {
    let v = non_empty(present(values), "mean")?;
    Ok(v.iter().sum::<f64>() / v.len() as f64)
}

/// Sample standard deviation of the present values; needs at least two of them.
pub fn sample_std(values: &[Option<f64>]) -> PreplineResult<f64> {
    let v = present(values);
    if v.len() < 2 {
        return Err(PreplineError::InvalidData(
            "cannot compute a sample standard deviation from fewer than two values".to_string(),
        ));
    }
    let n = v.len() as f64;
    let m = v.iter().sum::<f64>() / n;
    let ss: f64 = v.iter().map(|x| (x - m).powi(2)).sum();
    Ok((ss / (n - 1.0)).sqrt())
}

fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

/// The `q`-quantile (0 <= q <= 1) of the present values, linearly interpolated.
pub fn quantile(values: &[Option<f64>], q: f64) -> PreplineResult<f64> {
    Ok(quantiles(values, &[q])?[0])
}

/// Several quantiles at once, sorting the data a single time.
pub fn quantiles(values: &[Option<f64>], qs: &[f64]) -> PreplineResult<Vec<f64>> {
    if let Some(q) = qs.iter().find(|q| !(0.0..=1.0).contains(*q)) {
        return Err(PreplineError::InvalidParameter(format!(
            "quantile {} must be between 0 and 1",
            q
        )));
    }
    let mut v = non_empty(present(values), "quantiles")?;
    v.sort_by(|a, b| a.total_cmp(b));
    Ok(qs.iter().map(|&q| quantile_sorted(&v, q)).collect())
}

/// Median of the present values.
pub fn median(values: &[Option<f64>]) -> PreplineResult<f64> {
    quantile(values, 0.5)
}

/// Pearson correlation over rows where both values are present.
pub fn pearson(x: &[Option<f64>], y: &[Option<f64>]) -> f64 {
    let pairs: Vec<(f64, f64)> = x
        .iter()
        .zip(y.iter())
        .filter_map(|(a, b)| Some(((*a)?, (*b)?)))
        .collect();
    if pairs.len() < 2 {
        return f64::NAN;
    }
    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|(a, _)| a).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|(_, b)| b).sum::<f64>() / n;
    let cov: f64 = pairs
        .iter()
        .map(|(a, b)| (a - mean_x) * (b - mean_y))
        .sum();
    let var_x: f64 = pairs.iter().map(|(a, _)| (a - mean_x).powi(2)).sum();
    let var_y: f64 = pairs.iter().map(|(_, b)| (b - mean_y).powi(2)).sum();
    if var_x == 0.0 || var_y == 0.0 {
        return f64::NAN;
    }
    cov / (var_x.sqrt() * var_y.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn some(values: &[f64]) -> Vec<Option<f64>> {
        values.iter().map(|&v| Some(v)).collect()
    }

    #[test]
    fn test_quantiles_interpolate_linearly() {
        let v = some(&[1.0, 2.0, 3.0, 4.0]);
        let q = quantiles(&v, &[0.25, 0.5, 0.75]).unwrap();
        assert_abs_diff_eq!(q[0], 1.75, epsilon = 1e-12);
        assert_abs_diff_eq!(q[1], 2.5, epsilon = 1e-12);
        assert_abs_diff_eq!(q[2], 3.25, epsilon = 1e-12);
    }

    #[test]
    fn test_missing_values_are_skipped() {
        let v = vec![Some(5.0), None, Some(1.0), Some(3.0)];
        assert_abs_diff_eq!(median(&v).unwrap(), 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(mean(&v).unwrap(), 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_sample_std_uses_n_minus_one() {
        let v = some(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        // Population std is 2.0; sample std is sqrt(32 / 7).
        assert_abs_diff_eq!(sample_std(&v).unwrap(), (32.0f64 / 7.0).sqrt(), epsilon = 1e-12);
        assert!(sample_std(&some(&[1.0])).is_err());
    }

    #[test]
    fn test_empty_and_out_of_range() {
        assert!(matches!(mean(&[None, None]), Err(PreplineError::InvalidData(_))));
        assert!(matches!(
            quantile(&some(&[1.0]), 1.5),
            Err(PreplineError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_pearson() {
        let a = some(&[1.0, 2.0, 3.0, 4.0]);
        let b = some(&[2.0, 4.0, 6.0, 8.0]);
        let c = some(&[4.0, 3.0, 2.0, 1.0]);
        assert_abs_diff_eq!(pearson(&a, &b), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(pearson(&a, &c), -1.0, epsilon = 1e-12);
        assert!(pearson(&a, &some(&[1.0, 1.0, 1.0, 1.0])).is_nan());
    }
}
