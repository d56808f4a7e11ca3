use num_traits::Float;

/// Quantile of the non-NaN values using linear interpolation between closest ranks.
///
/// Returns `None` when no valid value is present.
pub fn nan_quantile<T: Float>(values: &[T], q: f64) -> Option<T> {
    let mut valid: Vec<T> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if valid.is_empty() {
        return None;
    }
    valid.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    Some(quantile_sorted(&valid, q))
}

/// Several quantiles computed from one sort
pub fn nan_quantiles<T: Float>(values: &[T], qs: &[f64]) -> Option<Vec<T>> {
    let mut valid: Vec<T> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if valid.is_empty() {
        return None;
    }
    valid.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    Some(qs.iter().map(|q| quantile_sorted(&valid, *q)).collect())
}

fn quantile_sorted<T: Float>(sorted: &[T], q: f64) -> T {
    let q = q.clamp(0.0, 1.0);
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = (lower + 1).min(sorted.len() - 1);
    let fraction = T::from(position - lower as f64).unwrap_or_else(T::zero);
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

/// Median of the non-NaN values; even counts average the two middle values
pub fn nan_median<T: Float>(values: &mut Vec<T>) -> Option<T> {
    values.retain(|v| !v.is_nan());
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        let two = T::one() + T::one();
        Some((values[mid - 1] + values[mid]) / two)
    }
}

/// Round half away from zero to `decimals` places
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}
