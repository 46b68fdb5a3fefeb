//! Robust statistics used by image combination.

/// Median of the finite (non-NaN) values, or NaN if there are none.
///
/// Reorders `values` in place.
pub fn nan_median_f32(values: &mut [f32]) -> f32 {
    let mut len = 0;
    for i in 0..values.len() {
        if !values[i].is_nan() {
            values.swap(len, i);
            len += 1;
        }
    }
    median_f32(&mut values[..len])
}

/// Median of `values`, averaging the two middle elements for even lengths.
///
/// Returns NaN for an empty slice. Reorders `values` in place.
pub fn median_f32(values: &mut [f32]) -> f32 {
    let len = values.len();
    if len == 0 {
        return f32::NAN;
    }

    let mid = len / 2;
    let (lower, upper, _) = values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    let upper = *upper;
    if len % 2 == 0 {
        let lower_max = lower
            .iter()
            .copied()
            .max_by(|a, b| a.total_cmp(b))
            .unwrap_or(upper);
        (lower_max + upper) / 2.0
    } else {
        upper
    }
}
