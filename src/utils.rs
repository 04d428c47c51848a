use ndarray::{Array2, Array3};

/// Swaps the last two axes of a batch of series.
///
/// `(n_instances, n_dimensions, series_length)` becomes
/// `(n_instances, series_length, n_dimensions)` and vice versa. The result is
/// always in standard (row-major) layout.
pub fn transpose_series(x: &Array3<f32>) -> Array3<f32> {
    x.view()
        .permuted_axes([0, 2, 1])
        .as_standard_layout()
        .into_owned()
}

/// `(batch, steps, channels)` to `(batch * steps, channels)`.
pub fn flatten_steps(x: &Array3<f32>) -> Array2<f32> {
    let (batch, steps, channels) = x.dim();
    x.to_shape((batch * steps, channels))
        .expect("flattening keeps the element count")
        .into_owned()
}

/// Inverse of [`flatten_steps`].
pub fn unflatten_steps(x: &Array2<f32>, batch: usize, steps: usize) -> Array3<f32> {
    let channels = x.ncols();
    assert_eq!(x.nrows(), batch * steps, "Row count does not match batch * steps");
    x.to_shape((batch, steps, channels))
        .expect("row count checked above")
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transpose_series_swaps_last_axes() {
        let x = Array3::from_shape_fn((2, 3, 5), |(n, d, m)| (n * 100 + d * 10 + m) as f32);
        let t = transpose_series(&x);
        assert_eq!(t.dim(), (2, 5, 3));
        assert_eq!(t[[1, 4, 2]], x[[1, 2, 4]]);
        assert!(t.is_standard_layout());
    }

    #[test]
    fn test_transpose_series_is_self_inverse() {
        let x = Array3::from_shape_fn((3, 2, 7), |(n, d, m)| (n as f32) - (d as f32) * 0.5 + m as f32);
        assert_eq!(transpose_series(&transpose_series(&x)), x);
    }

    #[test]
    fn test_flatten_round_trip() {
        let x = Array3::from_shape_fn((2, 4, 3), |(b, t, c)| (b * 12 + t * 3 + c) as f32);
        let flat = flatten_steps(&x);
        assert_eq!(flat.dim(), (8, 3));
        assert_eq!(flat[[5, 1]], x[[1, 1, 1]]);
        assert_eq!(unflatten_steps(&flat, 2, 4), x);
    }

    #[test]
    fn test_flatten_non_standard_layout() {
        let x = Array3::from_shape_fn((2, 3, 4), |(b, c, t)| (b * 12 + c * 4 + t) as f32);
        let channel_last = x.view().permuted_axes([0, 2, 1]).to_owned();
        let flat = flatten_steps(&channel_last);
        assert_eq!(flat.dim(), (8, 3));
        assert_eq!(flat[[6, 2]], x[[1, 2, 2]]);
    }
}
