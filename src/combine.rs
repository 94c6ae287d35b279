//! Pixel-wise combination of surviving samples.
//!
//! Combiners reduce the samples that survive rejection and mask reduction
//! at each pixel to one value, with a variance estimate. All arithmetic is
//! in 32-bit floats to match the precision of the pixel data. When no input
//! variance is available, the output variance follows the gemcombine
//! convention `sum((x - m)^2) / (n * (n - 1))`; that degrees-of-freedom
//! choice is a contractual legacy convention, kept deliberately.

use ndarray::{Array2, Array3, ArrayView3};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A combination strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Combiner {
    /// Arithmetic mean.
    Mean,
    /// Inverse-variance weighted mean; requires variance planes.
    WtMean,
    /// Exact median (even count: average of the two central samples).
    Median,
    /// Low median (even count: lower of the two central samples). Biased
    /// low on purpose, preferred for flat-fielding.
    LMedian,
}

impl Combiner {
    /// Resolve a combiner name. An unknown name falls back to the mean with
    /// a warning rather than failing.
    pub fn from_name(name: &str) -> Self {
        match name {
            "mean" | "average" => Combiner::Mean,
            "wtmean" => Combiner::WtMean,
            "median" => Combiner::Median,
            "lmedian" => Combiner::LMedian,
            other => {
                warn!("no such combiner as {other}, using mean instead");
                Combiner::Mean
            }
        }
    }

    /// Whether this strategy reads the variance plane.
    pub fn needs_variance(&self) -> bool {
        matches!(self, Combiner::WtMean)
    }

    /// Combine the surviving samples (working mask zero) at every pixel.
    /// Returns the combined data plane and its variance estimate.
    ///
    /// `mask` must already be normalized by mask reduction, which guarantees
    /// at least one surviving sample per pixel.
    pub fn combine(
        &self,
        data: &ArrayView3<f32>,
        mask: &Array3<u16>,
        variance: Option<&ArrayView3<f32>>,
    ) -> (Array2<f32>, Array2<f32>) {
        let (num_img, height, width) = data.dim();
        let mut out_data = Array2::<f32>::zeros((height, width));
        let mut out_var = Array2::<f32>::zeros((height, width));
        let mut values: Vec<f32> = Vec::with_capacity(num_img);
        let mut variances: Vec<f32> = Vec::with_capacity(num_img);

        for y in 0..height {
            for x in 0..width {
                values.clear();
                variances.clear();
                for i in 0..num_img {
                    if mask[[i, y, x]] == 0 {
                        values.push(data[[i, y, x]]);
                        if let Some(var) = variance {
                            variances.push(var[[i, y, x]]);
                        }
                    }
                }
                let var_in = variance.map(|_| variances.as_slice());
                let (value, var) = match self {
                    Combiner::Mean => mean_pixel(&values, var_in),
                    Combiner::WtMean => wtmean_pixel(&values, var_in),
                    Combiner::Median => median_pixel(&mut values, var_in.map(|v| v.to_vec())),
                    Combiner::LMedian => lmedian_pixel(&mut values, var_in.map(|v| v.to_vec())),
                };
                out_data[[y, x]] = value;
                out_var[[y, x]] = var;
            }
        }

        (out_data, out_var)
    }
}

/// Division with divide-by-zero yielding 0 instead of inf/NaN.
fn divide0(numerator: f32, denominator: f32) -> f32 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// gemcombine-style estimate of the variance about the returned value.
fn spread_variance(values: &[f32], center: f32) -> f32 {
    let n = values.len();
    let sumsq: f32 = values.iter().map(|&v| (v - center).powi(2)).sum();
    divide0(sumsq, (n * n.saturating_sub(1)) as f32)
}

fn mean_pixel(values: &[f32], variances: Option<&[f32]>) -> (f32, f32) {
    let n = values.len();
    let value = divide0(values.iter().sum(), n as f32);
    let var = match variances {
        Some(vars) => divide0(divide0(vars.iter().sum(), n as f32), n as f32),
        None => spread_variance(values, value),
    };
    (value, var)
}

fn wtmean_pixel(values: &[f32], variances: Option<&[f32]>) -> (f32, f32) {
    let vars = match variances {
        Some(vars) => vars,
        // Resolved with a warning at configuration time; kept as a direct
        // fallback so the combiner itself is total.
        None => return mean_pixel(values, None),
    };
    let weight_sum: f32 = vars.iter().map(|&v| divide0(1.0, v)).sum();
    let weighted: f32 = values
        .iter()
        .zip(vars)
        .map(|(&x, &v)| divide0(x, v))
        .sum();
    (divide0(weighted, weight_sum), divide0(1.0, weight_sum))
}

/// Sort values, carrying each sample's variance along with it.
fn sort_with_variance(values: &mut [f32], variances: &mut Option<Vec<f32>>) {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| {
        values[a]
            .partial_cmp(&values[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let sorted: Vec<f32> = order.iter().map(|&i| values[i]).collect();
    values.copy_from_slice(&sorted);
    if let Some(vars) = variances {
        let sorted: Vec<f32> = order.iter().map(|&i| vars[i]).collect();
        vars.copy_from_slice(&sorted);
    }
}

fn median_pixel(values: &mut [f32], mut variances: Option<Vec<f32>>) -> (f32, f32) {
    let n = values.len();
    if n == 0 {
        return (0.0, 0.0);
    }
    sort_with_variance(values, &mut variances);
    let (value, selected_var) = if n % 2 == 0 {
        let value = 0.5 * (values[n / 2 - 1] + values[n / 2]);
        let var = variances
            .as_ref()
            .map(|v| 0.5 * (v[n / 2 - 1] + v[n / 2]));
        (value, var)
    } else {
        (values[n / 2], variances.as_ref().map(|v| v[n / 2]))
    };
    let var = selected_var.unwrap_or_else(|| spread_variance(values, value));
    (value, var)
}

fn lmedian_pixel(values: &mut [f32], mut variances: Option<Vec<f32>>) -> (f32, f32) {
    let n = values.len();
    if n == 0 {
        return (0.0, 0.0);
    }
    sort_with_variance(values, &mut variances);
    let index = (n - 1) / 2;
    let value = values[index];
    let var = variances
        .map(|v| v[index])
        .unwrap_or_else(|| spread_variance(values, value));
    (value, var)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array3;

    fn cube(samples: &[f32]) -> Array3<f32> {
        Array3::from_shape_vec((samples.len(), 1, 1), samples.to_vec()).unwrap()
    }

    fn combine_lane(
        combiner: Combiner,
        samples: &[f32],
        mask: Option<&[u16]>,
        variance: Option<&[f32]>,
    ) -> (f32, f32) {
        let data = cube(samples);
        let mask = match mask {
            Some(m) => Array3::from_shape_vec(data.dim(), m.to_vec()).unwrap(),
            None => Array3::zeros(data.dim()),
        };
        let var = variance.map(|v| cube(v));
        let (out, out_var) = combiner.combine(
            &data.view(),
            &mask,
            var.as_ref().map(|v| v.view()).as_ref(),
        );
        (out[[0, 0]], out_var[[0, 0]])
    }

    #[test]
    fn test_mean_identical_samples() {
        let (value, var) = combine_lane(Combiner::Mean, &[5.0; 4], None, None);
        assert_relative_eq!(value, 5.0);
        assert_relative_eq!(var, 0.0);
    }

    #[test]
    fn test_mean_gemcombine_variance() {
        // Survivors 1, 2, 3: mean 2, sum of squares 2, n(n-1) = 6.
        let (value, var) = combine_lane(Combiner::Mean, &[1.0, 2.0, 3.0], None, None);
        assert_relative_eq!(value, 2.0);
        assert_relative_eq!(var, 2.0 / 6.0);
    }

    #[test]
    fn test_mean_with_input_variance() {
        let (value, var) =
            combine_lane(Combiner::Mean, &[1.0, 3.0], None, Some(&[2.0, 4.0]));
        assert_relative_eq!(value, 2.0);
        // mean(variance) / n = 3 / 2
        assert_relative_eq!(var, 1.5);
    }

    #[test]
    fn test_mean_skips_masked_samples() {
        let (value, _) = combine_lane(
            Combiner::Mean,
            &[1.0, 100.0, 3.0],
            Some(&[0, crate::dq::REJECTED, 0]),
            None,
        );
        assert_relative_eq!(value, 2.0);
    }

    #[test]
    fn test_wtmean_example() {
        let (value, var) =
            combine_lane(Combiner::WtMean, &[10.0, 20.0], None, Some(&[1.0, 4.0]));
        assert_relative_eq!(value, 12.0);
        assert_relative_eq!(var, 0.8);
    }

    #[test]
    fn test_wtmean_without_variance_falls_back_to_mean() {
        let (value, _) = combine_lane(Combiner::WtMean, &[10.0, 20.0], None, None);
        assert_relative_eq!(value, 15.0);
    }

    #[test]
    fn test_median_odd() {
        let (value, _) = combine_lane(Combiner::Median, &[9.0, 1.0, 5.0], None, None);
        assert_relative_eq!(value, 5.0);
    }

    #[test]
    fn test_median_even_averages_central_pair() {
        let (value, _) = combine_lane(Combiner::Median, &[4.0, 1.0, 2.0, 9.0], None, None);
        assert_relative_eq!(value, 3.0);
    }

    #[test]
    fn test_median_variance_of_selected_samples() {
        let (value, var) = combine_lane(
            Combiner::Median,
            &[4.0, 1.0, 2.0, 9.0],
            None,
            Some(&[0.4, 0.1, 0.2, 0.9]),
        );
        assert_relative_eq!(value, 3.0);
        // Selected order statistics are 2.0 and 4.0 with variances 0.2, 0.4.
        assert_relative_eq!(var, 0.3);
    }

    #[test]
    fn test_lmedian_takes_lower_central_sample() {
        let (value, _) = combine_lane(Combiner::LMedian, &[4.0, 1.0, 2.0, 9.0], None, None);
        assert_relative_eq!(value, 2.0);
        let (value, _) = combine_lane(Combiner::LMedian, &[9.0, 1.0, 5.0], None, None);
        assert_relative_eq!(value, 5.0);
    }

    #[test]
    fn test_unknown_name_falls_back_to_mean() {
        assert_eq!(Combiner::from_name("supermean"), Combiner::Mean);
        assert_eq!(Combiner::from_name("lmedian"), Combiner::LMedian);
    }
}
