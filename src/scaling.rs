//! Per-frame scale factors and zero offsets from background levels.
//!
//! Before combination, frames can be normalized to the first frame's
//! background level, either multiplicatively (`scale`) or additively
//! (`zero`). Levels come from a configurable statistic over the good pixels
//! of each frame, optionally restricted to a statistics section and
//! computed per extension. Degenerate factors disable the normalization
//! with a warning instead of failing, so one corrupt frame cannot poison
//! the whole stack.

use tracing::warn;

use crate::config::{Section, StackConfig, Statistic};
use crate::frame::{Exposure, Frame};

/// Per-frame, per-extension multiplicative and additive factors, indexed
/// `[extension][frame]`.
#[derive(Debug, Clone)]
pub struct Factors {
    /// Multiplicative scale factors (1.0 when scaling is off).
    pub scale: Vec<Vec<f32>>,
    /// Additive zero offsets (0.0 when offsetting is off).
    pub zero: Vec<Vec<f32>>,
}

impl Factors {
    /// Identity factors: no scaling, no offsets.
    pub fn identity(num_ext: usize, num_img: usize) -> Self {
        Self {
            scale: vec![vec![1.0; num_img]; num_ext],
            zero: vec![vec![0.0; num_img]; num_ext],
        }
    }
}

/// Background level of one frame from the configured statistic over good
/// pixels (mask zero where a mask exists), restricted to the statistics
/// section when configured. Returns NaN when no pixel qualifies; the factor
/// guard downstream turns that into an unscaled combination.
pub fn background_level(frame: &Frame, statistic: Statistic, section: Option<&Section>) -> f32 {
    let (height, width) = frame.shape();
    let (y_range, x_range) = match section {
        Some(s) => (s.y0..s.y1.min(height), s.x0..s.x1.min(width)),
        None => (0..height, 0..width),
    };

    let mut values: Vec<f32> = Vec::new();
    for y in y_range {
        for x in x_range.clone() {
            let good = match &frame.mask {
                Some(mask) => mask[[y, x]] == 0,
                None => true,
            };
            if good {
                values.push(frame.data[[y, x]]);
            }
        }
    }
    if values.is_empty() {
        return f32::NAN;
    }

    match statistic {
        Statistic::Mean => values.iter().sum::<f32>() / values.len() as f32,
        Statistic::Median => {
            values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let n = values.len();
            if n % 2 == 0 {
                0.5 * (values[n / 2 - 1] + values[n / 2])
            } else {
                values[n / 2]
            }
        }
    }
}

/// Compute scale factors or zero offsets for a stack, frame 0 being the
/// reference level. Requesting both disables `zero` with a warning. Any
/// non-positive or non-finite factor disables the normalization entirely
/// (identity factors, logged, non-fatal).
pub fn compute_factors(exposures: &[Exposure], config: &StackConfig) -> Factors {
    let num_img = exposures.len();
    let num_ext = exposures[0].num_extensions();
    let mut factors = Factors::identity(num_ext, num_img);

    let scale = config.scale;
    let mut zero = config.zero;
    if scale && zero {
        warn!("both scale and zero are set, setting zero=false");
        zero = false;
    }
    if !scale && !zero {
        return factors;
    }

    // levels[frame][ext]
    let levels: Vec<Vec<f32>> = exposures
        .iter()
        .map(|exposure| {
            exposure
                .extensions
                .iter()
                .map(|frame| {
                    background_level(frame, config.statistic, config.statistics_section.as_ref())
                })
                .collect()
        })
        .collect();

    if config.separate_ext {
        // Target level is the corresponding extension of the first frame.
        for ext in 0..num_ext {
            for img in 0..num_img {
                if scale {
                    factors.scale[ext][img] = levels[0][ext] / levels[img][ext];
                } else {
                    factors.zero[ext][img] = levels[0][ext] - levels[img][ext];
                }
            }
        }
    } else {
        // Target level is the mean over the first frame's extensions; one
        // factor per frame, shared by all its extensions.
        let frame_level = |img: usize| -> f32 {
            levels[img].iter().sum::<f32>() / num_ext as f32
        };
        let target = frame_level(0);
        for img in 0..num_img {
            let level = frame_level(img);
            for ext in 0..num_ext {
                if scale {
                    factors.scale[ext][img] = target / level;
                } else {
                    factors.zero[ext][img] = target - level;
                }
            }
        }
    }

    if scale {
        let degenerate = factors
            .scale
            .iter()
            .flatten()
            .any(|&f| f <= 0.0 || !f.is_finite());
        if degenerate {
            warn!("some scale factors are non-positive or undefined, not scaling");
            return Factors::identity(num_ext, num_img);
        }
    } else {
        let degenerate = factors.zero.iter().flatten().any(|&f| !f.is_finite());
        if degenerate {
            warn!("some zero offsets are undefined, not offsetting");
            return Factors::identity(num_ext, num_img);
        }
    }

    factors
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    fn exposure(level: f32, shape: (usize, usize)) -> Exposure {
        Exposure::single(Frame::new(Array2::from_elem(shape, level), 1.0, 3.0))
    }

    #[test]
    fn test_background_level_median_ignores_masked() {
        let mut frame = Frame::new(Array2::from_elem((2, 2), 10.0), 1.0, 3.0);
        let mut mask = Array2::zeros((2, 2));
        mask[[0, 0]] = 1;
        frame.data[[0, 0]] = 1000.0;
        frame.mask = Some(mask);
        let level = background_level(&frame, Statistic::Median, None);
        assert_relative_eq!(level, 10.0);
    }

    #[test]
    fn test_background_level_section() {
        let mut frame = Frame::new(Array2::from_elem((4, 4), 5.0), 1.0, 3.0);
        frame.data[[0, 0]] = 500.0;
        let section = Section {
            y0: 1,
            y1: 4,
            x0: 1,
            x1: 4,
        };
        let level = background_level(&frame, Statistic::Mean, Some(&section));
        assert_relative_eq!(level, 5.0);
    }

    #[test]
    fn test_scale_factors_relative_to_first_frame() {
        let exposures = vec![exposure(100.0, (3, 3)), exposure(200.0, (3, 3))];
        let mut config = StackConfig::default();
        config.scale = true;
        let factors = compute_factors(&exposures, &config);
        assert_relative_eq!(factors.scale[0][0], 1.0);
        assert_relative_eq!(factors.scale[0][1], 0.5);
        assert_relative_eq!(factors.zero[0][1], 0.0);
    }

    #[test]
    fn test_zero_offsets_relative_to_first_frame() {
        let exposures = vec![exposure(100.0, (3, 3)), exposure(130.0, (3, 3))];
        let mut config = StackConfig::default();
        config.zero = true;
        let factors = compute_factors(&exposures, &config);
        assert_relative_eq!(factors.zero[0][0], 0.0);
        assert_relative_eq!(factors.zero[0][1], -30.0);
        assert_relative_eq!(factors.scale[0][1], 1.0);
    }

    #[test]
    fn test_scale_wins_over_zero() {
        let exposures = vec![exposure(100.0, (3, 3)), exposure(200.0, (3, 3))];
        let mut config = StackConfig::default();
        config.scale = true;
        config.zero = true;
        let factors = compute_factors(&exposures, &config);
        assert_relative_eq!(factors.scale[0][1], 0.5);
        assert_relative_eq!(factors.zero[0][1], 0.0);
    }

    #[test]
    fn test_degenerate_scale_disables_scaling() {
        // Second frame's level is negative, so its factor is non-positive.
        let exposures = vec![exposure(100.0, (3, 3)), exposure(-50.0, (3, 3))];
        let mut config = StackConfig::default();
        config.scale = true;
        let factors = compute_factors(&exposures, &config);
        assert_relative_eq!(factors.scale[0][1], 1.0);
    }

    #[test]
    fn test_zero_level_disables_scaling() {
        let exposures = vec![exposure(100.0, (3, 3)), exposure(0.0, (3, 3))];
        let mut config = StackConfig::default();
        config.scale = true;
        let factors = compute_factors(&exposures, &config);
        assert_relative_eq!(factors.scale[0][0], 1.0);
        assert_relative_eq!(factors.scale[0][1], 1.0);
    }

    #[test]
    fn test_separate_ext_targets_matching_extension() {
        let make = |a: f32, b: f32| {
            Exposure::new(vec![
                Frame::new(Array2::from_elem((2, 2), a), 1.0, 3.0),
                Frame::new(Array2::from_elem((2, 2), b), 1.0, 3.0),
            ])
        };
        let exposures = vec![make(100.0, 10.0), make(50.0, 40.0)];
        let mut config = StackConfig::default();
        config.scale = true;
        config.separate_ext = true;
        let factors = compute_factors(&exposures, &config);
        assert_relative_eq!(factors.scale[0][1], 2.0);
        assert_relative_eq!(factors.scale[1][1], 0.25);
    }
}
