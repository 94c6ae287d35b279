//! Outlier rejection strategies applied along the stacking axis.
//!
//! Rejectors flag outlier samples per pixel before combination by setting
//! the transient [`REJECTED`](crate::dq::REJECTED) bit in the engine's
//! working mask cube. Input frames are never touched. Strategies:
//!
//! - **none**: every sample participates
//! - **minmax**: reject a fixed proportion of the lowest/highest samples
//! - **sigclip**: iterative clipping against the stack's own scatter
//! - **varclip**: iterative clipping against the supplied variance plane

use ndarray::{Array3, ArrayView3};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::StackConfig;
use crate::dq::{is_usable, REJECTED};
use crate::error::StackError;

/// Iteration ceiling applied when the configuration leaves `max_iters`
/// unset. Clipping converges long before this on real data; the ceiling
/// guarantees termination on pathological input.
pub const DEFAULT_MAX_ITERS: usize = 100;

/// Parameters for minmax rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinMaxParams {
    /// Number of low samples to reject, scaled per pixel by the good-sample
    /// fraction.
    pub nlow: usize,
    /// Number of high samples to reject, scaled likewise.
    pub nhigh: usize,
}

/// Parameters shared by the sigclip and varclip strategies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClipParams {
    /// Rejection threshold below the center, in spread units.
    pub lsigma: f32,
    /// Rejection threshold above the center, in spread units.
    pub hsigma: f32,
    /// Use the median as the center on every iteration; otherwise the mean
    /// after the first pass.
    pub mclip: bool,
    /// Iteration ceiling; `None` applies [`DEFAULT_MAX_ITERS`].
    pub max_iters: Option<usize>,
}

/// An outlier rejection strategy with its typed parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Rejector {
    /// Pass-through: no rejection.
    None,
    /// Sorted low/high rejection following the IRAF imcombine convention.
    MinMax(MinMaxParams),
    /// Iterative clipping with the spread estimated from the stack itself.
    SigClip(ClipParams),
    /// Iterative clipping with the spread taken from the variance plane.
    VarClip(ClipParams),
}

impl Rejector {
    /// Resolve the configured rejector name. An unknown name falls back to
    /// no rejection with a warning rather than failing.
    pub fn from_config(config: &StackConfig) -> Self {
        let clip = ClipParams {
            lsigma: config.lsigma,
            hsigma: config.hsigma,
            mclip: config.mclip,
            max_iters: config.max_iters,
        };
        match config.reject.as_str() {
            "none" => Rejector::None,
            "minmax" => Rejector::MinMax(MinMaxParams {
                nlow: config.nlow,
                nhigh: config.nhigh,
            }),
            "sigclip" => Rejector::SigClip(clip),
            "varclip" => Rejector::VarClip(clip),
            other => {
                warn!("no such rejector as {other}, using none instead");
                Rejector::None
            }
        }
    }

    /// Validate the strategy against the number of input images. Runs before
    /// any pixel computation.
    pub fn validate(&self, num_img: usize) -> Result<(), StackError> {
        if let Rejector::MinMax(p) = self {
            if p.nlow + p.nhigh >= num_img {
                return Err(StackError::MinMaxRejectsAll {
                    num_img,
                    nlow: p.nlow,
                    nhigh: p.nhigh,
                });
            }
        }
        Ok(())
    }

    /// Whether this strategy reads the variance plane.
    pub fn needs_variance(&self) -> bool {
        matches!(self, Rejector::VarClip(_))
    }

    /// Flag outlier samples in the working mask cube. `data` and `mask`
    /// have the frame axis first; `variance`, when present, matches.
    pub fn apply(
        &self,
        data: &ArrayView3<f32>,
        mask: &mut Array3<u16>,
        variance: Option<&ArrayView3<f32>>,
    ) -> Result<(), StackError> {
        self.validate(data.dim().0)?;
        match self {
            Rejector::None => {}
            Rejector::MinMax(params) => minmax(data, mask, params),
            Rejector::SigClip(params) => iterclip(data, mask, None, params),
            Rejector::VarClip(params) => iterclip(data, mask, variance, params),
        }
        Ok(())
    }
}

/// Minmax rejection with the IRAF per-pixel scaling: the configured counts
/// apply to fully-populated pixels and shrink proportionally where samples
/// are already masked.
fn minmax(data: &ArrayView3<f32>, mask: &mut Array3<u16>, params: &MinMaxParams) {
    let (num_img, height, width) = data.dim();
    let mut order: Vec<(f32, usize)> = Vec::with_capacity(num_img);

    for y in 0..height {
        for x in 0..width {
            order.clear();
            for i in 0..num_img {
                if is_usable(mask[[i, y, x]]) {
                    order.push((data[[i, y, x]], i));
                }
            }
            let ngood = order.len();
            if ngood == 0 {
                continue;
            }
            order.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

            // IRAF imcombine maths: scale the requested counts by the
            // fraction of surviving samples, with a small epsilon so exact
            // integer ratios round the expected way.
            let nlo = (ngood as f32 * params.nlow as f32 / num_img as f32 + 0.001) as usize;
            let nhi = (ngood as f32 * params.nhigh as f32 / num_img as f32 + 0.001) as usize;

            for &(_, i) in order.iter().take(nlo) {
                mask[[i, y, x]] |= REJECTED;
            }
            for &(_, i) in order.iter().skip(ngood.saturating_sub(nhi)) {
                mask[[i, y, x]] |= REJECTED;
            }
        }
    }
}

/// Shared iterative clipping core for sigclip and varclip.
///
/// Per pixel, per iteration: take the median of the surviving samples as
/// the center (the mean on later passes unless `mclip`), measure each
/// sample's deviation, and newly reject samples beyond `+hsigma`/`-lsigma`
/// spread units. The loop stops at the first iteration that rejects no new
/// sample, when no samples survive, or at the iteration ceiling.
///
/// With `variance` absent (sigclip) the spread for each sample is the
/// standard deviation of the *other* surviving samples about the center —
/// the imcombine convention, which keeps a single gross outlier from
/// inflating its own rejection threshold. With `variance` present (varclip)
/// the deviation is normalized by the sample's own uncertainty.
fn iterclip(
    data: &ArrayView3<f32>,
    mask: &mut Array3<u16>,
    variance: Option<&ArrayView3<f32>>,
    params: &ClipParams,
) {
    let (num_img, height, width) = data.dim();
    let max_iters = params.max_iters.unwrap_or(DEFAULT_MAX_ITERS);
    let mut good: Vec<usize> = Vec::with_capacity(num_img);
    let mut newly: Vec<usize> = Vec::with_capacity(num_img);

    for y in 0..height {
        for x in 0..width {
            good.clear();
            for i in 0..num_img {
                if is_usable(mask[[i, y, x]]) {
                    good.push(i);
                }
            }

            let mut first = true;
            let mut iters = 0;
            while iters < max_iters && good.len() > 1 {
                let center = if first || params.mclip {
                    median_of(data, &good, y, x)
                } else {
                    mean_of(data, &good, y, x)
                };

                newly.clear();
                match variance {
                    None => {
                        let sumsq: f32 = good
                            .iter()
                            .map(|&i| (data[[i, y, x]] - center).powi(2))
                            .sum();
                        for (pos, &i) in good.iter().enumerate() {
                            let dev = data[[i, y, x]] - center;
                            let spread_sq = (sumsq - dev * dev) / (good.len() - 1) as f32;
                            let spread = spread_sq.max(0.0).sqrt();
                            if dev > params.hsigma * spread || dev < -params.lsigma * spread {
                                newly.push(pos);
                            }
                        }
                    }
                    Some(var) => {
                        for (pos, &i) in good.iter().enumerate() {
                            let dev = (data[[i, y, x]] - center) / var[[i, y, x]].sqrt();
                            if dev > params.hsigma || dev < -params.lsigma {
                                newly.push(pos);
                            }
                        }
                    }
                }

                if newly.is_empty() {
                    break;
                }
                for &pos in newly.iter().rev() {
                    let i = good.swap_remove(pos);
                    mask[[i, y, x]] |= REJECTED;
                }
                first = false;
                iters += 1;
            }
        }
    }
}

fn median_of(data: &ArrayView3<f32>, good: &[usize], y: usize, x: usize) -> f32 {
    let mut values: Vec<f32> = good.iter().map(|&i| data[[i, y, x]]).collect();
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = values.len();
    if n % 2 == 0 {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    } else {
        values[n / 2]
    }
}

fn mean_of(data: &ArrayView3<f32>, good: &[usize], y: usize, x: usize) -> f32 {
    let sum: f32 = good.iter().map(|&i| data[[i, y, x]]).sum();
    sum / good.len() as f32
}
