//! Stacking configuration.

use serde::{Deserialize, Serialize};

/// Statistic used to measure a frame's background level for scale/zero
/// normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Statistic {
    /// Arithmetic mean of good pixels.
    Mean,
    /// Median of good pixels.
    Median,
}

/// Rectangular sub-region used for background statistics, half-open in both
/// axes: rows `y0..y1`, columns `x0..x1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    /// First row.
    pub y0: usize,
    /// One past the last row.
    pub y1: usize,
    /// First column.
    pub x0: usize,
    /// One past the last column.
    pub x1: usize,
}

/// Configuration for one stack combination.
///
/// Combiner and rejector are selected by name; unrecognized names fall back
/// to `"mean"` and `"none"` respectively with a warning. The remaining
/// fields parameterize the selected strategies and the surrounding
/// pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackConfig {
    /// Combiner name: one of `mean`, `wtmean`, `median`, `lmedian`.
    pub combine: String,
    /// Rejector name: one of `none`, `minmax`, `sigclip`, `varclip`.
    pub reject: String,
    /// Low samples to reject (minmax only).
    pub nlow: usize,
    /// High samples to reject (minmax only).
    pub nhigh: usize,
    /// Low rejection threshold in spread units (clip methods).
    pub lsigma: f32,
    /// High rejection threshold in spread units (clip methods).
    pub hsigma: f32,
    /// Keep the median as the clipping center on every iteration.
    pub mclip: bool,
    /// Clipping iteration ceiling; unset applies the documented default.
    pub max_iters: Option<usize>,
    /// Normalize frames multiplicatively to frame 0's background level.
    pub scale: bool,
    /// Normalize frames additively to frame 0's background level. Mutually
    /// exclusive with `scale`, which wins when both are set.
    pub zero: bool,
    /// Compute scale/zero factors per extension rather than per frame.
    pub separate_ext: bool,
    /// Propagate input quality masks through rejection and combination.
    pub apply_mask: bool,
    /// Statistic for background-level measurement.
    pub statistic: Statistic,
    /// Sub-region for background-level measurement.
    pub statistics_section: Option<Section>,
    /// Peak-memory budget for working arrays; unset processes each
    /// extension in one chunk.
    pub memory_budget_bytes: Option<usize>,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            combine: "mean".into(),
            reject: "none".into(),
            nlow: 0,
            nhigh: 0,
            lsigma: 3.0,
            hsigma: 3.0,
            mclip: true,
            max_iters: None,
            scale: false,
            zero: false,
            separate_ext: false,
            apply_mask: true,
            statistic: Statistic::Median,
            statistics_section: None,
            memory_budget_bytes: None,
        }
    }
}
