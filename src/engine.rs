//! Stack combination facade.
//!
//! Orchestrates, per extension: scale/zero factor calculation, windowed
//! rejection and combination, mask reduction, and derived-scalar assembly
//! (mean gain, quadrature-summed read noise, input count).

use tracing::{info, warn};

use crate::combine::Combiner;
use crate::config::StackConfig;
use crate::error::StackError;
use crate::frame::{validate_stack, Exposure, Frame};
use crate::reject::Rejector;
use crate::scaling;
use crate::window::WindowedExecutor;

/// Result of a stack combination: one frame per extension, with combined
/// gain and read noise attached, plus the number of inputs combined.
#[derive(Debug, Clone)]
pub struct StackOutput {
    /// Combined frames in extension order.
    pub frames: Vec<Frame>,
    /// Number of input exposures combined.
    pub n_combined: usize,
}

/// Combines a stack of exposures according to a [`StackConfig`].
#[derive(Debug, Clone)]
pub struct StackEngine {
    config: StackConfig,
}

impl StackEngine {
    /// Create an engine for the given configuration.
    pub fn new(config: StackConfig) -> Self {
        Self { config }
    }

    /// The engine's configuration.
    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    /// Combine the exposures into one.
    ///
    /// A single input is returned unchanged (no stacking needed); zero
    /// inputs, mismatched extension counts and mismatched shapes are
    /// errors. Scale/zero normalization, rejection and combination follow
    /// the configuration; masks propagate only when `apply_mask` is set and
    /// every input carries one.
    pub fn combine(&self, exposures: &[Exposure]) -> Result<StackOutput, StackError> {
        if exposures.is_empty() {
            return Err(StackError::NoInput);
        }
        if exposures.len() == 1 {
            info!("no stacking performed, at least two input exposures are required");
            return Ok(StackOutput {
                frames: exposures[0].extensions.clone(),
                n_combined: 1,
            });
        }
        validate_stack(exposures)?;

        let num_img = exposures.len();
        let num_ext = exposures[0].num_extensions();
        let combiner = self.resolve_combiner(exposures);
        let rejector = self.resolve_rejector(exposures);
        let factors = scaling::compute_factors(exposures, &self.config);
        let executor = WindowedExecutor::new(rejector, combiner, self.config.memory_budget_bytes);

        let mut frames = Vec::with_capacity(num_ext);
        for ext in 0..num_ext {
            let ext_frames: Vec<&Frame> =
                exposures.iter().map(|e| &e.extensions[ext]).collect();
            let use_mask =
                self.config.apply_mask && ext_frames.iter().all(|f| f.mask.is_some());

            if num_ext > 1 {
                info!(ext, num_img, "combining extension");
            } else {
                info!(num_img, "combining images");
            }
            let planes = executor.run(
                &ext_frames,
                &factors.scale[ext],
                &factors.zero[ext],
                use_mask,
            )?;

            let gain =
                ext_frames.iter().map(|f| f.gain).sum::<f32>() / num_img as f32;
            let read_noise = ext_frames
                .iter()
                .map(|f| f.read_noise * f.read_noise)
                .sum::<f32>()
                .sqrt();

            frames.push(Frame {
                data: planes.data,
                mask: planes.mask,
                variance: Some(planes.variance),
                gain,
                read_noise,
            });
        }

        Ok(StackOutput {
            frames,
            n_combined: num_img,
        })
    }

    /// Resolve the configured combiner, downgrading `wtmean` to `mean` when
    /// some input lacks variance.
    fn resolve_combiner(&self, exposures: &[Exposure]) -> Combiner {
        let combiner = Combiner::from_name(&self.config.combine);
        if combiner.needs_variance() && !all_have_variance(exposures) {
            warn!(
                "combine method 'wtmean' chosen but some extensions have no \
                 variance, 'mean' will be used instead"
            );
            return Combiner::Mean;
        }
        combiner
    }

    /// Resolve the configured rejector, downgrading `varclip` to `sigclip`
    /// when some input lacks variance.
    fn resolve_rejector(&self, exposures: &[Exposure]) -> Rejector {
        let rejector = Rejector::from_config(&self.config);
        if rejector.needs_variance() && !all_have_variance(exposures) {
            warn!(
                "rejection method 'varclip' chosen but some extensions have \
                 no variance, 'sigclip' will be used instead"
            );
            if let Rejector::VarClip(params) = rejector {
                return Rejector::SigClip(params);
            }
        }
        rejector
    }
}

fn all_have_variance(exposures: &[Exposure]) -> bool {
    exposures
        .iter()
        .flat_map(|e| e.extensions.iter())
        .all(|f| f.variance.is_some())
}
