//! Row-chunked execution of the rejection/combination pipeline.
//!
//! Splits the image into contiguous row-chunks sized to a memory budget,
//! runs rejection, mask reduction and combination independently per chunk,
//! and reassembles the full output. Pixels in different chunks never
//! interact, so chunking changes peak memory only: the reassembled output
//! is identical to an unchunked run. Chunks are processed on rayon worker
//! threads since they share no mutable state.

use ndarray::{s, Array2, Array3};
use rayon::prelude::*;
use tracing::debug;

use crate::combine::Combiner;
use crate::error::StackError;
use crate::frame::Frame;
use crate::mask::reduce_mask;
use crate::reject::Rejector;

/// Combined output planes for one extension.
#[derive(Debug, Clone)]
pub struct CombinedPlanes {
    /// Combined pixel data.
    pub data: Array2<f32>,
    /// Reduced quality mask, when mask propagation is active.
    pub mask: Option<Array2<u16>>,
    /// Estimated variance of the combined data.
    pub variance: Array2<f32>,
}

/// Output planes for one row-chunk, written back into the full output at
/// the chunk's row offset.
struct ChunkPlanes {
    row: usize,
    data: Array2<f32>,
    mask: Array2<u16>,
    variance: Array2<f32>,
}

/// Drives a rejector and combiner over an image in row-chunks.
#[derive(Debug, Clone)]
pub struct WindowedExecutor {
    /// Outlier rejection strategy.
    pub rejector: Rejector,
    /// Combination strategy.
    pub combiner: Combiner,
    /// Peak-memory budget for the working cubes; `None` processes the whole
    /// image in one chunk.
    pub memory_budget_bytes: Option<usize>,
}

impl WindowedExecutor {
    /// Create an executor.
    pub fn new(rejector: Rejector, combiner: Combiner, memory_budget_bytes: Option<usize>) -> Self {
        Self {
            rejector,
            combiner,
            memory_budget_bytes,
        }
    }

    /// Rows per chunk for the given image shape and stack depth, floored at
    /// one row. The per-pixel footprint counts the data twice (working copy
    /// plus algorithm temporaries), the mask, and the variance when present.
    fn chunk_rows(&self, shape: (usize, usize), num_img: usize, with_variance: bool) -> usize {
        let (height, width) = shape;
        let budget = match self.memory_budget_bytes {
            Some(budget) => budget,
            None => return height,
        };
        let bytes_per_pixel = 4 * 2 + 2 + if with_variance { 4 } else { 0 };
        let row_bytes = bytes_per_pixel * width * num_img;
        (budget / row_bytes.max(1)).clamp(1, height)
    }

    /// Combine one extension's frames, applying per-frame scale factors and
    /// zero offsets to engine-local working copies. `use_mask` selects
    /// whether input masks seed the working mask cube and whether a reduced
    /// mask is returned.
    pub fn run(
        &self,
        frames: &[&Frame],
        scale: &[f32],
        zero: &[f32],
        use_mask: bool,
    ) -> Result<CombinedPlanes, StackError> {
        let num_img = frames.len();
        self.rejector.validate(num_img)?;

        let (height, width) = frames[0].shape();
        let with_variance = frames.iter().all(|f| f.variance.is_some());
        let chunk = self.chunk_rows((height, width), num_img, with_variance);
        debug!(
            num_img,
            height, width, chunk, with_variance, "windowed combination"
        );

        let starts: Vec<usize> = (0..height).step_by(chunk).collect();
        let chunks: Vec<ChunkPlanes> = starts
            .par_iter()
            .map(|&row| {
                self.run_chunk(frames, scale, zero, use_mask, with_variance, row, (row + chunk).min(height))
            })
            .collect::<Result<_, _>>()?;

        let mut data = Array2::<f32>::zeros((height, width));
        let mut variance = Array2::<f32>::zeros((height, width));
        let mut mask = use_mask.then(|| Array2::<u16>::zeros((height, width)));
        for chunk in chunks {
            let rows = chunk.row..chunk.row + chunk.data.dim().0;
            data.slice_mut(s![rows.clone(), ..]).assign(&chunk.data);
            variance
                .slice_mut(s![rows.clone(), ..])
                .assign(&chunk.variance);
            if let Some(out_mask) = &mut mask {
                out_mask.slice_mut(s![rows, ..]).assign(&chunk.mask);
            }
        }

        Ok(CombinedPlanes {
            data,
            mask,
            variance,
        })
    }

    /// Run rejection, mask reduction and combination on rows `r0..r1`.
    #[allow(clippy::too_many_arguments)]
    fn run_chunk(
        &self,
        frames: &[&Frame],
        scale: &[f32],
        zero: &[f32],
        use_mask: bool,
        with_variance: bool,
        r0: usize,
        r1: usize,
    ) -> Result<ChunkPlanes, StackError> {
        let num_img = frames.len();
        let (_, width) = frames[0].shape();
        let rows = r1 - r0;

        let mut data = Array3::<f32>::zeros((num_img, rows, width));
        let mut mask = Array3::<u16>::zeros((num_img, rows, width));
        let mut variance =
            with_variance.then(|| Array3::<f32>::zeros((num_img, rows, width)));

        for (i, frame) in frames.iter().enumerate() {
            let (s_i, z_i) = (scale[i], zero[i]);
            let mut dst = data.slice_mut(s![i, .., ..]);
            dst.assign(&frame.data.slice(s![r0..r1, ..]));
            if s_i != 1.0 || z_i != 0.0 {
                dst.mapv_inplace(|v| v * s_i + z_i);
            }
            if use_mask {
                if let Some(frame_mask) = &frame.mask {
                    mask.slice_mut(s![i, .., ..])
                        .assign(&frame_mask.slice(s![r0..r1, ..]));
                }
            }
            if let Some(var) = &mut variance {
                if let Some(frame_var) = &frame.variance {
                    let mut dst = var.slice_mut(s![i, .., ..]);
                    dst.assign(&frame_var.slice(s![r0..r1, ..]));
                    if s_i != 1.0 {
                        dst.mapv_inplace(|v| v * s_i * s_i);
                    }
                }
            }
        }

        let var_view = variance.as_ref().map(|v| v.view());
        self.rejector
            .apply(&data.view(), &mut mask, var_view.as_ref())?;
        let out_mask = reduce_mask(&mut mask);
        let (out_data, out_var) = self
            .combiner
            .combine(&data.view(), &mask, var_view.as_ref());

        Ok(ChunkPlanes {
            row: r0,
            data: out_data,
            mask: out_mask,
            variance: out_var,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dq::DqFlag;
    use crate::reject::ClipParams;
    use ndarray::Array2;

    fn frames_from(values: &[f32], shape: (usize, usize)) -> Vec<Frame> {
        values
            .iter()
            .map(|&v| Frame::new(Array2::from_elem(shape, v), 1.0, 3.0))
            .collect()
    }

    #[test]
    fn test_chunk_rows_floor_is_one() {
        let executor = WindowedExecutor::new(Rejector::None, Combiner::Mean, Some(1));
        assert_eq!(executor.chunk_rows((100, 100), 5, true), 1);
    }

    #[test]
    fn test_chunk_rows_unbounded_budget_covers_image() {
        let executor = WindowedExecutor::new(Rejector::None, Combiner::Mean, None);
        assert_eq!(executor.chunk_rows((100, 100), 5, true), 100);
    }

    #[test]
    fn test_chunk_rows_respects_budget() {
        // 10 bytes per pixel without variance, width 100, 4 frames:
        // 4000 bytes per row, so a 10 kB budget fits 2 rows.
        let executor = WindowedExecutor::new(Rejector::None, Combiner::Mean, Some(10_000));
        assert_eq!(executor.chunk_rows((100, 100), 4, false), 2);
    }

    #[test]
    fn test_mean_over_frames() {
        let frames = frames_from(&[1.0, 2.0, 3.0], (4, 4));
        let refs: Vec<&Frame> = frames.iter().collect();
        let executor = WindowedExecutor::new(Rejector::None, Combiner::Mean, None);
        let result = executor.run(&refs, &[1.0; 3], &[0.0; 3], true).unwrap();
        assert_eq!(result.data[[2, 2]], 2.0);
        // No input mask: working cube is clean, reduced mask is empty.
        assert_eq!(result.mask.unwrap()[[2, 2]], 0);
    }

    #[test]
    fn test_scale_and_zero_applied_to_working_copy() {
        let frames = frames_from(&[10.0, 20.0], (2, 2));
        let refs: Vec<&Frame> = frames.iter().collect();
        let executor = WindowedExecutor::new(Rejector::None, Combiner::Mean, None);
        let result = executor
            .run(&refs, &[1.0, 0.5], &[0.0, 0.0], false)
            .unwrap();
        assert_eq!(result.data[[0, 0]], 10.0);
        // Inputs untouched.
        assert_eq!(frames[1].data[[0, 0]], 20.0);
    }

    #[test]
    fn test_chunked_equals_unchunked() {
        let shape = (16, 7);
        let mut frames = frames_from(&[100.0, 101.0, 99.0, 100.5, 250.0], shape);
        // Give the stack some structure: a masked pixel and a gradient.
        for (k, frame) in frames.iter_mut().enumerate() {
            for y in 0..shape.0 {
                for x in 0..shape.1 {
                    frame.data[[y, x]] += (y * x) as f32 * 0.25 + k as f32;
                }
            }
        }
        let mut mask = Array2::zeros(shape);
        mask[[3, 3]] = DqFlag::CosmicRay.bit();
        frames[1].mask = Some(mask);
        for frame in &mut frames {
            frame.mask.get_or_insert_with(|| Array2::zeros(shape));
        }

        let refs: Vec<&Frame> = frames.iter().collect();
        let rejector = Rejector::SigClip(ClipParams {
            lsigma: 3.0,
            hsigma: 3.0,
            mclip: true,
            max_iters: None,
        });
        let whole = WindowedExecutor::new(rejector, Combiner::Median, None)
            .run(&refs, &[1.0; 5], &[0.0; 5], true)
            .unwrap();
        let tiny = WindowedExecutor::new(rejector, Combiner::Median, Some(1))
            .run(&refs, &[1.0; 5], &[0.0; 5], true)
            .unwrap();

        assert_eq!(whole.data, tiny.data);
        assert_eq!(whole.variance, tiny.variance);
        assert_eq!(whole.mask, tiny.mask);
    }

    #[test]
    fn test_minmax_error_propagates() {
        let frames = frames_from(&[1.0, 2.0], (2, 2));
        let refs: Vec<&Frame> = frames.iter().collect();
        let executor = WindowedExecutor::new(
            Rejector::MinMax(crate::reject::MinMaxParams { nlow: 1, nhigh: 1 }),
            Combiner::Mean,
            None,
        );
        let result = executor.run(&refs, &[1.0; 2], &[0.0; 2], false);
        assert!(matches!(result, Err(StackError::MinMaxRejectsAll { .. })));
    }
}
