//! Frame and exposure data structures.
//!
//! A [`Frame`] is one image's data plane with optional per-pixel quality mask
//! and variance planes, plus the detector scalars (gain, read noise) that the
//! engine combines across a stack. An [`Exposure`] groups one frame per
//! logical extension of a multi-extension detector.

use ndarray::Array2;

use crate::error::StackError;

/// One image extension: data plane, optional mask and variance planes, and
/// per-frame detector scalars.
///
/// Invariant: mask and variance, when present, share the data plane's shape
/// exactly. Use [`Frame::with_planes`] to build a frame with that invariant
/// checked. Frames are read-only inputs to the engine; rejection operates on
/// engine-local working copies of the mask.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Pixel data, indexed `[row, col]`.
    pub data: Array2<f32>,
    /// Per-pixel quality bitmask; absent means no flags anywhere.
    pub mask: Option<Array2<u16>>,
    /// Per-pixel variance; absent means unknown uncertainty.
    pub variance: Option<Array2<f32>>,
    /// Detector gain in e-/ADU.
    pub gain: f32,
    /// Detector read noise in electrons.
    pub read_noise: f32,
}

impl Frame {
    /// Create a frame from a bare data plane.
    pub fn new(data: Array2<f32>, gain: f32, read_noise: f32) -> Self {
        Self {
            data,
            mask: None,
            variance: None,
            gain,
            read_noise,
        }
    }

    /// Create a frame with optional mask and variance planes, validating
    /// that they match the data shape.
    pub fn with_planes(
        data: Array2<f32>,
        mask: Option<Array2<u16>>,
        variance: Option<Array2<f32>>,
        gain: f32,
        read_noise: f32,
    ) -> Result<Self, StackError> {
        if let Some(m) = &mask {
            if m.dim() != data.dim() {
                return Err(StackError::MaskShapeMismatch {
                    actual: m.dim(),
                    expected: data.dim(),
                });
            }
        }
        if let Some(v) = &variance {
            if v.dim() != data.dim() {
                return Err(StackError::VarianceShapeMismatch {
                    actual: v.dim(),
                    expected: data.dim(),
                });
            }
        }
        Ok(Self {
            data,
            mask,
            variance,
            gain,
            read_noise,
        })
    }

    /// Shape of the data plane as (rows, cols).
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }
}

/// One observation: an ordered list of frames, one per logical extension.
///
/// Single-detector data is an exposure with one extension.
#[derive(Debug, Clone)]
pub struct Exposure {
    /// Frames in extension order.
    pub extensions: Vec<Frame>,
}

impl Exposure {
    /// Create a multi-extension exposure.
    pub fn new(extensions: Vec<Frame>) -> Self {
        Self { extensions }
    }

    /// Create a single-extension exposure.
    pub fn single(frame: Frame) -> Self {
        Self {
            extensions: vec![frame],
        }
    }

    /// Number of extensions.
    pub fn num_extensions(&self) -> usize {
        self.extensions.len()
    }
}

impl From<Frame> for Exposure {
    fn from(frame: Frame) -> Self {
        Exposure::single(frame)
    }
}

/// Check that every exposure has the same extension count and that each
/// extension's frames share one shape across the stack.
pub fn validate_stack(exposures: &[Exposure]) -> Result<(), StackError> {
    if exposures.is_empty() {
        return Err(StackError::NoInput);
    }
    let expected = exposures[0].num_extensions();
    for (index, exposure) in exposures.iter().enumerate() {
        if exposure.num_extensions() != expected {
            return Err(StackError::ExtensionCountMismatch {
                index,
                actual: exposure.num_extensions(),
                expected,
            });
        }
    }
    for ext in 0..expected {
        let shape = exposures[0].extensions[ext].shape();
        for (index, exposure) in exposures.iter().enumerate() {
            let actual = exposure.extensions[ext].shape();
            if actual != shape {
                return Err(StackError::ShapeMismatch {
                    index,
                    ext,
                    actual,
                    expected: shape,
                });
            }
        }
    }
    Ok(())
}
