//! Error types for the stack combination engine.

use thiserror::Error;

/// Errors produced while validating inputs or configuration for stacking.
///
/// Numerical degeneracies (non-finite scale factors, zero weight sums) are
/// not errors: they are absorbed locally with a documented fallback and a
/// log entry. Unknown combiner or rejector names likewise fall back to the
/// defaults with a warning rather than failing.
#[derive(Error, Debug)]
pub enum StackError {
    /// No input exposures were supplied.
    #[error("no input exposures supplied")]
    NoInput,

    /// Inputs do not all have the same number of extensions.
    #[error("input {index} has {actual} extensions, expected {expected}")]
    ExtensionCountMismatch {
        /// Index of the offending input.
        index: usize,
        /// Its extension count.
        actual: usize,
        /// Extension count of the first input.
        expected: usize,
    },

    /// Two frames in the stack differ in shape.
    #[error("input {index} extension {ext} has shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        /// Index of the offending input.
        index: usize,
        /// Extension index within the input.
        ext: usize,
        /// Shape of the offending frame.
        actual: (usize, usize),
        /// Shape of the first input's frame.
        expected: (usize, usize),
    },

    /// A mask plane does not share its frame's data shape.
    #[error("mask plane shape {actual:?} does not match data shape {expected:?}")]
    MaskShapeMismatch {
        /// Shape of the mask plane.
        actual: (usize, usize),
        /// Shape of the data plane.
        expected: (usize, usize),
    },

    /// A variance plane does not share its frame's data shape.
    #[error("variance plane shape {actual:?} does not match data shape {expected:?}")]
    VarianceShapeMismatch {
        /// Shape of the variance plane.
        actual: (usize, usize),
        /// Shape of the data plane.
        expected: (usize, usize),
    },

    /// Minmax rejection configured to reject every sample.
    #[error("only {num_img} images but nlow={nlow} and nhigh={nhigh}")]
    MinMaxRejectsAll {
        /// Number of input images.
        num_img: usize,
        /// Configured count of low samples to reject.
        nlow: usize,
        /// Configured count of high samples to reject.
        nhigh: usize,
    },
}
