//! Quality-mask reduction across a stack of frames.
//!
//! Folds N mask planes into one output plane using the severity hierarchy:
//! an output pixel carries a flag only if every sample at that position was
//! unusable for a reason of at least that severity. A naive OR of all masks
//! would flag pixels that are fine in most frames; the hierarchy instead
//! "absorbs" low-severity flags wherever any frame still provides usable
//! data.

use ndarray::Array3;

use crate::dq::SEVERITY_HIERARCHY;

/// Reduce a working mask cube (frame axis first) to one output mask plane,
/// normalizing the cube in place so that a sample survives combination iff
/// its working mask is zero afterwards.
///
/// Severity levels are processed from least to most authoritative:
///
/// - A pixel with at least one good (zero-mask) sample is resolved at once
///   and stays unflagged; its bad samples keep their masks and are excluded
///   from combination.
/// - Otherwise each level's bits are ORed into the output and cleared from
///   every sample; the first level at which a sample becomes good resolves
///   the pixel, and later levels never re-flag it.
/// - A pixel still unresolved after every level (samples carry only the
///   transient rejection bit) has all its working masks cleared so the
///   combiner can still report a value; the output keeps whatever severity
///   bits accumulated.
pub fn reduce_mask(mask: &mut Array3<u16>) -> ndarray::Array2<u16> {
    let (num_img, height, width) = mask.dim();
    let mut out = ndarray::Array2::<u16>::zeros((height, width));

    for y in 0..height {
        for x in 0..width {
            if (0..num_img).any(|i| mask[[i, y, x]] == 0) {
                continue;
            }

            let mut accumulated: u16 = 0;
            let mut resolved = false;
            for level in SEVERITY_HIERARCHY {
                for i in 0..num_img {
                    accumulated |= mask[[i, y, x]] & level;
                    mask[[i, y, x]] &= !level;
                }
                if (0..num_img).any(|i| mask[[i, y, x]] == 0) {
                    resolved = true;
                    break;
                }
            }
            if !resolved {
                // Only rejection bits left: use every sample rather than
                // leaving the pixel with no value at all.
                for i in 0..num_img {
                    mask[[i, y, x]] = 0;
                }
            }
            out[[y, x]] = accumulated;
        }
    }

    out
}
