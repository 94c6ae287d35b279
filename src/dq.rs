//! Data-quality flag definitions and the severity hierarchy.
//!
//! Each pixel of a mask plane is a `u16` bitmask of quality flags. The flags
//! form a closed set with an explicit severity ordering that the mask
//! reduction step uses to decide which flag, if any, an output pixel carries.

/// A single data-quality condition, one bit per flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum DqFlag {
    /// Pixel contains no data (detector gap, region never exposed).
    NoData = 1,
    /// Pixel is known to be defective.
    BadPixel = 2,
    /// Pixel response is in the non-linear regime.
    NonLinear = 4,
    /// Pixel is saturated.
    Saturated = 8,
    /// Pixel was struck by a cosmic ray.
    CosmicRay = 16,
    /// Pixel lies in an overlap region between detectors.
    Overlap = 32,
    /// Pixel is not illuminated by the optical path.
    Unilluminated = 64,
}

impl DqFlag {
    /// The flag's bit value.
    pub const fn bit(self) -> u16 {
        self as u16
    }
}

/// Transient per-sample rejection bit set by rejectors on working mask
/// copies. Never present in input masks or the output mask.
pub const REJECTED: u16 = 1 << 15;

/// Severity levels from least to most authoritative. Non-linear and
/// saturated share the top level.
pub const SEVERITY_HIERARCHY: [u16; 6] = [
    DqFlag::NoData.bit(),
    DqFlag::Unilluminated.bit(),
    DqFlag::BadPixel.bit(),
    DqFlag::Overlap.bit(),
    DqFlag::CosmicRay.bit(),
    DqFlag::NonLinear.bit() | DqFlag::Saturated.bit(),
];

/// Bits that make a sample unusable for rejection and order statistics.
/// Saturated and non-linear samples still carry plausible values, so they
/// participate in sorting and clipping; everything else (including the
/// transient rejection bit) excludes a sample.
pub const SEVERE: u16 = !(DqFlag::NonLinear.bit() | DqFlag::Saturated.bit());

/// Whether a sample with this mask value participates in rejection and
/// order statistics.
pub fn is_usable(mask: u16) -> bool {
    mask & SEVERE == 0
}
