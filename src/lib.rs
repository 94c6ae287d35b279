//! Pixel-stack combination engine for aligned astronomical image frames.
//!
//! Combines N spatially-aligned frames (data plus optional per-pixel quality
//! mask and variance planes) into one output frame, with configurable outlier
//! rejection and statistical combination, quality-flag reduction through a
//! severity hierarchy, uncertainty propagation, and row-chunked execution to
//! bound peak memory.
//!
//! Frame alignment, file I/O and calibration lookup are the caller's concern;
//! this crate consumes an ordered list of equally-shaped [`Frame`]s plus a
//! [`StackConfig`] and produces one combined frame with derived gain and
//! read-noise scalars.

pub mod combine;
pub mod config;
pub mod dq;
pub mod engine;
pub mod error;
pub mod frame;
pub mod mask;
pub mod reject;
pub mod scaling;
pub mod window;

pub use combine::Combiner;
pub use config::{Section, StackConfig, Statistic};
pub use engine::{StackEngine, StackOutput};
pub use error::StackError;
pub use frame::{Exposure, Frame};
pub use reject::Rejector;
