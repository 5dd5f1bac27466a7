//! DSP primitives shared by the patchbay graph engine.
//!
//! Nothing in here knows about nodes or graphs; these are the small
//! stateful helpers the containers lean on (bypass crossfades, the
//! integer-factor resampling used by the oversampling adapter).

pub mod resample;
pub mod smoothing;

pub use resample::{Decimator, Upsampler};
pub use smoothing::{LinearRamp, OnePole};
