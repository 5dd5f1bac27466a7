//! Built-in leaf nodes registered by the default registry.
//!
//! These are deliberately small: the engine hosts processors, it does
//! not try to be a DSP library. The oscillator and peak follower double
//! as modulation sources, the cable is the routing pass-through the
//! connection resolver follows.

mod cable;
mod gain;
mod oscillator;
mod peak;

pub use cable::Cable;
pub use gain::Gain;
pub use oscillator::Oscillator;
pub use peak::Peak;
