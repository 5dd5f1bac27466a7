//! Control-rate chain: a serial modulation lane running at an eighth
//! of the audio rate on a single channel.
//!
//! The children never write back into the audio path; they exist to
//! publish modulation values at a cheaper raster. The lane samples
//! channel 0 once per raster tick into a mono scratch block.

use crate::buffer::ProcessData;
use crate::node::{NodeHandle, PrepareSpecs};

/// Raster divider between the audio rate and the control rate.
pub const CONTROL_RATE_DIVIDER: usize = 8;

pub struct ControlRate {
    scratch: Vec<f32>,
}

impl ControlRate {
    pub fn new() -> Self {
        Self {
            scratch: Vec::new(),
        }
    }

    /// The specs the chain presents to its children.
    pub fn child_specs(specs: &PrepareSpecs) -> PrepareSpecs {
        PrepareSpecs {
            sample_rate: specs.sample_rate / CONTROL_RATE_DIVIDER as f64,
            block_size: (specs.block_size / CONTROL_RATE_DIVIDER).max(1),
            num_channels: 1,
            voice_index: specs.voice_index,
        }
    }

    pub(crate) fn prepare(&mut self, specs: &PrepareSpecs) {
        self.scratch
            .resize((specs.block_size / CONTROL_RATE_DIVIDER).max(1), 0.0);
    }

    pub(crate) fn process(&mut self, children: &[NodeHandle], data: &mut ProcessData<'_, '_>) {
        let frames = data.frames();
        if frames == 0 || self.scratch.is_empty() {
            return;
        }
        let ticks = frames
            .div_ceil(CONTROL_RATE_DIVIDER)
            .min(self.scratch.len())
            .max(1);
        if data.num_channels() > 0 {
            let source = data.channel(0);
            for tick in 0..ticks {
                let index = (tick * CONTROL_RATE_DIVIDER).min(frames - 1);
                self.scratch[tick] = source[index];
            }
        } else {
            self.scratch[..ticks].fill(0.0);
        }

        let mut lane: [&mut [f32]; 1] = [&mut self.scratch[..ticks]];
        let mut sub = ProcessData::new(&mut lane, data.events());
        for child in children {
            child.process(&mut sub);
        }
    }

    pub(crate) fn reset(&mut self) {
        self.scratch.fill(0.0);
    }
}

impl Default for ControlRate {
    fn default() -> Self {
        Self::new()
    }
}
