//! `core.peak`: passthrough peak follower publishing the block maximum
//! as a modulation value.

use crate::buffer::ProcessData;
use crate::node::{NodeDescriptor, PrepareSpecs, ProcessContext, Processor};

pub struct Peak {
    last: f64,
}

impl Peak {
    pub const PATH: &'static str = "core.peak";

    pub fn new() -> Self {
        Self { last: 0.0 }
    }

    pub fn descriptor() -> NodeDescriptor {
        NodeDescriptor::new(Self::PATH, "Peak").mod_source()
    }
}

impl Processor for Peak {
    fn prepare(&mut self, _specs: &PrepareSpecs) {}

    fn process(&mut self, data: &mut ProcessData<'_, '_>, ctx: &ProcessContext<'_>) {
        let mut peak = 0.0f32;
        for ch in 0..data.num_channels() {
            for &sample in data.channel(ch) {
                peak = peak.max(sample.abs());
            }
        }
        self.last = f64::from(peak.min(1.0));
        ctx.output.publish(self.last, data.frames() as u32);
    }

    fn reset(&mut self) {
        self.last = 0.0;
    }
}

impl Default for Peak {
    fn default() -> Self {
        Self::new()
    }
}
