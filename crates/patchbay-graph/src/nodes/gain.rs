//! `core.gain`: smoothed gain stage.

use patchbay_dsp::OnePole;

use crate::buffer::ProcessData;
use crate::node::{NodeDescriptor, PrepareSpecs, ProcessContext, Processor};
use crate::parameter::ParamDesc;
use crate::range::ParamRange;

pub struct Gain {
    smoother: OnePole,
}

impl Gain {
    pub const PATH: &'static str = "core.gain";

    pub fn new() -> Self {
        Self {
            smoother: OnePole::new(44_100.0, 20.0),
        }
    }

    pub fn descriptor() -> NodeDescriptor {
        NodeDescriptor::new(Self::PATH, "Gain")
            .with_param(ParamDesc::new("gain", ParamRange::default(), 1.0))
    }
}

impl Processor for Gain {
    fn prepare(&mut self, specs: &PrepareSpecs) {
        self.smoother.set_time_ms(specs.sample_rate as f32, 20.0);
    }

    fn process(&mut self, data: &mut ProcessData<'_, '_>, ctx: &ProcessContext<'_>) {
        let target = ctx.param(0) as f32;
        self.smoother.set_target(target);
        let frames = data.frames();
        for frame in 0..frames {
            let gain = self.smoother.tick();
            for ch in 0..data.num_channels() {
                data.channel_mut(ch)[frame] *= gain;
            }
        }
    }

    fn reset(&mut self) {
        let target = self.smoother.current();
        self.smoother.reset(target);
    }
}

impl Default for Gain {
    fn default() -> Self {
        Self::new()
    }
}
