//! `core.oscillator`: a sine source that doubles as a modulation
//! generator.

use std::f64::consts::TAU;

use crate::buffer::ProcessData;
use crate::node::{NodeDescriptor, PrepareSpecs, ProcessContext, Processor};
use crate::parameter::ParamDesc;
use crate::range::ParamRange;

pub struct Oscillator {
    phase: f64,
    sample_rate: f64,
}

impl Oscillator {
    pub const PATH: &'static str = "core.oscillator";

    pub fn new() -> Self {
        Self {
            phase: 0.0,
            sample_rate: 44_100.0,
        }
    }

    pub fn descriptor() -> NodeDescriptor {
        NodeDescriptor::new(Self::PATH, "Oscillator")
            .with_param(ParamDesc::new(
                "freq",
                ParamRange::new(20.0, 20_000.0).with_skew(0.3),
                220.0,
            ))
            .with_param(ParamDesc::new("level", ParamRange::default(), 0.5))
            .mod_source()
    }
}

impl Processor for Oscillator {
    fn prepare(&mut self, specs: &PrepareSpecs) {
        self.sample_rate = specs.sample_rate;
    }

    fn process(&mut self, data: &mut ProcessData<'_, '_>, ctx: &ProcessContext<'_>) {
        let freq = ctx.param(0);
        let level = ctx.param(1) as f32;
        let step = TAU * freq / self.sample_rate;
        let frames = data.frames();
        let mut last = 0.0;
        for frame in 0..frames {
            last = self.phase.sin();
            let sample = last as f32 * level;
            for ch in 0..data.num_channels() {
                data.channel_mut(ch)[frame] = sample;
            }
            self.phase += step;
            if self.phase >= TAU {
                self.phase -= TAU;
            }
        }
        // Publish the raw last sample mapped into 0..1.
        ctx.output.publish((last + 1.0) * 0.5, frames as u32);
    }

    fn reset(&mut self) {
        self.phase = 0.0;
    }

    fn handle_event(&mut self, event: &crate::event::Event) {
        // Note-on retriggers the phase so voices start aligned.
        if let crate::event::EventKind::NoteOn { .. } = event.kind {
            self.phase = 0.0;
        }
    }
}

impl Default for Oscillator {
    fn default() -> Self {
        Self::new()
    }
}
