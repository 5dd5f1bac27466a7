//! Serial chain: children process in order, each consuming the
//! previous child's output in place.

use patchbay_dsp::LinearRamp;

use crate::buffer::{BlockBuffer, ProcessData};
use crate::node::{NodeHandle, PrepareSpecs};

/// Default bypass crossfade length.
pub const DEFAULT_BYPASS_RAMP_MS: f64 = 20.0;

/// Bypassing the whole chain crossfades between the processed and the
/// dry signal over a short linear ramp instead of switching hard.
pub struct Serial {
    ramp: LinearRamp,
    ramp_ms: f64,
    dry: BlockBuffer,
}

impl Serial {
    pub fn new(ramp_ms: f64) -> Self {
        Self {
            ramp: LinearRamp::new(44_100.0, ramp_ms as f32),
            ramp_ms,
            dry: BlockBuffer::new(),
        }
    }

    pub(crate) fn prepare(&mut self, specs: &PrepareSpecs) {
        self.ramp
            .set_time_ms(specs.sample_rate as f32, self.ramp_ms as f32);
        self.dry.resize(specs.num_channels, specs.block_size);
    }

    pub(crate) fn process(
        &mut self,
        children: &[NodeHandle],
        data: &mut ProcessData<'_, '_>,
        bypassed: bool,
    ) {
        self.ramp.set_target(if bypassed { 0.0 } else { 1.0 });
        if bypassed && self.ramp.is_settled() {
            // Fully faded out: the dry input passes through untouched.
            return;
        }
        let fading = !self.ramp.is_settled() || self.ramp.position() < 1.0;
        if fading {
            self.dry.copy_from(data);
        }
        for child in children {
            child.process(data);
        }
        if fading {
            let channels = data.num_channels().min(self.dry.num_channels());
            let frames = data.frames().min(self.dry.frames());
            for frame in 0..frames {
                let wet = self.ramp.tick();
                let dry_gain = 1.0 - wet;
                for ch in 0..channels {
                    let dry = self.dry.channel(ch)[frame];
                    let sample = data.channel(ch)[frame];
                    data.channel_mut(ch)[frame] = sample * wet + dry * dry_gain;
                }
            }
        }
    }

    pub(crate) fn reset(&mut self) {
        self.dry.clear();
        // Finish any fade in flight so reset never resumes a stale
        // half-way crossfade.
        self.ramp.settle();
    }
}
