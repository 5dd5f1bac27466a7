//! Oversampling adapter: children run at `rate * factor` over an
//! upsampled copy of the block.
//!
//! Bypassing the adapter restores the unmodified outer specs for the
//! children (the kernel re-prepares them); bypass here changes which
//! specs the children see, not just whether output passes through.

use smallvec::SmallVec;

use patchbay_dsp::{Decimator, Upsampler};

use crate::buffer::{BlockBuffer, ProcessData};
use crate::event::Event;
use crate::node::{NodeHandle, PrepareSpecs};

const VALID_FACTORS: [usize; 4] = [2, 4, 8, 16];

pub struct Oversample {
    factor: usize,
    up: Vec<Upsampler>,
    down: Decimator,
    wide: BlockBuffer,
}

impl Oversample {
    /// Factors other than 2, 4, 8 or 16 fall back to 2.
    pub fn new(factor: usize) -> Self {
        let factor = if VALID_FACTORS.contains(&factor) {
            factor
        } else {
            2
        };
        Self {
            factor,
            up: Vec::new(),
            down: Decimator::new(factor),
            wide: BlockBuffer::new(),
        }
    }

    #[inline]
    pub fn factor(&self) -> usize {
        self.factor
    }

    pub(crate) fn prepare(&mut self, specs: &PrepareSpecs) {
        self.wide
            .resize(specs.num_channels, specs.block_size * self.factor);
        self.up
            .resize_with(specs.num_channels, || Upsampler::new(self.factor));
        for up in &mut self.up {
            up.reset();
        }
    }

    pub(crate) fn process(
        &mut self,
        children: &[NodeHandle],
        data: &mut ProcessData<'_, '_>,
        bypassed: bool,
    ) {
        if bypassed {
            // Children were re-prepared with the outer specs.
            for child in children {
                child.process(data);
            }
            return;
        }
        let Self {
            factor,
            up,
            down,
            wide,
        } = self;
        let channels = data.num_channels().min(wide.num_channels());
        let frames = data.frames();
        let wide_frames = frames * *factor;
        if wide_frames > wide.frames() || channels == 0 {
            return;
        }

        for ch in 0..channels {
            up[ch].process(data.channel(ch), &mut wide.channel_mut(ch)[..wide_frames]);
        }

        let mut scaled: SmallVec<[Event; 16]> = SmallVec::new();
        for event in data.events() {
            let mut event = *event;
            event.sample_offset *= *factor as u32;
            scaled.push(event);
        }
        {
            let mut slices = wide.slices(channels, wide_frames);
            let mut sub = ProcessData::new(&mut slices, &scaled);
            for child in children {
                child.process(&mut sub);
            }
        }

        for ch in 0..channels {
            down.process(&wide.channel(ch)[..wide_frames], data.channel_mut(ch));
        }
    }

    pub(crate) fn reset(&mut self) {
        for up in &mut self.up {
            up.reset();
        }
        self.wide.clear();
    }
}
