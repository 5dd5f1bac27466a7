//! Fixed-block adapter: children always see the configured block size
//! regardless of what the host delivers.

use smallvec::SmallVec;

use crate::buffer::ProcessData;
use crate::event::Event;
use crate::node::NodeHandle;

pub struct FixedBlock {
    block: usize,
}

impl FixedBlock {
    /// Block sizes must be a power of two of at least 8; anything else
    /// is forced to 64.
    pub fn new(block: usize) -> Self {
        let block = if block >= 8 && block.is_power_of_two() {
            block
        } else {
            64
        };
        Self { block }
    }

    #[inline]
    pub fn block(&self) -> usize {
        self.block
    }

    /// Feeds the children fixed-size chunks; the final partial chunk
    /// keeps its true length. Events are rebased into their chunk.
    pub(crate) fn process(
        &mut self,
        children: &[NodeHandle],
        data: &mut ProcessData<'_, '_>,
        bypassed: bool,
    ) {
        if bypassed {
            for child in children {
                child.process(data);
            }
            return;
        }
        let frames = data.frames();
        let events = data.events();
        let mut start = 0;
        while start < frames {
            let end = (start + self.block).min(frames);
            let mut due: SmallVec<[Event; 16]> = SmallVec::new();
            for event in events {
                let offset = event.sample_offset as usize;
                if offset >= start && offset < end {
                    let mut event = *event;
                    event.sample_offset = (offset - start) as u32;
                    due.push(event);
                }
            }
            {
                let mut slices = data.frame_slices(start, end);
                let mut chunk = ProcessData::new(&mut slices, &due);
                for child in children {
                    child.process(&mut chunk);
                }
            }
            start = end;
        }
    }
}
