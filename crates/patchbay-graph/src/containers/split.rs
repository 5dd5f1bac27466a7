//! Parallel split: every child consumes an independent copy of the
//! same input; the outputs are summed.

use crate::buffer::{BlockBuffer, ProcessData};
use crate::node::{NodeHandle, NodeState, PrepareSpecs};

pub struct Split {
    input: BlockBuffer,
    scratch: BlockBuffer,
}

impl Split {
    pub fn new() -> Self {
        Self {
            input: BlockBuffer::new(),
            scratch: BlockBuffer::new(),
        }
    }

    pub(crate) fn prepare(&mut self, specs: &PrepareSpecs) {
        self.input.resize(specs.num_channels, specs.block_size);
        self.scratch.resize(specs.num_channels, specs.block_size);
    }

    /// The first active child writes the destination directly, which
    /// skips a redundant sum in the common one-branch case. Later
    /// children render into a scratch copy of the saved input and are
    /// added on. With every child bypassed the input reproduces at the
    /// output exactly.
    pub(crate) fn process(&mut self, children: &[NodeHandle], data: &mut ProcessData<'_, '_>) {
        for child in children {
            child.refresh_gate();
        }
        let active = children
            .iter()
            .filter(|c| !c.is_bypassed() && c.state() != NodeState::Unprepared)
            .count();
        if active == 0 {
            return;
        }
        if active > 1 {
            self.input.copy_from(data);
        }
        let mut first = true;
        for child in children {
            if child.is_bypassed() || child.state() == NodeState::Unprepared {
                continue;
            }
            if first {
                child.process(data);
                first = false;
            } else {
                self.scratch.copy_channels(&self.input);
                let channels = data.num_channels().min(self.scratch.num_channels());
                let frames = data.frames().min(self.scratch.frames());
                {
                    let mut slices = self.scratch.slices(channels, frames);
                    let mut branch = ProcessData::new(&mut slices, data.events());
                    child.process(&mut branch);
                }
                data.add_from(&self.scratch);
            }
        }
    }
}

impl Default for Split {
    fn default() -> Self {
        Self::new()
    }
}
