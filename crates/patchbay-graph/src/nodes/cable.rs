//! `routing.cable`: a pass-through modulation patch point.
//!
//! The cable touches no audio; it republishes the effective value of
//! its single `value` parameter, which is usually automated by an
//! upstream source. `find_real_source` follows cables until it reaches
//! the generator actually driving the chain.

use crate::buffer::ProcessData;
use crate::node::{NodeDescriptor, PrepareSpecs, ProcessContext, Processor};
use crate::parameter::ParamDesc;
use crate::range::ParamRange;

pub struct Cable;

impl Cable {
    pub const PATH: &'static str = "routing.cable";

    pub fn new() -> Self {
        Self
    }

    pub fn descriptor() -> NodeDescriptor {
        NodeDescriptor::new(Self::PATH, "Cable")
            .with_param(ParamDesc::new("value", ParamRange::default(), 0.0))
            .mod_source()
            .pass_through()
    }
}

impl Processor for Cable {
    fn prepare(&mut self, _specs: &PrepareSpecs) {}

    fn process(&mut self, data: &mut ProcessData<'_, '_>, ctx: &ProcessContext<'_>) {
        ctx.output.publish(ctx.param(0), data.frames() as u32);
    }

    fn reset(&mut self) {}
}

impl Default for Cable {
    fn default() -> Self {
        Self::new()
    }
}
