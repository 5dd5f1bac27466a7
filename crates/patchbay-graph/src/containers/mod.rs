//! The container family: the closed set of topology strategies a node
//! can sequence its children with.
//!
//! Every container shares one kernel shape; the per-kind behavior is a
//! tagged variant dispatched by match, not a trait object. Serial runs
//! children in order with a smoothed bypass crossfade, Split fans the
//! same input out and sums, MultiChannel partitions the channel range,
//! Oversample and FixedBlock change the specs the children see, and
//! ControlRate runs a mono modulation lane at an eighth of the rate.

mod control_rate;
mod fixed_block;
mod multi;
mod oversample;
mod serial;
mod split;

pub use control_rate::{ControlRate, CONTROL_RATE_DIVIDER};
pub use fixed_block::FixedBlock;
pub use multi::Multi;
pub use oversample::Oversample;
pub use serial::{Serial, DEFAULT_BYPASS_RAMP_MS};
pub use split::Split;

use std::sync::Arc;

use crate::buffer::ProcessData;
use crate::error::ErrorMap;
use crate::event::Event;
use crate::node::{NodeHandle, PrepareSpecs};

/// One strategy over the same child list.
pub enum ContainerKind {
    Serial(Serial),
    Split(Split),
    Multi(Multi),
    Oversample(Oversample),
    FixedBlock(FixedBlock),
    ControlRate(ControlRate),
}

impl ContainerKind {
    pub fn serial(ramp_ms: f64) -> Self {
        ContainerKind::Serial(Serial::new(ramp_ms))
    }

    pub fn split() -> Self {
        ContainerKind::Split(Split::new())
    }

    pub fn multi() -> Self {
        ContainerKind::Multi(Multi::new())
    }

    pub fn oversample(factor: usize) -> Self {
        ContainerKind::Oversample(Oversample::new(factor))
    }

    pub fn fixed_block(block: usize) -> Self {
        ContainerKind::FixedBlock(FixedBlock::new(block))
    }

    pub fn control_rate() -> Self {
        ContainerKind::ControlRate(ControlRate::new())
    }
}

/// Child list plus the per-kind state, living inside a node's kernel.
pub struct ContainerKernel {
    kind: ContainerKind,
    children: Vec<NodeHandle>,
    outer: Option<PrepareSpecs>,
    child_specs: Option<PrepareSpecs>,
}

impl ContainerKernel {
    pub fn new(kind: ContainerKind) -> Self {
        Self {
            kind,
            children: Vec::new(),
            outer: None,
            child_specs: None,
        }
    }

    #[inline]
    pub fn children(&self) -> &[NodeHandle] {
        &self.children
    }

    pub fn add_child(&mut self, child: NodeHandle) {
        self.children.push(child);
    }

    pub fn insert_child(&mut self, index: usize, child: NodeHandle) {
        let index = index.min(self.children.len());
        self.children.insert(index, child);
    }

    pub fn remove_child(&mut self, child: &NodeHandle) -> bool {
        let before = self.children.len();
        self.children.retain(|c| !Arc::ptr_eq(c, child));
        self.children.len() != before
    }

    pub fn take_children(&mut self) -> Vec<NodeHandle> {
        std::mem::take(&mut self.children)
    }

    /// The specs the children were last prepared with.
    #[inline]
    pub fn child_specs(&self) -> Option<PrepareSpecs> {
        self.child_specs
    }

    /// True for the adapters whose bypass swaps the child specs back
    /// to the unmodified outer ones.
    pub fn bypass_changes_child_specs(&self) -> bool {
        matches!(
            self.kind,
            ContainerKind::Oversample(_) | ContainerKind::FixedBlock(_)
        )
    }

    /// MultiChannel channel allocations (empty for other kinds).
    pub fn channel_assignments(&self) -> &[usize] {
        match &self.kind {
            ContainerKind::Multi(multi) => multi.assignments(),
            _ => &[],
        }
    }

    /// Re-partitions a MultiChannel container after a child layout
    /// change. `trigger` is the child whose change caused the call; it
    /// keeps its current allocation and is excluded from the recompute.
    pub fn repartition(&mut self, trigger: Option<usize>, self_id: &str, errors: &ErrorMap) {
        let Some(outer) = self.outer else { return };
        if let ContainerKind::Multi(multi) = &mut self.kind {
            match multi.partition(outer.num_channels, &self.children, trigger) {
                Ok(()) => {
                    for (child, &alloc) in self.children.iter().zip(multi.assignments()) {
                        if alloc > 0 {
                            child.prepare(&outer.with_channels(alloc), errors);
                        }
                    }
                }
                Err(error) => errors.add(self_id, error),
            }
        }
    }

    pub fn prepare(
        &mut self,
        specs: &PrepareSpecs,
        bypassed: bool,
        self_id: &str,
        errors: &ErrorMap,
    ) {
        self.outer = Some(*specs);
        match &mut self.kind {
            ContainerKind::Serial(serial) => {
                serial.prepare(specs);
                self.child_specs = Some(*specs);
                prepare_all(&self.children, specs, errors);
            }
            ContainerKind::Split(split) => {
                split.prepare(specs);
                self.child_specs = Some(*specs);
                prepare_all(&self.children, specs, errors);
            }
            ContainerKind::Multi(multi) => {
                self.child_specs = Some(*specs);
                match multi.partition(specs.num_channels, &self.children, None) {
                    Ok(()) => {
                        for (child, &alloc) in self.children.iter().zip(multi.assignments()) {
                            if alloc > 0 {
                                child.prepare(&specs.with_channels(alloc), errors);
                            }
                        }
                    }
                    Err(error) => errors.add(self_id, error),
                }
            }
            ContainerKind::Oversample(oversample) => {
                oversample.prepare(specs);
                let child = if bypassed {
                    *specs
                } else {
                    specs.scaled(oversample.factor())
                };
                self.child_specs = Some(child);
                prepare_all(&self.children, &child, errors);
            }
            ContainerKind::FixedBlock(fixed) => {
                let child = if bypassed {
                    *specs
                } else {
                    specs.with_block_size(fixed.block())
                };
                self.child_specs = Some(child);
                prepare_all(&self.children, &child, errors);
            }
            ContainerKind::ControlRate(control) => {
                control.prepare(specs);
                self.child_specs = Some(ControlRate::child_specs(specs));
                prepare_all(&self.children, &self.child_specs.unwrap_or(*specs), errors);
            }
        }
    }

    pub fn process(&mut self, data: &mut ProcessData<'_, '_>, bypassed: bool) {
        match &mut self.kind {
            ContainerKind::Serial(serial) => serial.process(&self.children, data, bypassed),
            ContainerKind::Split(split) => {
                if !bypassed {
                    split.process(&self.children, data);
                }
            }
            ContainerKind::Multi(multi) => {
                if !bypassed {
                    multi.process(&self.children, data);
                }
            }
            ContainerKind::Oversample(oversample) => {
                oversample.process(&self.children, data, bypassed)
            }
            ContainerKind::FixedBlock(fixed) => fixed.process(&self.children, data, bypassed),
            ContainerKind::ControlRate(control) => {
                if !bypassed {
                    control.process(&self.children, data);
                }
            }
        }
    }

    pub fn reset(&mut self) {
        match &mut self.kind {
            ContainerKind::Serial(serial) => serial.reset(),
            ContainerKind::Split(_) | ContainerKind::Multi(_) | ContainerKind::FixedBlock(_) => {}
            ContainerKind::Oversample(oversample) => oversample.reset(),
            ContainerKind::ControlRate(control) => control.reset(),
        }
        for child in &self.children {
            child.reset();
        }
    }

    pub fn handle_event(&self, event: &Event) {
        for child in &self.children {
            child.handle_event(event);
        }
    }
}

fn prepare_all(children: &[NodeHandle], specs: &PrepareSpecs, errors: &ErrorMap) {
    for child in children {
        child.prepare(specs, errors);
    }
}
