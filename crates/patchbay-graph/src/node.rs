//! The node abstraction: the processing unit contract shared by leaves
//! and containers.
//!
//! A [`NodeInstance`] carries everything the graph needs to host a
//! processor: identity, bypass state, parameters, the parent
//! back-reference, the cached prepare specs and the modulation output.
//! The actual DSP lives in the kernel, either a boxed leaf
//! [`Processor`] or a [`ContainerKernel`]. Ownership flows strictly
//! parent to child; parent links are `Weak` so destruction never
//! depends on breaking reference cycles.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwapOption;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::bridge::ModOutput;
use crate::buffer::ProcessData;
use crate::connection::{BypassGate, ConnectionSpec};
use crate::containers::ContainerKernel;
use crate::error::{ErrorMap, NodeError};
use crate::event::Event;
use crate::parameter::{ParamDesc, Parameter};
use crate::range::ParamRange;
use crate::registry::NodeConfig;

/// Macro parameter limit per container.
pub const MAX_NODE_PARAMETERS: usize = 16;

/// What a node was last prepared with.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrepareSpecs {
    pub sample_rate: f64,
    pub block_size: usize,
    pub num_channels: usize,
    /// `None` for the monophonic graph; reserved for voice rendering.
    pub voice_index: Option<u32>,
}

impl PrepareSpecs {
    pub fn new(sample_rate: f64, block_size: usize, num_channels: usize) -> Self {
        Self {
            sample_rate,
            block_size,
            num_channels,
            voice_index: None,
        }
    }

    /// The specs an oversampling adapter presents to its children.
    pub fn scaled(mut self, factor: usize) -> Self {
        self.sample_rate *= factor as f64;
        self.block_size *= factor;
        self
    }

    pub fn with_channels(mut self, num_channels: usize) -> Self {
        self.num_channels = num_channels;
        self
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }
}

/// Per-node lifecycle: `prepare` is re-entrant and always lands back in
/// `Prepared`; `reset` never changes the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeState {
    Unprepared = 0,
    Prepared = 1,
    Processing = 2,
}

impl NodeState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => NodeState::Prepared,
            2 => NodeState::Processing,
            _ => NodeState::Unprepared,
        }
    }
}

/// What a leaf processor sees while rendering: its node's parameters
/// and the modulation output slot to publish into.
pub struct ProcessContext<'a> {
    pub params: &'a [Arc<Parameter>],
    pub output: &'a ModOutput,
}

impl ProcessContext<'_> {
    /// Effective value of the parameter at `index`, or the descriptor
    /// default when the index is out of range.
    #[inline]
    pub fn param(&self, index: usize) -> f64 {
        self.params.get(index).map_or(0.0, |p| p.effective())
    }
}

/// The leaf DSP contract. `process` must not allocate; `prepare` may.
pub trait Processor: Send {
    fn prepare(&mut self, specs: &PrepareSpecs);
    fn process(&mut self, data: &mut ProcessData<'_, '_>, ctx: &ProcessContext<'_>);
    fn reset(&mut self);
    fn handle_event(&mut self, _event: &Event) {}
}

/// Static description of a node kind, produced by its factory.
#[derive(Debug, Clone)]
pub struct NodeDescriptor {
    /// Canonical factory path, e.g. `core.gain`.
    pub path: String,
    pub name: String,
    pub params: Vec<ParamDesc>,
    /// `Some(n)` for nodes that only work with exactly `n` channels.
    pub fixed_channels: Option<usize>,
    pub supports_polyphony: bool,
    /// Publishes a modulation value every block.
    pub mod_source: bool,
    /// Routing-only node that forwards the source driving it.
    pub pass_through: bool,
}

impl NodeDescriptor {
    pub fn new(path: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            params: Vec::new(),
            fixed_channels: None,
            supports_polyphony: false,
            mod_source: false,
            pass_through: false,
        }
    }

    pub fn with_param(mut self, param: ParamDesc) -> Self {
        self.params.push(param);
        self
    }

    pub fn with_fixed_channels(mut self, channels: usize) -> Self {
        self.fixed_channels = Some(channels);
        self
    }

    pub fn polyphonic(mut self) -> Self {
        self.supports_polyphony = true;
        self
    }

    pub fn mod_source(mut self) -> Self {
        self.mod_source = true;
        self
    }

    pub fn pass_through(mut self) -> Self {
        self.pass_through = true;
        self
    }
}

/// What actually does the work inside a node.
pub enum NodeKernel {
    Leaf(Box<dyn Processor>),
    Container(ContainerKernel),
}

#[derive(Debug, Clone, Default)]
pub struct NodeMeta {
    pub colour: Option<String>,
    pub comment: String,
}

/// A node in the graph. Always handled through [`NodeHandle`].
pub struct NodeInstance {
    id: Mutex<String>,
    descriptor: Arc<NodeDescriptor>,
    config: NodeConfig,
    bypassed: AtomicBool,
    state: AtomicU8,
    params: Mutex<Vec<Arc<Parameter>>>,
    parent: Mutex<Weak<NodeInstance>>,
    specs: Mutex<Option<PrepareSpecs>>,
    mod_output: ModOutput,
    gate: ArcSwapOption<BypassGate>,
    /// Persisted signal-output connections, stored on the source side.
    mod_targets: Mutex<Vec<ConnectionSpec>>,
    meta: Mutex<NodeMeta>,
    kernel: Mutex<NodeKernel>,
}

pub type NodeHandle = Arc<NodeInstance>;

impl NodeInstance {
    pub fn new(
        id: impl Into<String>,
        descriptor: NodeDescriptor,
        config: NodeConfig,
        kernel: NodeKernel,
    ) -> NodeHandle {
        let params = descriptor
            .params
            .iter()
            .cloned()
            .map(Parameter::new)
            .collect();
        Arc::new(Self {
            id: Mutex::new(id.into()),
            descriptor: Arc::new(descriptor),
            config,
            bypassed: AtomicBool::new(false),
            state: AtomicU8::new(NodeState::Unprepared as u8),
            params: Mutex::new(params),
            parent: Mutex::new(Weak::new()),
            specs: Mutex::new(None),
            mod_output: ModOutput::new(),
            gate: ArcSwapOption::empty(),
            mod_targets: Mutex::new(Vec::new()),
            meta: Mutex::new(NodeMeta::default()),
            kernel: Mutex::new(kernel),
        })
    }

    pub fn id(&self) -> String {
        self.id.lock().clone()
    }

    #[inline]
    pub fn has_id(&self, id: &str) -> bool {
        *self.id.lock() == id
    }

    pub(crate) fn set_id(&self, id: &str) {
        *self.id.lock() = id.to_owned();
    }

    #[inline]
    pub fn descriptor(&self) -> &NodeDescriptor {
        &self.descriptor
    }

    #[inline]
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn parameters(&self) -> MutexGuard<'_, Vec<Arc<Parameter>>> {
        self.params.lock()
    }

    pub fn parameter(&self, index: usize) -> Option<Arc<Parameter>> {
        self.params.lock().get(index).cloned()
    }

    pub fn parameter_by_id(&self, id: &str) -> Option<Arc<Parameter>> {
        self.params.lock().iter().find(|p| p.id() == id).cloned()
    }

    /// Adds a macro parameter. Containers only; bounded by
    /// [`MAX_NODE_PARAMETERS`].
    pub fn add_macro_parameter(
        &self,
        id: &str,
        range: ParamRange,
    ) -> Result<Arc<Parameter>, NodeError> {
        if !self.is_container() {
            return Err(NodeError::InitialisationError(
                "macro parameters require a container".to_owned(),
            ));
        }
        let mut params = self.params.lock();
        if params.len() >= MAX_NODE_PARAMETERS {
            return Err(NodeError::TooManyParameters {
                limit: MAX_NODE_PARAMETERS,
                actual: params.len() + 1,
            });
        }
        let param = Parameter::new(ParamDesc::new(id, range, range.min));
        params.push(param.clone());
        Ok(param)
    }

    pub fn parent(&self) -> Option<NodeHandle> {
        self.parent.lock().upgrade()
    }

    pub(crate) fn set_parent(&self, parent: Option<&NodeHandle>) {
        *self.parent.lock() = parent.map_or_else(Weak::new, Arc::downgrade);
    }

    pub fn is_container(&self) -> bool {
        matches!(&*self.kernel.lock(), NodeKernel::Container(_))
    }

    /// Control-path snapshot of the children (empty for leaves).
    pub fn children(&self) -> Vec<NodeHandle> {
        match &*self.kernel.lock() {
            NodeKernel::Container(kernel) => kernel.children().to_vec(),
            NodeKernel::Leaf(_) => Vec::new(),
        }
    }

    pub(crate) fn kernel(&self) -> MutexGuard<'_, NodeKernel> {
        self.kernel.lock()
    }

    /// MultiChannel allocation per child (empty for everything else).
    pub fn channel_assignments(&self) -> Vec<usize> {
        match &*self.kernel.lock() {
            NodeKernel::Container(kernel) => kernel.channel_assignments().to_vec(),
            NodeKernel::Leaf(_) => Vec::new(),
        }
    }

    #[inline]
    pub fn is_bypassed(&self) -> bool {
        self.bypassed.load(Ordering::Relaxed)
    }

    /// Flips only the flag; render-safe, used by gates and macro links.
    #[inline]
    pub fn store_bypassed(&self, bypassed: bool) {
        self.bypassed.store(bypassed, Ordering::Relaxed);
    }

    /// Control-side bypass. Oversample/FixedBlock adapters re-prepare
    /// their children here because their bypass changes the specs the
    /// children see; callers must hold the graph's write lock.
    pub fn set_bypassed(&self, bypassed: bool, errors: &ErrorMap) {
        let was = self.bypassed.swap(bypassed, Ordering::Relaxed);
        if was == bypassed {
            return;
        }
        let specs = *self.specs.lock();
        if let (Some(specs), NodeKernel::Container(kernel)) = (specs, &mut *self.kernel.lock()) {
            if kernel.bypass_changes_child_specs() && self.state() != NodeState::Unprepared {
                kernel.prepare(&specs, bypassed, &self.id(), errors);
            }
        }
    }

    /// True for adapters whose bypass re-prepares children; those must
    /// never be targeted by a render-time bypass gate.
    pub fn bypass_reprepares_children(&self) -> bool {
        match &*self.kernel.lock() {
            NodeKernel::Container(kernel) => kernel.bypass_changes_child_specs(),
            NodeKernel::Leaf(_) => false,
        }
    }

    pub(crate) fn set_gate(&self, gate: Option<BypassGate>) {
        self.gate.store(gate.map(Arc::new));
    }

    pub fn has_gate(&self) -> bool {
        self.gate.load().is_some()
    }

    pub(crate) fn gate_sourced_from(&self, node: &NodeHandle) -> bool {
        self.gate
            .load_full()
            .map_or(false, |gate| gate.is_from(node))
    }

    /// Applies the incoming bypass gate, if any, to the bypass flag.
    pub(crate) fn refresh_gate(&self) {
        if let Some(gate) = self.gate.load_full() {
            if let Some(active) = gate.is_active() {
                self.bypassed.store(!active, Ordering::Relaxed);
            }
        }
    }

    #[inline]
    pub fn mod_output(&self) -> &ModOutput {
        &self.mod_output
    }

    pub fn mod_targets(&self) -> MutexGuard<'_, Vec<ConnectionSpec>> {
        self.mod_targets.lock()
    }

    pub fn meta(&self) -> MutexGuard<'_, NodeMeta> {
        self.meta.lock()
    }

    pub fn state(&self) -> NodeState {
        NodeState::from_u8(self.state.load(Ordering::Relaxed))
    }

    /// The specs from the last prepare call.
    pub fn last_specs(&self) -> Option<PrepareSpecs> {
        *self.specs.lock()
    }

    /// The specs a container presents to its children (`None` for
    /// leaves and unprepared containers).
    pub fn child_specs(&self) -> Option<PrepareSpecs> {
        match &*self.kernel.lock() {
            NodeKernel::Container(kernel) => kernel.child_specs(),
            NodeKernel::Leaf(_) => None,
        }
    }

    /// Re-entrant; any call lands the node in `Prepared` unless a
    /// structural constraint fails, which is recorded and leaves the
    /// node unprepared (it then renders as a passthrough).
    pub fn prepare(&self, specs: &PrepareSpecs, errors: &ErrorMap) {
        *self.specs.lock() = Some(*specs);
        if let Some(required) = self.descriptor.fixed_channels {
            if specs.num_channels != required {
                errors.add(
                    &self.id(),
                    NodeError::ChannelMismatch {
                        expected: required,
                        actual: specs.num_channels,
                    },
                );
                self.state
                    .store(NodeState::Unprepared as u8, Ordering::Relaxed);
                return;
            }
        }
        if specs.voice_index.is_some() && !self.descriptor.supports_polyphony {
            errors.add(&self.id(), NodeError::IllegalPolyphony);
            self.state
                .store(NodeState::Unprepared as u8, Ordering::Relaxed);
            return;
        }
        match &mut *self.kernel.lock() {
            NodeKernel::Leaf(processor) => processor.prepare(specs),
            NodeKernel::Container(kernel) => {
                kernel.prepare(specs, self.is_bypassed(), &self.id(), errors)
            }
        }
        self.state
            .store(NodeState::Prepared as u8, Ordering::Relaxed);
    }

    /// Renders in place. A no-op before the first prepare; a bypassed
    /// leaf is a transparent passthrough.
    pub fn process(&self, data: &mut ProcessData<'_, '_>) {
        if self.state() == NodeState::Unprepared {
            return;
        }
        self.refresh_gate();
        self.state
            .store(NodeState::Processing as u8, Ordering::Relaxed);
        let bypassed = self.is_bypassed();
        match &mut *self.kernel.lock() {
            NodeKernel::Leaf(processor) => {
                if !bypassed {
                    let params = self.params.lock();
                    let ctx = ProcessContext {
                        params: &params,
                        output: &self.mod_output,
                    };
                    processor.process(data, &ctx);
                }
            }
            NodeKernel::Container(kernel) => kernel.process(data, bypassed),
        }
        self.state
            .store(NodeState::Prepared as u8, Ordering::Relaxed);
    }

    /// Clears transient DSP state without touching preparedness.
    pub fn reset(&self) {
        match &mut *self.kernel.lock() {
            NodeKernel::Leaf(processor) => processor.reset(),
            NodeKernel::Container(kernel) => kernel.reset(),
        }
    }

    pub fn handle_event(&self, event: &Event) {
        match &mut *self.kernel.lock() {
            NodeKernel::Leaf(processor) => processor.handle_event(event),
            NodeKernel::Container(kernel) => kernel.handle_event(event),
        }
    }

    /// Adopts values parked by `set_value_async`; called once per block
    /// by the graph before the root processes.
    pub(crate) fn adopt_pending_params(&self) {
        for param in self.params.lock().iter() {
            param.adopt_pending();
        }
    }
}

impl std::fmt::Debug for NodeInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeInstance")
            .field("id", &self.id())
            .field("path", &self.descriptor.path)
            .field("bypassed", &self.is_bypassed())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullProcessor;

    impl Processor for NullProcessor {
        fn prepare(&mut self, _specs: &PrepareSpecs) {}
        fn process(&mut self, _data: &mut ProcessData<'_, '_>, _ctx: &ProcessContext<'_>) {}
        fn reset(&mut self) {}
    }

    fn leaf(id: &str) -> NodeHandle {
        NodeInstance::new(
            id,
            NodeDescriptor::new("test.null", "Null"),
            NodeConfig::default(),
            NodeKernel::Leaf(Box::new(NullProcessor)),
        )
    }

    #[test]
    fn starts_unprepared_and_prepare_is_reentrant() {
        let node = leaf("n");
        let errors = ErrorMap::new();
        assert_eq!(node.state(), NodeState::Unprepared);

        node.prepare(&PrepareSpecs::new(44_100.0, 512, 2), &errors);
        assert_eq!(node.state(), NodeState::Prepared);
        assert_eq!(node.last_specs().unwrap().block_size, 512);

        node.prepare(&PrepareSpecs::new(48_000.0, 256, 2), &errors);
        assert_eq!(node.state(), NodeState::Prepared);
        assert_eq!(node.last_specs().unwrap().block_size, 256);
        assert!(errors.is_ok());
    }

    #[test]
    fn process_before_prepare_is_a_noop() {
        let node = leaf("n");
        let mut storage = vec![vec![0.5f32; 8]];
        let mut refs: Vec<&mut [f32]> = storage.iter_mut().map(|c| c.as_mut_slice()).collect();
        let mut data = ProcessData::new(&mut refs, &[]);
        node.process(&mut data);
        assert_eq!(data.channel(0)[0], 0.5);
    }

    #[test]
    fn fixed_channel_mismatch_is_recorded_not_thrown() {
        let node = NodeInstance::new(
            "stereo",
            NodeDescriptor::new("test.stereo", "Stereo").with_fixed_channels(2),
            NodeConfig::default(),
            NodeKernel::Leaf(Box::new(NullProcessor)),
        );
        let errors = ErrorMap::new();
        node.prepare(&PrepareSpecs::new(44_100.0, 64, 1), &errors);
        assert_eq!(node.state(), NodeState::Unprepared);
        assert_eq!(
            errors.get("stereo"),
            Some(NodeError::ChannelMismatch {
                expected: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn polyphonic_specs_need_descriptor_support() {
        let node = leaf("mono");
        let errors = ErrorMap::new();
        let mut specs = PrepareSpecs::new(44_100.0, 64, 2);
        specs.voice_index = Some(0);
        node.prepare(&specs, &errors);
        assert_eq!(errors.get("mono"), Some(NodeError::IllegalPolyphony));
    }

    #[test]
    fn parent_links_are_weak() {
        let parent = leaf("parent");
        let child = leaf("child");
        child.set_parent(Some(&parent));
        assert!(child.parent().is_some());
        drop(parent);
        assert!(child.parent().is_none());
    }
}
