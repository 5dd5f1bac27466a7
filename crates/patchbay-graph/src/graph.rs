//! The node graph: tree ownership, the mutation API and the render
//! entry point.
//!
//! Exactly two actors touch a graph. The render caller takes a
//! non-blocking read on the connection lock once per block and skips
//! the block entirely when a writer holds it; the control actor takes
//! the blocking write lock for every structural change. Plain
//! parameter value writes bypass the lock (they are atomics).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use smallvec::SmallVec;

use crate::buffer::{ChannelSlices, ProcessData};
use crate::connection::{
    BypassGate, ConnectionSpec, MacroLink, ModChain, ModInput, SourceSelector, BYPASS_PARAM,
};
use crate::containers::{ContainerKernel, ContainerKind, DEFAULT_BYPASS_RAMP_MS};
use crate::error::{ErrorMap, NodeError, ValidationReport};
use crate::event::{BlockSegments, Event};
use crate::node::{NodeDescriptor, NodeHandle, NodeInstance, NodeKernel, PrepareSpecs};
use crate::parameter::{CombineMode, Parameter};
use crate::range::ParamRange;
use crate::registry::{NodeConfig, NodeRegistry};
use crate::schema::{
    self, ConnectionRecord, GraphDocument, NodeRecord, ParamRecord, SCHEMA_VERSION,
};

/// Id of the root container every graph is built around.
pub const ROOT_ID: &str = "root";

const UNDO_DEPTH: usize = 32;

/// What a render call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    Rendered,
    /// The connection lock was contended; the destination buffer was
    /// left exactly as the caller passed it.
    Skipped,
}

#[derive(Debug, Default)]
struct RenderStats {
    rendered: AtomicU64,
    skipped: AtomicU64,
    last_micros: AtomicU64,
    peak_micros: AtomicU64,
}

/// Cross-thread readable render counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderSnapshot {
    pub rendered: u64,
    pub skipped: u64,
    pub last_micros: u64,
    pub peak_micros: u64,
}

struct Topology {
    root: NodeHandle,
    /// Every live node, parented or not. Linear scans are fine here;
    /// topology changes are rare relative to render calls.
    nodes: Vec<NodeHandle>,
    channels: usize,
    polyphonic: bool,
    specs: Option<PrepareSpecs>,
    undo: VecDeque<GraphDocument>,
}

impl Topology {
    fn find(&self, id: &str) -> Option<NodeHandle> {
        self.nodes.iter().find(|n| n.has_id(id)).cloned()
    }

    fn is_in_signal_path(&self, node: &NodeHandle) -> bool {
        let mut cursor = Some(node.clone());
        while let Some(current) = cursor {
            if Arc::ptr_eq(&current, &self.root) {
                return true;
            }
            cursor = current.parent();
        }
        false
    }
}

pub struct NodeGraph {
    registry: NodeRegistry,
    topology: RwLock<Topology>,
    errors: ErrorMap,
    stats: RenderStats,
}

impl NodeGraph {
    pub fn new(registry: NodeRegistry, channels: usize) -> Self {
        let root = NodeInstance::new(
            ROOT_ID,
            NodeDescriptor::new("container.chain", "Chain"),
            NodeConfig::default(),
            NodeKernel::Container(ContainerKernel::new(ContainerKind::serial(
                DEFAULT_BYPASS_RAMP_MS,
            ))),
        );
        Self {
            registry,
            topology: RwLock::new(Topology {
                nodes: vec![root.clone()],
                root,
                channels: channels.max(1),
                polyphonic: false,
                specs: None,
                undo: VecDeque::new(),
            }),
            errors: ErrorMap::new(),
            stats: RenderStats::default(),
        }
    }

    pub fn with_builtin_nodes(channels: usize) -> Self {
        Self::new(NodeRegistry::with_builtin_nodes(), channels)
    }

    #[inline]
    pub fn errors(&self) -> &ErrorMap {
        &self.errors
    }

    pub fn root(&self) -> NodeHandle {
        self.topology.read().root.clone()
    }

    pub fn num_channels(&self) -> usize {
        self.topology.read().channels
    }

    /// Control-path snapshot of every live node.
    pub fn nodes(&self) -> Vec<NodeHandle> {
        self.topology.read().nodes.clone()
    }

    /// Resolves a node by id. O(n) over the active node set.
    pub fn get(&self, id: &str) -> Option<NodeHandle> {
        self.topology.read().find(id)
    }

    pub fn is_in_signal_path(&self, id: &str) -> bool {
        let topo = self.topology.read();
        topo.find(id).map_or(false, |n| topo.is_in_signal_path(&n))
    }

    /// Holds the connection lock's write side, batching several edits
    /// into one atomic topology change. Render calls skip while the
    /// guard lives.
    pub fn edit_scope(&self) -> EditGuard<'_> {
        EditGuard {
            _guard: self.topology.write(),
        }
    }

    /// Get-or-create: an existing id returns the existing node, a new
    /// id goes through the factory registry (`None` when no factory
    /// matches the path). The created node starts outside the signal
    /// path.
    pub fn create(&self, path: &str, id: &str) -> Option<NodeHandle> {
        let mut topo = self.topology.write();
        if let Some(existing) = topo.find(id) {
            return Some(existing);
        }
        let snapshot = self.document_locked(&topo);
        let node = self.create_locked(&mut topo, path, id, &NodeConfig::default())?;
        self.commit_undo(&mut topo, snapshot);
        Some(node)
    }

    /// Creates a node and appends it to the named container. A missing
    /// or non-container parent records `NoMatchingParent` against the
    /// created node, which stays unparented. An id resolving to the
    /// root returns the root untouched; the root never gains a parent.
    pub fn create_and_add(&self, path: &str, id: &str, parent_id: &str) -> Option<NodeHandle> {
        let mut topo = self.topology.write();
        let snapshot = self.document_locked(&topo);
        let node = match topo.find(id) {
            Some(existing) => existing,
            None => self.create_locked(&mut topo, path, id, &NodeConfig::default())?,
        };
        if Arc::ptr_eq(&node, &topo.root) {
            return Some(node);
        }
        match topo.find(parent_id) {
            Some(parent) if parent.is_container() && !is_descendant(&node, &parent) => {
                self.detach_locked(&node);
                self.attach_locked(&topo, &parent, &node, None);
            }
            _ => self.errors.add(&node.id(), NodeError::NoMatchingParent),
        }
        self.commit_undo(&mut topo, snapshot);
        Some(node)
    }

    /// Reparents `id` into `parent_id` (appending, or at `index`).
    /// Records `NoMatchingParent` when the parent is missing, a leaf,
    /// or inside the moved node's own subtree.
    pub fn add_to(&self, id: &str, parent_id: &str, index: Option<usize>) -> bool {
        let mut topo = self.topology.write();
        let Some(node) = topo.find(id) else {
            return false;
        };
        if Arc::ptr_eq(&node, &topo.root) {
            return false;
        }
        let parent = topo.find(parent_id);
        match parent {
            Some(parent) if parent.is_container() && !is_descendant(&node, &parent) => {
                let snapshot = self.document_locked(&topo);
                self.detach_locked(&node);
                self.attach_locked(&topo, &parent, &node, index);
                self.commit_undo(&mut topo, snapshot);
                true
            }
            _ => {
                self.errors.add(id, NodeError::NoMatchingParent);
                false
            }
        }
    }

    /// Detaches `id` from its container; the node stays alive outside
    /// the signal path.
    pub fn remove_from_parent(&self, id: &str) -> bool {
        let mut topo = self.topology.write();
        let Some(node) = topo.find(id) else {
            return false;
        };
        if node.parent().is_none() {
            return false;
        }
        let snapshot = self.document_locked(&topo);
        self.detach_locked(&node);
        if let Some(specs) = topo.specs {
            topo.root.prepare(&specs, &self.errors);
        }
        self.commit_undo(&mut topo, snapshot);
        true
    }

    /// Removes a node (and its subtree) only when it is not reachable
    /// from the root, neutralising every connection that referenced it.
    pub fn delete_if_unused(&self, id: &str) -> bool {
        let mut topo = self.topology.write();
        let Some(node) = topo.find(id) else {
            return false;
        };
        if topo.is_in_signal_path(&node) {
            return false;
        }
        let snapshot = self.document_locked(&topo);
        let mut doomed = Vec::new();
        collect_subtree(&node, &mut doomed);
        topo.nodes
            .retain(|n| !doomed.iter().any(|d| Arc::ptr_eq(n, d)));
        for dead in &doomed {
            let dead_id = dead.id();
            purge_references(&topo.nodes, dead, &dead_id);
            self.errors.remove(Some(&dead_id), None);
        }
        tracing::info!(id, removed = doomed.len(), "node deleted");
        self.commit_undo(&mut topo, snapshot);
        true
    }

    /// Renames a node, rewriting every persisted connection whose
    /// target id matches in one traversal under the write lock. The
    /// new id is uniquified first; returns the id actually applied.
    pub fn rename(&self, old_id: &str, new_id: &str) -> Option<String> {
        let mut topo = self.topology.write();
        let node = topo.find(old_id)?;
        if old_id == new_id {
            return Some(new_id.to_owned());
        }
        let snapshot = self.document_locked(&topo);
        let final_id = schema::non_existent_id(new_id, |candidate| {
            candidate != old_id && topo.find(candidate).is_some()
        });
        node.set_id(&final_id);
        for n in &topo.nodes {
            for spec in n.mod_targets().iter_mut() {
                spec.rewrite_target(old_id, &final_id);
            }
            for param in n.parameters().iter() {
                for spec in param.connection_specs().lock().iter_mut() {
                    spec.rewrite_target(old_id, &final_id);
                }
            }
        }
        self.errors.rename_node(old_id, &final_id);
        tracing::info!(old = old_id, new = %final_id, "node renamed");
        self.commit_undo(&mut topo, snapshot);
        Some(final_id)
    }

    /// Connects a source (signal output or macro parameter) to a
    /// target parameter, optionally through a range remap.
    pub fn connect(
        &self,
        source_id: &str,
        selector: SourceSelector,
        target_id: &str,
        param_id: &str,
        range: Option<ParamRange>,
    ) -> bool {
        let mut topo = self.topology.write();
        let (Some(source), Some(target)) = (topo.find(source_id), topo.find(target_id)) else {
            return false;
        };
        let Some(param) = target.parameter_by_id(param_id) else {
            return false;
        };
        let macro_param = match &selector {
            SourceSelector::Parameter(id) => match source.parameter_by_id(id) {
                Some(p) => Some(p),
                None => return false,
            },
            SourceSelector::Signal => None,
        };
        let snapshot = self.document_locked(&topo);

        // Unscaled (product) targets refuse foreign remaps; the target
        // range is copied to the source instead.
        let mut range = range;
        if param.combine() == CombineMode::Product {
            if let Some(remap) = &range {
                if remap != param.range() {
                    self.errors
                        .add(target_id, NodeError::UnscaledModRangeMismatch);
                    range = None;
                }
            }
        }

        let spec = ConnectionSpec {
            source: selector.clone(),
            target_node_id: target_id.to_owned(),
            target_param_id: param_id.to_owned(),
            range,
        };
        match macro_param {
            None => {
                source.mod_targets().push(spec);
                rebuild_chain(&topo.nodes, &target, &param);
            }
            Some(macro_param) => {
                macro_param.connection_specs().lock().push(spec);
                macro_param.links().lock().push(MacroLink::Param {
                    target: Arc::downgrade(&param),
                    range,
                });
            }
        }
        tracing::debug!(source = source_id, target = target_id, param = param_id, "connected");
        self.commit_undo(&mut topo, snapshot);
        true
    }

    /// Installs a bypass gate on `target`, driven by `source`'s signal
    /// output. Refused (and recorded) for adapters whose bypass
    /// re-prepares children.
    pub fn connect_to_bypass(&self, source_id: &str, target_id: &str, range: ParamRange) -> bool {
        let mut topo = self.topology.write();
        let (Some(source), Some(target)) = (topo.find(source_id), topo.find(target_id)) else {
            return false;
        };
        if target.bypass_reprepares_children() {
            self.errors
                .add(target_id, NodeError::IllegalBypassConnection);
            return false;
        }
        let snapshot = self.document_locked(&topo);
        source.mod_targets().push(ConnectionSpec {
            source: SourceSelector::Signal,
            target_node_id: target_id.to_owned(),
            target_param_id: BYPASS_PARAM.to_owned(),
            range: Some(range),
        });
        target.set_gate(Some(BypassGate::new(&source, range)));
        tracing::debug!(source = source_id, target = target_id, "bypass gate connected");
        self.commit_undo(&mut topo, snapshot);
        true
    }

    /// Removes every connection from `source` into `(target, param)`.
    pub fn disconnect(&self, source_id: &str, target_id: &str, param_id: &str) -> bool {
        let mut topo = self.topology.write();
        let (Some(source), Some(target)) = (topo.find(source_id), topo.find(target_id)) else {
            return false;
        };
        let snapshot = self.document_locked(&topo);
        let matches =
            |spec: &ConnectionSpec| spec.target_node_id == target_id && spec.target_param_id == param_id;
        let mut removed = false;
        {
            let mut specs = source.mod_targets();
            let before = specs.len();
            specs.retain(|s| !matches(s));
            removed |= specs.len() != before;
        }
        for macro_param in source.parameters().iter() {
            let mut specs = macro_param.connection_specs().lock();
            let before = specs.len();
            specs.retain(|s| !matches(s));
            if specs.len() != before {
                removed = true;
                drop(specs);
                if param_id == BYPASS_PARAM {
                    macro_param.links().lock().retain(|l| !l.targets_node(&target));
                } else if let Some(param) = target.parameter_by_id(param_id) {
                    macro_param.links().lock().retain(|l| !l.targets_param(&param));
                }
            }
        }
        if !removed {
            return false;
        }
        if param_id == BYPASS_PARAM {
            if target.gate_sourced_from(&source) {
                target.set_gate(None);
            }
        } else if let Some(param) = target.parameter_by_id(param_id) {
            rebuild_chain(&topo.nodes, &target, &param);
        }
        tracing::debug!(source = source_id, target = target_id, param = param_id, "disconnected");
        self.commit_undo(&mut topo, snapshot);
        true
    }

    /// Adds a macro parameter to a container node. A structural change,
    /// so it takes the write lock like every other mutation.
    pub fn add_macro_parameter(
        &self,
        node_id: &str,
        param_id: &str,
        range: ParamRange,
    ) -> Option<Arc<Parameter>> {
        let topo = self.topology.write();
        let node = topo.find(node_id)?;
        match node.add_macro_parameter(param_id, range) {
            Ok(param) => Some(param),
            Err(error) => {
                self.errors.add(node_id, error);
                None
            }
        }
    }

    /// Forwards to the root container's macro parameters.
    pub fn set_parameter(&self, id: &str, value: f64) -> bool {
        let topo = self.topology.read();
        match topo.root.parameter_by_id(id) {
            Some(param) => {
                param.set_value_sync(value);
                true
            }
            None => false,
        }
    }

    pub fn set_parameter_by_index(&self, index: usize, value: f64) -> bool {
        let topo = self.topology.read();
        match topo.root.parameter(index) {
            Some(param) => {
                param.set_value_sync(value);
                true
            }
            None => false,
        }
    }

    pub fn get_parameter(&self, id: &str) -> Option<f64> {
        self.topology
            .read()
            .root
            .parameter_by_id(id)
            .map(|p| p.value())
    }

    /// Control-side bypass; adapters re-prepare their children here,
    /// which is why this takes the write lock.
    pub fn set_bypassed(&self, id: &str, bypassed: bool) -> bool {
        let topo = self.topology.write();
        match topo.find(id) {
            Some(node) => {
                node.set_bypassed(bypassed, &self.errors);
                true
            }
            None => false,
        }
    }

    /// Re-partitions a MultiChannel container. `trigger_child` is the
    /// child whose layout change caused the call; it keeps its current
    /// allocation.
    pub fn repartition(&self, container_id: &str, trigger_child: Option<&str>) -> bool {
        let topo = self.topology.write();
        let Some(node) = topo.find(container_id) else {
            return false;
        };
        let mut kernel = node.kernel();
        match &mut *kernel {
            NodeKernel::Container(kernel) => {
                let trigger = trigger_child.and_then(|id| {
                    kernel.children().iter().position(|c| c.has_id(id))
                });
                kernel.repartition(trigger, container_id, &self.errors);
                true
            }
            NodeKernel::Leaf(_) => false,
        }
    }

    /// Empties the root's children and/or drops every node outside the
    /// signal path.
    pub fn clear(&self, remove_from_signal_chain: bool, remove_unused: bool) {
        let mut topo = self.topology.write();
        let snapshot = self.document_locked(&topo);
        if remove_from_signal_chain {
            let children = match &mut *topo.root.kernel() {
                NodeKernel::Container(kernel) => kernel.take_children(),
                NodeKernel::Leaf(_) => Vec::new(),
            };
            for child in &children {
                child.set_parent(None);
            }
        }
        if remove_unused {
            let root = topo.root.clone();
            let (keep, drop): (Vec<_>, Vec<_>) = topo
                .nodes
                .drain(..)
                .partition(|n| Arc::ptr_eq(n, &root) || topo_reaches(&root, n));
            topo.nodes = keep;
            for dead in &drop {
                purge_references(&topo.nodes, dead, &dead.id());
                self.errors.remove(Some(&dead.id()), None);
            }
        }
        tracing::info!(remove_from_signal_chain, remove_unused, "graph cleared");
        self.commit_undo(&mut topo, snapshot);
    }

    /// Restores the snapshot taken before the previous mutation.
    pub fn undo(&self) -> bool {
        let mut topo = self.topology.write();
        let Some(doc) = topo.undo.pop_back() else {
            return false;
        };
        match self.rebuild_locked(&mut topo, &doc) {
            Ok(()) => {
                tracing::info!("undo applied");
                true
            }
            Err(error) => {
                tracing::warn!(%error, "undo failed to rebuild");
                false
            }
        }
    }

    /// Serialises the signal-path tree.
    pub fn save(&self) -> GraphDocument {
        self.document_locked(&self.topology.read())
    }

    pub fn save_to_string(&self) -> anyhow::Result<String> {
        schema::save_document(&self.save())
    }

    /// Replaces the graph with `doc`, running the id-deduplication and
    /// migration passes first. Deprecation notes land in the error map.
    pub fn load(&self, mut doc: GraphDocument) -> anyhow::Result<()> {
        let notes = schema::prepare_document(&mut doc);
        let mut topo = self.topology.write();
        let snapshot = self.document_locked(&topo);
        self.rebuild_locked(&mut topo, &doc)?;
        self.commit_undo(&mut topo, snapshot);
        for (node_id, error) in notes {
            self.errors.add(&node_id, error);
        }
        tracing::info!(nodes = topo.nodes.len(), "document loaded");
        Ok(())
    }

    pub fn load_from_str(&self, json: &str) -> anyhow::Result<()> {
        // Parse only; `load` runs the dedup/migration passes, and they
        // must run once so the deprecation notes are not consumed here.
        self.load(schema::parse_document(json)?)
    }

    /// Refuses while any node has a recorded error.
    pub fn validate(&self) -> Result<(), ValidationReport> {
        let failures = self.errors.snapshot();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ValidationReport { failures })
        }
    }

    /// Prepares the whole tree. Invalid input is recorded against the
    /// root and leaves the tree unprepared.
    pub fn prepare_to_play(&self, sample_rate: f64, block_size: usize) {
        let mut topo = self.topology.write();
        if sample_rate <= 0.0 {
            self.errors.add(
                ROOT_ID,
                NodeError::SampleRateMismatch {
                    expected: topo.specs.map_or(44_100.0, |s| s.sample_rate),
                    actual: sample_rate,
                },
            );
            return;
        }
        if block_size == 0 {
            self.errors.add(
                ROOT_ID,
                NodeError::BlockSizeMismatch {
                    expected: topo.specs.map_or(64, |s| s.block_size),
                    actual: block_size,
                },
            );
            return;
        }
        if topo.polyphonic {
            let mut illegal = false;
            for node in &topo.nodes {
                if !node.descriptor().supports_polyphony {
                    self.errors.add(&node.id(), NodeError::IllegalPolyphony);
                    illegal = true;
                }
            }
            if illegal {
                return;
            }
        }
        let specs = PrepareSpecs::new(sample_rate, block_size, topo.channels);
        topo.specs = Some(specs);
        topo.root.prepare(&specs, &self.errors);
        for node in &topo.nodes {
            if node.parent().is_none() && !Arc::ptr_eq(node, &topo.root) {
                node.prepare(&specs, &self.errors);
            }
        }
        tracing::info!(sample_rate, block_size, "graph prepared");
    }

    /// Renders one block in place. Takes the non-blocking read lock
    /// once; on contention the block is skipped entirely and the
    /// buffer left untouched. Splits the block at event offsets so the
    /// tree observes each event before the samples that follow it.
    pub fn process(&self, channels: &mut [&mut [f32]], events: &[Event]) -> RenderOutcome {
        let Some(topo) = self.topology.try_read() else {
            self.stats.skipped.fetch_add(1, Ordering::Relaxed);
            return RenderOutcome::Skipped;
        };
        let started = Instant::now();
        for node in &topo.nodes {
            node.adopt_pending_params();
        }
        let frames = channels.first().map_or(0, |c| c.len()) as u32;
        let mut segments = BlockSegments::new(events, frames);
        while let Some((due, range)) = segments.next_segment() {
            for event in due {
                topo.root.handle_event(event);
            }
            if range.is_empty() {
                continue;
            }
            let mut slices: ChannelSlices<'_> = SmallVec::new();
            for channel in channels.iter_mut() {
                slices.push(&mut channel[range.start as usize..range.end as usize]);
            }
            let mut data = ProcessData::new(&mut slices, &[]);
            topo.root.process(&mut data);
        }
        let micros = started.elapsed().as_micros() as u64;
        self.stats.rendered.fetch_add(1, Ordering::Relaxed);
        self.stats.last_micros.store(micros, Ordering::Relaxed);
        self.stats.peak_micros.fetch_max(micros, Ordering::Relaxed);
        RenderOutcome::Rendered
    }

    /// Clears transient DSP state across the tree.
    pub fn reset(&self) {
        let topo = self.topology.write();
        for node in &topo.nodes {
            if node.parent().is_none() {
                node.reset();
            }
        }
    }

    pub fn render_stats(&self) -> RenderSnapshot {
        RenderSnapshot {
            rendered: self.stats.rendered.load(Ordering::Relaxed),
            skipped: self.stats.skipped.load(Ordering::Relaxed),
            last_micros: self.stats.last_micros.load(Ordering::Relaxed),
            peak_micros: self.stats.peak_micros.load(Ordering::Relaxed),
        }
    }

    fn create_locked(
        &self,
        topo: &mut Topology,
        path: &str,
        requested_id: &str,
        config: &NodeConfig,
    ) -> Option<NodeHandle> {
        let blueprint = self.registry.instantiate(path, config)?;
        let id = schema::non_existent_id(requested_id, |candidate| topo.find(candidate).is_some());
        let node = NodeInstance::new(&id, blueprint.descriptor, blueprint.config, blueprint.kernel);
        topo.nodes.push(node.clone());
        tracing::info!(path, id = %id, "node created");
        Some(node)
    }

    fn attach_locked(
        &self,
        topo: &Topology,
        parent: &NodeHandle,
        node: &NodeHandle,
        index: Option<usize>,
    ) {
        match &mut *parent.kernel() {
            NodeKernel::Container(kernel) => match index {
                Some(index) => kernel.insert_child(index, node.clone()),
                None => kernel.add_child(node.clone()),
            },
            NodeKernel::Leaf(_) => return,
        }
        node.set_parent(Some(parent));
        if topo.specs.is_some() {
            // Re-prepare from the closest prepared root so channel
            // partitions and adapter specs cascade.
            if topo.is_in_signal_path(parent) {
                if let Some(specs) = topo.specs {
                    topo.root.prepare(&specs, &self.errors);
                }
            } else if let Some(specs) = parent.last_specs() {
                parent.prepare(&specs, &self.errors);
            }
        }
    }

    fn detach_locked(&self, node: &NodeHandle) {
        if let Some(parent) = node.parent() {
            if let NodeKernel::Container(kernel) = &mut *parent.kernel() {
                kernel.remove_child(node);
            }
        }
        node.set_parent(None);
    }

    fn commit_undo(&self, topo: &mut Topology, snapshot: GraphDocument) {
        if topo.undo.len() == UNDO_DEPTH {
            topo.undo.pop_front();
        }
        topo.undo.push_back(snapshot);
    }

    fn document_locked(&self, topo: &Topology) -> GraphDocument {
        GraphDocument {
            version: SCHEMA_VERSION,
            polyphonic: topo.polyphonic,
            channels: topo.channels,
            root: record_from(&topo.root),
        }
    }

    fn rebuild_locked(&self, topo: &mut Topology, doc: &GraphDocument) -> anyhow::Result<()> {
        let (root, nodes) = self.build_record(&doc.root)?;
        anyhow::ensure!(root.is_container(), "graph root must be a container");
        topo.channels = doc.channels.max(1);
        topo.polyphonic = doc.polyphonic;
        topo.root = root;
        topo.nodes = nodes;
        self.wire_record(topo, &doc.root);
        for node in &topo.nodes {
            for param in node.parameters().iter() {
                rebuild_chain(&topo.nodes, node, param);
            }
        }
        if doc.polyphonic {
            for node in &topo.nodes {
                if !node.descriptor().supports_polyphony {
                    self.errors.add(&node.id(), NodeError::IllegalPolyphony);
                    node.store_bypassed(true);
                }
            }
        }
        if let Some(specs) = topo.specs {
            topo.root.prepare(&specs, &self.errors);
        }
        Ok(())
    }

    fn build_record(&self, record: &NodeRecord) -> anyhow::Result<(NodeHandle, Vec<NodeHandle>)> {
        let blueprint = self
            .registry
            .instantiate(&record.path, &record.config)
            .ok_or_else(|| anyhow::anyhow!("no factory for '{}'", record.path))?;
        let node = NodeInstance::new(
            &record.id,
            blueprint.descriptor,
            blueprint.config,
            blueprint.kernel,
        );
        node.store_bypassed(record.bypassed);
        {
            let mut meta = node.meta();
            meta.colour = record.colour.clone();
            meta.comment = record.comment.clone();
        }
        for param_record in &record.parameters {
            let param = match node.parameter_by_id(&param_record.id) {
                Some(param) => param,
                None => match node.add_macro_parameter(&param_record.id, param_record.range) {
                    Ok(param) => param,
                    Err(error) => {
                        self.errors.add(&record.id, error);
                        continue;
                    }
                },
            };
            if let Some(combine) = param_record.combine {
                param.set_combine(combine);
            }
            param.set_value_sync(param_record.value);
        }
        let mut flat = vec![node.clone()];
        for child_record in &record.children {
            let (child, subtree) = self.build_record(child_record)?;
            match &mut *node.kernel() {
                NodeKernel::Container(kernel) => {
                    kernel.add_child(child.clone());
                    child.set_parent(Some(&node));
                }
                NodeKernel::Leaf(_) => {
                    anyhow::bail!("node '{}' cannot own children", record.id)
                }
            }
            flat.extend(subtree);
        }
        Ok((node, flat))
    }

    fn wire_record(&self, topo: &Topology, record: &NodeRecord) {
        let Some(node) = topo.find(&record.id) else {
            return;
        };
        for connection in &record.mod_targets {
            let Some(target) = topo.find(&connection.target_node_id) else {
                continue;
            };
            if connection.target_param_id == BYPASS_PARAM {
                if target.bypass_reprepares_children() {
                    self.errors
                        .add(&connection.target_node_id, NodeError::IllegalBypassConnection);
                    continue;
                }
                let range = connection.range.unwrap_or_default();
                node.mod_targets().push(record_to_spec(SourceSelector::Signal, connection));
                target.set_gate(Some(BypassGate::new(&node, range)));
            } else if target.parameter_by_id(&connection.target_param_id).is_some() {
                node.mod_targets().push(record_to_spec(SourceSelector::Signal, connection));
            }
        }
        for param_record in &record.parameters {
            let Some(macro_param) = node.parameter_by_id(&param_record.id) else {
                continue;
            };
            for connection in &param_record.connections {
                let Some(target) = topo.find(&connection.target_node_id) else {
                    continue;
                };
                let selector = SourceSelector::Parameter(param_record.id.clone());
                if connection.target_param_id == BYPASS_PARAM {
                    macro_param
                        .connection_specs()
                        .lock()
                        .push(record_to_spec(selector, connection));
                    macro_param.links().lock().push(MacroLink::Bypass {
                        node: Arc::downgrade(&target),
                        range: connection.range.unwrap_or_default(),
                    });
                } else if let Some(target_param) =
                    target.parameter_by_id(&connection.target_param_id)
                {
                    macro_param
                        .connection_specs()
                        .lock()
                        .push(record_to_spec(selector, connection));
                    macro_param.links().lock().push(MacroLink::Param {
                        target: Arc::downgrade(&target_param),
                        range: connection.range,
                    });
                }
            }
        }
        for child in &record.children {
            self.wire_record(topo, child);
        }
    }
}

/// Write-side hold on the connection lock; see [`NodeGraph::edit_scope`].
pub struct EditGuard<'a> {
    _guard: parking_lot::RwLockWriteGuard<'a, Topology>,
}

/// True when `candidate` sits inside `node`'s subtree (or is the node
/// itself); guards against reparent cycles.
fn is_descendant(node: &NodeHandle, candidate: &NodeHandle) -> bool {
    let mut cursor = Some(candidate.clone());
    while let Some(current) = cursor {
        if Arc::ptr_eq(&current, node) {
            return true;
        }
        cursor = current.parent();
    }
    false
}

fn topo_reaches(root: &NodeHandle, node: &NodeHandle) -> bool {
    let mut cursor = Some(node.clone());
    while let Some(current) = cursor {
        if Arc::ptr_eq(&current, root) {
            return true;
        }
        cursor = current.parent();
    }
    false
}

fn collect_subtree(node: &NodeHandle, out: &mut Vec<NodeHandle>) {
    out.push(node.clone());
    for child in node.children() {
        collect_subtree(&child, out);
    }
}

/// Drops every runtime edge and persisted spec referencing `target`.
fn purge_references(nodes: &[NodeHandle], target: &NodeHandle, target_id: &str) {
    for node in nodes {
        if Arc::ptr_eq(node, target) {
            continue;
        }
        node.mod_targets().retain(|spec| !spec.references(target_id));
        for param in node.parameters().iter() {
            param
                .connection_specs()
                .lock()
                .retain(|spec| !spec.references(target_id));
            param.links().lock().retain(|link| !link.targets_node(target));
            param.drop_sources_from(target);
        }
        if node.gate_sourced_from(target) {
            node.set_gate(None);
        }
    }
}

/// Rebuilds a target parameter's fan-in chain from every persisted
/// signal connection in the graph that points at it.
fn rebuild_chain(nodes: &[NodeHandle], target: &NodeHandle, param: &Arc<Parameter>) {
    let target_id = target.id();
    let mut inputs = Vec::new();
    for node in nodes {
        for spec in node.mod_targets().iter() {
            if spec.target_node_id == target_id
                && spec.target_param_id == param.id()
                && !spec.is_bypass_target()
            {
                inputs.push(ModInput::new(node, spec.range));
            }
        }
    }
    param.install_chain(ModChain::build(inputs, param.combine(), param.range()).map(Arc::new));
}

fn record_from(node: &NodeHandle) -> NodeRecord {
    let meta = node.meta().clone();
    NodeRecord {
        id: node.id(),
        path: node.descriptor().path.clone(),
        bypassed: node.is_bypassed(),
        colour: meta.colour,
        comment: meta.comment,
        config: node.config().clone(),
        parameters: node
            .parameters()
            .iter()
            .map(|param| ParamRecord {
                id: param.id().to_owned(),
                value: param.value(),
                range: *param.range(),
                combine: (param.combine() == CombineMode::Product)
                    .then_some(CombineMode::Product),
                connections: param
                    .connection_specs()
                    .lock()
                    .iter()
                    .map(spec_to_record)
                    .collect(),
            })
            .collect(),
        mod_targets: node.mod_targets().iter().map(spec_to_record).collect(),
        children: node.children().iter().map(record_from).collect(),
    }
}

fn spec_to_record(spec: &ConnectionSpec) -> ConnectionRecord {
    ConnectionRecord {
        target_node_id: spec.target_node_id.clone(),
        target_param_id: spec.target_param_id.clone(),
        range: spec.range,
        op_type: None,
        converter: None,
    }
}

fn record_to_spec(source: SourceSelector, record: &ConnectionRecord) -> ConnectionSpec {
    ConnectionSpec {
        source,
        target_node_id: record.target_node_id.clone(),
        target_param_id: record.target_param_id.clone(),
        range: record.range,
    }
}
