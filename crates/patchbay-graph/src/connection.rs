//! Connections: persisted descriptors and their runtime shapes.
//!
//! A connection binds a source (a node's modulation output, or one of
//! its macro parameters) to a target parameter, optionally through a
//! range remap. At runtime the same record becomes one of three
//! things: a [`ModInput`] inside a target's fan-in chain (pulled every
//! render), a [`MacroLink`] pushed when the macro value changes, or a
//! [`BypassGate`] driving a node's bypass state.

use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};

use crate::node::{NodeHandle, NodeInstance};
use crate::parameter::{CombineMode, Parameter};
use crate::range::ParamRange;

/// Reserved target parameter id addressing a node's bypass state.
pub const BYPASS_PARAM: &str = "Bypassed";

/// Which output of the source node a connection taps.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SourceSelector {
    /// The node's modulation output (its processed signal).
    #[default]
    Signal,
    /// One of the node's (macro) parameters, by id.
    Parameter(String),
}

/// Persisted connection record, stored on the source node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSpec {
    #[serde(default)]
    pub source: SourceSelector,
    pub target_node_id: String,
    pub target_param_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<ParamRange>,
}

impl ConnectionSpec {
    pub fn to_parameter(
        source: SourceSelector,
        target_node_id: impl Into<String>,
        target_param_id: impl Into<String>,
    ) -> Self {
        Self {
            source,
            target_node_id: target_node_id.into(),
            target_param_id: target_param_id.into(),
            range: None,
        }
    }

    pub fn with_range(mut self, range: ParamRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn is_bypass_target(&self) -> bool {
        self.target_param_id == BYPASS_PARAM
    }

    pub fn references(&self, node_id: &str) -> bool {
        self.target_node_id == node_id
    }

    pub fn rewrite_target(&mut self, old_id: &str, new_id: &str) -> bool {
        if self.target_node_id == old_id {
            self.target_node_id = new_id.to_owned();
            return true;
        }
        false
    }
}

/// One resolved fan-in entry.
#[derive(Debug, Clone)]
pub struct ModInput {
    pub(crate) source: Weak<NodeInstance>,
    /// `None` means "use the target's own range".
    pub(crate) range: Option<ParamRange>,
}

impl ModInput {
    pub fn new(source: &NodeHandle, range: Option<ParamRange>) -> Self {
        Self {
            source: Arc::downgrade(source),
            range,
        }
    }

    /// The source's published value in normalised space, `None` when
    /// the source node is gone.
    #[inline]
    fn read_norm(&self) -> Option<f64> {
        Some(self.source.upgrade()?.mod_output().last())
    }

    #[inline]
    fn read(&self, target_range: &ParamRange) -> Option<f64> {
        let norm = self.read_norm()?;
        Some(match &self.range {
            Some(range) => range.from_0to1(norm),
            None => target_range.from_0to1(norm),
        })
    }

    pub(crate) fn source_node(&self) -> Option<NodeHandle> {
        self.source.upgrade()
    }

    pub(crate) fn is_from(&self, node: &NodeHandle) -> bool {
        self.source
            .upgrade()
            .map_or(false, |source| Arc::ptr_eq(&source, node))
    }
}

/// Fan-in combiner over a parameter's incoming connections.
///
/// The single-connection identity case collapses to a direct read so
/// the common one-source path skips the combiner entirely.
#[derive(Debug, Clone)]
pub enum ModChain {
    Direct(ModInput),
    Fan {
        inputs: Vec<ModInput>,
        mode: CombineMode,
    },
}

impl ModChain {
    /// Builds the cheapest chain shape for the given inputs.
    pub fn build(mut inputs: Vec<ModInput>, mode: CombineMode, target_range: &ParamRange) -> Option<Self> {
        match inputs.len() {
            0 => None,
            1 if mode == CombineMode::Sum => {
                let mut input = inputs.remove(0);
                let identity = input
                    .range
                    .as_ref()
                    .map_or(true, |range| range == target_range || range.is_identity());
                if identity {
                    input.range = None;
                    Some(ModChain::Direct(input))
                } else {
                    Some(ModChain::Fan {
                        inputs: vec![input],
                        mode,
                    })
                }
            }
            _ => Some(ModChain::Fan { inputs, mode }),
        }
    }

    pub fn evaluate(&self, target_range: &ParamRange) -> f64 {
        match self {
            ModChain::Direct(input) => {
                target_range.from_0to1(input.read_norm().unwrap_or(0.0))
            }
            ModChain::Fan { inputs, mode } => match mode {
                CombineMode::Sum => inputs
                    .iter()
                    .filter_map(|input| input.read(target_range))
                    .sum(),
                // Unscaled targets multiply raw normalised values; a
                // vanished source contributes the neutral element.
                CombineMode::Product => inputs
                    .iter()
                    .filter_map(|input| input.read_norm())
                    .product(),
            },
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ModChain::Direct(_) => 1,
            ModChain::Fan { inputs, .. } => inputs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn first_source(&self) -> Option<NodeHandle> {
        match self {
            ModChain::Direct(input) => input.source_node(),
            ModChain::Fan { inputs, .. } => inputs.first()?.source_node(),
        }
    }

    pub(crate) fn retain_sources(&self, keep: impl Fn(&ModInput) -> bool) -> Vec<ModInput> {
        let inputs = match self {
            ModChain::Direct(input) => std::slice::from_ref(input),
            ModChain::Fan { inputs, .. } => inputs.as_slice(),
        };
        inputs.iter().filter(|i| keep(i)).cloned().collect()
    }

    pub(crate) fn mode(&self) -> CombineMode {
        match self {
            ModChain::Direct(_) => CombineMode::Sum,
            ModChain::Fan { mode, .. } => *mode,
        }
    }
}

/// Control-rate push target of a macro parameter.
#[derive(Debug, Clone)]
pub enum MacroLink {
    Param {
        target: Weak<Parameter>,
        range: Option<ParamRange>,
    },
    Bypass {
        node: Weak<NodeInstance>,
        range: ParamRange,
    },
}

impl MacroLink {
    pub(crate) fn apply(&self, normalised: f64) {
        match self {
            MacroLink::Param { target, range } => {
                if let Some(param) = target.upgrade() {
                    let value = match range {
                        Some(range) => range.from_0to1(normalised),
                        None => param.range().from_0to1(normalised),
                    };
                    param.set_value_sync(value);
                }
            }
            MacroLink::Bypass { node, range } => {
                if let Some(node) = node.upgrade() {
                    let active = range.contains(normalised) != range.inverted;
                    node.store_bypassed(!active);
                }
            }
        }
    }

    pub(crate) fn targets_param(&self, param: &Arc<Parameter>) -> bool {
        match self {
            MacroLink::Param { target, .. } => target
                .upgrade()
                .map_or(false, |t| Arc::ptr_eq(&t, param)),
            MacroLink::Bypass { .. } => false,
        }
    }

    pub(crate) fn targets_node(&self, node: &NodeHandle) -> bool {
        match self {
            MacroLink::Param { target, .. } => target.upgrade().map_or(true, |t| {
                node.parameters().iter().any(|p| Arc::ptr_eq(p, &t))
            }),
            MacroLink::Bypass { node: gated, .. } => gated
                .upgrade()
                .map_or(true, |gated| Arc::ptr_eq(&gated, node)),
        }
    }
}

/// Render-time bypass drive from a modulation source.
#[derive(Debug, Clone)]
pub struct BypassGate {
    pub(crate) source: Weak<NodeInstance>,
    pub(crate) range: ParamRange,
}

impl BypassGate {
    pub fn new(source: &NodeHandle, range: ParamRange) -> Self {
        Self {
            source: Arc::downgrade(source),
            range,
        }
    }

    /// `Some(active)` from the source's published value; `None` when
    /// the source is gone (the gate then leaves the flag alone).
    pub(crate) fn is_active(&self) -> Option<bool> {
        let value = self.source.upgrade()?.mod_output().last();
        Some(self.range.contains(value) != self.range.inverted)
    }

    pub(crate) fn is_from(&self, node: &NodeHandle) -> bool {
        self.source
            .upgrade()
            .map_or(false, |source| Arc::ptr_eq(&source, node))
    }
}

/// Follows pass-through cable nodes to the modulation source actually
/// driving them. Stops at the first non-cable node or at a cable with
/// nothing connected.
pub fn find_real_source(node: &NodeHandle) -> NodeHandle {
    let mut current = node.clone();
    loop {
        if !current.descriptor().pass_through {
            return current;
        }
        let next = current
            .parameters()
            .first()
            .and_then(|param| param.first_mod_source());
        match next {
            Some(source) if !Arc::ptr_eq(&source, &current) => current = source,
            _ => return current,
        }
    }
}

/// Nearest container that contains both nodes (either node itself
/// counts when it is a container on the other's parent chain).
pub fn find_common_ancestor(a: &NodeHandle, b: &NodeHandle) -> Option<NodeHandle> {
    let mut lineage = Vec::new();
    let mut cursor = Some(a.clone());
    while let Some(node) = cursor {
        if node.is_container() {
            lineage.push(node.clone());
        }
        cursor = node.parent();
    }

    let mut cursor = Some(b.clone());
    while let Some(node) = cursor {
        if let Some(found) = lineage.iter().find(|c| Arc::ptr_eq(c, &node)) {
            return Some(found.clone());
        }
        cursor = node.parent();
    }
    None
}

/// The effective update rate of a source/target pair: the child sample
/// rate of their common ancestor (oversampling multiplies it, a
/// control-rate chain divides it).
pub fn connection_rate(source: &NodeHandle, target: &NodeHandle) -> Option<f64> {
    let ancestor = find_common_ancestor(source, target)?;
    ancestor.child_specs().map(|specs| specs.sample_rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameter::ParamDesc;

    #[test]
    fn macro_link_maps_through_explicit_range() {
        let target = Parameter::new(ParamDesc::new("freq", ParamRange::new(1.0, 3.0), 1.0));
        let link = MacroLink::Param {
            target: Arc::downgrade(&target),
            range: None,
        };
        link.apply(0.75);
        assert!((target.value() - 2.5).abs() < 1e-9);

        let wide = Parameter::new(ParamDesc::new("depth", ParamRange::new(0.0, 100.0), 0.0));
        let link = MacroLink::Param {
            target: Arc::downgrade(&wide),
            range: Some(ParamRange::new(10.0, 30.0)),
        };
        link.apply(0.75);
        assert!((wide.value() - 25.0).abs() < 1e-9);
    }

    #[test]
    fn dead_link_target_is_ignored() {
        let target = Parameter::new(ParamDesc::new("x", ParamRange::default(), 0.0));
        let weak = Arc::downgrade(&target);
        drop(target);
        let link = MacroLink::Param {
            target: weak,
            range: None,
        };
        // Must not panic.
        link.apply(0.5);
    }
}
