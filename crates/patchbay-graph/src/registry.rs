//! The node factory registry.
//!
//! Each graph owns its registry instance; there is no process-global
//! state. Factories are consulted in registration order, first
//! matching prefix wins. A factory may still decline a path under its
//! prefix (unknown sub-kind), in which case the lookup continues.

use serde::{Deserialize, Serialize};

use crate::containers::{ContainerKernel, ContainerKind, DEFAULT_BYPASS_RAMP_MS};
use crate::node::{NodeDescriptor, NodeKernel};
use crate::nodes::{Cable, Gain, Oscillator, Peak};

/// Typed per-node configuration, persisted with the node record. One
/// struct covers all built-in kinds; absent fields mean "default".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oversample_factor: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_block_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bypass_ramp_ms: Option<f64>,
}

impl NodeConfig {
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    pub fn with_oversample_factor(mut self, factor: usize) -> Self {
        self.oversample_factor = Some(factor);
        self
    }

    pub fn with_fixed_block_size(mut self, block: usize) -> Self {
        self.fixed_block_size = Some(block);
        self
    }
}

/// What a factory hands back: the descriptor, the kernel and the
/// (normalised) config the instance should persist.
pub struct NodeBlueprint {
    pub descriptor: NodeDescriptor,
    pub kernel: NodeKernel,
    pub config: NodeConfig,
}

pub type FactoryFn = Box<dyn Fn(&str, &NodeConfig) -> Option<NodeBlueprint> + Send + Sync>;

pub struct NodeRegistry {
    entries: Vec<(String, FactoryFn)>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// A registry with the container family and the built-in leaves.
    pub fn with_builtin_nodes() -> Self {
        let mut registry = Self::new();
        registry.register("container.", Box::new(container_factory));
        registry.register("core.", Box::new(core_factory));
        registry.register("routing.", Box::new(routing_factory));
        registry
    }

    pub fn register(&mut self, prefix: impl Into<String>, factory: FactoryFn) {
        let prefix = prefix.into();
        tracing::debug!(prefix = %prefix, "factory registered");
        self.entries.push((prefix, factory));
    }

    /// First matching prefix wins; `None` when nothing matches.
    pub fn instantiate(&self, path: &str, config: &NodeConfig) -> Option<NodeBlueprint> {
        for (prefix, factory) in &self.entries {
            if !path.starts_with(prefix.as_str()) {
                continue;
            }
            if let Some(blueprint) = factory(path, config) {
                return Some(blueprint);
            }
        }
        tracing::warn!(path, "no factory matches this path");
        None
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::with_builtin_nodes()
    }
}

fn container_factory(path: &str, config: &NodeConfig) -> Option<NodeBlueprint> {
    let (kind, name, config) = match path {
        "container.chain" => (
            ContainerKind::serial(config.bypass_ramp_ms.unwrap_or(DEFAULT_BYPASS_RAMP_MS)),
            "Chain",
            config.clone(),
        ),
        "container.split" => (ContainerKind::split(), "Split", config.clone()),
        "container.multi" => (ContainerKind::multi(), "Multi", config.clone()),
        "container.oversample" => {
            let factor = config.oversample_factor.unwrap_or(2);
            let kind = ContainerKind::oversample(factor);
            let factor = match &kind {
                ContainerKind::Oversample(oversample) => oversample.factor(),
                _ => factor,
            };
            (
                kind,
                "Oversample",
                config.clone().with_oversample_factor(factor),
            )
        }
        "container.fixblock" => {
            let block = config.fixed_block_size.unwrap_or(64);
            let kind = ContainerKind::fixed_block(block);
            let block = match &kind {
                ContainerKind::FixedBlock(fixed) => fixed.block(),
                _ => block,
            };
            (
                kind,
                "FixedBlock",
                config.clone().with_fixed_block_size(block),
            )
        }
        "container.modchain" => (ContainerKind::control_rate(), "ModChain", config.clone()),
        _ => return None,
    };
    Some(NodeBlueprint {
        descriptor: NodeDescriptor::new(path, name),
        kernel: NodeKernel::Container(ContainerKernel::new(kind)),
        config,
    })
}

fn core_factory(path: &str, config: &NodeConfig) -> Option<NodeBlueprint> {
    let (descriptor, kernel): (NodeDescriptor, NodeKernel) = match path {
        Oscillator::PATH => (
            Oscillator::descriptor(),
            NodeKernel::Leaf(Box::new(Oscillator::new())),
        ),
        Gain::PATH => (Gain::descriptor(), NodeKernel::Leaf(Box::new(Gain::new()))),
        Peak::PATH => (Peak::descriptor(), NodeKernel::Leaf(Box::new(Peak::new()))),
        _ => return None,
    };
    Some(NodeBlueprint {
        descriptor,
        kernel,
        config: config.clone(),
    })
}

fn routing_factory(path: &str, config: &NodeConfig) -> Option<NodeBlueprint> {
    if path != Cable::PATH {
        return None;
    }
    Some(NodeBlueprint {
        descriptor: Cable::descriptor(),
        kernel: NodeKernel::Leaf(Box::new(Cable::new())),
        config: config.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_registered_match_wins() {
        let mut registry = NodeRegistry::new();
        registry.register(
            "core.",
            Box::new(|path, config| {
                (path == "core.gain").then(|| NodeBlueprint {
                    descriptor: NodeDescriptor::new(path, "Override"),
                    kernel: NodeKernel::Leaf(Box::new(Gain::new())),
                    config: config.clone(),
                })
            }),
        );
        registry.register("core.", Box::new(core_factory));

        let blueprint = registry
            .instantiate("core.gain", &NodeConfig::default())
            .unwrap();
        assert_eq!(blueprint.descriptor.name, "Override");

        // The first factory declines unknown sub-paths and the lookup
        // falls through to the second.
        let blueprint = registry
            .instantiate("core.oscillator", &NodeConfig::default())
            .unwrap();
        assert_eq!(blueprint.descriptor.name, "Oscillator");
    }

    #[test]
    fn unknown_path_yields_none() {
        let registry = NodeRegistry::with_builtin_nodes();
        assert!(registry
            .instantiate("fx.reverb", &NodeConfig::default())
            .is_none());
    }

    #[test]
    fn oversample_config_is_normalised() {
        let registry = NodeRegistry::with_builtin_nodes();
        let config = NodeConfig::default().with_oversample_factor(5);
        let blueprint = registry.instantiate("container.oversample", &config).unwrap();
        assert_eq!(blueprint.config.oversample_factor, Some(2));

        let config = NodeConfig::default().with_fixed_block_size(100);
        let blueprint = registry.instantiate("container.fixblock", &config).unwrap();
        assert_eq!(blueprint.config.fixed_block_size, Some(64));
    }
}
