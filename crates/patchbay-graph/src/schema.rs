//! Persisted graph schema: a tree of node records plus the load-time
//! passes that keep stale documents loadable.
//!
//! Loading runs an id-deduplication pass and a versioned migration
//! pass once, before the tree is built; nothing stringly-typed drives
//! behavior after that. Legacy constructs (per-connection op types,
//! value converters, factor-in-the-path container ids) are rewritten
//! into the typed config and reported as deprecation notes.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{DeprecationKind, NodeError};
use crate::parameter::CombineMode;
use crate::range::ParamRange;
use crate::registry::NodeConfig;

pub const SCHEMA_VERSION: u32 = 2;

/// A deprecation rewrite applied while loading, keyed by node id.
pub type MigrationNote = (String, NodeError);

fn default_version() -> u32 {
    1
}

fn default_channels() -> usize {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphDocument {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub polyphonic: bool,
    #[serde(default = "default_channels")]
    pub channels: usize,
    pub root: NodeRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    pub path: String,
    #[serde(default)]
    pub bypassed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colour: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub comment: String,
    #[serde(default, skip_serializing_if = "NodeConfig::is_default")]
    pub config: NodeConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<ParamRecord>,
    /// Signal-output connections leaving this node (bypass gates use
    /// the reserved target parameter id).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mod_targets: Vec<ConnectionRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeRecord>,
}

impl NodeRecord {
    pub fn new(id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            bypassed: false,
            colour: None,
            comment: String::new(),
            config: NodeConfig::default(),
            parameters: Vec::new(),
            mod_targets: Vec::new(),
            children: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamRecord {
    pub id: String,
    pub value: f64,
    #[serde(flatten)]
    pub range: ParamRange,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub combine: Option<CombineMode>,
    /// Connections leaving this (macro) parameter.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connections: Vec<ConnectionRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub target_node_id: String,
    pub target_param_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<ParamRange>,
    /// Legacy v1 field, folded into the target's combine mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op_type: Option<String>,
    /// Legacy v1 field, replaced by the connection range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub converter: Option<String>,
}

/// Returns a previously-unused id for `requested`. An unused request
/// passes through; a collision strips any trailing digits and counts
/// up from 2, so requesting "Gain" twice yields "Gain" then "Gain2".
pub fn non_existent_id(requested: &str, exists: impl Fn(&str) -> bool) -> String {
    if requested.is_empty() {
        return non_existent_id("Node", exists);
    }
    if !exists(requested) {
        return requested.to_owned();
    }
    let stem = requested.trim_end_matches(|c: char| c.is_ascii_digit());
    let stem = if stem.is_empty() { requested } else { stem };
    let mut suffix = 2usize;
    loop {
        let candidate = format!("{stem}{suffix}");
        if !exists(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}

/// Runs the id-deduplication and migration passes in place, returning
/// the deprecation notes. Idempotent: a current document passes
/// through untouched.
pub fn prepare_document(doc: &mut GraphDocument) -> Vec<MigrationNote> {
    dedup_ids(&mut doc.root);
    let mut notes = Vec::new();
    if doc.version < SCHEMA_VERSION {
        migrate(doc, &mut notes);
    }
    doc.version = SCHEMA_VERSION;
    notes
}

/// Parses a document without running the load-time passes; callers
/// that build a tree from it run [`prepare_document`] exactly once.
pub fn parse_document(json: &str) -> anyhow::Result<GraphDocument> {
    serde_json::from_str(json).context("failed to parse graph document")
}

pub fn load_document(json: &str) -> anyhow::Result<(GraphDocument, Vec<MigrationNote>)> {
    let mut doc = parse_document(json)?;
    let notes = prepare_document(&mut doc);
    Ok((doc, notes))
}

pub fn save_document(doc: &GraphDocument) -> anyhow::Result<String> {
    serde_json::to_string_pretty(doc).context("failed to serialise graph document")
}

fn dedup_ids(root: &mut NodeRecord) {
    fn walk(record: &mut NodeRecord, seen: &mut HashSet<String>) {
        if seen.contains(&record.id) {
            let fresh = non_existent_id(&record.id, |candidate| seen.contains(candidate));
            tracing::warn!(old = %record.id, new = %fresh, "duplicate node id in document");
            record.id = fresh;
        }
        seen.insert(record.id.clone());
        for child in &mut record.children {
            walk(child, seen);
        }
    }
    let mut seen = HashSet::new();
    walk(root, &mut seen);
}

fn migrate(doc: &mut GraphDocument, notes: &mut Vec<MigrationNote>) {
    let mut product_targets: Vec<(String, String)> = Vec::new();
    migrate_node(&mut doc.root, notes, &mut product_targets);
    for (node_id, param_id) in product_targets {
        if let Some(record) = find_node_mut(&mut doc.root, &node_id) {
            if let Some(param) = record.parameters.iter_mut().find(|p| p.id == param_id) {
                param.combine = Some(CombineMode::Product);
            }
        }
    }
}

fn migrate_node(
    record: &mut NodeRecord,
    notes: &mut Vec<MigrationNote>,
    product_targets: &mut Vec<(String, String)>,
) {
    migrate_path(record);
    for connection in record
        .mod_targets
        .iter_mut()
        .chain(record.parameters.iter_mut().flat_map(|p| &mut p.connections))
    {
        if let Some(op) = connection.op_type.take() {
            notes.push((
                record.id.clone(),
                NodeError::DeprecatedNode(DeprecationKind::OpTypeNonSet),
            ));
            if op == "Multiply" {
                product_targets.push((
                    connection.target_node_id.clone(),
                    connection.target_param_id.clone(),
                ));
            }
        }
        if let Some(converter) = connection.converter.take() {
            if converter != "Identity" {
                notes.push((
                    record.id.clone(),
                    NodeError::DeprecatedNode(DeprecationKind::ConverterNotIdentity),
                ));
            }
        }
    }
    for child in &mut record.children {
        migrate_node(child, notes, product_targets);
    }
}

/// Rewrites v1 factor-in-the-path container ids into the typed config:
/// `container.fix64_block` and `container.oversample4x` become
/// `container.fixblock` / `container.oversample` with the factor in
/// the node config.
fn migrate_path(record: &mut NodeRecord) {
    if let Some(rest) = record.path.strip_prefix("container.fix") {
        if let Some(number) = rest.strip_suffix("_block") {
            if let Ok(block) = number.parse::<usize>() {
                record.path = "container.fixblock".to_owned();
                record.config.fixed_block_size = Some(block);
            }
        }
    } else if let Some(rest) = record.path.strip_prefix("container.oversample") {
        if let Some(number) = rest.strip_suffix('x') {
            if let Ok(factor) = number.parse::<usize>() {
                record.path = "container.oversample".to_owned();
                record.config.oversample_factor = Some(factor);
            }
        }
    }
}

fn find_node_mut<'a>(record: &'a mut NodeRecord, id: &str) -> Option<&'a mut NodeRecord> {
    if record.id == id {
        return Some(record);
    }
    for child in &mut record.children {
        if let Some(found) = find_node_mut(child, id) {
            return Some(found);
        }
    }
    None
}
