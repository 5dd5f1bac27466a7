//! patchbay-graph: the runtime core of a live-editable node graph
//! audio engine.
//!
//! A graph is a rooted tree of containers and leaf processors that a
//! control thread mutates (add, reparent, connect, rename) while an
//! audio thread renders it block by block. A single reader/writer
//! "connection lock" separates the two: the render path try-locks and
//! skips the block on contention, the control path blocks. Parameters
//! are either static values or pulled from a fan-in chain of
//! modulation connections; errors are recorded per node and never
//! cross the render boundary.

pub mod bridge;
pub mod buffer;
pub mod connection;
pub mod containers;
pub mod error;
pub mod event;
pub mod graph;
pub mod node;
pub mod nodes;
pub mod parameter;
pub mod range;
pub mod registry;
pub mod schema;

pub use bridge::{ModOutput, ModReader, ModSlot, DEFAULT_TAP_CAPACITY};
pub use buffer::{BlockBuffer, ChannelSlices, ProcessData, MAX_CHANNELS};
pub use connection::{
    connection_rate, find_common_ancestor, find_real_source, BypassGate, ConnectionSpec,
    MacroLink, ModChain, ModInput, SourceSelector, BYPASS_PARAM,
};
pub use containers::{
    ContainerKernel, ContainerKind, ControlRate, FixedBlock, Multi, Oversample, Serial, Split,
    CONTROL_RATE_DIVIDER, DEFAULT_BYPASS_RAMP_MS,
};
pub use error::{DeprecationKind, ErrorMap, NodeError, ValidationReport};
pub use event::{BlockSegments, Event, EventKind};
pub use graph::{EditGuard, NodeGraph, RenderOutcome, RenderSnapshot, ROOT_ID};
pub use node::{
    NodeDescriptor, NodeHandle, NodeInstance, NodeKernel, NodeMeta, NodeState, PrepareSpecs,
    ProcessContext, Processor, MAX_NODE_PARAMETERS,
};
pub use parameter::{CombineMode, ParamDesc, Parameter};
pub use range::ParamRange;
pub use registry::{FactoryFn, NodeBlueprint, NodeConfig, NodeRegistry};
pub use schema::{
    load_document, non_existent_id, parse_document, save_document, ConnectionRecord, GraphDocument,
    MigrationNote, NodeRecord, ParamRecord, SCHEMA_VERSION,
};
