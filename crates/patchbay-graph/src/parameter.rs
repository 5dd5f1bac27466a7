//! Runtime parameter storage.
//!
//! A parameter holds a static value until connections target it; from
//! then on it is "automated" and the render path computes its effective
//! value from the fan-in chain each block. Control-side writes are
//! atomic and never take the topology lock: `set_value_sync` applies
//! immediately (and pushes macro links), `set_value_async` parks the
//! value for adoption at the next render.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use atomic_float::AtomicF64;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::connection::{ConnectionSpec, MacroLink, ModChain};
use crate::node::NodeHandle;
use crate::range::ParamRange;

/// How multiple connections into one parameter are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CombineMode {
    /// Contributions are summed (the default).
    #[default]
    Sum,
    /// Contributions are multiplied; such "unscaled" targets also skip
    /// input-range rescaling and refuse non-matching connection remaps.
    Product,
}

/// Static description of a parameter.
#[derive(Debug, Clone)]
pub struct ParamDesc {
    pub id: String,
    pub range: ParamRange,
    pub default: f64,
    pub combine: CombineMode,
}

impl ParamDesc {
    pub fn new(id: impl Into<String>, range: ParamRange, default: f64) -> Self {
        Self {
            id: id.into(),
            range,
            default,
            combine: CombineMode::Sum,
        }
    }

    pub fn unscaled(mut self) -> Self {
        self.combine = CombineMode::Product;
        self
    }
}

pub struct Parameter {
    desc: ParamDesc,
    combine: Mutex<CombineMode>,
    value: AtomicF64,
    pending: AtomicF64,
    dirty: AtomicBool,
    display: AtomicF64,
    automated: AtomicBool,
    chain: ArcSwapOption<ModChain>,
    links: Mutex<Vec<MacroLink>>,
    /// Persisted outbound connection records (macro parameters only).
    specs: Mutex<Vec<ConnectionSpec>>,
}

impl Parameter {
    pub fn new(desc: ParamDesc) -> Arc<Self> {
        let default = desc.range.clamp(desc.default);
        Arc::new(Self {
            combine: Mutex::new(desc.combine),
            desc,
            value: AtomicF64::new(default),
            pending: AtomicF64::new(default),
            dirty: AtomicBool::new(false),
            display: AtomicF64::new(default),
            automated: AtomicBool::new(false),
            chain: ArcSwapOption::empty(),
            links: Mutex::new(Vec::new()),
            specs: Mutex::new(Vec::new()),
        })
    }

    #[inline]
    pub fn id(&self) -> &str {
        &self.desc.id
    }

    #[inline]
    pub fn range(&self) -> &ParamRange {
        &self.desc.range
    }

    #[inline]
    pub fn combine(&self) -> CombineMode {
        *self.combine.lock()
    }

    /// Overrides the combine mode; used by the schema migration when a
    /// legacy `Multiply` op type is folded into the target.
    pub fn set_combine(&self, mode: CombineMode) {
        *self.combine.lock() = mode;
    }

    /// The stored (static) value.
    #[inline]
    pub fn value(&self) -> f64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Applies a value immediately and drives any outbound macro links.
    pub fn set_value_sync(&self, value: f64) {
        let clamped = self.desc.range.clamp(value);
        self.value.store(clamped, Ordering::Relaxed);
        self.display.store(clamped, Ordering::Relaxed);
        self.push_links(clamped);
    }

    /// Parks a value for adoption at the start of the next render.
    pub fn set_value_async(&self, value: f64) {
        self.pending
            .store(self.desc.range.clamp(value), Ordering::Relaxed);
        self.dirty.store(true, Ordering::Release);
    }

    /// Called once per block before the root processes.
    pub fn adopt_pending(&self) {
        if self.dirty.swap(false, Ordering::Acquire) {
            let value = self.pending.load(Ordering::Relaxed);
            self.value.store(value, Ordering::Relaxed);
            self.display.store(value, Ordering::Relaxed);
            self.push_links(value);
        }
    }

    /// The value the DSP should use right now: the fan-in chain when
    /// automated, the stored value otherwise.
    pub fn effective(&self) -> f64 {
        if let Some(chain) = self.chain.load_full() {
            let value = self.desc.range.clamp(chain.evaluate(&self.desc.range));
            self.display.store(value, Ordering::Relaxed);
            return value;
        }
        self.value.load(Ordering::Relaxed)
    }

    /// Last value reported to the UI side.
    #[inline]
    pub fn display_value(&self) -> f64 {
        self.display.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_automated(&self) -> bool {
        self.automated.load(Ordering::Relaxed)
    }

    /// Installs (or clears) the fan-in chain. Called under the graph's
    /// write lock when connections change.
    pub fn install_chain(&self, chain: Option<Arc<ModChain>>) {
        self.automated.store(chain.is_some(), Ordering::Relaxed);
        self.chain.store(chain);
    }

    pub(crate) fn push_links(&self, value: f64) {
        let links = self.links.lock();
        if links.is_empty() {
            return;
        }
        let normalised = if self.desc.range.is_identity() {
            value.clamp(0.0, 1.0)
        } else {
            self.desc.range.to_0to1(value)
        };
        for link in links.iter() {
            link.apply(normalised);
        }
    }

    /// Drops every fan-in input sourced from `node`, rebuilding (or
    /// clearing) the chain. Part of dangling-free node removal.
    pub(crate) fn drop_sources_from(&self, node: &NodeHandle) {
        if let Some(chain) = self.chain.load_full() {
            let kept = chain.retain_sources(|input| !input.is_from(node));
            if kept.len() != chain.len() {
                let rebuilt = crate::connection::ModChain::build(kept, chain.mode(), &self.desc.range);
                self.install_chain(rebuilt.map(Arc::new));
            }
        }
    }

    /// The node feeding this parameter's first connection, if any.
    pub(crate) fn first_mod_source(&self) -> Option<NodeHandle> {
        self.chain.load_full().and_then(|chain| chain.first_source())
    }

    pub(crate) fn links(&self) -> &Mutex<Vec<MacroLink>> {
        &self.links
    }

    /// Persisted outbound connection records (macro parameters only).
    pub fn connection_specs(&self) -> &Mutex<Vec<ConnectionSpec>> {
        &self.specs
    }
}

impl std::fmt::Debug for Parameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parameter")
            .field("id", &self.desc.id)
            .field("value", &self.value())
            .field("automated", &self.is_automated())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gain_param() -> Arc<Parameter> {
        Parameter::new(ParamDesc::new("gain", ParamRange::new(0.0, 2.0), 1.0))
    }

    #[test]
    fn sync_write_clamps_and_applies() {
        let param = gain_param();
        param.set_value_sync(5.0);
        assert_eq!(param.value(), 2.0);
        assert_eq!(param.effective(), 2.0);
    }

    #[test]
    fn async_write_waits_for_adoption() {
        let param = gain_param();
        param.set_value_async(0.5);
        assert_eq!(param.value(), 1.0);
        param.adopt_pending();
        assert_eq!(param.value(), 0.5);
    }

    #[test]
    fn adoption_is_one_shot() {
        let param = gain_param();
        param.set_value_async(0.25);
        param.adopt_pending();
        param.set_value_sync(1.5);
        param.adopt_pending();
        assert_eq!(param.value(), 1.5);
    }
}
