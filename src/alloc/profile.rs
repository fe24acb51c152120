//! Allocation profiling counters
//!
//! Profiling is an observer handed to the [`Lowerer`](super::Lowerer). The
//! emitted counters never feed back into control flow or the result.

use crate::config::{LoweringConfig, ProfileMode};
use crate::snippet::{Operand, SnippetBuilder};

pub const BYTES_ALLOCATED: &str = "number of bytes allocated";
pub const ALLOCATIONS: &str = "number of allocations";

/// One allocation site as seen by the profiler
#[derive(Debug, Clone, Copy)]
pub struct ProfileSite<'a> {
    /// `"instance"` or `"array"`
    pub path: &'static str,
    /// Allocation size in bytes
    pub size: Operand,
    pub type_context: &'a str,
    /// Name of the method containing the allocation
    pub method: &'a str,
}

pub trait AllocationProfiler: Send + Sync {
    fn profile(&self, b: &mut SnippetBuilder, site: &ProfileSite<'_>);
}

/// Emits nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProfiling;

impl AllocationProfiler for NoProfiling {
    fn profile(&self, _b: &mut SnippetBuilder, _site: &ProfileSite<'_>) {}
}

/// Bytes and allocation counters, named by the profiling mode
#[derive(Debug, Clone, Copy)]
pub struct CounterProfiler {
    mode: ProfileMode,
}

impl CounterProfiler {
    pub fn new(mode: ProfileMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> ProfileMode {
        self.mode
    }

    pub fn counter_group<'a>(&self, site: &ProfileSite<'a>) -> &'a str {
        match self.mode {
            ProfileMode::AllocatingMethods => "",
            ProfileMode::InstanceOrArray => site.path,
            ProfileMode::AllocatedTypes | ProfileMode::AllocatedTypesInMethods => site.type_context,
            ProfileMode::Total => "bytes",
        }
    }

    /// Per-call-site modes tag counters with the allocating method
    pub fn context(&self, site: &ProfileSite<'_>) -> Option<String> {
        match self.mode {
            ProfileMode::AllocatingMethods | ProfileMode::AllocatedTypesInMethods => Some(site.method.to_string()),
            _ => None,
        }
    }
}

impl AllocationProfiler for CounterProfiler {
    fn profile(&self, b: &mut SnippetBuilder, site: &ProfileSite<'_>) {
        let group = self.counter_group(site);
        let context = self.context(site);
        b.counter(group, BYTES_ALLOCATED, site.size, context.clone());
        b.counter(group, ALLOCATIONS, Operand::Imm(1), context);
    }
}

/// The profiler a configuration asks for
pub fn profiler_for(config: &LoweringConfig) -> Box<dyn AllocationProfiler> {
    if config.profiling.enabled {
        Box::new(CounterProfiler::new(config.profiling.mode))
    } else {
        Box::new(NoProfiling)
    }
}
