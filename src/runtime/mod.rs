//! Simulated VM - executes lowered snippets
//!
//! Design: everything a snippet touches at run time is a mapped memory
//! region: the thread block holding the TLAB fields, klass metadata, class
//! mirrors, TLAB memory and the eden space used by the fallback allocator.
//! The lowering never sees this module; it only consumes the
//! [`TypeResolver`](crate::meta::TypeResolver) answers of [`KlassTable`].

mod counters;
mod eden;
mod klass;
mod machine;
mod memory;

#[cfg(test)]
mod tests;

pub use counters::{CounterEntry, CounterKey, DynamicCounters};
pub use eden::{CallLog, EdenRuntime, SlowPathRuntime};
pub use klass::{InstanceClass, KlassRef, KlassTable, MIRROR_SIZE};
pub use machine::{Machine, Outcome, StackRegion, StoreRecord};
pub use memory::Memory;

use crate::alloc::{LoweringTool, ThreadAllocationBuffer};
use crate::config::LoweringConfig;
use crate::errors::ExecError;
use crate::layout::ElementKind;
use crate::snippet::Snippet;
use std::sync::Arc;

/// Address space of a simulated VM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmLayout {
    pub thread: u64,
    pub stack: u64,
    pub stack_size: u32,
    pub metaspace: u64,
    pub metaspace_size: u64,
    pub mirrors: u64,
    pub mirrors_size: u64,
    pub eden: u64,
    pub eden_size: u64,
}

impl Default for VmLayout {
    fn default() -> Self {
        Self {
            thread: 0x7000_0000,
            stack: 0x7100_0000,
            stack_size: 0x1000,
            metaspace: 0x4000_0000,
            metaspace_size: 0x10000,
            mirrors: 0x5000_0000,
            mirrors_size: 0x10000,
            eden: 0x6000_0000,
            eden_size: 0x10_0000,
        }
    }
}

/// Size of the simulated thread block
const THREAD_BLOCK_SIZE: u64 = 0x200;

pub struct SimulatedVm {
    config: Arc<LoweringConfig>,
    machine: Machine<EdenRuntime>,
    klasses: KlassTable,
}

impl SimulatedVm {
    pub fn new(config: impl Into<Arc<LoweringConfig>>) -> Result<Self, ExecError> {
        Self::with_layout(config, VmLayout::default())
    }

    pub fn with_layout(config: impl Into<Arc<LoweringConfig>>, layout: VmLayout) -> Result<Self, ExecError> {
        let config = config.into();
        let mut memory = Memory::new();
        memory.map("thread", layout.thread, THREAD_BLOCK_SIZE)?;
        memory.map("stack", layout.stack, u64::from(layout.stack_size))?;
        memory.map("metaspace", layout.metaspace, layout.metaspace_size)?;
        memory.map("mirrors", layout.mirrors, layout.mirrors_size)?;
        memory.map("eden", layout.eden, layout.eden_size)?;

        let eden = EdenRuntime::new(Arc::clone(&config), layout.eden, layout.eden_size);
        let machine = Machine::new(
            Arc::clone(&config),
            memory,
            eden,
            layout.thread,
            StackRegion { base: layout.stack, size: layout.stack_size },
        );
        let klasses = KlassTable::new(
            Arc::clone(&config),
            (layout.metaspace, layout.metaspace_size),
            (layout.mirrors, layout.mirrors_size),
        );
        Ok(Self { config, machine, klasses })
    }

    pub fn config(&self) -> &LoweringConfig {
        &self.config
    }

    pub fn machine(&self) -> &Machine<EdenRuntime> {
        &self.machine
    }

    pub fn memory(&self) -> &Memory {
        self.machine.memory()
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        self.machine.memory_mut()
    }

    pub fn klasses(&self) -> &KlassTable {
        &self.klasses
    }

    /// Lowering services backed by this VM's type table
    pub fn tool<'a>(&'a self, method: &'a str) -> LoweringTool<'a> {
        LoweringTool::new(&self.klasses, method)
    }

    pub fn define_instance(&mut self, class: &InstanceClass) -> Result<KlassRef, ExecError> {
        self.klasses.define_instance(self.machine.memory_mut(), class)
    }

    pub fn define_array(&mut self, kind: ElementKind, component: Option<&KlassRef>) -> Result<KlassRef, ExecError> {
        self.klasses.define_array(self.machine.memory_mut(), kind, component)
    }

    /// Define `kind[]` for every arrayable kind
    pub fn define_primitive_arrays(&mut self) -> Result<(), ExecError> {
        for kind in ElementKind::ARRAYABLE {
            self.define_array(kind, None)?;
        }
        Ok(())
    }

    pub fn primitive_mirror(&mut self, kind: ElementKind) -> Result<u64, ExecError> {
        self.klasses.primitive_mirror(self.machine.memory_mut(), kind)
    }

    /// Map `[top, end)` if needed and install it as the thread's TLAB
    pub fn install_tlab(&mut self, top: u64, end: u64) -> Result<(), ExecError> {
        let len = end.saturating_sub(top);
        if len > 0 && !self.memory().is_mapped(top, len as usize) {
            self.machine.memory_mut().map("tlab", top, len)?;
        }
        self.machine.set_tlab(ThreadAllocationBuffer::new(top, end))
    }

    pub fn tlab(&self) -> Result<ThreadAllocationBuffer, ExecError> {
        self.machine.tlab()
    }

    pub fn run(&mut self, snippet: &Snippet, args: &[(&str, i64)]) -> Result<Outcome, ExecError> {
        self.machine.run(snippet, args)
    }

    pub fn counters(&self) -> Arc<DynamicCounters> {
        self.machine.counters()
    }

    pub fn fallback_calls(&self) -> Vec<crate::alloc::FallbackCall> {
        self.machine.runtime().calls()
    }

    pub fn stores(&self) -> &[StoreRecord] {
        self.machine.stores()
    }
}
