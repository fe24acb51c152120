//! tlabgen - fast-path allocation lowering for a JIT compiler
//!
//! Allocation requests are lowered into [`Snippet`]s: structured code that
//! bump allocates from the thread-local allocation buffer, writes the
//! object header, initializes the body and falls back to an out-of-line
//! allocator when the fast path cannot be taken. The [`runtime`] module
//! executes snippets against a simulated VM.

// Core modules
pub mod alloc;
pub mod config;
pub mod errors;
pub mod layout;
pub mod logging;
pub mod meta;
pub mod runtime;
pub mod snippet;

// Re-export commonly used items
pub use alloc::{
    AllocationKind, AllocationProfiler, AllocationRequest, CounterProfiler, DynamicNewArray, DynamicNewInstance,
    FallbackCall, FallbackDescriptor, Input, Lowerer, LoweringTool, NewArray, NewInstance, NewMultiArray, NoProfiling,
    ThreadAllocationBuffer,
};
pub use config::{LayoutConfig, LoweringConfig, ProfileMode};
pub use errors::{ConfigError, ExecError, LoweringError};
pub use layout::{ElementKind, LayoutDescriptor, LayoutHelper};
pub use meta::{ResolvedType, TypeHandle, TypeResolver};
pub use runtime::{InstanceClass, KlassRef, Outcome, SimulatedVm};
pub use snippet::{Snippet, SnippetBuilder};
