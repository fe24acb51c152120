//! Out-of-line allocation entry points
//!
//! Every shape has exactly one fallback with a fixed argument list. The
//! callee is opaque: whatever it returns is the snippet result.

use crate::errors::{LoweringError, Result};
use crate::snippet::{Operand, SnippetBuilder};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FallbackDescriptor {
    /// `(hub)`
    NewInstance,
    /// `(hub, length, fill_contents)`
    NewArray,
    /// `(hub, rank, dims)`
    NewMultiArray,
    /// `(class)`
    DynamicNewInstance,
    /// `(element_class, length)`
    DynamicNewArray,
}

impl FallbackDescriptor {
    pub const ALL: [FallbackDescriptor; 5] = [
        FallbackDescriptor::NewInstance,
        FallbackDescriptor::NewArray,
        FallbackDescriptor::NewMultiArray,
        FallbackDescriptor::DynamicNewInstance,
        FallbackDescriptor::DynamicNewArray,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            FallbackDescriptor::NewInstance => "NEW_INSTANCE",
            FallbackDescriptor::NewArray => "NEW_ARRAY",
            FallbackDescriptor::NewMultiArray => "NEW_MULTI_ARRAY",
            FallbackDescriptor::DynamicNewInstance => "DYNAMIC_NEW_INSTANCE",
            FallbackDescriptor::DynamicNewArray => "DYNAMIC_NEW_ARRAY",
        }
    }

    pub const fn arity(self) -> usize {
        match self {
            FallbackDescriptor::NewInstance | FallbackDescriptor::DynamicNewInstance => 1,
            FallbackDescriptor::DynamicNewArray => 2,
            FallbackDescriptor::NewArray | FallbackDescriptor::NewMultiArray => 3,
        }
    }
}

impl fmt::Display for FallbackDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A fallback invocation as seen by the runtime, arguments evaluated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackCall {
    pub descriptor: FallbackDescriptor,
    pub args: SmallVec<[i64; 4]>,
}

impl FallbackCall {
    pub fn arg(&self, index: usize) -> Option<i64> {
        self.args.get(index).copied()
    }
}

impl fmt::Display for FallbackCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args: Vec<String> = self.args.iter().map(|a| format!("{:#x}", a)).collect();
        write!(f, "{}({})", self.descriptor, args.join(", "))
    }
}

/// Emit the call and return its result as the snippet result
pub fn emit_fallback(b: &mut SnippetBuilder, descriptor: FallbackDescriptor, args: &[Operand]) -> Result<Operand> {
    if args.len() != descriptor.arity() {
        return Err(LoweringError::ArityMismatch {
            descriptor,
            expected: descriptor.arity(),
            found: args.len(),
        });
    }
    let result = b.call(descriptor, args);
    b.ret(result);
    Ok(result)
}
