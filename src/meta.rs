//! Type metadata as seen by the lowering
//!
//! The compiler hands the lowering opaque type handles. Resolving one
//! yields the klass address that is embedded into the code as the type
//! pointer, plus the facts known about it at compile time.

use crate::layout::{ElementKind, LayoutHelper};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque handle to type metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeHandle(pub u64);

impl fmt::Display for TypeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Compile-time view of a resolved type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedType {
    /// Address of the klass; this is the type pointer written into headers
    pub klass: u64,
    pub name: String,
    pub layout_helper: LayoutHelper,
    /// Mark word new instances start with
    pub prototype_mark_word: u64,
}

impl ResolvedType {
    pub fn is_array(&self) -> bool {
        self.layout_helper.is_array()
    }
}

/// Type lookup consumed by the lowering
pub trait TypeResolver {
    /// `None` for a null or not yet loaded handle
    fn resolve(&self, handle: TypeHandle) -> Option<ResolvedType>;

    /// The array class whose elements are `kind`; `Object` means `Object[]`
    fn array_class_of(&self, kind: ElementKind) -> Option<ResolvedType>;
}
