//! Allocation requests, one struct per allocation shape

use crate::layout::ElementKind;
use crate::meta::TypeHandle;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest array length allowed on the fast path. Keeps
/// `length << log2(element size)` far from overflowing the size computation.
pub const MAX_ARRAY_FAST_PATH_LENGTH: i64 = 0x00FF_FFFF;

/// A graph input: a compile-time constant or a value bound at run time
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Input {
    Const(i64),
    Param(String),
}

impl Input {
    pub fn param(name: impl Into<String>) -> Self {
        Input::Param(name.into())
    }

    pub fn as_const(&self) -> Option<i64> {
        match self {
            Input::Const(value) => Some(*value),
            Input::Param(_) => None,
        }
    }
}

impl From<i64> for Input {
    fn from(value: i64) -> Self {
        Input::Const(value)
    }
}

impl fmt::Display for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Input::Const(value) => write!(f, "{}", value),
            Input::Param(name) => write!(f, "${}", name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationKind {
    FixedInstance,
    DynamicInstance,
    FixedArray,
    DynamicArray,
    MultiArray,
    VerifyHeap,
}

impl fmt::Display for AllocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AllocationKind::FixedInstance => "fixed instance",
            AllocationKind::DynamicInstance => "dynamic instance",
            AllocationKind::FixedArray => "fixed array",
            AllocationKind::DynamicArray => "dynamic array",
            AllocationKind::MultiArray => "multi array",
            AllocationKind::VerifyHeap => "verify heap",
        })
    }
}

/// Instance of a type known at compile time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewInstance {
    pub type_handle: TypeHandle,
    pub fill_contents: bool,
    /// Diagnostic label for profiling; defaults to the type name
    pub type_context: Option<String>,
}

impl NewInstance {
    pub fn new(type_handle: TypeHandle) -> Self {
        Self {
            type_handle,
            fill_contents: true,
            type_context: None,
        }
    }
}

/// Instance of a class given as a runtime class-mirror value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicNewInstance {
    pub class: Input,
    pub fill_contents: bool,
}

impl DynamicNewInstance {
    pub fn new(class: Input) -> Self {
        Self { class, fill_contents: true }
    }
}

/// Array of a type known at compile time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewArray {
    pub type_handle: TypeHandle,
    pub length: Input,
    pub fill_contents: bool,
    pub type_context: Option<String>,
}

impl NewArray {
    pub fn new(type_handle: TypeHandle, length: Input) -> Self {
        Self {
            type_handle,
            length,
            fill_contents: true,
            type_context: None,
        }
    }
}

/// Array whose element class is a runtime class-mirror value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicNewArray {
    pub element_class: Input,
    pub length: Input,
    /// Element kind proven by the compiler, if any
    pub known_element_kind: Option<ElementKind>,
    pub fill_contents: bool,
}

impl DynamicNewArray {
    pub fn new(element_class: Input, length: Input) -> Self {
        Self {
            element_class,
            length,
            known_element_kind: None,
            fill_contents: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMultiArray {
    pub type_handle: TypeHandle,
    /// One length per dimension, outermost first
    pub dimensions: Vec<Input>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum AllocationRequest {
    NewInstance(NewInstance),
    DynamicNewInstance(DynamicNewInstance),
    NewArray(NewArray),
    DynamicNewArray(DynamicNewArray),
    NewMultiArray(NewMultiArray),
    VerifyHeap,
}

impl AllocationRequest {
    pub fn kind(&self) -> AllocationKind {
        match self {
            AllocationRequest::NewInstance(_) => AllocationKind::FixedInstance,
            AllocationRequest::DynamicNewInstance(_) => AllocationKind::DynamicInstance,
            AllocationRequest::NewArray(_) => AllocationKind::FixedArray,
            AllocationRequest::DynamicNewArray(_) => AllocationKind::DynamicArray,
            AllocationRequest::NewMultiArray(_) => AllocationKind::MultiArray,
            AllocationRequest::VerifyHeap => AllocationKind::VerifyHeap,
        }
    }
}
