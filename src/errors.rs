//! Error types for lowering, snippet execution and configuration
//!
//! Resource exhaustion is deliberately absent: a full TLAB is an expected
//! branch into the fallback allocator, not an error.

use crate::alloc::FallbackDescriptor;
use crate::layout::ElementKind;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used by the lowering entry points
pub type Result<T, E = LoweringError> = std::result::Result<T, E>;

/// Static failures detected while emitting a snippet
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoweringError {
    #[error("unaligned object size {size}: allocation sizes must be a multiple of 8")]
    UnalignedSize { size: i64 },

    #[error("unaligned fill offset {offset}")]
    UnalignedOffset { offset: i64 },

    #[error("arrays of void cannot be allocated")]
    VoidElementKind,

    #[error("array class for element kind {0} is not available")]
    UnresolvedArrayClass(ElementKind),

    #[error("multi-dimensional array allocation needs at least one dimension")]
    InvalidRank,

    #[error("{descriptor} expects {expected} arguments, got {found}")]
    ArityMismatch {
        descriptor: FallbackDescriptor,
        expected: usize,
        found: usize,
    },

    #[error("type {name} is not an instance type")]
    NotAnInstance { name: String },

    #[error("type {name} is not an array type")]
    NotAnArray { name: String },
}

/// Faults raised by the snippet simulator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    #[error("access of {len} bytes at {addr:#x} is outside mapped memory")]
    Unmapped { addr: u64, len: usize },

    #[error("region {name} overlaps an existing mapping")]
    Overlap { name: String },

    #[error("snippet parameter '{0}' was not bound")]
    MissingParameter(String),

    #[error("stack scratch exhausted: requested {requested} bytes")]
    StackOverflow { requested: u32 },

    #[error("assertion failed: {0}")]
    AssertionFailed(&'static str),

    #[error("out of memory allocating {requested} bytes")]
    OutOfMemory { requested: u64 },

    #[error("{descriptor} called with {found} arguments")]
    BadFallbackCall {
        descriptor: FallbackDescriptor,
        found: usize,
    },

    #[error("runtime exception: {0}")]
    Exception(String),
}

/// Failures loading or saving a configuration snapshot
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
