//! Bump pointer allocation from the thread-local allocation buffer
//!
//! The buffer is owned by one thread, so the fast path is a plain load,
//! add, unsigned compare and store. Exhaustion is a branch, not an error.

use crate::config::{LoweringConfig, PrefetchConfig};
use crate::errors::Result;
use crate::snippet::{Cond, Location, Operand, Probability, SnippetBuilder, Width};

/// Host-side view of a TLAB: `[top, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ThreadAllocationBuffer {
    pub top: u64,
    pub end: u64,
}

/// The buffer cannot satisfy the request; nothing was changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exhausted;

impl ThreadAllocationBuffer {
    #[inline]
    pub const fn new(top: u64, end: u64) -> Self {
        Self { top, end }
    }

    /// Reference semantics of the emitted fast path
    #[inline]
    pub fn try_allocate(&mut self, size: u64) -> std::result::Result<u64, Exhausted> {
        debug_assert!(self.top <= self.end, "tlab top past end");
        let new_top = self.top.checked_add(size).ok_or(Exhausted)?;
        if new_top <= self.end {
            let object = self.top;
            self.top = new_top;
            Ok(object)
        } else {
            Err(Exhausted)
        }
    }

    #[inline]
    pub fn remaining(&self) -> u64 {
        self.end.saturating_sub(self.top)
    }
}

/// Emitted TLAB pointers for one allocation attempt
#[derive(Debug, Clone, Copy)]
pub struct BumpPointers {
    pub top: Operand,
    pub end: Operand,
    pub new_top: Operand,
}

/// Load `top` and `end` from the thread and compute `top + size`
pub fn emit_bump(b: &mut SnippetBuilder, config: &LoweringConfig, size: Operand) -> BumpPointers {
    let top = b.load(Operand::Thread, config.thread.tlab_top_offset, Width::W64, Location::TlabTop);
    let end = b.load(Operand::Thread, config.thread.tlab_end_offset, Width::W64, Location::TlabEnd);
    let new_top = b.add(top, size);
    BumpPointers { top, end, new_top }
}

/// The unsigned bound check guarding the fast path
pub fn fits(bump: &BumpPointers) -> Cond {
    Cond::below_or_equal(bump.new_top, bump.end)
}

/// Commit the allocation: the only write to `top`
pub fn emit_commit(b: &mut SnippetBuilder, config: &LoweringConfig, bump: &BumpPointers) {
    b.store(
        Operand::Thread,
        Operand::Imm(config.thread.tlab_top_offset),
        bump.new_top,
        Width::W64,
        Location::TlabTop,
    );
}

/// Bump allocate `size` bytes; `fast` runs after `top` has been advanced,
/// the old top being the object address, `slow` when the buffer is exhausted or
/// `precondition` fails. Without TLAB allocation only `slow` is emitted.
pub fn emit_try_allocate<F, G>(
    b: &mut SnippetBuilder,
    config: &LoweringConfig,
    size: Operand,
    precondition: Option<Cond>,
    fast: F,
    slow: G,
) -> Result<()>
where
    F: FnOnce(&mut SnippetBuilder, BumpPointers) -> Result<()>,
    G: FnOnce(&mut SnippetBuilder) -> Result<()>,
{
    if !config.use_tlab {
        return slow(b);
    }
    let bump = emit_bump(b, config, size);
    let cond = match precondition {
        Some(precondition) => precondition.and(fits(&bump)),
        None => fits(&bump),
    };
    b.if_then_else(
        cond,
        Probability::FAST_PATH,
        |b| {
            emit_commit(b, config, &bump);
            fast(b, bump)
        },
        slow,
    )
}

/// Cache hints past the new top; a no-op when the style is disabled
pub fn emit_prefetch(b: &mut SnippetBuilder, prefetch: &PrefetchConfig, new_top: Operand, lines: u32) {
    if prefetch.style <= 0 {
        return;
    }
    let mut distance = prefetch.distance;
    for _ in 0..lines {
        b.prefetch(new_top, distance);
        distance += prefetch.step_size;
    }
}
