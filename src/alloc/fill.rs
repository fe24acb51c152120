//! Memory initialization of freshly carved objects
//!
//! One routine covers both code shapes. Short fills become a chain of
//! 8-byte stores, longer ones a counted loop. The bytes written are the
//! same either way; only the emitted code differs.

use crate::config::LoweringConfig;
use crate::errors::{LoweringError, Result};
use crate::snippet::{Cond, Location, Operand, Probability, SnippetBuilder, Width};

/// Upper bound on explicit 8-byte stores before falling back to a loop
pub const MAX_UNROLLED_STORES: i64 = 8;

/// Fill pattern marking memory that was deliberately left uninitialized
pub const POISON: i64 = 0xFEFE_FEFE_FEFE_FEFEu64 as i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillValue {
    Zero,
    Poison,
}

impl FillValue {
    #[inline]
    pub const fn word(self) -> i64 {
        match self {
            FillValue::Zero => 0,
            FillValue::Poison => POISON,
        }
    }

    /// Low half of the pattern, for the alignment store
    #[inline]
    pub const fn half(self) -> i64 {
        self.word() as i32 as i64
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FillRequest {
    /// Object address
    pub base: Operand,
    /// End of the fill, relative to `base`; a multiple of 8
    pub size: Operand,
    /// First byte to fill, may be 4 mod 8
    pub start_offset: Operand,
    pub value: FillValue,
    /// The size is a compile-time constant of the allocation shape
    pub constant_size: bool,
    /// Select unrolled stores at run time when the fill is short
    pub may_unroll: bool,
    /// Group for code-shape counters, e.g. `NewInstance`
    pub counter_group: &'static str,
}

fn shape_counter(b: &mut SnippetBuilder, config: &LoweringConfig, group: &'static str, name: &'static str) {
    if config.snippet_counters {
        b.counter(group, name, Operand::Imm(1), None);
    }
}

fn emit_store(b: &mut SnippetBuilder, request: &FillRequest, offset: Operand) {
    b.store(request.base, offset, Operand::Imm(request.value.word()), Width::W64, Location::Init);
}

/// Chain of at most `remaining` stores, each guarded by `offset != size`
fn emit_guarded_chain(b: &mut SnippetBuilder, request: &FillRequest, offset: Operand, remaining: i64) -> Result<()> {
    if remaining == 0 {
        return Ok(());
    }
    b.if_then(Cond::ne(offset, request.size), Probability::FREQUENT, |b| {
        emit_store(b, request, offset);
        let next = b.add(offset, Operand::Imm(8));
        emit_guarded_chain(b, request, next, remaining - 1)
    })
}

fn emit_loop(b: &mut SnippetBuilder, request: &FillRequest, offset: Operand) -> Result<()> {
    b.counted_loop(offset, request.size, 8, |b, index| {
        emit_store(b, request, index);
        Ok(())
    })
}

/// Fill `[base + start_offset, base + size)` with the pattern
pub fn emit_fill(b: &mut SnippetBuilder, config: &LoweringConfig, request: &FillRequest) -> Result<()> {
    if config.assertions {
        match request.size.as_const() {
            Some(size) if size & 7 != 0 => return Err(LoweringError::UnalignedSize { size }),
            Some(_) => {}
            None => {
                let low = b.and(request.size, Operand::Imm(7));
                b.assert(Cond::eq(low, Operand::Imm(0)), "unaligned object size");
            }
        }
    }

    let offset = match request.start_offset.as_const() {
        Some(start) if start & 7 != 0 => {
            b.store(request.base, request.start_offset, Operand::Imm(request.value.half()), Width::W32, Location::Init);
            Operand::Imm(start + 4)
        }
        Some(_) => request.start_offset,
        None => {
            let cursor = b.var();
            b.assign(cursor, request.start_offset);
            let low = b.and(request.start_offset, Operand::Imm(7));
            b.if_then(Cond::ne(low, Operand::Imm(0)), Probability::LIKELY, |b| {
                b.store(request.base, request.start_offset, Operand::Imm(request.value.half()), Width::W32, Location::Init);
                let next = b.add(request.start_offset, Operand::Imm(4));
                b.assign(cursor, next);
                Ok(())
            })?;
            Operand::Var(cursor)
        }
    };
    if let Some(offset) = offset.as_const() {
        if config.assertions && offset & 7 != 0 {
            return Err(LoweringError::UnalignedOffset { offset });
        }
    }

    let group = request.counter_group;
    if request.may_unroll {
        let span = b.sub(request.size, offset);
        let strides = b.sar(span, Operand::Imm(3));
        return b.if_then_else(
            Cond::le(strides, Operand::Imm(MAX_UNROLLED_STORES)),
            Probability::LIKELY,
            |b| {
                shape_counter(b, config, group, "tlabSeqInit");
                emit_guarded_chain(b, request, offset, MAX_UNROLLED_STORES)
            },
            |b| {
                shape_counter(b, config, group, "tlabLoopInit");
                emit_loop(b, request, offset)
            },
        );
    }

    match (request.constant_size, request.size.as_const(), offset.as_const()) {
        (true, Some(size), Some(start)) if (size - start) / 8 <= MAX_UNROLLED_STORES => {
            shape_counter(b, config, group, "tlabSeqInit");
            let mut at = start;
            while at < size {
                emit_store(b, request, Operand::Imm(at));
                at += 8;
            }
            Ok(())
        }
        _ => {
            shape_counter(b, config, group, "tlabLoopInit");
            emit_loop(b, request, offset)
        }
    }
}
