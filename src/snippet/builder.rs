//! Snippet builder with constant folding
//!
//! Arithmetic on two constants is evaluated at emission time, and an `if`
//! whose condition folds emits only the taken arm. This is how a request
//! with a compile-time size and one with a run-time size go through the
//! same emitter and still produce minimal code.

use super::{BinOp, Block, Cond, DeoptAction, DeoptReason, Folded, Inst, Location, Operand, Probability, Snippet, Var, Width};
use crate::alloc::{FallbackDescriptor, Input};
use crate::errors::Result;
use smallvec::SmallVec;

pub struct SnippetBuilder {
    name: &'static str,
    params: Vec<(String, Var)>,
    blocks: Vec<Block>,
    next_var: u32,
}

impl SnippetBuilder {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            params: Vec::new(),
            blocks: vec![Block::new()],
            next_var: 0,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// A fresh slot, zero until assigned
    pub fn var(&mut self) -> Var {
        let var = Var(self.next_var);
        self.next_var += 1;
        var
    }

    /// Declare a runtime input; reuses the slot of a repeated name
    pub fn param(&mut self, name: &str) -> Operand {
        if let Some((_, var)) = self.params.iter().find(|(n, _)| n == name) {
            return Operand::Var(*var);
        }
        let var = self.var();
        self.params.push((name.to_string(), var));
        Operand::Var(var)
    }

    /// Bind a graph input: constants stay constants
    pub fn input(&mut self, input: &Input) -> Operand {
        match input {
            Input::Const(value) => Operand::Imm(*value),
            Input::Param(name) => self.param(name),
        }
    }

    fn push(&mut self, inst: Inst) {
        if let Some(block) = self.blocks.last_mut() {
            block.push(inst);
        }
    }

    pub fn assign(&mut self, dst: Var, src: Operand) {
        if src != Operand::Var(dst) {
            self.push(Inst::Move { dst, src });
        }
    }

    pub fn binary(&mut self, op: BinOp, lhs: Operand, rhs: Operand) -> Operand {
        if let (Operand::Imm(l), Operand::Imm(r)) = (lhs, rhs) {
            return Operand::Imm(op.apply(l, r));
        }
        match (op, rhs) {
            (BinOp::Add | BinOp::Sub | BinOp::Shl | BinOp::Sar | BinOp::Or, Operand::Imm(0)) => return lhs,
            (BinOp::And, Operand::Imm(-1)) => return lhs,
            _ => {}
        }
        let dst = self.var();
        self.push(Inst::Binary { op, dst, lhs, rhs });
        Operand::Var(dst)
    }

    pub fn add(&mut self, lhs: Operand, rhs: Operand) -> Operand {
        self.binary(BinOp::Add, lhs, rhs)
    }

    pub fn sub(&mut self, lhs: Operand, rhs: Operand) -> Operand {
        self.binary(BinOp::Sub, lhs, rhs)
    }

    pub fn shl(&mut self, lhs: Operand, rhs: Operand) -> Operand {
        self.binary(BinOp::Shl, lhs, rhs)
    }

    pub fn sar(&mut self, lhs: Operand, rhs: Operand) -> Operand {
        self.binary(BinOp::Sar, lhs, rhs)
    }

    pub fn and(&mut self, lhs: Operand, rhs: Operand) -> Operand {
        self.binary(BinOp::And, lhs, rhs)
    }

    pub fn load(&mut self, base: Operand, offset: i64, width: Width, location: Location) -> Operand {
        let dst = self.var();
        self.push(Inst::Load { dst, base, offset, width, location });
        Operand::Var(dst)
    }

    pub fn store(&mut self, base: Operand, offset: Operand, value: Operand, width: Width, location: Location) {
        self.push(Inst::Store { base, offset, value, width, location });
    }

    pub fn prefetch(&mut self, base: Operand, offset: i64) {
        self.push(Inst::Prefetch { base, offset });
    }

    pub fn stack_alloc(&mut self, bytes: u32) -> Operand {
        let dst = self.var();
        self.push(Inst::StackAlloc { dst, bytes });
        Operand::Var(dst)
    }

    pub fn call(&mut self, descriptor: FallbackDescriptor, args: &[Operand]) -> Operand {
        let dst = self.var();
        self.push(Inst::Call {
            dst,
            descriptor,
            args: SmallVec::from_slice(args),
        });
        Operand::Var(dst)
    }

    pub fn counter(&mut self, group: impl Into<String>, name: impl Into<String>, delta: Operand, context: Option<String>) {
        self.push(Inst::Counter {
            group: group.into(),
            name: name.into(),
            delta,
            context,
        });
    }

    /// Runtime assertion; dropped when it folds to true
    pub fn assert(&mut self, cond: Cond, message: &'static str) {
        if cond.clone().fold() != Folded::Const(true) {
            self.push(Inst::Assert { cond, message });
        }
    }

    pub fn vm_message(&mut self, message: &'static str) {
        self.push(Inst::VmMessage { message });
    }

    pub fn deoptimize(&mut self, action: DeoptAction, reason: DeoptReason) {
        self.push(Inst::Deoptimize { action, reason });
    }

    pub fn ret(&mut self, value: Operand) {
        self.push(Inst::Return { value });
    }

    fn nested<F>(&mut self, emit: F) -> Result<Block>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        self.blocks.push(Block::new());
        let outcome = emit(self);
        let block = self.blocks.pop().unwrap_or_default();
        outcome.map(|()| block)
    }

    pub fn if_then<F>(&mut self, cond: Cond, probability: Probability, then: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        self.if_then_else(cond, probability, then, |_| Ok(()))
    }

    pub fn if_then_else<F, G>(&mut self, cond: Cond, probability: Probability, then: F, otherwise: G) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
        G: FnOnce(&mut Self) -> Result<()>,
    {
        match cond.fold() {
            Folded::Const(true) => then(self),
            Folded::Const(false) => otherwise(self),
            Folded::Dynamic(cond) => {
                let then = self.nested(then)?;
                let otherwise = self.nested(otherwise)?;
                self.push(Inst::If { cond, probability, then, otherwise });
                Ok(())
            }
        }
    }

    /// Counted loop over `[start, end)`; emits nothing for a known-empty range
    pub fn counted_loop<F>(&mut self, start: Operand, end: Operand, step: i64, body: F) -> Result<()>
    where
        F: FnOnce(&mut Self, Operand) -> Result<()>,
    {
        debug_assert!(step > 0, "loop step must be positive");
        if let (Operand::Imm(s), Operand::Imm(e)) = (start, end) {
            if s >= e {
                return Ok(());
            }
        }
        let index = self.var();
        let body = self.nested(|b| body(b, Operand::Var(index)))?;
        self.push(Inst::Loop { index, start, end, step, body });
        Ok(())
    }

    pub fn finish(self) -> Snippet {
        let body = self.blocks.into_iter().next().unwrap_or_default();
        Snippet {
            name: self.name,
            params: self.params,
            body,
            var_count: self.next_var,
        }
    }
}
