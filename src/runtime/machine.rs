//! Snippet interpreter
//!
//! Executes a snippet against simulated memory with a thread block at a
//! fixed address. Fallback calls go to a [`SlowPathRuntime`]; counter
//! instructions accumulate into [`DynamicCounters`].

use super::counters::DynamicCounters;
use super::eden::SlowPathRuntime;
use super::memory::Memory;
use crate::alloc::{FallbackCall, ThreadAllocationBuffer};
use crate::config::LoweringConfig;
use crate::errors::ExecError;
use crate::logging;
use crate::snippet::{Cond, DeoptAction, DeoptReason, Inst, Location, Operand, Snippet, Width};
use smallvec::SmallVec;
use std::sync::Arc;

/// How a snippet run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Returned an object address
    Object(u64),
    Deoptimized { action: DeoptAction, reason: DeoptReason },
    VmMessage(String),
    /// Fell off the end without returning
    Completed,
}

impl Outcome {
    pub fn object(&self) -> Option<u64> {
        match self {
            Outcome::Object(addr) => Some(*addr),
            _ => None,
        }
    }

    pub fn is_deoptimized(&self) -> bool {
        matches!(self, Outcome::Deoptimized { .. })
    }
}

/// One executed store, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreRecord {
    pub addr: u64,
    pub width: usize,
    pub location: Location,
}

enum Flow {
    Next,
    Exit(Outcome),
}

/// Scratch stack for `StackAlloc`
#[derive(Debug, Clone, Copy)]
pub struct StackRegion {
    pub base: u64,
    pub size: u32,
}

pub struct Machine<R: SlowPathRuntime> {
    config: Arc<LoweringConfig>,
    memory: Memory,
    runtime: R,
    thread: u64,
    stack: StackRegion,
    stack_used: u32,
    vars: Vec<i64>,
    stores: Vec<StoreRecord>,
    counters: Arc<DynamicCounters>,
}

impl<R: SlowPathRuntime> Machine<R> {
    /// `thread` and `stack` must already be mapped in `memory`
    pub fn new(config: Arc<LoweringConfig>, memory: Memory, runtime: R, thread: u64, stack: StackRegion) -> Self {
        Self {
            config,
            memory,
            runtime,
            thread,
            stack,
            stack_used: 0,
            vars: Vec::new(),
            stores: Vec::new(),
            counters: Arc::new(DynamicCounters::new()),
        }
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn thread(&self) -> u64 {
        self.thread
    }

    pub fn counters(&self) -> Arc<DynamicCounters> {
        Arc::clone(&self.counters)
    }

    /// Stores executed by the last run
    pub fn stores(&self) -> &[StoreRecord] {
        &self.stores
    }

    /// Position of the first executed store to `location`
    pub fn store_index(&self, location: Location) -> Option<usize> {
        self.stores.iter().position(|s| s.location == location)
    }

    pub fn tlab(&self) -> Result<ThreadAllocationBuffer, ExecError> {
        let top = self.memory.read_word(self.thread + self.config.thread.tlab_top_offset as u64)?;
        let end = self.memory.read_word(self.thread + self.config.thread.tlab_end_offset as u64)?;
        Ok(ThreadAllocationBuffer { top, end })
    }

    pub fn set_tlab(&mut self, tlab: ThreadAllocationBuffer) -> Result<(), ExecError> {
        self.memory.write_word(self.thread + self.config.thread.tlab_top_offset as u64, tlab.top)?;
        self.memory.write_word(self.thread + self.config.thread.tlab_end_offset as u64, tlab.end)
    }

    /// Execute `snippet` with its parameters bound by name
    pub fn run(&mut self, snippet: &Snippet, args: &[(&str, i64)]) -> Result<Outcome, ExecError> {
        self.vars = vec![0; snippet.var_count()];
        self.stores.clear();
        self.stack_used = 0;

        for (name, var) in snippet.params() {
            let value = args
                .iter()
                .find(|(arg, _)| arg == name)
                .map(|(_, value)| *value)
                .ok_or_else(|| ExecError::MissingParameter(name.clone()))?;
            self.vars[var.index()] = value;
        }

        tracing::trace!(snippet = snippet.name(), "executing snippet");
        match self.exec_block(snippet.body())? {
            Flow::Exit(outcome) => Ok(outcome),
            Flow::Next => Ok(Outcome::Completed),
        }
    }

    #[inline]
    fn value(&self, operand: Operand) -> i64 {
        match operand {
            Operand::Imm(value) => value,
            Operand::Var(var) => self.vars[var.index()],
            Operand::Thread => self.thread as i64,
        }
    }

    fn eval(&self, cond: &Cond) -> bool {
        match cond {
            Cond::Cmp { op, lhs, rhs } => op.evaluate(self.value(*lhs), self.value(*rhs)),
            Cond::And(lhs, rhs) => self.eval(lhs) && self.eval(rhs),
            Cond::Or(lhs, rhs) => self.eval(lhs) || self.eval(rhs),
        }
    }

    fn address(&self, base: Operand, offset: i64) -> u64 {
        (self.value(base) as u64).wrapping_add(offset as u64)
    }

    fn exec_block(&mut self, block: &[Inst]) -> Result<Flow, ExecError> {
        for inst in block {
            if let Flow::Exit(outcome) = self.exec(inst)? {
                return Ok(Flow::Exit(outcome));
            }
        }
        Ok(Flow::Next)
    }

    fn exec(&mut self, inst: &Inst) -> Result<Flow, ExecError> {
        match inst {
            Inst::Move { dst, src } => self.vars[dst.index()] = self.value(*src),
            Inst::Binary { op, dst, lhs, rhs } => {
                self.vars[dst.index()] = op.apply(self.value(*lhs), self.value(*rhs));
            }
            Inst::Load { dst, base, offset, width, .. } => {
                let addr = self.address(*base, *offset);
                self.vars[dst.index()] = self.memory.read(addr, *width)?;
            }
            Inst::Store { base, offset, value, width, location } => {
                let addr = self.address(*base, self.value(*offset));
                self.memory.write(addr, *width, self.value(*value))?;
                self.stores.push(StoreRecord { addr, width: width.bytes(), location: *location });
            }
            Inst::Prefetch { .. } => {}
            Inst::StackAlloc { dst, bytes } => {
                let aligned = (*bytes + 7) & !7;
                if self.stack_used + aligned > self.stack.size {
                    return Err(ExecError::StackOverflow { requested: *bytes });
                }
                self.vars[dst.index()] = (self.stack.base + u64::from(self.stack_used)) as i64;
                self.stack_used += aligned;
            }
            Inst::If { cond, then, otherwise, .. } => {
                let taken = if self.eval(cond) { then } else { otherwise };
                return self.exec_block(taken);
            }
            Inst::Loop { index, start, end, step, body } => {
                self.vars[index.index()] = self.value(*start);
                while self.vars[index.index()] < self.value(*end) {
                    if let Flow::Exit(outcome) = self.exec_block(body)? {
                        return Ok(Flow::Exit(outcome));
                    }
                    self.vars[index.index()] += step;
                }
            }
            Inst::Call { dst, descriptor, args } => {
                let call = FallbackCall {
                    descriptor: *descriptor,
                    args: args.iter().map(|arg| self.value(*arg)).collect::<SmallVec<[i64; 4]>>(),
                };
                let result = self.runtime.call(&mut self.memory, &call)?;
                self.vars[dst.index()] = result as i64;
            }
            Inst::Counter { group, name, delta, context } => {
                self.counters.increment(group, name, context.as_deref(), self.value(*delta));
            }
            Inst::Assert { cond, message } => {
                if !self.eval(cond) {
                    return Err(ExecError::AssertionFailed(*message));
                }
            }
            Inst::VmMessage { message } => {
                tracing::warn!(text = *message, "vm message");
                return Ok(Flow::Exit(Outcome::VmMessage(message.to_string())));
            }
            Inst::Deoptimize { action, reason } => {
                logging::log_deoptimization(*action, *reason);
                return Ok(Flow::Exit(Outcome::Deoptimized { action: *action, reason: *reason }));
            }
            Inst::Return { value } => {
                return Ok(Flow::Exit(Outcome::Object(self.value(*value) as u64)));
            }
        }
        Ok(Flow::Next)
    }
}
