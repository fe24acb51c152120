//! Snippet IR - the code shape produced by allocation lowering
//!
//! A snippet is structured straight-line code: plain instructions plus
//! nested `if` blocks annotated with branch probabilities and counted
//! loops. Variables are mutable 64-bit slots; `Operand::Imm` carries
//! compile-time constants so fixed and dynamic shapes share one emitter.

mod builder;
mod display;

pub use builder::SnippetBuilder;

use crate::alloc::FallbackDescriptor;
use smallvec::SmallVec;

/// A mutable 64-bit slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Var(pub(crate) u32);

impl Var {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    Imm(i64),
    Var(Var),
    /// The current thread pointer
    Thread,
}

impl Operand {
    #[inline]
    pub fn as_const(self) -> Option<i64> {
        match self {
            Operand::Imm(value) => Some(value),
            _ => None,
        }
    }

    #[inline]
    pub fn is_const(self) -> bool {
        matches!(self, Operand::Imm(_))
    }
}

impl From<Var> for Operand {
    fn from(var: Var) -> Self {
        Operand::Var(var)
    }
}

/// Access width; 8-bit loads zero-extend, 32-bit loads sign-extend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Width {
    W8,
    W32,
    W64,
}

impl Width {
    #[inline]
    pub const fn bytes(self) -> usize {
        match self {
            Width::W8 => 1,
            Width::W32 => 4,
            Width::W64 => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Shl,
    /// Arithmetic shift right
    Sar,
    And,
    Or,
}

impl BinOp {
    /// Wrapping 64-bit semantics shared by folding and execution
    pub fn apply(self, lhs: i64, rhs: i64) -> i64 {
        match self {
            BinOp::Add => lhs.wrapping_add(rhs),
            BinOp::Sub => lhs.wrapping_sub(rhs),
            BinOp::Shl => lhs.wrapping_shl(rhs as u32),
            BinOp::Sar => lhs.wrapping_shr(rhs as u32),
            BinOp::And => lhs & rhs,
            BinOp::Or => lhs | rhs,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    Ne,
    /// Signed comparisons
    Lt,
    Le,
    Ge,
    /// Unsigned comparisons, required for addresses
    Below,
    BelowOrEqual,
}

impl CmpOp {
    pub fn evaluate(self, lhs: i64, rhs: i64) -> bool {
        match self {
            CmpOp::Eq => lhs == rhs,
            CmpOp::Ne => lhs != rhs,
            CmpOp::Lt => lhs < rhs,
            CmpOp::Le => lhs <= rhs,
            CmpOp::Ge => lhs >= rhs,
            CmpOp::Below => (lhs as u64) < (rhs as u64),
            CmpOp::BelowOrEqual => (lhs as u64) <= (rhs as u64),
        }
    }
}

/// Branch condition, `And`/`Or` short-circuit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cond {
    Cmp { op: CmpOp, lhs: Operand, rhs: Operand },
    And(Box<Cond>, Box<Cond>),
    Or(Box<Cond>, Box<Cond>),
}

impl Cond {
    pub fn cmp(op: CmpOp, lhs: Operand, rhs: Operand) -> Self {
        Cond::Cmp { op, lhs, rhs }
    }

    pub fn eq(lhs: Operand, rhs: Operand) -> Self {
        Self::cmp(CmpOp::Eq, lhs, rhs)
    }

    pub fn ne(lhs: Operand, rhs: Operand) -> Self {
        Self::cmp(CmpOp::Ne, lhs, rhs)
    }

    pub fn lt(lhs: Operand, rhs: Operand) -> Self {
        Self::cmp(CmpOp::Lt, lhs, rhs)
    }

    pub fn le(lhs: Operand, rhs: Operand) -> Self {
        Self::cmp(CmpOp::Le, lhs, rhs)
    }

    pub fn below(lhs: Operand, rhs: Operand) -> Self {
        Self::cmp(CmpOp::Below, lhs, rhs)
    }

    pub fn below_or_equal(lhs: Operand, rhs: Operand) -> Self {
        Self::cmp(CmpOp::BelowOrEqual, lhs, rhs)
    }

    pub fn and(self, other: Cond) -> Self {
        Cond::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Cond) -> Self {
        Cond::Or(Box::new(self), Box::new(other))
    }

    /// Simplify against constant operands
    pub fn fold(self) -> Folded {
        match self {
            Cond::Cmp { op, lhs: Operand::Imm(l), rhs: Operand::Imm(r) } => Folded::Const(op.evaluate(l, r)),
            Cond::Cmp { .. } => Folded::Dynamic(self),
            Cond::And(lhs, rhs) => match ((*lhs).fold(), (*rhs).fold()) {
                (Folded::Const(false), _) | (_, Folded::Const(false)) => Folded::Const(false),
                (Folded::Const(true), other) | (other, Folded::Const(true)) => other,
                (Folded::Dynamic(l), Folded::Dynamic(r)) => Folded::Dynamic(l.and(r)),
            },
            Cond::Or(lhs, rhs) => match ((*lhs).fold(), (*rhs).fold()) {
                (Folded::Const(true), _) | (_, Folded::Const(true)) => Folded::Const(true),
                (Folded::Const(false), other) | (other, Folded::Const(false)) => other,
                (Folded::Dynamic(l), Folded::Dynamic(r)) => Folded::Dynamic(l.or(r)),
            },
        }
    }
}

/// Result of [`Cond::fold`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Folded {
    Const(bool),
    Dynamic(Cond),
}

/// Branch probability of the `then` arm
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Probability(pub f64);

impl Probability {
    pub const FAST_PATH: Probability = Probability(0.99);
    pub const SLOW_PATH: Probability = Probability(0.01);
    pub const FREQUENT: Probability = Probability(0.9);
    pub const NOT_FREQUENT: Probability = Probability(0.1);
    pub const LIKELY: Probability = Probability(0.6);
}

/// Memory location touched by a load or store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Location {
    TlabTop,
    TlabEnd,
    MarkWord,
    HubWrite,
    ArrayLength,
    /// Object body initialization
    Init,
    LayoutHelper,
    PrototypeMarkWord,
    KlassInitState,
    AccessFlags,
    ClassHub,
    ClassArrayKlass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeoptAction {
    None,
    InvalidateReprofile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeoptReason {
    RuntimeConstraint,
}

pub type Block = Vec<Inst>;

#[derive(Debug, Clone, PartialEq)]
pub enum Inst {
    Move {
        dst: Var,
        src: Operand,
    },
    Binary {
        op: BinOp,
        dst: Var,
        lhs: Operand,
        rhs: Operand,
    },
    Load {
        dst: Var,
        base: Operand,
        offset: i64,
        width: Width,
        location: Location,
    },
    Store {
        base: Operand,
        offset: Operand,
        value: Operand,
        width: Width,
        location: Location,
    },
    /// Cache hint, never changes memory
    Prefetch {
        base: Operand,
        offset: i64,
    },
    /// Scratch bytes in the current frame
    StackAlloc {
        dst: Var,
        bytes: u32,
    },
    If {
        cond: Cond,
        probability: Probability,
        then: Block,
        otherwise: Block,
    },
    /// `index = start; while index < end (signed) { body; index += step }`
    Loop {
        index: Var,
        start: Operand,
        end: Operand,
        step: i64,
        body: Block,
    },
    Call {
        dst: Var,
        descriptor: FallbackDescriptor,
        args: SmallVec<[Operand; 4]>,
    },
    Counter {
        group: String,
        name: String,
        delta: Operand,
        /// Call-site label for per-site counters
        context: Option<String>,
    },
    Assert {
        cond: Cond,
        message: &'static str,
    },
    VmMessage {
        message: &'static str,
    },
    Deoptimize {
        action: DeoptAction,
        reason: DeoptReason,
    },
    Return {
        value: Operand,
    },
}

/// A lowered allocation, ready to be inlined or executed
#[derive(Debug, Clone, PartialEq)]
pub struct Snippet {
    name: &'static str,
    params: Vec<(String, Var)>,
    body: Block,
    var_count: u32,
}

impl Snippet {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Runtime inputs in declaration order
    pub fn params(&self) -> &[(String, Var)] {
        &self.params
    }

    pub fn body(&self) -> &[Inst] {
        &self.body
    }

    pub fn var_count(&self) -> usize {
        self.var_count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// All instructions in emission order, nested blocks flattened
    pub fn instructions(&self) -> Vec<&Inst> {
        fn walk<'a>(block: &'a [Inst], out: &mut Vec<&'a Inst>) {
            for inst in block {
                out.push(inst);
                match inst {
                    Inst::If { then, otherwise, .. } => {
                        walk(then, out);
                        walk(otherwise, out);
                    }
                    Inst::Loop { body, .. } => walk(body, out),
                    _ => {}
                }
            }
        }

        let mut out = Vec::new();
        walk(&self.body, &mut out);
        out
    }

    /// Number of instructions including nested ones
    pub fn len(&self) -> usize {
        self.instructions().len()
    }

    /// Position of the first store to `location` in emission order
    pub fn first_store_to(&self, location: Location) -> Option<usize> {
        self.instructions().iter().position(|inst| {
            matches!(inst, Inst::Store { location: l, .. } if *l == location)
        })
    }

    pub fn calls(&self) -> Vec<FallbackDescriptor> {
        self.instructions()
            .iter()
            .filter_map(|inst| match inst {
                Inst::Call { descriptor, .. } => Some(*descriptor),
                _ => None,
            })
            .collect()
    }

    pub fn contains_loop(&self) -> bool {
        self.instructions().iter().any(|inst| matches!(inst, Inst::Loop { .. }))
    }
}
