//! Text form of snippets, used by the CLI and in lowering logs

use super::{BinOp, CmpOp, Cond, Inst, Location, Operand, Snippet, Width};
use std::fmt::{self, Display, Formatter, Write};

impl Display for Operand {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Imm(value) if *value < 0 || *value > 0xFFFF => write!(f, "{:#x}", value),
            Operand::Imm(value) => write!(f, "{}", value),
            Operand::Var(var) => write!(f, "v{}", var.0),
            Operand::Thread => f.write_str("thread"),
        }
    }
}

impl Display for BinOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Shl => "<<",
            BinOp::Sar => ">>",
            BinOp::And => "&",
            BinOp::Or => "|",
        })
    }
}

impl Display for CmpOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Ge => ">=",
            CmpOp::Below => "<u",
            CmpOp::BelowOrEqual => "<=u",
        })
    }
}

impl Display for Cond {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Cond::Cmp { op, lhs, rhs } => write!(f, "{} {} {}", lhs, op, rhs),
            Cond::And(lhs, rhs) => write!(f, "({}) && ({})", lhs, rhs),
            Cond::Or(lhs, rhs) => write!(f, "({}) || ({})", lhs, rhs),
        }
    }
}

impl Display for Width {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Width::W8 => "i8",
            Width::W32 => "i32",
            Width::W64 => "i64",
        })
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Location::TlabTop => "tlab.top",
            Location::TlabEnd => "tlab.end",
            Location::MarkWord => "mark",
            Location::HubWrite => "hub",
            Location::ArrayLength => "length",
            Location::Init => "init",
            Location::LayoutHelper => "klass.layout",
            Location::PrototypeMarkWord => "klass.prototype",
            Location::KlassInitState => "klass.init_state",
            Location::AccessFlags => "klass.flags",
            Location::ClassHub => "mirror.klass",
            Location::ClassArrayKlass => "mirror.array_klass",
        })
    }
}

fn write_block(out: &mut String, block: &[Inst], depth: usize) -> fmt::Result {
    for inst in block {
        write_inst(out, inst, depth)?;
    }
    Ok(())
}

fn write_inst(out: &mut String, inst: &Inst, depth: usize) -> fmt::Result {
    let pad = "  ".repeat(depth);
    match inst {
        Inst::Move { dst, src } => writeln!(out, "{pad}v{} = {}", dst.0, src),
        Inst::Binary { op, dst, lhs, rhs } => writeln!(out, "{pad}v{} = {} {} {}", dst.0, lhs, op, rhs),
        Inst::Load { dst, base, offset, width, location } => {
            writeln!(out, "{pad}v{} = load.{} [{} + {}] ; {}", dst.0, width, base, offset, location)
        }
        Inst::Store { base, offset, value, width, location } => {
            writeln!(out, "{pad}store.{} [{} + {}] = {} ; {}", width, base, offset, value, location)
        }
        Inst::Prefetch { base, offset } => writeln!(out, "{pad}prefetch [{} + {}]", base, offset),
        Inst::StackAlloc { dst, bytes } => writeln!(out, "{pad}v{} = stack_alloc {}", dst.0, bytes),
        Inst::If { cond, probability, then, otherwise } => {
            writeln!(out, "{pad}if {} (p={}) {{", cond, probability.0)?;
            write_block(out, then, depth + 1)?;
            if !otherwise.is_empty() {
                writeln!(out, "{pad}}} else {{")?;
                write_block(out, otherwise, depth + 1)?;
            }
            writeln!(out, "{pad}}}")
        }
        Inst::Loop { index, start, end, step, body } => {
            writeln!(out, "{pad}for v{} in ({}..{}).step_by({}) {{", index.0, start, end, step)?;
            write_block(out, body, depth + 1)?;
            writeln!(out, "{pad}}}")
        }
        Inst::Call { dst, descriptor, args } => {
            let args: Vec<String> = args.iter().map(ToString::to_string).collect();
            writeln!(out, "{pad}v{} = call {}({})", dst.0, descriptor, args.join(", "))
        }
        Inst::Counter { group, name, delta, context } => match context {
            Some(context) => writeln!(out, "{pad}counter[{}/{} @ {}] += {}", group, name, context, delta),
            None => writeln!(out, "{pad}counter[{}/{}] += {}", group, name, delta),
        },
        Inst::Assert { cond, message } => writeln!(out, "{pad}assert {} \"{}\"", cond, message),
        Inst::VmMessage { message } => writeln!(out, "{pad}vm_message \"{}\"", message),
        Inst::Deoptimize { action, reason } => writeln!(out, "{pad}deoptimize {:?} {:?}", action, reason),
        Inst::Return { value } => writeln!(out, "{pad}return {}", value),
    }
}

impl Display for Snippet {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self.params.iter().map(|(name, var)| format!("{name}: v{}", var.0)).collect();
        let mut body = String::new();
        write_block(&mut body, &self.body, 1)?;
        writeln!(f, "snippet {}({}) {{", self.name, params.join(", "))?;
        f.write_str(&body)?;
        f.write_str("}")
    }
}
