//! Instructions.

use serde::Serialize;
use std::fmt;

use super::types::{Incoming, Type, Value};
use super::BlockId;

/// Two-operand arithmetic and bitwise operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    SDiv,
    UDiv,
    SRem,
    URem,
    Shl,
    LShr,
    AShr,
    And,
    Or,
    Xor,
    FAdd,
    FSub,
    FMul,
    FDiv,
    FRem,
}

impl BinaryOp {
    pub const ALL: [BinaryOp; 18] = [
        BinaryOp::Add,
        BinaryOp::Sub,
        BinaryOp::Mul,
        BinaryOp::SDiv,
        BinaryOp::UDiv,
        BinaryOp::SRem,
        BinaryOp::URem,
        BinaryOp::Shl,
        BinaryOp::LShr,
        BinaryOp::AShr,
        BinaryOp::And,
        BinaryOp::Or,
        BinaryOp::Xor,
        BinaryOp::FAdd,
        BinaryOp::FSub,
        BinaryOp::FMul,
        BinaryOp::FDiv,
        BinaryOp::FRem,
    ];

    pub fn mnemonic(&self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::SDiv => "sdiv",
            BinaryOp::UDiv => "udiv",
            BinaryOp::SRem => "srem",
            BinaryOp::URem => "urem",
            BinaryOp::Shl => "shl",
            BinaryOp::LShr => "lshr",
            BinaryOp::AShr => "ashr",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Xor => "xor",
            BinaryOp::FAdd => "fadd",
            BinaryOp::FSub => "fsub",
            BinaryOp::FMul => "fmul",
            BinaryOp::FDiv => "fdiv",
            BinaryOp::FRem => "frem",
        }
    }

    pub fn from_mnemonic(s: &str) -> Option<BinaryOp> {
        BinaryOp::ALL.iter().copied().find(|op| op.mnemonic() == s)
    }

    pub fn is_float(&self) -> bool {
        matches!(
            self,
            BinaryOp::FAdd | BinaryOp::FSub | BinaryOp::FMul | BinaryOp::FDiv | BinaryOp::FRem
        )
    }
}

/// Conversion operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CastOp {
    SExt,
    ZExt,
    Trunc,
    SIToFP,
    UIToFP,
    FPToSI,
    FPToUI,
    FPExt,
    FPTrunc,
    BitCast,
    PtrToInt,
    IntToPtr,
}

impl CastOp {
    pub const ALL: [CastOp; 12] = [
        CastOp::SExt,
        CastOp::ZExt,
        CastOp::Trunc,
        CastOp::SIToFP,
        CastOp::UIToFP,
        CastOp::FPToSI,
        CastOp::FPToUI,
        CastOp::FPExt,
        CastOp::FPTrunc,
        CastOp::BitCast,
        CastOp::PtrToInt,
        CastOp::IntToPtr,
    ];

    pub fn mnemonic(&self) -> &'static str {
        match self {
            CastOp::SExt => "sext",
            CastOp::ZExt => "zext",
            CastOp::Trunc => "trunc",
            CastOp::SIToFP => "sitofp",
            CastOp::UIToFP => "uitofp",
            CastOp::FPToSI => "fptosi",
            CastOp::FPToUI => "fptoui",
            CastOp::FPExt => "fpext",
            CastOp::FPTrunc => "fptrunc",
            CastOp::BitCast => "bitcast",
            CastOp::PtrToInt => "ptrtoint",
            CastOp::IntToPtr => "inttoptr",
        }
    }

    pub fn from_mnemonic(s: &str) -> Option<CastOp> {
        CastOp::ALL.iter().copied().find(|op| op.mnemonic() == s)
    }
}

/// `icmp` predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum IntPredicate {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
    Ult,
    Ule,
    Ugt,
    Uge,
}

impl IntPredicate {
    pub const ALL: [IntPredicate; 10] = [
        IntPredicate::Eq,
        IntPredicate::Ne,
        IntPredicate::Slt,
        IntPredicate::Sle,
        IntPredicate::Sgt,
        IntPredicate::Sge,
        IntPredicate::Ult,
        IntPredicate::Ule,
        IntPredicate::Ugt,
        IntPredicate::Uge,
    ];

    pub fn mnemonic(&self) -> &'static str {
        match self {
            IntPredicate::Eq => "eq",
            IntPredicate::Ne => "ne",
            IntPredicate::Slt => "slt",
            IntPredicate::Sle => "sle",
            IntPredicate::Sgt => "sgt",
            IntPredicate::Sge => "sge",
            IntPredicate::Ult => "ult",
            IntPredicate::Ule => "ule",
            IntPredicate::Ugt => "ugt",
            IntPredicate::Uge => "uge",
        }
    }

    pub fn from_mnemonic(s: &str) -> Option<IntPredicate> {
        IntPredicate::ALL.iter().copied().find(|p| p.mnemonic() == s)
    }
}

/// `fcmp` predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FloatPredicate {
    False,
    Oeq,
    Ogt,
    Oge,
    Olt,
    Ole,
    One,
    Ord,
    Ueq,
    Ugt,
    Uge,
    Ult,
    Ule,
    Une,
    Uno,
    True,
}

impl FloatPredicate {
    pub const ALL: [FloatPredicate; 16] = [
        FloatPredicate::False,
        FloatPredicate::Oeq,
        FloatPredicate::Ogt,
        FloatPredicate::Oge,
        FloatPredicate::Olt,
        FloatPredicate::Ole,
        FloatPredicate::One,
        FloatPredicate::Ord,
        FloatPredicate::Ueq,
        FloatPredicate::Ugt,
        FloatPredicate::Uge,
        FloatPredicate::Ult,
        FloatPredicate::Ule,
        FloatPredicate::Une,
        FloatPredicate::Uno,
        FloatPredicate::True,
    ];

    pub fn mnemonic(&self) -> &'static str {
        match self {
            FloatPredicate::False => "false",
            FloatPredicate::Oeq => "oeq",
            FloatPredicate::Ogt => "ogt",
            FloatPredicate::Oge => "oge",
            FloatPredicate::Olt => "olt",
            FloatPredicate::Ole => "ole",
            FloatPredicate::One => "one",
            FloatPredicate::Ord => "ord",
            FloatPredicate::Ueq => "ueq",
            FloatPredicate::Ugt => "ugt",
            FloatPredicate::Uge => "uge",
            FloatPredicate::Ult => "ult",
            FloatPredicate::Ule => "ule",
            FloatPredicate::Une => "une",
            FloatPredicate::Uno => "uno",
            FloatPredicate::True => "true",
        }
    }

    pub fn from_mnemonic(s: &str) -> Option<FloatPredicate> {
        FloatPredicate::ALL.iter().copied().find(|p| p.mnemonic() == s)
    }
}

/// The operation an instruction performs, without its operands.
///
/// Access paths record these as their fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Opcode {
    Phi,
    Binary(BinaryOp),
    Cast(CastOp),
    ICmp,
    FCmp,
    Select,
    GetElementPtr,
    Load,
    Store,
    Call,
    Br,
    CondBr,
    Ret,
    Unreachable,
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Opcode::Phi => write!(f, "phi"),
            Opcode::Binary(op) => write!(f, "{}", op.mnemonic()),
            Opcode::Cast(op) => write!(f, "{}", op.mnemonic()),
            Opcode::ICmp => write!(f, "icmp"),
            Opcode::FCmp => write!(f, "fcmp"),
            Opcode::Select => write!(f, "select"),
            Opcode::GetElementPtr => write!(f, "getelementptr"),
            Opcode::Load => write!(f, "load"),
            Opcode::Store => write!(f, "store"),
            Opcode::Call => write!(f, "call"),
            Opcode::Br | Opcode::CondBr => write!(f, "br"),
            Opcode::Ret => write!(f, "ret"),
            Opcode::Unreachable => write!(f, "unreachable"),
        }
    }
}

/// Operation and operands of an instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum InstKind {
    /// Merge node: selects a value by the predecessor control came from
    Phi { incoming: Vec<Incoming> },
    Binary { op: BinaryOp, lhs: Value, rhs: Value },
    /// Result type is the instruction's type
    Cast { op: CastOp, value: Value },
    ICmp { pred: IntPredicate, lhs: Value, rhs: Value },
    FCmp { pred: FloatPredicate, lhs: Value, rhs: Value },
    Select { cond: Value, then_value: Value, else_value: Value },
    /// Pointer computation: `base` offset by `indices` elements of `elem_ty`
    GetElementPtr { elem_ty: Type, base: Value, indices: Vec<Value> },
    /// Loaded type is the instruction's type
    Load { addr: Value },
    Store { value: Value, addr: Value },
    Call { callee: String, args: Vec<Value> },
    Br { dest: BlockId },
    CondBr { cond: Value, then_dest: BlockId, else_dest: BlockId },
    Ret { value: Option<Value> },
    Unreachable,
}

impl InstKind {
    pub fn opcode(&self) -> Opcode {
        match self {
            InstKind::Phi { .. } => Opcode::Phi,
            InstKind::Binary { op, .. } => Opcode::Binary(*op),
            InstKind::Cast { op, .. } => Opcode::Cast(*op),
            InstKind::ICmp { .. } => Opcode::ICmp,
            InstKind::FCmp { .. } => Opcode::FCmp,
            InstKind::Select { .. } => Opcode::Select,
            InstKind::GetElementPtr { .. } => Opcode::GetElementPtr,
            InstKind::Load { .. } => Opcode::Load,
            InstKind::Store { .. } => Opcode::Store,
            InstKind::Call { .. } => Opcode::Call,
            InstKind::Br { .. } => Opcode::Br,
            InstKind::CondBr { .. } => Opcode::CondBr,
            InstKind::Ret { .. } => Opcode::Ret,
            InstKind::Unreachable => Opcode::Unreachable,
        }
    }

    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstKind::Br { .. } | InstKind::CondBr { .. } | InstKind::Ret { .. } | InstKind::Unreachable
        )
    }

    pub fn is_phi(&self) -> bool {
        matches!(self, InstKind::Phi { .. })
    }

    /// Address operand of a load or store.
    pub fn memory_address(&self) -> Option<&Value> {
        match self {
            InstKind::Load { addr } | InstKind::Store { addr, .. } => Some(addr),
            _ => None,
        }
    }

    /// All value operands, in textual order.
    pub fn operands(&self) -> Vec<&Value> {
        match self {
            InstKind::Phi { incoming } => incoming.iter().map(|(v, _)| v).collect(),
            InstKind::Binary { lhs, rhs, .. }
            | InstKind::ICmp { lhs, rhs, .. }
            | InstKind::FCmp { lhs, rhs, .. } => vec![lhs, rhs],
            InstKind::Cast { value, .. } => vec![value],
            InstKind::Select { cond, then_value, else_value } => vec![cond, then_value, else_value],
            InstKind::GetElementPtr { base, indices, .. } => {
                std::iter::once(base).chain(indices.iter()).collect()
            }
            InstKind::Load { addr } => vec![addr],
            InstKind::Store { value, addr } => vec![value, addr],
            InstKind::Call { args, .. } => args.iter().collect(),
            InstKind::CondBr { cond, .. } => vec![cond],
            InstKind::Ret { value } => value.iter().collect(),
            InstKind::Br { .. } | InstKind::Unreachable => Vec::new(),
        }
    }

    pub fn operands_mut(&mut self) -> Vec<&mut Value> {
        match self {
            InstKind::Phi { incoming } => incoming.iter_mut().map(|(v, _)| v).collect(),
            InstKind::Binary { lhs, rhs, .. }
            | InstKind::ICmp { lhs, rhs, .. }
            | InstKind::FCmp { lhs, rhs, .. } => vec![lhs, rhs],
            InstKind::Cast { value, .. } => vec![value],
            InstKind::Select { cond, then_value, else_value } => vec![cond, then_value, else_value],
            InstKind::GetElementPtr { base, indices, .. } => {
                std::iter::once(base).chain(indices.iter_mut()).collect()
            }
            InstKind::Load { addr } => vec![addr],
            InstKind::Store { value, addr } => vec![value, addr],
            InstKind::Call { args, .. } => args.iter_mut().collect(),
            InstKind::CondBr { cond, .. } => vec![cond],
            InstKind::Ret { value } => value.iter_mut().collect(),
            InstKind::Br { .. } | InstKind::Unreachable => Vec::new(),
        }
    }

    /// Successor blocks of a terminator; empty for everything else.
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            InstKind::Br { dest } => vec![*dest],
            InstKind::CondBr { then_dest, else_dest, .. } => vec![*then_dest, *else_dest],
            _ => Vec::new(),
        }
    }

    /// Every block reference: terminator targets and phi incoming blocks.
    pub fn block_refs_mut(&mut self) -> Vec<&mut BlockId> {
        match self {
            InstKind::Br { dest } => vec![dest],
            InstKind::CondBr { then_dest, else_dest, .. } => vec![then_dest, else_dest],
            InstKind::Phi { incoming } => incoming.iter_mut().map(|(_, b)| b).collect(),
            _ => Vec::new(),
        }
    }

    /// Retarget terminator edges from `from` to `to`. Returns whether any edge changed.
    pub fn replace_successor(&mut self, from: BlockId, to: BlockId) -> bool {
        let mut changed = false;
        match self {
            InstKind::Br { dest } if *dest == from => {
                *dest = to;
                changed = true;
            }
            InstKind::CondBr { then_dest, else_dest, .. } => {
                for dest in [then_dest, else_dest] {
                    if *dest == from {
                        *dest = to;
                        changed = true;
                    }
                }
            }
            _ => {}
        }
        changed
    }

    pub fn uses(&self, value: &Value) -> bool {
        self.operands().into_iter().any(|v| v == value)
    }

    /// Incoming value of a phi for `pred`.
    pub fn incoming_for(&self, pred: BlockId) -> Option<&Value> {
        match self {
            InstKind::Phi { incoming } => incoming.iter().find(|(_, b)| *b == pred).map(|(v, _)| v),
            _ => None,
        }
    }
}

/// An instruction node in a function's arena.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Result name without the `%` sigil
    pub name: Option<String>,
    /// Result type (`void` when the instruction produces nothing)
    pub ty: Type,
    pub kind: InstKind,
    pub(crate) block: Option<BlockId>,
}

impl Instruction {
    pub fn new(name: Option<String>, ty: Type, kind: InstKind) -> Self {
        Self { name, ty, kind, block: None }
    }

    /// Block the instruction currently lives in; `None` once removed.
    pub fn block(&self) -> Option<BlockId> {
        self.block
    }

    pub fn opcode(&self) -> Opcode {
        self.kind.opcode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::Constant;

    #[test]
    fn test_mnemonics_round_trip() {
        for op in BinaryOp::ALL {
            assert_eq!(BinaryOp::from_mnemonic(op.mnemonic()), Some(op));
        }
        for op in CastOp::ALL {
            assert_eq!(CastOp::from_mnemonic(op.mnemonic()), Some(op));
        }
        assert_eq!(IntPredicate::from_mnemonic("sge"), Some(IntPredicate::Sge));
        assert_eq!(FloatPredicate::from_mnemonic("olt"), Some(FloatPredicate::Olt));
        assert_eq!(BinaryOp::from_mnemonic("fma"), None);
    }

    #[test]
    fn test_replace_successor() {
        let a = BlockId::new(0);
        let b = BlockId::new(1);
        let c = BlockId::new(2);
        let mut br = InstKind::CondBr {
            cond: Value::Const(Constant::int(Type::I1, 1)),
            then_dest: a,
            else_dest: b,
        };
        assert!(br.replace_successor(b, c));
        assert_eq!(br.successors(), vec![a, c]);
        assert!(!br.replace_successor(b, c));
    }

    #[test]
    fn test_store_operands_order() {
        let store = InstKind::Store {
            value: Value::Param(0),
            addr: Value::Param(1),
        };
        assert_eq!(store.operands(), vec![&Value::Param(0), &Value::Param(1)]);
        assert_eq!(store.memory_address(), Some(&Value::Param(1)));
        assert!(!store.is_terminator());
    }
}
