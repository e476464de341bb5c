//! Instruction builder with an insertion point.
//!
//! Transforms use this to materialize new instructions without spelling out
//! `Instruction::new` and result types by hand.

use super::function::Function;
use super::inst::{BinaryOp, InstKind, Instruction, IntPredicate};
use super::types::{Incoming, Type, Value};
use super::{BlockId, InstId};

#[derive(Debug, Clone, Copy)]
enum InsertPoint {
    End(BlockId),
    Before { anchor: InstId, block: BlockId },
}

/// Creates instructions at a movable insertion point.
pub struct InstBuilder<'f> {
    func: &'f mut Function,
    point: InsertPoint,
}

impl<'f> InstBuilder<'f> {
    /// Builder appending to the end of `block`.
    pub fn at_end(func: &'f mut Function, block: BlockId) -> Self {
        Self {
            func,
            point: InsertPoint::End(block),
        }
    }

    /// Builder inserting before `inst`, or `None` when `inst` is not
    /// attached to a block.
    pub fn before(func: &'f mut Function, inst: InstId) -> Option<Self> {
        let block = func.inst(inst).block()?;
        Some(Self {
            func,
            point: InsertPoint::Before { anchor: inst, block },
        })
    }

    /// Builder inserting before the terminator of `block`, or at its end
    /// when the block is not terminated yet.
    pub fn before_terminator(func: &'f mut Function, block: BlockId) -> Self {
        let point = match func.terminator(block) {
            Some(anchor) => InsertPoint::Before { anchor, block },
            None => InsertPoint::End(block),
        };
        Self { func, point }
    }

    pub fn function(&self) -> &Function {
        self.func
    }

    fn insert(&mut self, name: Option<&str>, ty: Type, kind: InstKind) -> InstId {
        let name = name.map(|n| self.func.unique_value_name(n));
        let inst = Instruction::new(name, ty, kind);
        match self.point {
            InsertPoint::End(block) => self.func.append_inst(block, inst),
            InsertPoint::Before { anchor, block } => {
                // The builder holds the only borrow, so the anchor stays where it was found.
                debug_assert_eq!(self.func.inst(anchor).block(), Some(block), "insertion anchor moved");
                match self.func.insert_inst_before(anchor, inst.clone()) {
                    Some(id) => id,
                    None => self.func.append_inst(block, inst),
                }
            }
        }
    }

    pub fn binary(&mut self, op: BinaryOp, name: &str, lhs: Value, rhs: Value) -> InstId {
        let ty = self.func.value_type(&lhs);
        self.insert(Some(name), ty, InstKind::Binary { op, lhs, rhs })
    }

    pub fn add(&mut self, name: &str, lhs: Value, rhs: Value) -> InstId {
        self.binary(BinaryOp::Add, name, lhs, rhs)
    }

    pub fn sdiv(&mut self, name: &str, lhs: Value, rhs: Value) -> InstId {
        self.binary(BinaryOp::SDiv, name, lhs, rhs)
    }

    pub fn icmp(&mut self, pred: IntPredicate, name: &str, lhs: Value, rhs: Value) -> InstId {
        self.insert(Some(name), Type::I1, InstKind::ICmp { pred, lhs, rhs })
    }

    pub fn phi(&mut self, name: &str, ty: Type, incoming: Vec<Incoming>) -> InstId {
        self.insert(Some(name), ty, InstKind::Phi { incoming })
    }

    pub fn br(&mut self, dest: BlockId) -> InstId {
        self.insert(None, Type::Void, InstKind::Br { dest })
    }

    pub fn cond_br(&mut self, cond: Value, then_dest: BlockId, else_dest: BlockId) -> InstId {
        self.insert(
            None,
            Type::Void,
            InstKind::CondBr {
                cond,
                then_dest,
                else_dest,
            },
        )
    }

    pub fn ret(&mut self, value: Option<Value>) -> InstId {
        self.insert(None, Type::Void, InstKind::Ret { value })
    }
}
