//! Functions: parameter list plus block and instruction arenas.

use std::collections::{HashMap, HashSet};

use super::inst::{InstKind, Instruction};
use super::types::{Type, Value};
use super::{BlockId, InstId};

/// A formal parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: Type,
}

impl Param {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self { name: name.into(), ty }
    }
}

/// A control block: a label and an ordered instruction list whose last
/// entry is the terminator.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub name: String,
    insts: Vec<InstId>,
}

impl Block {
    pub fn insts(&self) -> &[InstId] {
        &self.insts
    }
}

/// A function definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub ret_ty: Type,
    pub params: Vec<Param>,
    blocks: Vec<Block>,
    insts: Vec<Instruction>,
    /// Block order; the first block is the entry.
    layout: Vec<BlockId>,
}

/// Def-use edges of a function, computed on demand.
///
/// Users are listed in program order (block layout, then position) so
/// that every traversal built on top of them is deterministic.
#[derive(Debug, Clone, Default)]
pub struct UseMap {
    users: HashMap<InstId, Vec<InstId>>,
}

impl UseMap {
    pub fn users(&self, inst: InstId) -> &[InstId] {
        self.users.get(&inst).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl Function {
    pub fn new(name: impl Into<String>, ret_ty: Type, params: Vec<Param>) -> Self {
        Self {
            name: name.into(),
            ret_ty,
            params,
            blocks: Vec::new(),
            insts: Vec::new(),
            layout: Vec::new(),
        }
    }

    // ---------------------------------------------------------------------
    // Blocks
    // ---------------------------------------------------------------------

    /// Entry block, if the function has a body.
    pub fn entry(&self) -> Option<BlockId> {
        self.layout.first().copied()
    }

    /// Blocks in layout order.
    pub fn layout(&self) -> &[BlockId] {
        &self.layout
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    pub fn block_name(&self, id: BlockId) -> &str {
        &self.blocks[id.index()].name
    }

    pub fn block_by_name(&self, name: &str) -> Option<BlockId> {
        self.layout.iter().copied().find(|b| self.block_name(*b) == name)
    }

    /// Append a new empty block at the end of the layout.
    pub fn add_block(&mut self, name: impl Into<String>) -> BlockId {
        let id = self.alloc_block(name.into());
        self.layout.push(id);
        id
    }

    /// Insert a new empty block right after `after` in the layout.
    pub fn insert_block_after(&mut self, after: BlockId, name: impl Into<String>) -> BlockId {
        let id = self.alloc_block(name.into());
        let pos = self
            .layout
            .iter()
            .position(|b| *b == after)
            .map(|p| p + 1)
            .unwrap_or(self.layout.len());
        self.layout.insert(pos, id);
        id
    }

    fn alloc_block(&mut self, name: String) -> BlockId {
        let id = BlockId::new(self.blocks.len());
        self.blocks.push(Block { name, insts: Vec::new() });
        id
    }

    /// Allocate a block that is not yet in the layout (a forward reference).
    pub(crate) fn reserve_block(&mut self, name: impl Into<String>) -> BlockId {
        self.alloc_block(name.into())
    }

    /// Append a reserved block to the layout.
    pub(crate) fn place_block(&mut self, id: BlockId) {
        if !self.layout.contains(&id) {
            self.layout.push(id);
        }
    }

    pub fn num_blocks(&self) -> usize {
        self.layout.len()
    }

    pub fn contains_block(&self, id: BlockId) -> bool {
        self.layout.contains(&id)
    }

    // ---------------------------------------------------------------------
    // Instructions
    // ---------------------------------------------------------------------

    pub fn inst(&self, id: InstId) -> &Instruction {
        &self.insts[id.index()]
    }

    pub fn inst_mut(&mut self, id: InstId) -> &mut Instruction {
        &mut self.insts[id.index()]
    }

    /// Whether `id` names a slot in this function's arena.
    pub fn is_valid_inst(&self, id: InstId) -> bool {
        id.index() < self.insts.len()
    }

    pub fn append_inst(&mut self, block: BlockId, inst: Instruction) -> InstId {
        let id = self.alloc_inst(inst, block);
        self.blocks[block.index()].insts.push(id);
        id
    }

    /// Insert `inst` immediately before `before`, in the same block.
    pub fn insert_inst_before(&mut self, before: InstId, inst: Instruction) -> Option<InstId> {
        let block = self.inst(before).block?;
        let pos = self.blocks[block.index()].insts.iter().position(|i| *i == before)?;
        let id = self.alloc_inst(inst, block);
        self.blocks[block.index()].insts.insert(pos, id);
        Some(id)
    }

    fn alloc_inst(&mut self, mut inst: Instruction, block: BlockId) -> InstId {
        let id = InstId::new(self.insts.len());
        inst.block = Some(block);
        self.insts.push(inst);
        id
    }

    /// Allocate a detached placeholder slot for a value referenced before
    /// its definition.
    pub(crate) fn reserve_inst(&mut self) -> InstId {
        let id = InstId::new(self.insts.len());
        self.insts.push(Instruction::new(None, Type::Void, InstKind::Unreachable));
        id
    }

    /// Fill a reserved slot and append it to `block`.
    pub(crate) fn place_inst(&mut self, block: BlockId, id: InstId, mut inst: Instruction) {
        inst.block = Some(block);
        self.insts[id.index()] = inst;
        self.blocks[block.index()].insts.push(id);
    }

    /// Detach an instruction from its block. Its arena slot stays allocated.
    pub fn remove_inst(&mut self, id: InstId) {
        if let Some(block) = self.insts[id.index()].block.take() {
            self.blocks[block.index()].insts.retain(|i| *i != id);
        }
    }

    /// Last instruction of `block` when it is a terminator.
    pub fn terminator(&self, block: BlockId) -> Option<InstId> {
        let last = *self.block(block).insts.last()?;
        self.inst(last).kind.is_terminator().then_some(last)
    }

    /// First instruction of `block`.
    pub fn first_inst(&self, block: BlockId) -> Option<InstId> {
        self.block(block).insts.first().copied()
    }

    /// Phi nodes leading `block`.
    pub fn phis(&self, block: BlockId) -> Vec<InstId> {
        self.block(block)
            .insts
            .iter()
            .copied()
            .take_while(|i| self.inst(*i).kind.is_phi())
            .collect()
    }

    /// Successors of `block`, from its terminator.
    pub fn successors(&self, block: BlockId) -> Vec<BlockId> {
        self.terminator(block)
            .map(|t| self.inst(t).kind.successors())
            .unwrap_or_default()
    }

    /// Every attached instruction in layout order.
    pub fn inst_ids(&self) -> impl Iterator<Item = InstId> + '_ {
        self.layout
            .iter()
            .flat_map(move |b| self.blocks[b.index()].insts.iter().copied())
    }

    pub fn num_insts(&self) -> usize {
        self.layout.iter().map(|b| self.block(*b).insts.len()).sum()
    }

    // ---------------------------------------------------------------------
    // Values and uses
    // ---------------------------------------------------------------------

    /// Type of an operand in the context of this function.
    pub fn value_type(&self, value: &Value) -> Type {
        match value {
            Value::Inst(id) => self.inst(*id).ty,
            Value::Param(index) => self
                .params
                .get(*index as usize)
                .map(|p| p.ty)
                .unwrap_or(Type::Void),
            Value::Const(c) => c.ty(),
            Value::Function(_) => Type::Ptr,
        }
    }

    /// Printable name of a value, without sigil.
    pub fn value_name(&self, value: &Value) -> String {
        match value {
            Value::Inst(id) => self
                .inst(*id)
                .name
                .clone()
                .unwrap_or_else(|| format!("tmp{}", id.index())),
            Value::Param(index) => self
                .params
                .get(*index as usize)
                .map(|p| p.name.clone())
                .unwrap_or_else(|| format!("arg{}", index)),
            Value::Const(c) => c.to_string(),
            Value::Function(name) => name.clone(),
        }
    }

    pub fn param_index(&self, name: &str) -> Option<u32> {
        self.params.iter().position(|p| p.name == name).map(|i| i as u32)
    }

    /// Build the def-use map for all attached instructions.
    pub fn use_map(&self) -> UseMap {
        let mut users: HashMap<InstId, Vec<InstId>> = HashMap::new();
        for user in self.inst_ids() {
            let mut seen = HashSet::new();
            for operand in self.inst(user).kind.operands() {
                if let Value::Inst(def) = operand {
                    if seen.insert(*def) {
                        users.entry(*def).or_default().push(user);
                    }
                }
            }
        }
        UseMap { users }
    }

    /// Set the incoming value of phi `phi` along edge `pred`.
    pub fn set_incoming(&mut self, phi: InstId, pred: BlockId, value: Value) -> bool {
        if let InstKind::Phi { incoming } = &mut self.inst_mut(phi).kind {
            if let Some(entry) = incoming.iter_mut().find(|(_, b)| *b == pred) {
                entry.0 = value;
                return true;
            }
        }
        false
    }

    /// Add an incoming `(value, pred)` pair to phi `phi`.
    pub fn add_incoming(&mut self, phi: InstId, value: Value, pred: BlockId) {
        if let InstKind::Phi { incoming } = &mut self.inst_mut(phi).kind {
            incoming.push((value, pred));
        }
    }

    // ---------------------------------------------------------------------
    // Naming
    // ---------------------------------------------------------------------

    fn value_names(&self) -> HashSet<&str> {
        self.params
            .iter()
            .map(|p| p.name.as_str())
            .chain(self.inst_ids().filter_map(|i| self.inst(i).name.as_deref()))
            .collect()
    }

    /// A value name derived from `base` not used by any parameter or instruction.
    pub fn unique_value_name(&self, base: &str) -> String {
        unique_name(base, &self.value_names())
    }

    /// A block label derived from `base` not used by any block.
    pub fn unique_block_name(&self, base: &str) -> String {
        let taken: HashSet<&str> = self.layout.iter().map(|b| self.block_name(*b)).collect();
        unique_name(base, &taken)
    }
}

fn unique_name(base: &str, taken: &HashSet<&str>) -> String {
    if !taken.contains(base) {
        return base.to_string();
    }
    (1..)
        .map(|n| format!("{}{}", base, n))
        .find(|candidate| !taken.contains(candidate.as_str()))
        .unwrap_or_else(|| base.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::inst::BinaryOp;

    fn counter_fn() -> (Function, BlockId, InstId) {
        let mut f = Function::new("f", Type::Void, vec![Param::new("n", Type::I32)]);
        let entry = f.add_block("entry");
        let add = f.append_inst(
            entry,
            Instruction::new(
                Some("x".into()),
                Type::I32,
                InstKind::Binary {
                    op: BinaryOp::Add,
                    lhs: Value::Param(0),
                    rhs: Value::int(Type::I32, 1),
                },
            ),
        );
        f.append_inst(entry, Instruction::new(None, Type::Void, InstKind::Ret { value: None }));
        (f, entry, add)
    }

    #[test]
    fn test_terminator_and_insert_before() {
        let (mut f, entry, add) = counter_fn();
        let ret = f.terminator(entry).expect("ret terminates entry");
        let mul = f
            .insert_inst_before(
                ret,
                Instruction::new(
                    Some("y".into()),
                    Type::I32,
                    InstKind::Binary {
                        op: BinaryOp::Mul,
                        lhs: Value::Inst(add),
                        rhs: Value::Inst(add),
                    },
                ),
            )
            .expect("ret is attached");
        assert_eq!(f.block(entry).insts(), &[add, mul, ret]);
        assert_eq!(f.use_map().users(add), &[mul]);
        assert_eq!(f.inst(mul).block(), Some(entry));
    }

    #[test]
    fn test_remove_detaches() {
        let (mut f, entry, add) = counter_fn();
        f.remove_inst(add);
        assert_eq!(f.block(entry).insts().len(), 1);
        assert_eq!(f.inst(add).block(), None);
        assert_eq!(f.num_insts(), 1);
    }

    #[test]
    fn test_unique_names() {
        let (mut f, entry, _) = counter_fn();
        assert_eq!(f.unique_value_name("x"), "x1");
        assert_eq!(f.unique_value_name("n"), "n1");
        assert_eq!(f.unique_value_name("fresh"), "fresh");
        assert_eq!(f.unique_block_name("entry"), "entry1");

        let next = f.insert_block_after(entry, "next");
        f.add_block("tail");
        assert_eq!(f.layout()[1], next);
        assert_eq!(f.block_by_name("tail"), Some(f.layout()[2]));
    }
}
