//! Structural cloning with value remapping.
//!
//! Cloning happens in two passes: every instruction is first copied with
//! its original operands, then each copy's operands and block references
//! are rewritten through the [`ValueMap`]. Forward references inside the
//! cloned region (phis fed by the latch, branches to later blocks) are only
//! resolvable once every copy exists.

use std::collections::HashMap;

use log::trace;

use crate::ir::{BlockId, Function, InstId, Param, Value};

/// Original-to-clone substitution table.
#[derive(Debug, Clone, Default)]
pub struct ValueMap {
    values: HashMap<InstId, InstId>,
    blocks: HashMap<BlockId, BlockId>,
}

impl ValueMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_inst(&mut self, from: InstId, to: InstId) {
        self.values.insert(from, to);
    }

    pub fn insert_block(&mut self, from: BlockId, to: BlockId) {
        self.blocks.insert(from, to);
    }

    /// Clone of `inst`, if it was cloned.
    pub fn inst(&self, inst: InstId) -> Option<InstId> {
        self.values.get(&inst).copied()
    }

    /// Clone of `block`, if it was cloned.
    pub fn block(&self, block: BlockId) -> Option<BlockId> {
        self.blocks.get(&block).copied()
    }

    /// `value` seen from inside the clone. Values defined outside the cloned
    /// region map to themselves.
    pub fn value(&self, value: &Value) -> Value {
        match value {
            Value::Inst(id) => self.values.get(id).map(|c| Value::Inst(*c)).unwrap_or_else(|| value.clone()),
            other => other.clone(),
        }
    }

    /// `block` seen from inside the clone.
    pub fn remap_block(&self, block: BlockId) -> BlockId {
        self.block(block).unwrap_or(block)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Clone `blocks` into fresh blocks laid out after `after`.
///
/// Clones are named with `suffix` appended. References to blocks and
/// values outside `blocks` are left as they are, so branches leaving the
/// region still reach the original successors.
pub fn clone_blocks(func: &mut Function, blocks: &[BlockId], suffix: &str, after: BlockId) -> ValueMap {
    let mut map = ValueMap::new();
    let mut copies = Vec::new();

    // Pass 1: copy blocks and instructions with their original operands.
    let mut anchor = after;
    for &block in blocks {
        let name = func.unique_block_name(&format!("{}{}", func.block_name(block), suffix));
        let clone = func.insert_block_after(anchor, name);
        map.insert_block(block, clone);
        anchor = clone;

        for id in func.block(block).insts().to_vec() {
            let mut inst = func.inst(id).clone();
            if let Some(name) = &inst.name {
                inst.name = Some(func.unique_value_name(&format!("{}{}", name, suffix)));
            }
            let copy = func.append_inst(clone, inst);
            map.insert_inst(id, copy);
            copies.push(copy);
        }
    }

    // Pass 2: rewrite operands and block references through the map.
    for copy in copies {
        let inst = func.inst_mut(copy);
        for operand in inst.kind.operands_mut() {
            *operand = map.value(operand);
        }
        for target in inst.kind.block_refs_mut() {
            *target = map.remap_block(*target);
        }
    }

    trace!(
        "cloned {} blocks ({} instructions) of @{} with suffix '{}'",
        blocks.len(),
        map.len(),
        func.name,
        suffix
    );
    map
}

/// Copy `func` under `name` with `extra` parameters appended.
///
/// Arena ids are stable under copying, so every block and instruction
/// handle of `func` stays valid for the copy and existing parameters keep
/// their positions.
pub fn clone_function(func: &Function, name: impl Into<String>, extra: Vec<Param>) -> Function {
    let mut copy = func.clone();
    copy.name = name.into();
    copy.params.extend(extra);
    copy
}
