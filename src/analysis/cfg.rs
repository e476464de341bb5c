//! Control-flow graph and dominator tree.

use std::collections::{HashMap, HashSet};

use crate::ir::{BlockId, Function};

/// Predecessor/successor view of a function's blocks.
#[derive(Debug, Clone)]
pub struct Cfg {
    entry: Option<BlockId>,
    successors: HashMap<BlockId, Vec<BlockId>>,
    predecessors: HashMap<BlockId, Vec<BlockId>>,
    /// Reachable blocks in reverse post-order.
    rpo: Vec<BlockId>,
    postorder: HashMap<BlockId, usize>,
}

impl Cfg {
    /// Build the CFG from block terminators.
    pub fn build(func: &Function) -> Self {
        let mut successors: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
        let mut predecessors: HashMap<BlockId, Vec<BlockId>> = HashMap::new();

        for &block in func.layout() {
            predecessors.entry(block).or_default();
            let succs = successors.entry(block).or_default();
            for succ in func.successors(block) {
                if !succs.contains(&succ) {
                    succs.push(succ);
                }
            }
        }
        for &block in func.layout() {
            for &succ in &successors[&block] {
                let preds = predecessors.entry(succ).or_default();
                if !preds.contains(&block) {
                    preds.push(block);
                }
            }
        }

        let mut cfg = Cfg {
            entry: func.entry(),
            successors,
            predecessors,
            rpo: Vec::new(),
            postorder: HashMap::new(),
        };
        cfg.compute_rpo();
        cfg
    }

    /// Iterative DFS; successors are visited in terminator order.
    fn compute_rpo(&mut self) {
        let Some(entry) = self.entry else { return };
        let mut visited = HashSet::new();
        let mut postorder = Vec::new();
        let mut stack = vec![(entry, 0usize)];
        visited.insert(entry);

        while let Some((block, next)) = stack.pop() {
            let succs = self.successors(block);
            if let Some(&succ) = succs.get(next) {
                stack.push((block, next + 1));
                if visited.insert(succ) {
                    stack.push((succ, 0));
                }
            } else {
                postorder.push(block);
            }
        }

        for (i, &block) in postorder.iter().enumerate() {
            self.postorder.insert(block, i);
        }
        postorder.reverse();
        self.rpo = postorder;
    }

    pub fn entry(&self) -> Option<BlockId> {
        self.entry
    }

    pub fn successors(&self, block: BlockId) -> &[BlockId] {
        self.successors.get(&block).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn predecessors(&self, block: BlockId) -> &[BlockId] {
        self.predecessors.get(&block).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Reachable blocks in reverse post-order.
    pub fn rpo(&self) -> &[BlockId] {
        &self.rpo
    }

    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.postorder.contains_key(&block)
    }
}

/// Dominator tree over the reachable part of a [`Cfg`].
#[derive(Debug, Clone)]
pub struct DominatorTree {
    /// Immediate dominator; the entry maps to itself.
    idom: HashMap<BlockId, BlockId>,
}

impl DominatorTree {
    /// Cooper-Harvey-Kennedy iterative dominators.
    pub fn build(cfg: &Cfg) -> Self {
        let mut idom: HashMap<BlockId, BlockId> = HashMap::new();
        let Some(entry) = cfg.entry() else {
            return Self { idom };
        };
        idom.insert(entry, entry);

        let mut changed = true;
        while changed {
            changed = false;
            for &block in cfg.rpo() {
                if block == entry {
                    continue;
                }
                let mut processed = cfg
                    .predecessors(block)
                    .iter()
                    .copied()
                    .filter(|p| idom.contains_key(p));
                let Some(first) = processed.next() else { continue };
                let new_idom = processed.fold(first, |acc, pred| intersect(&idom, cfg, acc, pred));

                if idom.get(&block) != Some(&new_idom) {
                    idom.insert(block, new_idom);
                    changed = true;
                }
            }
        }

        Self { idom }
    }

    /// Immediate dominator, `None` for the entry and unreachable blocks.
    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        self.idom.get(&block).copied().filter(|d| *d != block)
    }

    /// Whether `a` dominates `b`. Unreachable blocks dominate nothing and
    /// are dominated by nothing.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if !self.idom.contains_key(&a) || !self.idom.contains_key(&b) {
            return false;
        }
        let mut current = b;
        loop {
            if current == a {
                return true;
            }
            match self.idom(current) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    pub fn strictly_dominates(&self, a: BlockId, b: BlockId) -> bool {
        a != b && self.dominates(a, b)
    }
}

fn intersect(idom: &HashMap<BlockId, BlockId>, cfg: &Cfg, mut a: BlockId, mut b: BlockId) -> BlockId {
    let po = |block: BlockId| cfg.postorder.get(&block).copied().unwrap_or(0);
    while a != b {
        while po(a) < po(b) {
            a = idom[&a];
        }
        while po(b) < po(a) {
            b = idom[&b];
        }
    }
    a
}
