//! Natural loop detection.
//!
//! A back edge is an edge whose target dominates its source; the target is
//! the loop header and the body is everything that reaches the back edge
//! without passing through the header.

use std::collections::{HashMap, HashSet, VecDeque};

use super::cfg::{Cfg, DominatorTree};
use crate::ir::{BlockId, Function};

/// A natural loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loop {
    pub header: BlockId,
    /// Sources of back edges into the header.
    pub latches: Vec<BlockId>,
    /// Body blocks in layout order, header included.
    pub blocks: Vec<BlockId>,
    /// Unique out-of-loop predecessor of the header that branches only to it.
    pub preheader: Option<BlockId>,
    /// Body blocks with a successor outside the loop.
    pub exiting: Vec<BlockId>,
    /// Out-of-loop successors of body blocks, deduplicated.
    pub exits: Vec<BlockId>,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    /// Nesting depth; 1 for outermost loops.
    pub depth: u32,
    members: HashSet<BlockId>,
}

impl Loop {
    pub fn contains(&self, block: BlockId) -> bool {
        self.members.contains(&block)
    }

    /// The latch when there is exactly one.
    pub fn latch(&self) -> Option<BlockId> {
        match self.latches.as_slice() {
            [latch] => Some(*latch),
            _ => None,
        }
    }

    /// The exit block when there is exactly one.
    pub fn exit_block(&self) -> Option<BlockId> {
        match self.exits.as_slice() {
            [exit] => Some(*exit),
            _ => None,
        }
    }

    /// The exiting block when there is exactly one.
    pub fn exiting_block(&self) -> Option<BlockId> {
        match self.exiting.as_slice() {
            [exiting] => Some(*exiting),
            _ => None,
        }
    }

    pub fn is_outermost(&self) -> bool {
        self.parent.is_none()
    }
}

/// All natural loops of a function.
#[derive(Debug, Clone, Default)]
pub struct LoopInfo {
    pub loops: Vec<Loop>,
    header_to_loop: HashMap<BlockId, usize>,
}

impl LoopInfo {
    /// Detect loops, ordered by the layout position of their header.
    pub fn compute(func: &Function, cfg: &Cfg, dom: &DominatorTree) -> Self {
        let mut info = LoopInfo::default();

        for &block in func.layout() {
            if !cfg.is_reachable(block) {
                continue;
            }
            for &succ in cfg.successors(block) {
                if dom.dominates(succ, block) {
                    info.add_back_edge(succ, block, cfg);
                }
            }
        }

        let position: HashMap<BlockId, usize> =
            func.layout().iter().enumerate().map(|(i, b)| (*b, i)).collect();
        info.loops.sort_by_key(|l| position.get(&l.header).copied().unwrap_or(usize::MAX));
        info.header_to_loop = info.loops.iter().enumerate().map(|(i, l)| (l.header, i)).collect();

        for lp in &mut info.loops {
            lp.blocks = func.layout().iter().copied().filter(|b| lp.members.contains(b)).collect();
            Self::compute_boundary(lp, cfg);
        }
        info.compute_nesting();
        info
    }

    fn add_back_edge(&mut self, header: BlockId, latch: BlockId, cfg: &Cfg) {
        let index = match self.header_to_loop.get(&header) {
            Some(&index) => index,
            None => {
                self.loops.push(Loop {
                    header,
                    latches: Vec::new(),
                    blocks: Vec::new(),
                    preheader: None,
                    exiting: Vec::new(),
                    exits: Vec::new(),
                    parent: None,
                    children: Vec::new(),
                    depth: 1,
                    members: [header].into_iter().collect(),
                });
                self.header_to_loop.insert(header, self.loops.len() - 1);
                self.loops.len() - 1
            }
        };

        let lp = &mut self.loops[index];
        if !lp.latches.contains(&latch) {
            lp.latches.push(latch);
        }

        let mut worklist = VecDeque::from([latch]);
        while let Some(block) = worklist.pop_front() {
            if lp.members.insert(block) {
                worklist.extend(cfg.predecessors(block).iter().copied().filter(|p| cfg.is_reachable(*p)));
            }
        }
    }

    fn compute_boundary(lp: &mut Loop, cfg: &Cfg) {
        for &block in &lp.blocks {
            let mut leaves = false;
            for &succ in cfg.successors(block) {
                if !lp.members.contains(&succ) {
                    leaves = true;
                    if !lp.exits.contains(&succ) {
                        lp.exits.push(succ);
                    }
                }
            }
            if leaves {
                lp.exiting.push(block);
            }
        }

        let outside: Vec<BlockId> = cfg
            .predecessors(lp.header)
            .iter()
            .copied()
            .filter(|p| !lp.members.contains(p))
            .collect();
        lp.preheader = match outside.as_slice() {
            [pred] if cfg.successors(*pred) == [lp.header].as_slice() => Some(*pred),
            _ => None,
        };
    }

    fn compute_nesting(&mut self) {
        let n = self.loops.len();
        for i in 0..n {
            let header = self.loops[i].header;
            let parent = (0..n)
                .filter(|&j| j != i && self.loops[j].members.contains(&header))
                .min_by_key(|&j| self.loops[j].members.len());
            if let Some(parent) = parent {
                self.loops[i].parent = Some(parent);
                self.loops[parent].children.push(i);
            }
        }
        for i in 0..n {
            let mut depth = 1;
            let mut current = self.loops[i].parent;
            while let Some(parent) = current {
                depth += 1;
                current = self.loops[parent].parent;
            }
            self.loops[i].depth = depth;
        }
    }

    /// Outermost loops in header layout order.
    pub fn outermost(&self) -> impl Iterator<Item = &Loop> {
        self.loops.iter().filter(|l| l.is_outermost())
    }

    pub fn loop_with_header(&self, header: BlockId) -> Option<&Loop> {
        self.header_to_loop.get(&header).map(|&i| &self.loops[i])
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }
}

/// Convenience: CFG, dominators and loops of `func` in one call.
pub fn analyze_loops(func: &Function) -> LoopInfo {
    let cfg = Cfg::build(func);
    let dom = DominatorTree::build(&cfg);
    LoopInfo::compute(func, &cfg, &dom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parse_module;

    const NESTED: &str = r#"
define void @nested(i32 %n, i32 %m) {
entry:
  br label %outer.ph
outer.ph:
  br label %outer
outer:
  %i = phi i32 [ 0, %outer.ph ], [ %i.next, %outer.latch ]
  br label %inner
inner:
  %j = phi i32 [ 0, %outer ], [ %j.next, %inner ]
  %j.next = add i32 %j, 1
  %jc = icmp slt i32 %j.next, %m
  br i1 %jc, label %inner, label %outer.latch
outer.latch:
  %i.next = add i32 %i, 1
  %ic = icmp slt i32 %i.next, %n
  br i1 %ic, label %outer, label %exit
exit:
  ret void
}
"#;

    #[test]
    fn test_nested_loops() {
        let module = parse_module(NESTED).expect("parses");
        let func = &module.functions[0];
        let b = |n: &str| func.block_by_name(n).expect("block exists");
        let info = analyze_loops(func);

        assert_eq!(info.loops.len(), 2);
        let outer = &info.loops[0];
        let inner = &info.loops[1];

        assert_eq!(outer.header, b("outer"));
        assert_eq!(outer.blocks, vec![b("outer"), b("inner"), b("outer.latch")]);
        assert_eq!(outer.preheader, Some(b("outer.ph")));
        assert_eq!(outer.latch(), Some(b("outer.latch")));
        assert_eq!(outer.exit_block(), Some(b("exit")));
        assert_eq!(outer.exiting_block(), Some(b("outer.latch")));
        assert_eq!(outer.depth, 1);

        assert_eq!(inner.header, b("inner"));
        assert_eq!(inner.parent, Some(0));
        assert_eq!(inner.depth, 2);
        assert_eq!(inner.latch(), Some(b("inner")));
        // `outer` also branches to `inner`, but only to it, so it qualifies.
        assert_eq!(inner.preheader, Some(b("outer")));

        let outermost: Vec<_> = info.outermost().map(|l| l.header).collect();
        assert_eq!(outermost, vec![b("outer")]);
    }

    #[test]
    fn test_no_preheader_when_entry_branches_conditionally() {
        let source = r#"
define void @guarded(i32 %n) {
entry:
  %g = icmp sgt i32 %n, 0
  br i1 %g, label %loop, label %exit
loop:
  %i = phi i32 [ 0, %entry ], [ %i.next, %loop ]
  %i.next = add i32 %i, 1
  %c = icmp slt i32 %i.next, %n
  br i1 %c, label %loop, label %exit
exit:
  ret void
}
"#;
        let module = parse_module(source).expect("parses");
        let info = analyze_loops(&module.functions[0]);
        assert_eq!(info.loops.len(), 1);
        assert_eq!(info.loops[0].preheader, None);
        assert!(info.loop_with_header(info.loops[0].header).is_some());
    }
}
