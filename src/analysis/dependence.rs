//! Access-path dependence analysis.
//!
//! This module decides, conservatively, whether the iterations of a loop are
//! independent. Starting from the loop counter it walks the def-use graph
//! breadth-first and records, for every memory access the counter reaches as
//! an address, the chain of operators the address went through:
//! - arithmetic, calls, phis and pointer arithmetic extend the chain
//! - casts, compares and selects pass the value through unchanged
//! - a load or store closes the chain into an [`AccessPath`]
//!
//! A control transfer only reaches the leading access of a successor whose
//! address is the transferred value. Branch conditions are `i1` and `ret`
//! has no successors, so in practice a branch reached by the counter adds no
//! access at all.
//!
//! Two paths that index the same base pointer must have operator chains of
//! the same shape; otherwise the loop is reported as dependent. Paths over
//! disjoint bases are assumed not to conflict.

use std::collections::{HashSet, VecDeque};

use log::{debug, info};
use serde::Serialize;

use crate::codegen::format_instruction;
use crate::codegen::printer::operand;
use crate::ir::{Function, InstId, InstKind, Opcode, UseMap, Value};

/// Kind of the memory access closing a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AccessKind {
    Load,
    Store,
}

/// How a counter-derived value reaches one memory access.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessPath {
    /// The load or store closing the path
    pub access: InstId,
    pub kind: AccessKind,
    /// Operators traversed from the counter, in order
    pub operators: Vec<(InstId, Opcode)>,
    /// Base pointers of the `getelementptr`s traversed
    pub bases: Vec<Value>,
}

impl AccessPath {
    /// Whether both paths index at least one common base pointer.
    pub fn shares_base(&self, other: &AccessPath) -> bool {
        self.bases.iter().any(|b| other.bases.contains(b))
    }

    /// Whether both operator chains have the same length and the same
    /// operator at every position.
    pub fn operators_match(&self, other: &AccessPath) -> bool {
        self.operators.len() == other.operators.len()
            && self
                .operators
                .iter()
                .zip(&other.operators)
                .all(|((_, a), (_, b))| a == b)
    }

    /// Serializable summary for reports.
    pub fn summary(&self, func: &Function) -> AccessPathSummary {
        AccessPathSummary {
            access: format_instruction(func, self.access),
            kind: self.kind,
            operators: self.operators.iter().map(|(_, op)| op.to_string()).collect(),
            bases: self.bases.iter().map(|b| operand(func, b)).collect(),
        }
    }
}

/// An [`AccessPath`] rendered as text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessPathSummary {
    pub access: String,
    pub kind: AccessKind,
    pub operators: Vec<String>,
    pub bases: Vec<String>,
}

/// Why a loop was not proven independent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conflict {
    /// A value already used by a memory access flows into another address.
    AddressAfterAccess { access: InstId },
    /// Two paths share a base pointer but differ in shape.
    PathMismatch { first: usize, second: usize },
}

/// Outcome of the analysis for one counter.
#[derive(Debug, Clone, PartialEq)]
pub struct DependenceResult {
    /// Closed access paths, in discovery order
    pub paths: Vec<AccessPath>,
    pub conflict: Option<Conflict>,
}

impl DependenceResult {
    pub fn is_independent(&self) -> bool {
        self.conflict.is_none()
    }
}

/// A path under construction.
#[derive(Debug, Clone, Default)]
struct Candidate {
    operators: Vec<(InstId, Opcode)>,
    bases: Vec<Value>,
    /// Set once the path went through a memory access.
    closed: bool,
}

/// Dependence analysis over one function.
pub struct DependenceAnalysis<'f> {
    func: &'f Function,
    uses: UseMap,
}

impl<'f> DependenceAnalysis<'f> {
    pub fn new(func: &'f Function) -> Self {
        Self {
            func,
            uses: func.use_map(),
        }
    }

    /// Analyze the loop driven by `counter`.
    pub fn analyze(&self, counter: InstId) -> DependenceResult {
        let mut paths = Vec::new();
        let conflict = self
            .collect_paths(counter, &mut paths)
            .err()
            .or_else(|| self.check_pairs(&paths));

        match conflict {
            None => info!("dependence verdict for @{}: true", self.func.name),
            Some(c) => info!("dependence verdict for @{}: false ({:?})", self.func.name, c),
        }
        DependenceResult { paths, conflict }
    }

    /// Convenience: whether the loop driven by `counter` is independent.
    pub fn is_independent(&self, counter: InstId) -> bool {
        self.analyze(counter).is_independent()
    }

    fn collect_paths(&self, counter: InstId, paths: &mut Vec<AccessPath>) -> Result<(), Conflict> {
        let func = self.func;
        let mut worklist: VecDeque<(InstId, Candidate)> = VecDeque::from([(counter, Candidate::default())]);
        let mut visited: HashSet<InstId> = HashSet::new();

        while let Some((id, candidate)) = worklist.pop_front() {
            if !visited.insert(id) {
                continue;
            }
            let inst = func.inst(id);
            debug!("Processing: {}", format_instruction(func, id));

            let mut next = candidate;
            match &inst.kind {
                InstKind::Binary { .. } | InstKind::Call { .. } | InstKind::Phi { .. } => {
                    next.operators.push((id, inst.opcode()));
                }
                InstKind::GetElementPtr { base, .. } => {
                    next.operators.push((id, inst.opcode()));
                    next.bases.push(base.clone());
                }
                InstKind::Load { .. } | InstKind::Store { .. } => {
                    if next.closed {
                        debug!("counter reaches an address after a memory access");
                        return Err(Conflict::AddressAfterAccess { access: id });
                    }
                    let kind = if matches!(inst.kind, InstKind::Load { .. }) {
                        AccessKind::Load
                    } else {
                        AccessKind::Store
                    };
                    let path = AccessPath {
                        access: id,
                        kind,
                        operators: next.operators.clone(),
                        bases: next.bases.clone(),
                    };
                    info!(
                        "access path: {} via [{}]",
                        format_instruction(func, id),
                        path.operators
                            .iter()
                            .map(|(_, op)| op.to_string())
                            .collect::<Vec<_>>()
                            .join(", ")
                    );
                    paths.push(path);
                    next.closed = true;
                }
                _ => {}
            }

            if inst.kind.is_terminator() {
                self.enqueue_successor_fronts(id, &next, &mut worklist);
            } else {
                self.enqueue_users(id, &next, &mut worklist);
            }
        }
        Ok(())
    }

    /// Users of `id`; memory accesses only when `id` is their address.
    fn enqueue_users(&self, id: InstId, next: &Candidate, worklist: &mut VecDeque<(InstId, Candidate)>) {
        for &user in self.uses.users(id) {
            let kind = &self.func.inst(user).kind;
            let follow = match kind.memory_address() {
                Some(addr) => addr.is_inst(id),
                None => true,
            };
            if follow {
                worklist.push_back((user, next.clone()));
            }
        }
    }

    /// A control transfer reaches only the leading memory access of each
    /// successor, and only when the value that reached the transfer is that
    /// access's address.
    fn enqueue_successor_fronts(
        &self,
        branch: InstId,
        next: &Candidate,
        worklist: &mut VecDeque<(InstId, Candidate)>,
    ) {
        let func = self.func;
        let reaching: Vec<&Value> = func.inst(branch).kind.operands();
        for succ in func.inst(branch).kind.successors() {
            let Some(front) = func.first_inst(succ) else { continue };
            let Some(addr) = func.inst(front).kind.memory_address() else {
                continue;
            };
            if reaching.contains(&addr) {
                worklist.push_back((front, next.clone()));
            }
        }
    }

    fn check_pairs(&self, paths: &[AccessPath]) -> Option<Conflict> {
        for i in 0..paths.len() {
            for j in (i + 1)..paths.len() {
                let (first, second) = (&paths[i], &paths[j]);
                if !first.shares_base(second) {
                    continue;
                }
                let matched = first.operators_match(second);
                debug!(
                    "compare {} / {}: {}",
                    format_instruction(self.func, first.access),
                    format_instruction(self.func, second.access),
                    if matched { "match" } else { "mismatch" }
                );
                if !matched {
                    return Some(Conflict::PathMismatch { first: i, second: j });
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::induction::find_induction_variable;
    use crate::analysis::loops::analyze_loops;
    use crate::frontend::parse_module;
    use crate::ir::{BinaryOp, Module};

    fn analyze(source: &str) -> (Module, DependenceResult) {
        let module = parse_module(source).expect("parses");
        let result = {
            let func = &module.functions[0];
            let info = analyze_loops(func);
            let iv = find_induction_variable(func, &info.loops[0]).expect("counter");
            DependenceAnalysis::new(func).analyze(iv.phi)
        };
        (module, result)
    }

    const VECADD: &str = r#"
define void @vecadd(ptr %A, ptr %B, ptr %C, i32 %N) {
entry:
  br label %loop
loop:
  %i = phi i32 [ 0, %entry ], [ %i.next, %loop ]
  %idx = sext i32 %i to i64
  %pa = getelementptr float, ptr %A, i64 %idx
  %a = load float, ptr %pa
  %pb = getelementptr float, ptr %B, i64 %idx
  %b = load float, ptr %pb
  %s = fadd float %a, %b
  %pc = getelementptr float, ptr %C, i64 %idx
  store float %s, ptr %pc
  %i.next = add i32 %i, 1
  %c = icmp slt i32 %i.next, %N
  br i1 %c, label %loop, label %exit
exit:
  ret void
}
"#;

    const RECURRENCE: &str = r#"
define void @recur(ptr %A, ptr %B, i32 %N) {
entry:
  br label %loop
loop:
  %i = phi i32 [ 1, %entry ], [ %i.next, %loop ]
  %pa = getelementptr float, ptr %A, i32 %i
  %a = load float, ptr %pa
  %prev = add i32 %i, -1
  %pp = getelementptr float, ptr %B, i32 %prev
  %b = load float, ptr %pp
  %s = fadd float %a, %b
  %pb = getelementptr float, ptr %B, i32 %i
  store float %s, ptr %pb
  %i.next = add i32 %i, 1
  %c = icmp slt i32 %i.next, %N
  br i1 %c, label %loop, label %exit
exit:
  ret void
}
"#;

    #[test]
    fn test_disjoint_bases_are_independent() {
        let (module, result) = analyze(VECADD);
        assert!(result.is_independent());
        assert_eq!(result.paths.len(), 3);

        let func = &module.functions[0];
        let kinds: Vec<AccessKind> = result.paths.iter().map(|p| p.kind).collect();
        assert_eq!(kinds, vec![AccessKind::Load, AccessKind::Load, AccessKind::Store]);
        for path in &result.paths {
            let ops: Vec<Opcode> = path.operators.iter().map(|(_, op)| *op).collect();
            assert_eq!(ops, vec![Opcode::Phi, Opcode::GetElementPtr]);
            assert_eq!(path.bases.len(), 1);
        }
        let summary = result.paths[2].summary(func);
        assert_eq!(summary.bases, vec!["%C".to_string()]);
        assert_eq!(summary.operators, vec!["phi".to_string(), "getelementptr".to_string()]);
    }

    #[test]
    fn test_shifted_access_to_shared_base_is_dependent() {
        let (_, result) = analyze(RECURRENCE);
        assert!(!result.is_independent());
        assert!(matches!(result.conflict, Some(Conflict::PathMismatch { .. })));

        let Some(Conflict::PathMismatch { first, second }) = result.conflict else {
            unreachable!()
        };
        let a = &result.paths[first];
        let b = &result.paths[second];
        assert!(a.shares_base(b));
        assert_ne!(a.operators.len(), b.operators.len());
        assert!(a
            .operators
            .iter()
            .chain(&b.operators)
            .any(|(_, op)| *op == Opcode::Binary(BinaryOp::Add)));
    }

    #[test]
    fn test_in_place_update_is_independent() {
        let source = r#"
define void @scale(ptr %A, i32 %N) {
entry:
  br label %loop
loop:
  %i = phi i32 [ 0, %entry ], [ %i.next, %loop ]
  %p = getelementptr float, ptr %A, i32 %i
  %v = load float, ptr %p
  %w = fmul float %v, 2.0
  store float %w, ptr %p
  %i.next = add i32 %i, 1
  %c = icmp slt i32 %i.next, %N
  br i1 %c, label %loop, label %exit
exit:
  ret void
}
"#;
        let (_, result) = analyze(source);
        assert!(result.is_independent());
        assert_eq!(result.paths.len(), 2);
    }

    #[test]
    fn test_indirect_address_is_dependent() {
        let source = r#"
define void @gather(ptr %A, ptr %Idx, i32 %N) {
entry:
  br label %loop
loop:
  %i = phi i32 [ 0, %entry ], [ %i.next, %loop ]
  %pi = getelementptr i32, ptr %Idx, i32 %i
  %j = load i32, ptr %pi
  %pa = getelementptr float, ptr %A, i32 %j
  store float 1.0, ptr %pa
  %i.next = add i32 %i, 1
  %c = icmp slt i32 %i.next, %N
  br i1 %c, label %loop, label %exit
exit:
  ret void
}
"#;
        let (_, result) = analyze(source);
        assert!(matches!(result.conflict, Some(Conflict::AddressAfterAccess { .. })));
    }

    #[test]
    fn test_stored_counter_value_is_not_an_address() {
        let source = r#"
define void @iota(ptr %A, i32 %N) {
entry:
  br label %loop
loop:
  %i = phi i32 [ 0, %entry ], [ %i.next, %loop ]
  %p = getelementptr i32, ptr %A, i32 %i
  store i32 %i, ptr %p
  %i.next = add i32 %i, 1
  %c = icmp slt i32 %i.next, %N
  br i1 %c, label %loop, label %exit
exit:
  ret void
}
"#;
        let (_, result) = analyze(source);
        assert!(result.is_independent());
        assert_eq!(result.paths.len(), 1);
        assert_eq!(result.paths[0].kind, AccessKind::Store);
    }

    #[test]
    fn test_branch_does_not_reach_successor_access() {
        let source = r#"
define void @guarded(ptr %A, ptr %B, i32 %N) {
entry:
  br label %loop
loop:
  %i = phi i32 [ 0, %entry ], [ %i.next, %latch ]
  %c = icmp slt i32 %i, %N
  br i1 %c, label %body, label %exit
body:
  %a = load i32, ptr %A
  %p = getelementptr i32, ptr %B, i32 %i
  store i32 %a, ptr %p
  br label %latch
latch:
  %i.next = add i32 %i, 1
  br label %loop
exit:
  ret void
}
"#;
        let (module, result) = analyze(source);
        assert!(result.is_independent());
        assert_eq!(result.paths.len(), 1);
        assert_eq!(result.paths[0].kind, AccessKind::Store);
        let summary = result.paths[0].summary(&module.functions[0]);
        assert_eq!(summary.bases, vec!["%B".to_string()]);
    }

    #[test]
    fn test_call_result_extends_the_path() {
        let source = r#"
define void @remap(ptr %A, i32 %N) {
entry:
  br label %loop
loop:
  %i = phi i32 [ 0, %entry ], [ %i.next, %loop ]
  %j = call i32 @permute(i32 %i)
  %p = getelementptr i32, ptr %A, i32 %j
  store i32 0, ptr %p
  %i.next = add i32 %i, 1
  %c = icmp slt i32 %i.next, %N
  br i1 %c, label %loop, label %exit
exit:
  ret void
}

declare i32 @permute(i32)
"#;
        let (_, result) = analyze(source);
        assert!(result.is_independent());
        assert_eq!(result.paths.len(), 1);
        let ops: Vec<Opcode> = result.paths[0].operators.iter().map(|(_, op)| *op).collect();
        assert_eq!(ops, vec![Opcode::Phi, Opcode::Call, Opcode::GetElementPtr]);
    }

    #[test]
    fn test_loop_without_memory_is_independent() {
        let source = r#"
define i32 @sum(i32 %N) {
entry:
  br label %loop
loop:
  %i = phi i32 [ 0, %entry ], [ %i.next, %loop ]
  %i.next = add i32 %i, 1
  %c = icmp slt i32 %i.next, %N
  br i1 %c, label %loop, label %exit
exit:
  ret i32 %i
}
"#;
        let (_, result) = analyze(source);
        assert!(result.is_independent());
        assert!(result.paths.is_empty());
    }
}
