//! Loop-bound recovery.

use log::debug;

use super::induction::InductionVariable;
use super::loops::Loop;
use crate::ir::{Function, InstBuilder, InstId, InstKind, Value};
use crate::utils::errors::{FissionError, FissionErrorKind};

/// Name of the sum feeding the midpoint.
pub const SUM_NAME: &str = "fission.sum";
/// Name of the midpoint instruction.
pub const MIDPOINT_NAME: &str = "fission_loop_midpoint";

/// Iteration range `[start, end)` of a loop and the midpoint splitting it.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopBounds {
    pub start: Value,
    pub end: Value,
    pub mid: Value,
    /// Latch compare whose non-counter operand is `end`
    pub compare: InstId,
}

/// Recover `start` and `end` without touching the function.
pub fn find_bounds(func: &Function, lp: &Loop, iv: &InductionVariable) -> Result<(Value, Value, InstId), FissionError> {
    let fail = |message: String| FissionError::new(FissionErrorKind::BoundsNotRecoverable, func.name.clone(), message);

    let preheader = lp.preheader.ok_or_else(|| fail("loop has no preheader".into()))?;
    let start = func
        .inst(iv.phi)
        .kind
        .incoming_for(preheader)
        .cloned()
        .ok_or_else(|| fail("counter has no value from the preheader".into()))?;

    let latch = lp.latch().ok_or_else(|| fail("loop has no unique latch".into()))?;
    let term = func
        .terminator(latch)
        .ok_or_else(|| fail("latch is not terminated".into()))?;
    let InstKind::CondBr { cond, .. } = &func.inst(term).kind else {
        return Err(fail("latch does not end in a conditional branch".into()));
    };
    let compare = cond
        .as_inst()
        .filter(|c| matches!(func.inst(*c).kind, InstKind::ICmp { .. }))
        .ok_or_else(|| fail("latch condition is not a compare".into()))?;
    let InstKind::ICmp { lhs, rhs, .. } = &func.inst(compare).kind else {
        return Err(fail("latch condition is not a compare".into()));
    };

    let end = match (iv.is_counter(lhs), iv.is_counter(rhs)) {
        (true, false) => rhs.clone(),
        (false, true) => lhs.clone(),
        _ => return Err(fail("latch compare does not test the counter against a bound".into())),
    };
    if let Some(def) = end.as_inst() {
        if func.inst(def).block().map(|b| lp.contains(b)).unwrap_or(false) {
            return Err(fail("loop bound is computed inside the loop".into()));
        }
    }

    Ok((start, end, compare))
}

/// Insert `mid = (start + end) / 2` before `anchor`, normally the
/// preheader's terminator. `None` when `anchor` is not in a block.
pub fn materialize_midpoint(func: &mut Function, anchor: InstId, start: Value, end: Value) -> Option<InstId> {
    let mut b = InstBuilder::before(func, anchor)?;
    let sum = b.add(SUM_NAME, start, end);
    let ty = b.function().inst(sum).ty;
    Some(b.sdiv(MIDPOINT_NAME, Value::Inst(sum), Value::int(ty, 2)))
}

/// Recover `(start, end)` and synthesize the midpoint in the preheader.
pub fn extract_bounds(func: &mut Function, lp: &Loop, iv: &InductionVariable) -> Result<LoopBounds, FissionError> {
    let (start, end, compare) = find_bounds(func, lp, iv)?;
    let anchor = lp
        .preheader
        .and_then(|p| func.terminator(p))
        .ok_or_else(|| {
            FissionError::new(
                FissionErrorKind::BoundsNotRecoverable,
                func.name.clone(),
                "preheader is not terminated",
            )
        })?;
    let mid = materialize_midpoint(func, anchor, start.clone(), end.clone()).ok_or_else(|| {
        FissionError::new(
            FissionErrorKind::BoundsNotRecoverable,
            func.name.clone(),
            "preheader terminator is detached",
        )
    })?;
    debug!(
        "bounds of @{}: start={:?} end={:?} mid=%{}",
        func.name,
        start,
        end,
        func.value_name(&Value::Inst(mid))
    );
    Ok(LoopBounds {
        start,
        end,
        mid: Value::Inst(mid),
        compare,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::induction::find_induction_variable;
    use crate::analysis::loops::analyze_loops;
    use crate::frontend::parse_module;
    use crate::ir::{verify_function, BinaryOp};

    const LOOP: &str = r#"
define void @f(ptr %A, i32 %N) {
entry:
  br label %ph
ph:
  br label %loop
loop:
  %i = phi i32 [ 0, %ph ], [ %i.next, %loop ]
  %p = getelementptr i32, ptr %A, i32 %i
  store i32 0, ptr %p
  %i.next = add i32 %i, 1
  %c = icmp slt i32 %i.next, %N
  br i1 %c, label %loop, label %exit
exit:
  ret void
}
"#;

    #[test]
    fn test_extracts_bounds_and_midpoint() {
        let mut module = parse_module(LOOP).expect("parses");
        let func = &mut module.functions[0];
        let info = analyze_loops(func);
        let lp = &info.loops[0];
        let iv = find_induction_variable(func, lp).expect("counter");

        let bounds = extract_bounds(func, lp, &iv).expect("bounds");
        assert_eq!(bounds.start, Value::int(crate::ir::Type::I32, 0));
        assert_eq!(bounds.end, Value::Param(1));

        let ph = func.block_by_name("ph").expect("preheader");
        let insts = func.block(ph).insts().to_vec();
        assert_eq!(insts.len(), 3);
        let mid = bounds.mid.as_inst().expect("mid is an instruction");
        assert_eq!(insts[1], mid);
        assert_eq!(func.inst(insts[0]).name.as_deref(), Some(SUM_NAME));
        assert_eq!(func.inst(mid).name.as_deref(), Some(MIDPOINT_NAME));
        assert!(matches!(
            func.inst(mid).kind,
            InstKind::Binary {
                op: BinaryOp::SDiv,
                ..
            }
        ));
        assert!(verify_function(func).is_ok());
    }

    #[test]
    fn test_bound_defined_in_loop_is_rejected() {
        let source = r#"
define void @g(i32 %N) {
entry:
  br label %loop
loop:
  %i = phi i32 [ 0, %entry ], [ %i.next, %loop ]
  %lim = add i32 %N, %i
  %i.next = add i32 %i, 1
  %c = icmp slt i32 %i.next, %lim
  br i1 %c, label %loop, label %exit
exit:
  ret void
}
"#;
        let module = parse_module(source).expect("parses");
        let func = &module.functions[0];
        let info = analyze_loops(func);
        let iv = find_induction_variable(func, &info.loops[0]).expect("counter");
        let err = find_bounds(func, &info.loops[0], &iv).expect_err("bound varies");
        assert_eq!(err.kind, FissionErrorKind::BoundsNotRecoverable);
    }

    #[test]
    fn test_unconditional_latch_is_rejected() {
        let source = r#"
define void @h(i32 %N) {
entry:
  br label %loop
loop:
  %i = phi i32 [ 0, %entry ], [ %i.next, %latch ]
  %c = icmp slt i32 %i, %N
  br i1 %c, label %latch, label %exit
latch:
  %i.next = add i32 %i, 1
  br label %loop
exit:
  ret void
}
"#;
        let module = parse_module(source).expect("parses");
        let func = &module.functions[0];
        let info = analyze_loops(func);
        let iv = find_induction_variable(func, &info.loops[0]).expect("counter");
        let err = find_bounds(func, &info.loops[0], &iv).expect_err("latch is unconditional");
        assert_eq!(err.kind, FissionErrorKind::BoundsNotRecoverable);
    }
}
