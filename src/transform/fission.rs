//! Fission wiring: the mode-dispatched clone of a split function.
//!
//! ```text
//! entry:                          entry:
//!   br label %ph                    br label %streamModeCheck
//!                          ==>    streamModeCheck:
//!                                   %streamMode.cmp = icmp eq i32 %streamMode, 0
//!                                   br i1 %streamMode.cmp, label %ph, label %ph.split
//! ```

use log::debug;

use super::clone::clone_function;
use super::split::LoopPair;
use crate::ir::{Function, InstBuilder, InstKind, IntPredicate, Param, Type, Value};
use crate::utils::errors::{FissionError, FissionErrorKind};

/// Name of the appended mode parameter.
pub const STREAM_MODE: &str = "streamMode";
/// Label of the dispatch block.
pub const DISPATCH_BLOCK: &str = "streamModeCheck";
/// Suffix of the fissioned function's name.
pub const FISSION_SUFFIX: &str = ".fission";

/// Name the fissioned clone of `name` gets.
pub fn fissioned_name(name: &str) -> String {
    format!("{}{}", name, FISSION_SUFFIX)
}

/// Build the fissioned clone of `func`, which already holds `pair`.
///
/// The clone takes an extra `i32 %streamMode`: zero runs the first loop,
/// anything else runs the second. `func` itself is not modified. Only
/// functions whose entry block branches unconditionally into the first
/// loop's preheader are supported.
pub fn wire_fission(func: &Function, pair: &LoopPair) -> Result<Function, FissionError> {
    let not_fissionable =
        |message: &str| FissionError::new(FissionErrorKind::NotFissionable, func.name.clone(), message);

    let entry = func.entry().ok_or_else(|| not_fissionable("function has no body"))?;
    let entry_br = func
        .terminator(entry)
        .ok_or_else(|| not_fissionable("entry block is not terminated"))?;
    match &func.inst(entry_br).kind {
        InstKind::Br { dest } if *dest == pair.first.preheader => {}
        _ => {
            return Err(not_fissionable(
                "entry block does not branch unconditionally into the loop preheader",
            ))
        }
    }

    let mode_name = func.unique_value_name(STREAM_MODE);
    let mut clone = clone_function(func, fissioned_name(&func.name), vec![Param::new(mode_name, Type::I32)]);
    let mode = Value::Param(clone.params.len() as u32 - 1);

    let label = clone.unique_block_name(DISPATCH_BLOCK);
    let dispatch = clone.insert_block_after(entry, label);
    {
        let mut b = InstBuilder::at_end(&mut clone, dispatch);
        let cmp = b.icmp(
            IntPredicate::Eq,
            &format!("{}.cmp", STREAM_MODE),
            mode,
            Value::int(Type::I32, 0),
        );
        b.cond_br(Value::Inst(cmp), pair.first.preheader, pair.second.preheader);
    }
    clone
        .inst_mut(entry_br)
        .kind
        .replace_successor(pair.first.preheader, dispatch);
    for preheader in [pair.first.preheader, pair.second.preheader] {
        for phi in clone.phis(preheader) {
            if let InstKind::Phi { incoming } = &mut clone.inst_mut(phi).kind {
                for (_, pred) in incoming.iter_mut().filter(|(_, pred)| *pred == entry) {
                    *pred = dispatch;
                }
            }
        }
    }

    // Both loops already leave through the same exit block, so the first
    // loop's exit edge needs no redirection.
    debug!(
        "wired @{}: '{}' dispatches to '{}' / '{}', exit '{}'",
        clone.name,
        clone.block_name(dispatch),
        clone.block_name(pair.first.preheader),
        clone.block_name(pair.second.preheader),
        clone.block_name(pair.exit)
    );
    Ok(clone)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{analyze_loops, extract_bounds, find_induction_variable};
    use crate::codegen::print_function;
    use crate::frontend::parse_module;
    use crate::ir::{verify_function, Interpreter, Module, RtValue};
    use crate::transform::split::split_loop;

    fn split(source: &str) -> (Function, LoopPair) {
        let module = parse_module(source).expect("parses");
        let mut func = module.functions[0].clone();
        let info = analyze_loops(&func);
        let lp = info.loops[0].clone();
        let iv = find_induction_variable(&func, &lp).expect("counter");
        let bounds = extract_bounds(&mut func, &lp, &iv).expect("bounds");
        let pair = split_loop(&mut func, &lp, &iv, &bounds).expect("splits");
        (func, pair)
    }

    const MARK: &str = r#"
define void @mark(ptr %A, i32 %N) {
entry:
  br label %ph
ph:
  br label %loop
loop:
  %i = phi i32 [ 0, %ph ], [ %i.next, %loop ]
  %p = getelementptr i32, ptr %A, i32 %i
  store i32 1, ptr %p
  %i.next = add i32 %i, 1
  %c = icmp slt i32 %i.next, %N
  br i1 %c, label %loop, label %exit
exit:
  ret void
}
"#;

    #[test]
    fn test_wired_clone_shape() {
        let (func, pair) = split(MARK);
        let before = print_function(&func);
        let wired = wire_fission(&func, &pair).expect("wires");

        assert_eq!(print_function(&func), before, "input left untouched");
        assert_eq!(wired.name, "mark.fission");
        assert_eq!(wired.params.last().map(|p| p.name.as_str()), Some("streamMode"));
        assert_eq!(wired.block_name(wired.layout()[1]), DISPATCH_BLOCK);
        assert!(verify_function(&wired).is_ok());

        let text = print_function(&wired);
        assert!(text.contains("%streamMode.cmp = icmp eq i32 %streamMode, 0"));
        assert!(text.contains("br i1 %streamMode.cmp, label %ph, label %ph.split"));
    }

    #[test]
    fn test_mode_selects_half() {
        let (func, pair) = split(MARK);
        let wired = wire_fission(&func, &pair).expect("wires");
        let module = Module::new();

        for (mode, expected) in [(0, [1, 1, 1, 0, 0, 0]), (7, [0, 0, 0, 1, 1, 1])] {
            let mut interp = Interpreter::new(&module);
            let buf = interp.alloc_ints(&[0; 6]);
            interp
                .run_function(&wired, &[buf, RtValue::Int(6), RtValue::Int(mode)])
                .expect("runs");
            let seen: Vec<i64> = interp
                .buffer(buf)
                .expect("buffer")
                .iter()
                .filter_map(RtValue::as_int)
                .collect();
            assert_eq!(seen, expected.to_vec(), "streamMode = {}", mode);
        }
    }

    #[test]
    fn test_entry_must_branch_to_preheader() {
        let source = r#"
define void @guarded(ptr %A, i32 %N) {
entry:
  %nonempty = icmp sgt i32 %N, 0
  br i1 %nonempty, label %ph, label %exit
ph:
  br label %loop
loop:
  %i = phi i32 [ 0, %ph ], [ %i.next, %loop ]
  %p = getelementptr i32, ptr %A, i32 %i
  store i32 1, ptr %p
  %i.next = add i32 %i, 1
  %c = icmp slt i32 %i.next, %N
  br i1 %c, label %loop, label %exit
exit:
  ret void
}
"#;
        let (func, pair) = split(source);
        let err = wire_fission(&func, &pair).expect_err("conditional entry");
        assert_eq!(err.kind, FissionErrorKind::NotFissionable);
    }
}
