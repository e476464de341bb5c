//! Structural verifier.
//!
//! Checks the invariants every transform must preserve: each block ends in
//! exactly one terminator, phis lead their block and name exactly the
//! block's predecessors, operands refer to live definitions, and every
//! definition dominates its uses.

use std::collections::{BTreeSet, HashMap};

use super::function::Function;
use super::inst::InstKind;
use super::types::Value;
use super::{BlockId, InstId};
use crate::analysis::cfg::{Cfg, DominatorTree};
use crate::utils::errors::{VerifyError, VerifyErrorKind};

fn fail(func: &Function, kind: VerifyErrorKind, message: String) -> VerifyError {
    VerifyError {
        message,
        function: func.name.clone(),
        kind,
    }
}

/// Verify a function definition.
pub fn verify_function(func: &Function) -> Result<(), VerifyError> {
    if func.entry().is_none() {
        return Err(fail(func, VerifyErrorKind::EmptyFunction, "Function has no blocks".into()));
    }

    check_block_shape(func)?;

    let cfg = Cfg::build(func);
    check_phis(func, &cfg)?;

    let dom = DominatorTree::build(&cfg);
    check_operands(func, &cfg, &dom)
}

fn check_block_shape(func: &Function) -> Result<(), VerifyError> {
    for &block in func.layout() {
        let insts = func.block(block).insts();
        let name = func.block_name(block);

        match insts.last() {
            Some(last) if func.inst(*last).kind.is_terminator() => {}
            _ => {
                return Err(fail(
                    func,
                    VerifyErrorKind::BadTerminator,
                    format!("Block '{}' does not end in a terminator", name),
                ))
            }
        }

        let mut past_phis = false;
        for (pos, &id) in insts.iter().enumerate() {
            let kind = &func.inst(id).kind;
            if kind.is_terminator() && pos + 1 != insts.len() {
                return Err(fail(
                    func,
                    VerifyErrorKind::BadTerminator,
                    format!("Terminator in the middle of block '{}'", name),
                ));
            }
            if kind.is_phi() {
                if past_phis {
                    return Err(fail(
                        func,
                        VerifyErrorKind::MisplacedPhi,
                        format!("Phi after a non-phi instruction in block '{}'", name),
                    ));
                }
            } else {
                past_phis = true;
            }
            for succ in kind.successors() {
                if !func.contains_block(succ) {
                    return Err(fail(
                        func,
                        VerifyErrorKind::DanglingOperand,
                        format!("Block '{}' branches to a block outside the function", name),
                    ));
                }
            }
        }
    }
    Ok(())
}

fn check_phis(func: &Function, cfg: &Cfg) -> Result<(), VerifyError> {
    for &block in func.layout() {
        let preds: BTreeSet<BlockId> = cfg.predecessors(block).iter().copied().collect();
        for phi in func.phis(block) {
            let InstKind::Phi { incoming } = &func.inst(phi).kind else {
                continue;
            };
            let sources: BTreeSet<BlockId> = incoming.iter().map(|(_, b)| *b).collect();
            if sources != preds {
                let list = |set: &BTreeSet<BlockId>| {
                    set.iter()
                        .map(|b| format!("%{}", func.block_name(*b)))
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                return Err(fail(
                    func,
                    VerifyErrorKind::PhiPredecessorMismatch,
                    format!(
                        "Phi '%{}' in block '{}' has incoming [{}] but predecessors [{}]",
                        func.value_name(&Value::Inst(phi)),
                        func.block_name(block),
                        list(&sources),
                        list(&preds)
                    ),
                ));
            }
        }
    }
    Ok(())
}

fn check_operands(func: &Function, cfg: &Cfg, dom: &DominatorTree) -> Result<(), VerifyError> {
    let mut position: HashMap<InstId, usize> = HashMap::new();
    for &block in func.layout() {
        for (pos, &id) in func.block(block).insts().iter().enumerate() {
            position.insert(id, pos);
        }
    }

    for &block in func.layout() {
        for &user in func.block(block).insts() {
            let inst = func.inst(user);
            let incoming_blocks: Vec<Option<BlockId>> = match &inst.kind {
                InstKind::Phi { incoming } => incoming.iter().map(|(_, b)| Some(*b)).collect(),
                kind => vec![None; kind.operands().len()],
            };

            for (operand, edge) in inst.kind.operands().into_iter().zip(incoming_blocks) {
                match operand {
                    Value::Param(index) if *index as usize >= func.params.len() => {
                        return Err(fail(
                            func,
                            VerifyErrorKind::DanglingOperand,
                            format!("Use of missing parameter #{}", index),
                        ));
                    }
                    Value::Inst(def) => {
                        let def_block = if func.is_valid_inst(*def) {
                            func.inst(*def).block().filter(|b| func.contains_block(*b))
                        } else {
                            None
                        };
                        let Some(def_block) = def_block else {
                            return Err(fail(
                                func,
                                VerifyErrorKind::DanglingOperand,
                                format!(
                                    "'%{}' uses a removed instruction",
                                    func.value_name(&Value::Inst(user))
                                ),
                            ));
                        };
                        if !cfg.is_reachable(block) {
                            continue;
                        }
                        let dominated = match edge {
                            Some(pred) => !cfg.is_reachable(pred) || dom.dominates(def_block, pred),
                            None if def_block == block => position[def] < position[&user],
                            None => dom.strictly_dominates(def_block, block),
                        };
                        if !dominated {
                            return Err(fail(
                                func,
                                VerifyErrorKind::DominanceViolation,
                                format!(
                                    "'%{}' does not dominate its use in block '{}'",
                                    func.value_name(operand),
                                    func.block_name(block)
                                ),
                            ));
                        }
                    }
                    _ => {}
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parse_module;

    fn verify_text(source: &str) -> Result<(), VerifyError> {
        let module = parse_module(source).expect("parses");
        verify_function(&module.functions[0])
    }

    #[test]
    fn test_well_formed_loop() {
        let source = r#"
define void @f(i32 %n) {
entry:
  br label %loop
loop:
  %i = phi i32 [ 0, %entry ], [ %i.next, %loop ]
  %i.next = add i32 %i, 1
  %c = icmp slt i32 %i.next, %n
  br i1 %c, label %loop, label %exit
exit:
  ret void
}
"#;
        assert!(verify_text(source).is_ok());
    }

    #[test]
    fn test_missing_terminator() {
        let mut module = parse_module("define void @f() {\nentry:\n  ret void\n}\n").expect("parses");
        let func = &mut module.functions[0];
        let entry = func.entry().expect("entry");
        let ret = func.terminator(entry).expect("ret");
        func.remove_inst(ret);
        let err = verify_function(func).expect_err("unterminated block");
        assert_eq!(err.kind, VerifyErrorKind::BadTerminator);
    }

    #[test]
    fn test_phi_predecessor_mismatch() {
        let source = r#"
define void @f(i32 %n) {
entry:
  br label %loop
loop:
  %i = phi i32 [ 0, %entry ]
  %i.next = add i32 %i, 1
  %c = icmp slt i32 %i.next, %n
  br i1 %c, label %loop, label %exit
exit:
  ret void
}
"#;
        let err = verify_text(source).expect_err("latch edge missing");
        assert_eq!(err.kind, VerifyErrorKind::PhiPredecessorMismatch);
    }

    #[test]
    fn test_use_before_definition() {
        let source = r#"
define i32 @f(i32 %n) {
entry:
  %a = add i32 %b, 1
  %b = add i32 %n, 1
  ret i32 %a
}
"#;
        let err = verify_text(source).expect_err("use precedes def");
        assert_eq!(err.kind, VerifyErrorKind::DominanceViolation);
    }

    #[test]
    fn test_definition_on_one_branch_only() {
        let source = r#"
define i32 @f(i1 %c) {
entry:
  br i1 %c, label %left, label %join
left:
  %x = add i32 1, 2
  br label %join
join:
  ret i32 %x
}
"#;
        let err = verify_text(source).expect_err("left does not dominate join");
        assert_eq!(err.kind, VerifyErrorKind::DominanceViolation);
    }
}
