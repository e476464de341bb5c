//! Induction-variable discovery.
//!
//! The counter of a loop is a header phi whose value along the latch edge is
//! `add phi, step`. It is confirmed by a compare inside the loop that uses
//! either the phi or its increment.

use log::{debug, warn};

use super::loops::Loop;
use crate::codegen::format_instruction;
use crate::ir::{BinaryOp, Function, InstId, InstKind, Value};
use crate::utils::errors::{FissionError, FissionErrorKind};

/// The counter driving a loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InductionVariable {
    /// Header phi
    pub phi: InstId,
    /// `add` feeding the phi along the latch edge
    pub step: InstId,
    /// Compare inside the loop that uses the phi or the step, when found
    pub compare: Option<InstId>,
}

impl InductionVariable {
    /// Whether `value` is the counter or its increment.
    pub fn is_counter(&self, value: &Value) -> bool {
        value.is_inst(self.phi) || value.is_inst(self.step)
    }
}

/// Finds the counter of a loop.
#[derive(Debug, Clone, Copy)]
pub struct InductionFinder {
    /// Accept a self-incrementing phi even when no compare uses it.
    pub allow_uncompared_counter: bool,
}

impl Default for InductionFinder {
    fn default() -> Self {
        Self {
            allow_uncompared_counter: true,
        }
    }
}

impl InductionFinder {
    pub fn new(allow_uncompared_counter: bool) -> Self {
        Self {
            allow_uncompared_counter,
        }
    }

    /// Locate the counter of `lp`.
    pub fn find(&self, func: &Function, lp: &Loop) -> Result<InductionVariable, FissionError> {
        let missing = |message: &str| {
            FissionError::new(FissionErrorKind::NoInductionVariable, func.name.clone(), message)
        };
        let latch = lp
            .latch()
            .ok_or_else(|| missing("loop does not have a unique latch"))?;

        let uses = func.use_map();
        let compare_in_loop = |inst: InstId| {
            uses.users(inst).iter().copied().find(|user| {
                matches!(func.inst(*user).kind, InstKind::ICmp { .. })
                    && func.inst(*user).block().map(|b| lp.contains(b)).unwrap_or(false)
            })
        };

        for phi in func.phis(lp.header) {
            let Some(step) = func.inst(phi).kind.incoming_for(latch).and_then(Value::as_inst) else {
                continue;
            };
            let InstKind::Binary {
                op: BinaryOp::Add,
                lhs,
                rhs,
            } = &func.inst(step).kind
            else {
                continue;
            };
            if !lhs.is_inst(phi) && !rhs.is_inst(phi) {
                continue;
            }

            let compare = compare_in_loop(phi).or_else(|| compare_in_loop(step));
            match compare {
                Some(cmp) => {
                    debug!("counter compared by: {}", format_instruction(func, cmp));
                }
                None if self.allow_uncompared_counter => {
                    warn!(
                        "accepting '%{}' in @{} as counter without a compare",
                        func.value_name(&Value::Inst(phi)),
                        func.name
                    );
                }
                None => continue,
            }
            return Ok(InductionVariable { phi, step, compare });
        }

        Err(missing("no header phi is incremented by an add of itself"))
    }
}

/// Locate the counter of `lp` with the default policy.
pub fn find_induction_variable(func: &Function, lp: &Loop) -> Result<InductionVariable, FissionError> {
    InductionFinder::default().find(func, lp)
}
