//! Loop splitting.
//!
//! The loop and its preheader are cloned. The original keeps iterating over
//! `[start, mid)`; the clone starts its counter at `mid` and runs to `end`.
//! Both loops leave through the original exit block.

use log::debug;

use super::clone::{clone_blocks, ValueMap};
use crate::analysis::{InductionVariable, Loop, LoopBounds};
use crate::ir::{BlockId, Function, InstBuilder, InstKind, Value};
use crate::utils::errors::{FissionError, FissionErrorKind};

/// Suffix given to cloned blocks and values.
pub const SPLIT_SUFFIX: &str = ".split";
/// Name of the compare introduced when the latch compare has other users.
pub const LOOPEXIT_MID: &str = "loopexit.mid";

/// Handles to one half of a split loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitLoop {
    pub preheader: BlockId,
    pub header: BlockId,
    pub latch: BlockId,
    /// Body blocks, header first
    pub blocks: Vec<BlockId>,
}

/// Two sibling loops covering `[start, mid)` and `[mid, end)`.
#[derive(Debug, Clone)]
pub struct LoopPair {
    pub first: SplitLoop,
    pub second: SplitLoop,
    /// Exit block shared by both loops
    pub exit: BlockId,
    /// Midpoint computed in each preheader
    pub first_mid: Value,
    pub second_mid: Value,
}

fn clone_failed(func: &Function, message: &str) -> FissionError {
    FissionError::new(FissionErrorKind::CloneFailed, func.name.clone(), message)
}

/// Split `lp` at `bounds.mid`.
///
/// `bounds` must come from [`crate::analysis::extract_bounds`] on the same
/// function, so the midpoint lives in the preheader and is cloned with it.
pub fn split_loop(
    func: &mut Function,
    lp: &Loop,
    iv: &InductionVariable,
    bounds: &LoopBounds,
) -> Result<LoopPair, FissionError> {
    let preheader = lp.preheader.ok_or_else(|| clone_failed(func, "loop has no preheader"))?;
    let latch = lp.latch().ok_or_else(|| clone_failed(func, "loop has no unique latch"))?;
    let exit = lp
        .exit_block()
        .ok_or_else(|| clone_failed(func, "loop does not have a unique exit block"))?;
    let last = *lp.blocks.last().ok_or_else(|| clone_failed(func, "loop has no blocks"))?;
    let branch = func
        .terminator(latch)
        .filter(|t| matches!(func.inst(*t).kind, InstKind::CondBr { .. }))
        .ok_or_else(|| clone_failed(func, "latch does not end in a conditional branch"))?;

    let mut region = vec![preheader];
    region.extend(lp.blocks.iter().copied().filter(|b| *b != preheader));
    let map = clone_blocks(func, &region, SPLIT_SUFFIX, last);

    connect_exit(func, lp, exit, &map);
    retarget_first_exit(func, iv, bounds, branch)?;

    let cloned_preheader = map.remap_block(preheader);
    let second_phi = map
        .inst(iv.phi)
        .ok_or_else(|| clone_failed(func, "counter was not cloned"))?;
    let second_mid = map.value(&bounds.mid);
    if !func.set_incoming(second_phi, cloned_preheader, second_mid.clone()) {
        return Err(clone_failed(func, "cloned counter has no preheader edge"));
    }

    let half = |blocks: &[BlockId], ph: BlockId, lt: BlockId| SplitLoop {
        preheader: ph,
        header: blocks[0],
        latch: lt,
        blocks: blocks.to_vec(),
    };
    let mut first_blocks = vec![lp.header];
    first_blocks.extend(lp.blocks.iter().copied().filter(|b| *b != lp.header));
    let second_blocks: Vec<BlockId> = first_blocks.iter().map(|b| map.remap_block(*b)).collect();

    debug!(
        "split loop '{}' of @{} into '{}' and '{}'",
        func.block_name(lp.header),
        func.name,
        func.block_name(lp.header),
        func.block_name(second_blocks[0])
    );

    Ok(LoopPair {
        first: half(&first_blocks, preheader, latch),
        second: half(&second_blocks, cloned_preheader, map.remap_block(latch)),
        exit,
        first_mid: bounds.mid.clone(),
        second_mid,
    })
}

/// Give exit-block phis an incoming value for every cloned exiting edge.
fn connect_exit(func: &mut Function, lp: &Loop, exit: BlockId, map: &ValueMap) {
    for phi in func.phis(exit) {
        let additions: Vec<(Value, BlockId)> = lp
            .exiting
            .iter()
            .filter_map(|exiting| {
                func.inst(phi)
                    .kind
                    .incoming_for(*exiting)
                    .map(|v| (map.value(v), map.remap_block(*exiting)))
            })
            .collect();
        for (value, pred) in additions {
            func.add_incoming(phi, value, pred);
        }
    }
}

/// Make the original loop leave once the counter reaches the midpoint.
fn retarget_first_exit(
    func: &mut Function,
    iv: &InductionVariable,
    bounds: &LoopBounds,
    branch: crate::ir::InstId,
) -> Result<(), FissionError> {
    let InstKind::ICmp { pred, lhs, rhs } = func.inst(bounds.compare).kind.clone() else {
        return Err(clone_failed(func, "latch condition is not a compare"));
    };
    let (lhs, rhs) = if iv.is_counter(&lhs) {
        (lhs, bounds.mid.clone())
    } else {
        (bounds.mid.clone(), rhs)
    };

    let shared = func.use_map().users(bounds.compare).len() > 1;
    if shared {
        let Some(mut b) = InstBuilder::before(func, branch) else {
            return Err(clone_failed(func, "latch branch is detached"));
        };
        let cond = b.icmp(pred, LOOPEXIT_MID, lhs, rhs);
        if let InstKind::CondBr { cond: old, .. } = &mut func.inst_mut(branch).kind {
            *old = Value::Inst(cond);
        }
    } else {
        func.inst_mut(bounds.compare).kind = InstKind::ICmp { pred, lhs, rhs };
    }
    Ok(())
}
