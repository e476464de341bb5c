//! Optional static-control region verdicts.

use super::loops::Loop;
use crate::ir::Function;

/// A second opinion on whether a loop has analyzable control structure.
///
/// `Some(false)` vetoes the loop. `Some(true)` is only advisory: the
/// dependence test still has to prove the loop independent.
pub trait RegionOracle {
    fn verdict(&self, func: &Function, lp: &Loop) -> Option<bool>;
}

/// No region framework available.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRegionOracle;

impl RegionOracle for NoRegionOracle {
    fn verdict(&self, _func: &Function, _lp: &Loop) -> Option<bool> {
        None
    }
}

impl<F> RegionOracle for F
where
    F: Fn(&Function, &Loop) -> Option<bool>,
{
    fn verdict(&self, func: &Function, lp: &Loop) -> Option<bool> {
        self(func, lp)
    }
}
