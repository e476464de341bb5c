//! Analyses feeding loop fission.
//!
//! - `cfg` / `loops`: control-flow graph, dominators and natural loops
//! - `induction`: the counter driving a loop
//! - `dependence`: access-path independence test
//! - `bounds`: iteration range and midpoint
//! - `kernel` / `region`: external classification oracles

pub mod bounds;
pub mod cfg;
pub mod dependence;
pub mod induction;
pub mod kernel;
pub mod loops;
pub mod region;

pub use bounds::{extract_bounds, find_bounds, LoopBounds};
pub use cfg::{Cfg, DominatorTree};
pub use dependence::{AccessKind, AccessPath, AccessPathSummary, Conflict, DependenceAnalysis, DependenceResult};
pub use induction::{find_induction_variable, InductionFinder, InductionVariable};
pub use kernel::{demangle, kernel_for_stub, AnnotationOracle, KernelOracle};
pub use loops::{analyze_loops, Loop, LoopInfo};
pub use region::{NoRegionOracle, RegionOracle};
