//! # kfission - Stream-mode loop fission for accelerator kernels
//!
//! Decides whether the iterations of a kernel's outermost loop are
//! independent and, when they are, emits a clone of the kernel whose loop is
//! split in two halves selected at runtime by an extra `streamMode`
//! argument:
//! - Induction-variable discovery
//! - Access-path dependence analysis
//! - Loop-bound extraction and midpoint synthesis
//! - Loop splitting and mode dispatch wiring
//!
//! ## Architecture
//!
//! ```text
//! IR text → Frontend → IR → Analysis → Transform → Printer → IR text
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use kfission::prelude::*;
//!
//! let mut module = kfission::parse(&std::fs::read_to_string("kernel.ll")?)?;
//! let report = kfission::fission_module(&mut module, FissionConfig::default());
//! for name in &report.candidate_functions {
//!     println!("fissioned {}", name);
//! }
//! std::fs::write("output.ll", kfission::codegen::print_module(&module))?;
//! ```

#![warn(clippy::all)]

pub mod analysis;
pub mod codegen;
pub mod frontend;
pub mod ir;
pub mod transform;
pub mod utils;

// Re-export commonly used types
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::analysis::{
        analyze_loops, extract_bounds, find_induction_variable, AccessPath, AnnotationOracle, DependenceAnalysis,
        InductionFinder, InductionVariable, KernelOracle, Loop, LoopBounds, LoopInfo, RegionOracle,
    };
    pub use crate::codegen::{print_function, print_module};
    pub use crate::frontend::parse_module;
    pub use crate::ir::{Function, Interpreter, Module, RtValue, Value};
    pub use crate::transform::{
        split_loop, wire_fission, FissionConfig, FissionPipeline, FissionRecord, FissionReport, LoopPair, Stage,
        Transform,
    };
    pub use crate::utils::errors::*;
}

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

/// Parse a module from IR text.
pub fn parse(source: &str) -> Result<ir::Module> {
    frontend::parse_module(source).context("Failed to parse IR module")
}

/// Read and parse a module file.
pub fn load_module(path: impl AsRef<Path>) -> Result<ir::Module> {
    let path = path.as_ref();
    let source = fs::read_to_string(path).with_context(|| format!("Failed to read module: {:?}", path))?;
    frontend::parse_module(&source).map_err(|err| {
        let snippet = err
            .span()
            .and_then(|span| utils::SourceMap::new(&source).snippet(&span));
        let err = anyhow::Error::new(err);
        match snippet {
            Some(snippet) => err.context(format!("Failed to parse module: {:?}\n{}", path, snippet)),
            None => err.context(format!("Failed to parse module: {:?}", path)),
        }
    })
}

/// Read a device module and, optionally, link a host module into it.
pub fn load_modules(device: impl AsRef<Path>, host: Option<&Path>) -> Result<ir::Module> {
    let mut module = load_module(device)?;
    if let Some(host) = host {
        module.link(load_module(host)?);
    }
    Ok(module)
}

/// Run loop fission over `module` with `config`.
pub fn fission_module(module: &mut ir::Module, config: transform::FissionConfig) -> transform::FissionReport {
    transform::FissionPipeline::new(config).run(module)
}

/// Parse, fission and print in one step.
pub fn fission_source(source: &str, config: transform::FissionConfig) -> Result<(String, transform::FissionReport)> {
    let mut module = parse(source)?;
    let report = fission_module(&mut module, config);
    Ok((codegen::print_module(&module), report))
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_parse_error_has_context() {
        let err = parse("define void @f( {").expect_err("malformed");
        assert!(err.to_string().contains("Failed to parse IR module"));
    }
}
