//! Loop fission transforms.

pub mod clone;
pub mod fission;
pub mod pipeline;
pub mod split;

pub use clone::{clone_blocks, clone_function, ValueMap};
pub use fission::{fissioned_name, wire_fission, DISPATCH_BLOCK, STREAM_MODE};
pub use pipeline::{FissionConfig, FissionPipeline, FissionRecord, FissionReport, LaunchPairing, Stage};
pub use split::{split_loop, LoopPair, SplitLoop};

use crate::ir::Module;
use anyhow::Result;

/// Module transformation pass trait.
pub trait Transform {
    /// Apply the transformation. Returns whether the module changed.
    fn apply(&self, module: &mut Module) -> Result<bool>;

    /// Get transformation name.
    fn name(&self) -> &str;
}

impl Transform for FissionPipeline {
    fn apply(&self, module: &mut Module) -> Result<bool> {
        let report = self.run(module);
        Ok(report.found_loop() && !report.dry_run)
    }

    fn name(&self) -> &str {
        "loop-fission"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parse_module;

    #[test]
    fn test_apply_reports_change() {
        let source = r#"
define void @zero(ptr %A, i32 %N) {
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
        let mut module = parse_module(source).expect("parses");
        let pass = FissionPipeline::new(FissionConfig::permissive());
        assert_eq!(pass.name(), "loop-fission");
        assert!(pass.apply(&mut module).expect("applies"));
        assert!(module.function("zero.fission").is_some());
        assert!(!pass.apply(&mut module).expect("applies"), "already fissioned");
    }
}
