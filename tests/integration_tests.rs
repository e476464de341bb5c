//! Integration tests for the fission pipeline.

use std::collections::BTreeSet;
use std::fs;

use kfission::analysis::{analyze_loops, find_induction_variable, AnnotationOracle, KernelOracle};
use kfission::codegen::print_module;
use kfission::prelude::*;
use kfission::transform::{DISPATCH_BLOCK, STREAM_MODE};
use kfission::{fission_source, load_module, load_modules, parse};

const KERNELS: &str = r#"
; ModuleID = 'fission_test.cu'
source_filename = "fission_test.cu"
target triple = "nvptx64-nvidia-cuda"

define dso_local void @parallel_loop(ptr noundef %A, ptr noundef %B, ptr noundef %C) #0 {
entry:
  br label %for.ph
for.ph:
  br label %for.body
for.body:
  %i = phi i32 [ 0, %for.ph ], [ %i.next, %for.body ]
  %idx = sext i32 %i to i64
  %pa = getelementptr inbounds float, ptr %A, i64 %idx
  %a = load float, ptr %pa, align 4
  %pb = getelementptr inbounds float, ptr %B, i64 %idx
  %b = load float, ptr %pb, align 4
  %s = fadd float %a, %b
  %pc = getelementptr inbounds float, ptr %C, i64 %idx
  store float %s, ptr %pc, align 4
  %i.next = add nsw i32 %i, 1
  %cmp = icmp slt i32 %i.next, 1000
  br i1 %cmp, label %for.body, label %for.end
for.end:
  ret void
}

define dso_local void @loop_with_dependency(ptr noundef %A) #0 {
entry:
  br label %for.ph
for.ph:
  br label %for.body
for.body:
  %i = phi i32 [ 1, %for.ph ], [ %i.next, %for.body ]
  %im1 = sub nsw i32 %i, 1
  %prev.idx = sext i32 %im1 to i64
  %pprev = getelementptr inbounds i32, ptr %A, i64 %prev.idx
  %prev = load i32, ptr %pprev, align 4
  %v = add nsw i32 %prev, 1
  %cur.idx = sext i32 %i to i64
  %pcur = getelementptr inbounds i32, ptr %A, i64 %cur.idx
  store i32 %v, ptr %pcur, align 4
  %i.next = add nsw i32 %i, 1
  %cmp = icmp slt i32 %i.next, 1000
  br i1 %cmp, label %for.body, label %for.end
for.end:
  ret void
}

attributes #0 = { convergent mustprogress noinline }

!nvvm.annotations = !{!0, !1}
!0 = !{ptr @parallel_loop, !"kernel", i32 1}
!1 = !{ptr @loop_with_dependency, !"kernel", i32 1}
"#;

/// Records every counter value it runs with through `@visit`.
const VISITING: &str = r#"
define i32 @walk(ptr %A, i32 %N) {
entry:
  br label %ph
ph:
  br label %loop
loop:
  %i = phi i32 [ 0, %ph ], [ %i.next, %loop ]
  call void @visit(i32 %i)
  %p = getelementptr i32, ptr %A, i32 %i
  store i32 %i, ptr %p
  %i.next = add nsw i32 %i, 1
  %c = icmp slt i32 %i.next, %N
  br i1 %c, label %loop, label %exit
exit:
  %last = phi i32 [ %i.next, %loop ]
  ret i32 %last
}

declare void @visit(i32)

!nvvm.annotations = !{!0}
!0 = !{ptr @walk, !"kernel", i32 1}
"#;

fn fissioned(source: &str) -> (Module, FissionReport) {
    let mut module = parse(source).expect("parses");
    let report = FissionPipeline::default().run(&mut module);
    (module, report)
}

/// Counter values `@walk.fission` visits for `n` iterations in `mode`, and
/// its return value.
fn visited(module: &Module, n: i64, mode: i64) -> (Vec<i64>, Option<RtValue>) {
    let mut interp = Interpreter::new(module);
    let buf = interp.alloc_ints(&vec![-1; n as usize]);
    let ret = interp
        .call("walk.fission", &[buf, RtValue::Int(n), RtValue::Int(mode)])
        .expect("runs");
    let seen = interp
        .trace()
        .iter()
        .filter(|call| call.callee == "visit")
        .filter_map(|call| call.args.first().and_then(RtValue::as_int))
        .collect();
    (seen, ret)
}

#[test]
fn test_end_to_end_fissions_only_parallel_loop() {
    let (module, report) = fissioned(KERNELS);

    let names: Vec<&str> = module.functions.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["parallel_loop", "parallel_loop.fission", "loop_with_dependency"]);
    assert_eq!(report.candidate_functions, vec!["parallel_loop"]);
    assert!(report.found_loop());

    let dependency = report.record("loop_with_dependency").expect("record");
    assert_eq!(dependency.verdict, Some(false));
    assert_eq!(
        dependency.error.as_ref().map(|e| e.kind),
        Some(FissionErrorKind::DependentLoop)
    );

    let parallel = report.record("parallel_loop").expect("record");
    assert_eq!(parallel.verdict, Some(true));
    assert_eq!(parallel.stage, Stage::Committed);
    assert_eq!(parallel.fissioned.as_deref(), Some("parallel_loop.fission"));

    let clone = module.function("parallel_loop.fission").expect("clone");
    assert!(kfission::ir::verify_function(clone).is_ok());
    assert_eq!(clone.params.last().map(|p| p.name.as_str()), Some(STREAM_MODE));
    assert!(clone.block_by_name(DISPATCH_BLOCK).is_some());
    assert!(AnnotationOracle.is_kernel(&module, clone));
}

#[test]
fn test_original_functions_are_untouched() {
    let input = parse(KERNELS).expect("parses");
    let (module, _) = fissioned(KERNELS);

    for original in &input.functions {
        let after = module.function(&original.name).expect("still present");
        assert_eq!(print_function(after), print_function(original), "@{}", original.name);
    }
}

#[test]
fn test_fissioned_halves_compute_the_original_result() {
    let (module, _) = fissioned(KERNELS);
    let a: Vec<f64> = (0..1000).map(|i| i as f64).collect();
    let b: Vec<f64> = (0..1000).map(|i| (2 * i) as f64).collect();

    let mut interp = Interpreter::new(&module);
    let (pa, pb) = (interp.alloc_floats(&a), interp.alloc_floats(&b));
    let expected = interp.alloc_floats(&[0.0; 1000]);
    interp.call("parallel_loop", &[pa, pb, expected]).expect("original runs");

    let combined = interp.alloc_floats(&[0.0; 1000]);
    for mode in [0, 1] {
        interp
            .call("parallel_loop.fission", &[pa, pb, combined, RtValue::Int(mode)])
            .expect("clone runs");
    }
    assert_eq!(interp.buffer(combined), interp.buffer(expected));
}

#[test]
fn test_range_reconstruction() {
    let (module, report) = fissioned(VISITING);
    assert_eq!(report.candidate_functions, vec!["walk"]);

    for n in [2, 10, 64, 1000] {
        let (first, _) = visited(&module, n, 0);
        let (second, _) = visited(&module, n, 1);

        let mut all = first.clone();
        all.extend(&second);
        let unique: BTreeSet<i64> = all.iter().copied().collect();
        assert_eq!(unique.len(), all.len(), "no counter value visited twice for N={}", n);
        assert_eq!(unique, (0..n).collect::<BTreeSet<_>>(), "N={}", n);
    }
}

#[test]
fn test_mode_gated_execution() {
    let (module, _) = fissioned(VISITING);

    let (first, ret) = visited(&module, 10, 0);
    assert_eq!(first, vec![0, 1, 2, 3, 4]);
    assert_eq!(ret, Some(RtValue::Int(5)));

    for mode in [1, -1, 42] {
        let (second, ret) = visited(&module, 10, mode);
        assert_eq!(second, vec![5, 6, 7, 8, 9], "streamMode = {}", mode);
        assert_eq!(ret, Some(RtValue::Int(10)));
    }
}

#[test]
fn test_both_modes_leave_through_one_exit() {
    let (module, _) = fissioned(VISITING);
    let clone = module.function("walk.fission").expect("clone");
    let exit = clone.block_by_name("exit").expect("exit");

    let info = analyze_loops(clone);
    assert_eq!(info.loops.len(), 2);
    for lp in &info.loops {
        assert_eq!(lp.exits, vec![exit]);
    }
    assert_eq!(clone.layout().iter().filter(|b| clone.block_name(**b).starts_with("exit")).count(), 1);
}

#[test]
fn test_conditional_entry_is_not_fissionable() {
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
  store i32 0, ptr %p
  %i.next = add i32 %i, 1
  %c = icmp slt i32 %i.next, %N
  br i1 %c, label %loop, label %exit
exit:
  ret void
}

!nvvm.annotations = !{!0}
!0 = !{ptr @guarded, !"kernel", i32 1}
"#;
    let mut module = parse(source).expect("parses");
    let before = print_module(&module);
    let report = FissionPipeline::default().run(&mut module);

    assert_eq!(print_module(&module), before);
    let record = report.record("guarded").expect("record");
    assert_eq!(record.verdict, Some(true));
    assert_eq!(record.stage, Stage::Wire);
    assert_eq!(
        record.error.as_ref().map(|e| e.kind),
        Some(FissionErrorKind::NotFissionable)
    );
}

#[test]
fn test_counter_discovery_is_deterministic() {
    let module = parse(KERNELS).expect("parses");
    let func = module.function("parallel_loop").expect("function");
    let info = analyze_loops(func);

    let first = find_induction_variable(func, &info.loops[0]).expect("counter");
    for _ in 0..5 {
        assert_eq!(find_induction_variable(func, &info.loops[0]).expect("counter"), first);
    }
    assert_eq!(func.inst(first.phi).name.as_deref(), Some("i"));
    assert_eq!(func.inst(first.step).name.as_deref(), Some("i.next"));
}

#[test]
fn test_strict_counter_policy() {
    let source = r#"
define void @flagged(ptr %A, ptr %stop) {
entry:
  br label %ph
ph:
  br label %loop
loop:
  %i = phi i32 [ 0, %ph ], [ %i.next, %loop ]
  %p = getelementptr i32, ptr %A, i32 %i
  store i32 0, ptr %p
  %i.next = add i32 %i, 1
  %done = load i1, ptr %stop
  br i1 %done, label %exit, label %loop
exit:
  ret void
}

!nvvm.annotations = !{!0}
!0 = !{ptr @flagged, !"kernel", i32 1}
"#;
    let mut module = parse(source).expect("parses");
    let report = FissionPipeline::new(FissionConfig::strict()).run(&mut module);
    let record = report.record("flagged").expect("record");
    assert_eq!(
        record.error.as_ref().map(|e| e.kind),
        Some(FissionErrorKind::NoInductionVariable)
    );

    // The default policy accepts the counter but cannot recover an end bound.
    let mut module = parse(source).expect("parses");
    let report = FissionPipeline::default().run(&mut module);
    let record = report.record("flagged").expect("record");
    assert_eq!(record.induction_variable.as_deref(), Some("i"));
    assert_eq!(
        record.error.as_ref().map(|e| e.kind),
        Some(FissionErrorKind::BoundsNotRecoverable)
    );
}

#[test]
fn test_output_round_trips() {
    let (text, report) = fission_source(KERNELS, FissionConfig::default()).expect("runs");
    assert!(report.found_loop());

    let reparsed = parse(&text).expect("output parses");
    assert_eq!(print_module(&reparsed), text);
    assert!(text.contains("define void @parallel_loop.fission(ptr %A, ptr %B, ptr %C, i32 %streamMode)"));
    assert!(text.contains("!2 = !{ptr @parallel_loop.fission, !\"kernel\", i32 1}"));
}

#[test]
fn test_file_io_and_host_linking() {
    let dir = tempfile::tempdir().expect("temp dir");
    let device_path = dir.path().join("device.ll");
    let host_path = dir.path().join("host.ll");
    let output_path = dir.path().join("output.ll");

    let device = r#"
define void @_Z5fillAPii(ptr %A, i32 %N) {
entry:
  br label %ph
ph:
  br label %loop
loop:
  %i = phi i32 [ 0, %ph ], [ %i.next, %loop ]
  %p = getelementptr i32, ptr %A, i32 %i
  store i32 7, ptr %p
  %i.next = add i32 %i, 1
  %c = icmp slt i32 %i.next, %N
  br i1 %c, label %loop, label %exit
exit:
  ret void
}

!nvvm.annotations = !{!0}
!0 = !{ptr @_Z5fillAPii, !"kernel", i32 1}
"#;
    let host = r#"
define void @_Z20__device_stub__fillAPii(ptr %A, i32 %N) {
entry:
  call void @cudaLaunchKernel(ptr %A, i32 %N)
  ret void
}

declare void @cudaLaunchKernel(ptr, i32)
"#;
    fs::write(&device_path, device).expect("write device");
    fs::write(&host_path, host).expect("write host");

    let mut module = load_modules(&device_path, Some(host_path.as_path())).expect("loads");
    assert_eq!(module.functions.len(), 2);

    let report = FissionPipeline::default().run(&mut module);
    assert_eq!(report.candidate_functions, vec!["_Z5fillAPii"]);
    assert_eq!(report.launch_stubs.len(), 1);
    assert_eq!(report.launch_stubs[0].stub, "_Z20__device_stub__fillAPii");

    fs::write(&output_path, print_module(&module)).expect("write output");
    let reloaded = load_module(&output_path).expect("reloads");
    assert!(reloaded.function("_Z5fillAPii.fission").is_some());

    let json = report.to_json().expect("serializes");
    let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");
    assert_eq!(value["records"][0]["stage"], "Committed");
    assert_eq!(value["records"][0]["verdict"], true);
}

#[test]
fn test_missing_file_is_an_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let err = load_module(dir.path().join("absent.ll")).expect_err("missing");
    assert!(err.to_string().contains("Failed to read module"));
}

#[test]
fn test_malformed_file_names_the_path() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("broken.ll");
    fs::write(&path, "define void @f() {\nentry:\n  bogus\n}\n").expect("write");
    let err = load_module(&path).expect_err("malformed");
    let message = err.to_string();
    assert!(message.contains("Failed to parse module"));
    assert!(message.contains("broken.ll"));
}
