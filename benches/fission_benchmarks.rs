//! Benchmarks for the fission pipeline.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use kfission::analysis::{analyze_loops, find_induction_variable, DependenceAnalysis};
use kfission::transform::{FissionConfig, FissionPipeline};

const VECADD: &str = r#"
define void @vecadd(ptr %A, ptr %B, ptr %C, i32 %N) {
entry:
  br label %ph
ph:
  br label %loop
loop:
  %i = phi i32 [ 0, %ph ], [ %i.next, %loop ]
  %idx = sext i32 %i to i64
  %pa = getelementptr inbounds float, ptr %A, i64 %idx
  %a = load float, ptr %pa, align 4
  %pb = getelementptr inbounds float, ptr %B, i64 %idx
  %b = load float, ptr %pb, align 4
  %s = fadd float %a, %b
  %pc = getelementptr inbounds float, ptr %C, i64 %idx
  store float %s, ptr %pc, align 4
  %i.next = add nsw i32 %i, 1
  %c = icmp slt i32 %i.next, %N
  br i1 %c, label %loop, label %exit
exit:
  ret void
}

!nvvm.annotations = !{!0}
!0 = !{ptr @vecadd, !"kernel", i32 1}
"#;

/// Benchmark lexer speed.
fn bench_lexing(c: &mut Criterion) {
    c.bench_function("lex_vecadd", |b| {
        b.iter(|| {
            let lexer = kfission::frontend::Lexer::new(black_box(VECADD));
            lexer.tokenize().unwrap()
        })
    });
}

/// Benchmark parsing speed.
fn bench_parsing(c: &mut Criterion) {
    c.bench_function("parse_vecadd", |b| {
        b.iter(|| kfission::frontend::parse_module(black_box(VECADD)).unwrap())
    });
}

/// Benchmark the access-path analysis alone.
fn bench_dependence(c: &mut Criterion) {
    let module = kfission::frontend::parse_module(VECADD).unwrap();
    let func = &module.functions[0];
    let info = analyze_loops(func);
    let iv = find_induction_variable(func, &info.loops[0]).unwrap();

    c.bench_function("dependence_vecadd", |b| {
        b.iter(|| DependenceAnalysis::new(black_box(func)).is_independent(iv.phi))
    });
}

/// Benchmark a full pipeline run, including splitting and wiring.
fn bench_pipeline(c: &mut Criterion) {
    let module = kfission::frontend::parse_module(VECADD).unwrap();

    c.bench_function("fission_vecadd", |b| {
        b.iter(|| {
            let mut module = module.clone();
            FissionPipeline::new(FissionConfig::default()).run(black_box(&mut module))
        })
    });
}

criterion_group!(benches, bench_lexing, bench_parsing, bench_dependence, bench_pipeline);
criterion_main!(benches);
