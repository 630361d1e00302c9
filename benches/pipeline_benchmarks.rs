//! Benchmarks for the generation pipeline.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use psyforge::prelude::*;

const KERNEL: &str = r#"
module inc_field_mod
  type, extends(kernel_type) :: inc_field_type
    type(arg_type), dimension(3) :: meta_args = (/              &
         arg_type(GH_SCALAR, GH_REAL, GH_READ),                 &
         arg_type(GH_FIELD, GH_REAL, GH_INC, W1),               &
         arg_type(GH_FIELD, GH_REAL, GH_READ, W3) /)
    integer :: operates_on = CELL_COLUMN
  contains
    procedure, nopass :: inc_field_code
  end type inc_field_type
end module inc_field_mod
"#;

fn algorithm(invokes: usize) -> String {
    let mut src = String::from("program alg\n  use inc_field_mod, only: inc_field_type\n");
    for i in 0..invokes {
        src.push_str(&format!(
            "  call invoke(inc_field_type(a, f{0}, g), setval_c(h{0}, 0.0_r_def), inc_x_plus_y(h{0}, g))\n",
            i
        ));
    }
    src.push_str("end program alg\n");
    src
}

/// Benchmark lexer speed.
fn bench_lexing(c: &mut Criterion) {
    let source = algorithm(50);
    c.bench_function("lex_algorithm_50", |b| {
        b.iter(|| {
            let lexer = psyforge::frontend::Lexer::new(black_box(&source));
            lexer.tokenize().unwrap()
        })
    });
}

/// Benchmark kernel metadata parsing.
fn bench_metadata(c: &mut Criterion) {
    c.bench_function("parse_kernel_metadata", |b| b.iter(|| parse_kernel_module(black_box(KERNEL)).unwrap()));
}

/// Benchmark the full pipeline with a colour + OpenMP script.
fn bench_pipeline(c: &mut Criterion) {
    let config = Config::default();
    let mut registry = KernelRegistry::new();
    registry.extend(parse_kernel_module(KERNEL).unwrap());
    let script = Script::from_json(
        r#"{"steps":[
            {"transformation":"colour","target":"loop:inc_field_type"},
            {"transformation":"omp_parallel_do","target":"loop:inc_field_type"},
            {"transformation":"loop_fuse","target":"loop:setval_c","options":{"with":"loop:inc_x_plus_y"}}
        ]}"#,
    )
    .unwrap();
    let source = algorithm(20);
    c.bench_function("pipeline_20_invokes", |b| {
        b.iter(|| {
            Pipeline::new(&config)
                .run_with_registry(black_box(&source), "alg", &registry, Some(&script))
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_lexing, bench_metadata, bench_pipeline);
criterion_main!(benches);
