//! Integration tests for the parse → build → transform → generate pipeline.

use psyforge::prelude::*;
use psyforge::transform::TransformOptions;

const UPDATE_FIELD: &str = r#"
module update_field_mod
  use argument_mod
  use kernel_mod
  implicit none
  type, extends(kernel_type) :: update_field_type
    type(arg_type), dimension(2) :: meta_args = (/              &
         arg_type(GH_FIELD, GH_REAL, GH_READWRITE, W3),         &
         arg_type(GH_FIELD, GH_REAL, GH_READ,      W3) /)
    integer :: operates_on = CELL_COLUMN
  contains
    procedure, nopass :: update_field_code
  end type update_field_type
contains
  subroutine update_field_code(nlayers, field, increment, ndf_w3, undf_w3, map_w3)
    integer, intent(in) :: nlayers
    field(map_w3(1)) = field(map_w3(1)) + increment(map_w3(1))
  end subroutine update_field_code
end module update_field_mod
"#;

const INC_FIELD: &str = r#"
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

fn registry() -> KernelRegistry {
    let mut r = KernelRegistry::new();
    r.extend(parse_kernel_module(UPDATE_FIELD).unwrap());
    r.extend(parse_kernel_module(INC_FIELD).unwrap());
    r
}

fn run(source: &str, config: &Config, script: Option<&str>) -> PsyResult<PipelineOutput> {
    let script = script.map(|s| Script::from_json(s).unwrap());
    Pipeline::new(config).run_with_registry(source, "alg", &registry(), script.as_ref())
}

const TWO_UPDATES: &str = r#"program alg
  use update_field_mod, only: update_field_type
  call invoke(update_field_type(f, inc), update_field_type(f, inc))
end program alg
"#;

#[test]
fn test_successive_updates_have_dependency_and_cannot_swap() {
    let config = Config::default();
    let out = run(TWO_UPDATES, &config, None).unwrap();
    let schedule = &out.schedules[0];
    let loops = schedule.tree.outermost_loops();
    assert_eq!(loops.len(), 2);
    assert!(schedule
        .dependencies
        .iter()
        .any(|e| e.from == loops[0] && e.to == loops[1] && e.field == "f"));

    let mut s = schedule.clone();
    let engine = TransformationEngine::new(&config);
    let options = TransformOptions::new().with("before", "0");
    let err = engine.apply(&mut s, loops[1], TransformationKind::Move, &options).unwrap_err();
    assert!(matches!(err, PsyError::InapplicableTransformation(_)), "{}", err);
    assert_eq!(&s, schedule);
}

#[test]
fn test_argument_count_mismatch() {
    let source = "program alg\n  call invoke(inc_field_type(a, f1))\nend program alg\n";
    let err = run(source, &Config::default(), None).unwrap_err();
    assert!(matches!(err, PsyError::ArgumentMismatch(_)), "{}", err);
    assert!(err.to_string().contains("inc_field_type"));
}

#[test]
fn test_unresolved_kernel() {
    let source = "program alg\n  call invoke(missing_type(f))\nend program alg\n";
    let err = run(source, &Config::default(), None).unwrap_err();
    assert_eq!(err.kind_name(), "UnresolvedKernelError");
}

#[test]
fn test_passthrough_generates_both_layers() {
    let out = run(TWO_UPDATES, &Config::default(), None).unwrap();
    let alg = &out.code.algorithm;
    assert!(alg.contains("  use alg_psy, only: invoke_0\n"));
    assert!(alg.contains("  call invoke_0(f, inc)\n"));
    assert!(alg.contains("use update_field_mod, only: update_field_type"));

    let psy = &out.code.psy;
    assert!(psy.starts_with("module alg_psy\n"));
    assert!(psy.contains("subroutine invoke_0(f, inc)"));
    assert!(psy.contains("use update_field_mod, only: update_field_code"));
    assert_eq!(psy.matches("call update_field_code(").count(), 2);
    assert!(psy.contains("call f_proxy%set_dirty()"));
    assert!(!psy.contains("!$omp"));
    assert!(psy.trim_end().ends_with("end module alg_psy"));
}

#[test]
fn test_parallel_loop_rejected_on_shared_increment_until_coloured() {
    let source = "program alg\n  call invoke(inc_field_type(a, f1, f2))\nend program alg\n";
    let err = run(
        source,
        &Config::default(),
        Some(r#"{"steps":[{"transformation":"omp_parallel_do","target":"loops"}]}"#),
    )
    .unwrap_err();
    assert!(matches!(err, PsyError::InapplicableTransformation(_)), "{}", err);

    let out = run(
        source,
        &Config::default(),
        Some(
            r#"{"steps":[
                {"transformation":"colour","target":"loops"},
                {"transformation":"omp_parallel_do","target":"loop:inc_field_type"}
            ]}"#,
        ),
    )
    .unwrap();
    let psy = &out.code.psy;
    assert!(psy.contains("do colour = loop0_start, loop0_stop"), "{}", psy);
    assert!(psy.contains("!$omp parallel do default(shared), private(cell), schedule(static)"));
    assert!(psy.contains("do cell = loop1_start, last_halo_cell_all_colours(colour, 1)"));
    assert!(psy.contains("map_w1(:,cmap(colour, cell))"));
    assert!(psy.contains("!$omp end parallel do"));
}

#[test]
fn test_reapplying_is_already_transformed() {
    let config = Config::default();
    let mut out = run(TWO_UPDATES, &config, None).unwrap();
    let schedule = &mut out.schedules[0];
    let l = schedule.tree.outermost_loops()[0];
    let engine = TransformationEngine::new(&config);
    let none = TransformOptions::new();
    engine.apply(schedule, l, TransformationKind::OmpParallelLoop, &none).unwrap();
    let err = engine.apply(schedule, l, TransformationKind::OmpParallelLoop, &none).unwrap_err();
    assert!(matches!(err, PsyError::AlreadyTransformed(_)), "{}", err);
}

#[test]
fn test_reproducible_reduction() {
    let source = "program alg\n  call invoke(x_innerproduct_y(asum, f1, f2))\nend program alg\n";
    let script = r#"{"steps":[{"transformation":"omp_parallel_do","target":"loops","options":{"reprod":true}}]}"#;
    let out = run(source, &Config::default(), Some(script)).unwrap();
    let psy = &out.code.psy;
    assert!(psy.contains("use omp_lib, only: omp_get_thread_num, omp_get_max_threads"));
    assert!(psy.contains("allocate(l_asum(8, nthreads))"), "{}", psy);
    assert!(psy.contains("l_asum(1,th_idx) = l_asum(1,th_idx) + f1_data(df)*f2_data(df)"));
    assert!(psy.contains("asum = asum + l_asum(1,th_idx)"));
    assert!(psy.contains("asum = global_sum%get_sum()"));

    let err = run(
        source,
        &Config::default(),
        Some(r#"{"steps":[{"transformation":"omp_parallel_do","target":"loops"}]}"#),
    )
    .unwrap_err();
    assert!(err.is_transformation_rejection());
}

#[test]
fn test_openacc_offload() {
    let source = "program alg\n  call invoke(setval_c(f1, 0.0_r_def), inc_x_plus_y(f1, f2))\nend program alg\n";
    let script = r#"{"steps":[
        {"transformation":"acc_enter_data","target":"root"},
        {"transformation":"acc_parallel","target":"1","options":{"to":"2"}},
        {"transformation":"acc_loop","target":"loops"}
    ]}"#;
    let out = run(source, &Config::default().distributed_memory(false), Some(script)).unwrap();
    let psy = &out.code.psy;
    assert!(psy.contains("!$acc enter data copyin(f1_data, f2_data)"), "{}", psy);
    assert_eq!(psy.matches("!$acc parallel default(present)").count(), 1);
    assert_eq!(psy.matches("!$acc loop independent").count(), 2);
    let enter = psy.find("!$acc enter data").unwrap();
    let region = psy.find("!$acc parallel").unwrap();
    assert!(enter < region);
}

#[test]
fn test_acc_loop_outside_region_fails_generation() {
    let source = "program alg\n  call invoke(setval_c(f1, 0.0_r_def))\nend program alg\n";
    let script = r#"{"steps":[{"transformation":"acc_loop","target":"loops"}]}"#;
    let err = run(source, &Config::default(), Some(script)).unwrap_err();
    assert_eq!(err.kind_name(), "CodeGenerationError");
}

#[test]
fn test_fuse_builtin_loops() {
    let source = "program alg\n  call invoke(setval_c(f1, 0.0_r_def), inc_x_plus_y(f1, f2))\nend program alg\n";
    let script = r#"{"steps":[{"transformation":"loop_fuse","target":"0","options":{"with":"1"}}]}"#;
    let out = run(source, &Config::default(), Some(script)).unwrap();
    assert_eq!(out.schedules[0].tree.outermost_loops().len(), 1);
    let psy = &out.code.psy;
    assert_eq!(psy.matches("do df = ").count(), 1, "{}", psy);
    let set = psy.find("f1_data(df) = 0.0_r_def").unwrap();
    let add = psy.find("f1_data(df) = f1_data(df) + f2_data(df)").unwrap();
    assert!(set < add);
}

#[test]
fn test_kernel_module_inline() {
    let script = r#"{"steps":[{"transformation":"kernel_module_inline","target":"kernel:update_field_type#1"}]}"#;
    let out = run(TWO_UPDATES, &Config::default(), Some(script)).unwrap();
    let psy = &out.code.psy;
    assert!(!psy.contains("use update_field_mod"));
    assert_eq!(psy.matches("subroutine update_field_code(").count(), 1);
    let contains = psy.find("contains").unwrap();
    assert!(psy.find("subroutine update_field_code(").unwrap() > contains);
}

#[test]
fn test_no_distributed_memory() {
    let source = "program alg\n  call invoke(inc_field_type(a, f1, f2))\nend program alg\n";
    let out = run(source, &Config::default().distributed_memory(false), None).unwrap();
    let psy = &out.code.psy;
    assert!(!psy.contains("halo_exchange"));
    assert!(!psy.contains("set_dirty"));
    assert!(psy.contains("loop0_stop = f1_proxy%vspace%get_ncell()"));
}

#[test]
fn test_halo_exchange_before_loop_into_halo() {
    let source = "program alg\n  call invoke(inc_field_type(a, f1, f2))\nend program alg\n";
    let out = run(source, &Config::default(), None).unwrap();
    let psy = &out.code.psy;
    let exchange = psy.find("call f2_proxy%halo_exchange(depth=1)").unwrap();
    let do_loop = psy.find("do cell = loop0_start, loop0_stop").unwrap();
    assert!(exchange < do_loop);
    assert!(psy.contains("loop0_stop = mesh%get_last_halo_cell(1)"));
}

#[test]
fn test_generated_lines_respect_limit() {
    let config = Config::default().line_length(Some(60));
    let out = run(TWO_UPDATES, &config, None).unwrap();
    for line in out.code.psy.lines().chain(out.code.algorithm.lines()) {
        if line.trim_start().starts_with("subroutine update_field_code") {
            continue;
        }
        assert!(line.len() <= 60, "{:?}", line);
    }
}

#[test]
fn test_invalid_script_reports_step() {
    let err = Script::from_json(r#"{"steps":[{"transformation":"colour","target":"loops"},{"transformation":"tile","target":"loops"}]}"#)
        .unwrap_err();
    assert_eq!(err.kind_name(), "ScriptError");
    assert!(err.to_string().contains("step 1"));
}
