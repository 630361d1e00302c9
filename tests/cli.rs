//! Command-line tests against the built binary.

use std::fs;
use std::path::Path;
use std::process::Command;

const KERNEL: &str = r#"
module update_field_mod
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
  end subroutine update_field_code
end module update_field_mod
"#;

const ALGORITHM: &str = r#"program alg
  use update_field_mod, only: update_field_type
  call invoke(update_field_type(f, inc), update_field_type(f, inc))
end program alg
"#;

fn psyforge() -> Command {
    Command::new(env!("CARGO_BIN_EXE_psyforge"))
}

fn setup(dir: &Path) {
    fs::create_dir_all(dir.join("kernels")).unwrap();
    fs::write(dir.join("kernels").join("update_field_mod.f90"), KERNEL).unwrap();
    fs::write(dir.join("alg.x90"), ALGORITHM).unwrap();
}

#[test]
fn test_writes_both_layers() {
    let dir = tempfile::tempdir().unwrap();
    setup(dir.path());
    let status = psyforge()
        .arg("-d")
        .arg(dir.path().join("kernels"))
        .arg("--oalg")
        .arg(dir.path().join("alg.f90"))
        .arg("--opsy")
        .arg(dir.path().join("alg_psy.f90"))
        .arg(dir.path().join("alg.x90"))
        .status()
        .unwrap();
    assert!(status.success());
    let alg = fs::read_to_string(dir.path().join("alg.f90")).unwrap();
    let psy = fs::read_to_string(dir.path().join("alg_psy.f90")).unwrap();
    assert!(alg.contains("call invoke_0(f, inc)"));
    assert!(psy.contains("module alg_psy"));
}

#[test]
fn test_default_search_path_is_input_directory() {
    let dir = tempfile::tempdir().unwrap();
    setup(dir.path());
    let out = psyforge().arg("--no-dist-mem").arg(dir.path().join("alg.x90")).output().unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("subroutine invoke_0(f, inc)"));
    assert!(!stdout.contains("set_dirty"));
}

#[test]
fn test_failed_transformation_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    setup(dir.path());
    let script = dir.path().join("move.json");
    fs::write(&script, r#"{"steps":[{"transformation":"move","target":"1","options":{"before":"0"}}]}"#).unwrap();
    let out = psyforge()
        .arg("-s")
        .arg(&script)
        .arg("--opsy")
        .arg(dir.path().join("alg_psy.f90"))
        .arg(dir.path().join("alg.x90"))
        .output()
        .unwrap();
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("InapplicableTransformationError"));
    assert!(!dir.path().join("alg_psy.f90").exists());
}

#[test]
fn test_emit_deps_is_json() {
    let dir = tempfile::tempdir().unwrap();
    setup(dir.path());
    let out = psyforge().args(["--emit", "deps"]).arg(dir.path().join("alg.x90")).output().unwrap();
    assert!(out.status.success());
    let value: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(value[0]["invoke"], "invoke_0");
    assert_eq!(value[0]["dependencies"][0]["field"], "f");
}

#[test]
fn test_missing_kernel_fails() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("alg.x90"), ALGORITHM).unwrap();
    let out = psyforge().arg(dir.path().join("alg.x90")).output().unwrap();
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("UnresolvedKernelError"));
}

#[test]
fn test_unwritable_second_output_leaves_no_first_output() {
    let dir = tempfile::tempdir().unwrap();
    setup(dir.path());
    let out = psyforge()
        .arg("--oalg")
        .arg(dir.path().join("alg.f90"))
        .arg("--opsy")
        .arg(dir.path().join("missing").join("alg_psy.f90"))
        .arg(dir.path().join("alg.x90"))
        .output()
        .unwrap();
    assert!(!out.status.success());
    assert!(!dir.path().join("alg.f90").exists());
    let leftovers: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .map(|e| e.file_name())
        .collect();
    assert_eq!(leftovers.len(), 1, "{:?}", leftovers);
}
