//! Black-box tests driving the `quietsafe` binary directly, covering the
//! CLI exit-code table (small `gp-bits` and `block-index-size` boundaries
//! included) rather than calling the library API.

use std::path::Path;
use std::process::{Command, Output};

fn bin() -> &'static str {
    env!("CARGO_BIN_EXE_quietsafe")
}

fn run(path: &Path, args: &[&str]) -> Output {
    Command::new(bin())
        .arg("--path")
        .arg(path)
        .args(args)
        .output()
        .expect("spawn quietsafe")
}

/// `exit(code)` on a negative `i32` truncates to the low byte, same as the
/// binary's own `exit_code_from_i32`.
fn wrapped(code: i32) -> i32 {
    ((code as i8) as u8) as i32
}

fn assert_exit(out: &Output, code: i32) {
    assert_eq!(out.status.code(), Some(wrapped(code)), "stderr: {}", String::from_utf8_lossy(&out.stderr));
}

fn init_args(passwords: &[&str]) -> Vec<String> {
    let mut args = vec!["init".to_string(), "-P".to_string(), "-f".to_string(), "--i-know-its-unsafe".to_string(), "-N".to_string(), "64".to_string(), "-p".to_string()];
    args.extend(passwords.iter().map(|p| p.to_string()));
    args
}

#[test]
fn init_then_list_succeeds_for_each_password() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("safe.qss");

    let args = init_args(&["a", "b", "c"]);
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    let out = run(&path, &arg_refs);
    assert_exit(&out, 0);

    let out = run(&path, &["list", "-p", "a"]);
    assert_exit(&out, 0);
    let out = run(&path, &["list", "-p", "b"]);
    assert_exit(&out, 0);
}

#[test]
fn put_then_get_roundtrips_the_secret() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("safe.qss");
    let args = init_args(&["a"]);
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    assert_exit(&run(&path, &arg_refs), 0);

    let out = run(&path, &["put", "-p", "a", "-s", "a secret", "key"]);
    assert_exit(&out, 0);

    let out = run(&path, &["get", "-p", "a", "key"]);
    assert_exit(&out, 0);
    assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "a secret");
}

#[test]
fn put_with_unknown_password_reports_no_matching_container() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("safe.qss");
    let args = init_args(&["a", "b", "c"]);
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    assert_exit(&run(&path, &arg_refs), 0);

    let out = run(&path, &["put", "-p", "d", "-s", "a secret", "key"]);
    assert_exit(&out, -1);
}

#[test]
fn put_with_empty_secret_reports_empty_input() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("safe.qss");
    let args = init_args(&["a"]);
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    assert_exit(&run(&path, &arg_refs), 0);

    let out = run(&path, &["put", "-p", "a", "-s", "", "key"]);
    assert_exit(&out, -3);
}

#[test]
fn get_with_no_matching_key_reports_no_entry_matches() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("safe.qss");
    let args = init_args(&["a"]);
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    assert_exit(&run(&path, &arg_refs), 0);

    let out = run(&path, &["get", "-p", "a", "nonexistent"]);
    assert_exit(&out, -4);
}

#[test]
fn get_with_duplicate_keys_reports_multiple_matches() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("safe.qss");
    let args = init_args(&["a"]);
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    assert_exit(&run(&path, &arg_refs), 0);

    assert_exit(&run(&path, &["put", "-p", "a", "-s", "first", "key"]), 0);
    assert_exit(&run(&path, &["put", "-p", "a", "-s", "second", "key"]), 0);

    let out = run(&path, &["get", "-p", "a", "key"]);
    assert_exit(&out, -8);
}

#[test]
fn touch_preserves_contents() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("safe.qss");
    let args = init_args(&["a"]);
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    assert_exit(&run(&path, &arg_refs), 0);
    assert_exit(&run(&path, &["put", "-p", "a", "-s", "a secret", "key"]), 0);

    let raw_before = run(&path, &["raw"]).stdout;
    let out = run(&path, &["touch"]);
    assert_exit(&out, 0);
    let raw_after = run(&path, &["raw"]).stdout;
    assert_ne!(raw_before, raw_after);

    let out = run(&path, &["get", "-p", "a", "key"]);
    assert_exit(&out, 0);
    assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "a secret");
}

#[test]
fn init_twice_without_force_reports_already_exists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("safe.qss");
    let args = vec!["init", "-P", "--i-know-its-unsafe", "-N", "32", "-p", "a"];
    assert_exit(&run(&path, &args), 0);
    let out = run(&path, &args);
    assert_exit(&out, -10);
}

#[test]
fn missing_safe_reports_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nope.qss");
    let out = run(&path, &["list", "-p", "a"]);
    assert_exit(&out, -5);
}

#[test]
fn unsafe_gp_bits_without_override_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("safe.qss");
    let out = run(&path, &["init", "-P", "-f", "--gp-bits", "64", "-p", "a"]);
    assert_exit(&out, -9);
}

#[test]
fn block_index_size_boundaries_all_create_successfully() {
    for size in ["1", "2", "4"] {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("safe.qss");
        let out = run(
            &path,
            &["init", "-P", "-f", "--i-know-its-unsafe", "-N", "32", "--block-index-size", size, "-p", "a"],
        );
        assert_exit(&out, 0);
        let out = run(&path, &["list", "-p", "a"]);
        assert_exit(&out, 0);
    }
}
