use std::fs;
use std::process::Command;

use tempfile::TempDir;

#[test]
fn help_lists_program_flags() {
    let output = Command::new(env!("CARGO_BIN_EXE_sparkfield"))
        .arg("--help")
        .output()
        .expect("failed to run sparkfield --help");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for flag in ["--program", "--units", "--frames", "--window", "--export", "--strict"] {
        assert!(stdout.contains(flag), "missing {flag} in help output");
    }
}

#[test]
fn invalid_size_is_rejected_before_any_gpu_work() {
    let status = Command::new(env!("CARGO_BIN_EXE_sparkfield"))
        .args(["--size", "0x600"])
        .status()
        .expect("failed to run sparkfield");

    assert!(!status.success());
}

#[test]
fn broken_program_file_fails_with_its_path() {
    let root = TempDir::new().unwrap();
    let path = root.path().join("broken.toml");
    fs::write(&path, "units = 0\n[struct]\nv = \"float\"\n").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_sparkfield"))
        .env("RUST_LOG", "off")
        .arg("--program")
        .arg(&path)
        .output()
        .expect("failed to run sparkfield");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("broken.toml"), "stderr was: {stderr}");
}
