//! CLI tests for HighMux binary
//!
//! Tests command-line interface functionality including --version and --help flags.
//!
//! Note: These tests use `cargo run` which requires the project to be built.

use std::process::Command;
use std::str;

/// Get the path to the highmux binary
/// For local testing, we use cargo run when no built binary exists
fn get_binary_command() -> Command {
    // Try to use the built binary first, fall back to cargo run
    if std::path::Path::new("target/release/highmux").exists() {
        let cmd = Command::new("target/release/highmux");
        cmd
    } else if std::path::Path::new("target/debug/highmux").exists() {
        let cmd = Command::new("target/debug/highmux");
        cmd
    } else {
        // Fall back to cargo run for development
        let mut cmd = Command::new("cargo");
        cmd.args(&["run", "--bin", "highmux", "--"]);
        cmd
    }
}

/// Test that --version flag works and outputs correct version format
#[test]
fn test_version_flag() {
    let mut cmd = get_binary_command();
    cmd.arg("--version");

    let output = cmd.output().expect("Failed to execute command");

    assert!(output.status.success(), "Version command should succeed");
    let stdout = str::from_utf8(&output.stdout).expect("Invalid UTF-8");
    assert!(
        stdout.contains("highmux"),
        "Version output should contain 'highmux', got: {}",
        stdout
    );
    // Version should be in format "highmux X.Y.Z"
    assert!(
        stdout.matches(char::is_numeric).count() > 0,
        "Version output should contain version number, got: {}",
        stdout
    );
}

/// Test that -V flag works (short version)
#[test]
fn test_version_flag_short() {
    let mut cmd = get_binary_command();
    cmd.arg("-V");

    let output = cmd.output().expect("Failed to execute command");

    assert!(output.status.success(), "Version command should succeed");
    let stdout = str::from_utf8(&output.stdout).expect("Invalid UTF-8");
    assert!(
        stdout.contains("highmux"),
        "Version output should contain 'highmux', got: {}",
        stdout
    );
}

/// Test that --help flag works and shows usage information
#[test]
fn test_help_flag() {
    let mut cmd = get_binary_command();
    cmd.arg("--help");

    let output = cmd.output().expect("Failed to execute command");

    assert!(output.status.success(), "Help command should succeed");
    let stdout = str::from_utf8(&output.stdout).expect("Invalid UTF-8");
    assert!(
        stdout.contains("USAGE"),
        "Help output should contain 'USAGE', got: {}",
        stdout
    );
    assert!(
        stdout.contains("OPTIONS"),
        "Help output should contain 'OPTIONS', got: {}",
        stdout
    );
    assert!(
        stdout.contains("ENVIRONMENT VARIABLES"),
        "Help output should contain 'ENVIRONMENT VARIABLES', got: {}",
        stdout
    );
}

/// Test that -h flag works (short help)
#[test]
fn test_help_flag_short() {
    let mut cmd = get_binary_command();
    cmd.arg("-h");

    let output = cmd.output().expect("Failed to execute command");

    assert!(output.status.success(), "Help command should succeed");
    let stdout = str::from_utf8(&output.stdout).expect("Invalid UTF-8");
    assert!(
        stdout.contains("USAGE"),
        "Help output should contain 'USAGE', got: {}",
        stdout
    );
}

/// Test that an unknown command fails with guidance
#[test]
fn test_unknown_command() {
    let mut cmd = get_binary_command();
    cmd.arg("frobnicate");

    let output = cmd.output().expect("Failed to execute command");

    assert!(!output.status.success(), "Unknown command should fail");
    let stderr = str::from_utf8(&output.stderr).expect("Invalid UTF-8");
    assert!(
        stderr.contains("Unknown command"),
        "Error output should mention the unknown command, got: {}",
        stderr
    );
}
