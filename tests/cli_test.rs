//! Integration tests for the ClassLive binary

use std::process::Command;

use tempfile::TempDir;

fn classlive() -> Command {
    Command::new(env!("CARGO_BIN_EXE_classlive"))
}

/// Test that the help command works
#[test]
fn test_help_command() {
    let output = classlive()
        .arg("--help")
        .output()
        .expect("Failed to execute help command");

    assert!(output.status.success(), "Help command should succeed");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage: classlive"), "Should show usage");
    assert!(stdout.contains("serve"), "Should show serve command");
    assert!(stdout.contains("config"), "Should show config command");
}

/// Test that the version command works
#[test]
fn test_version_command() {
    let output = classlive()
        .arg("--version")
        .output()
        .expect("Failed to execute version command");

    assert!(output.status.success(), "Version command should succeed");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
}

/// Test that config reset writes a loadable file
#[test]
fn test_config_reset_and_show() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    let path_arg = path.to_str().unwrap();

    let output = classlive()
        .args(["--config-file", path_arg, "config", "reset"])
        .output()
        .expect("Failed to execute config reset");
    assert!(output.status.success(), "Config reset should succeed");
    assert!(path.exists(), "Config file should be written");

    let output = classlive()
        .args(["--config-file", path_arg, "config", "show"])
        .output()
        .expect("Failed to execute config show");
    assert!(output.status.success(), "Config show should succeed");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("path_prefix = \"/ws/session\""));
    assert!(stdout.contains("echo_to_sender = false"));
}
