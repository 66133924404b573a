use std::path::Path;
use std::process::{Command, Output, Stdio};

const CONFIG_VARS: &[&str] = &[
    "MONITOR_ACCOUNTS",
    "BLOCKERS_LIST_URI",
    "LIST_ACCOUNT_HANDLE",
    "LIST_ACCOUNT_PASSWORD",
    "MONITOR_LIST_ACCOUNT",
    "BLOCKWATCH_DATA_DIR",
    "BLOCKWATCH_LOG_DIR",
];

fn blockwatch(home: &Path, args: &[&str], vars: &[(&str, &str)]) -> Output {
    let mut command = Command::new(env!("CARGO_BIN_EXE_blockwatch"));
    command.args(args).env("HOME", home);
    for key in CONFIG_VARS {
        command.env_remove(key);
    }
    for (key, value) in vars {
        command.env(key, value);
    }
    command
        .stdin(Stdio::null())
        .output()
        .expect("Failed to spawn blockwatch")
}

#[test]
fn missing_configuration_exits_non_zero() {
    let home = tempfile::tempdir().expect("temp dir");
    let output = blockwatch(home.path(), &["once"], &[]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("BLOCKERS_LIST_URI"), "stderr: {stderr}");
}

#[test]
fn malformed_list_address_exits_non_zero() {
    let home = tempfile::tempdir().expect("temp dir");
    let output = blockwatch(
        home.path(),
        &["run"],
        &[
            ("MONITOR_ACCOUNTS", "alice.test:pw"),
            ("BLOCKERS_LIST_URI", "not a list"),
            ("LIST_ACCOUNT_HANDLE", "owner.test"),
            ("LIST_ACCOUNT_PASSWORD", "pw"),
        ],
    );
    assert!(!output.status.success());
    assert!(!home.path().join(".blockwatch").join("sessions.json").exists());
}

#[test]
fn help_lists_subcommands() {
    let home = tempfile::tempdir().expect("temp dir");
    let output = blockwatch(home.path(), &["--help"], &[]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for subcommand in ["run", "once", "resolve", "inspect-dms"] {
        assert!(stdout.contains(subcommand), "missing {subcommand}: {stdout}");
    }
}
