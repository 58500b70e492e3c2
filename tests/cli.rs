use assert_cmd::Command;
use std::path::Path;

fn cmd(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("nowplaying-rpc").unwrap();
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env_remove("RUST_LOG");
    cmd
}

fn stdout_of(cmd: &mut Command) -> String {
    let output = cmd.output().unwrap();
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).unwrap()
}

#[test]
fn test_help_lists_commands() {
    let home = tempfile::tempdir().unwrap();
    let out = stdout_of(cmd(home.path()).arg("--help"));
    for sub in ["pid", "now-playing", "artwork", "status", "daemon", "config"] {
        assert!(out.contains(sub), "missing {sub} in help");
    }
}

#[test]
fn test_config_show_prints_defaults() {
    let home = tempfile::tempdir().unwrap();
    let out = stdout_of(cmd(home.path()).args(["config", "show"]));
    assert!(out.contains("client_id = \"1076426618874101871\""));
    assert!(out.contains("poll_interval_secs = 5"));
}

#[test]
#[cfg(target_os = "linux")]
fn test_config_file_overrides_defaults() {
    let home = tempfile::tempdir().unwrap();
    let config_dir = home.path().join(".config").join("nowplaying-rpc");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(
        config_dir.join("config.toml"),
        "[discord]\nclient_id = \"999\"\n",
    )
    .unwrap();

    let out = stdout_of(cmd(home.path()).args(["config", "show"]));
    assert!(out.contains("client_id = \"999\""));
}

#[test]
fn test_cache_starts_empty() {
    let home = tempfile::tempdir().unwrap();
    let out = stdout_of(cmd(home.path()).args(["cache", "stats"]));
    assert_eq!(out.trim(), "Cached artwork links: 0");
}

#[test]
fn test_status_without_daemon() {
    let home = tempfile::tempdir().unwrap();
    let out = stdout_of(cmd(home.path()).arg("status"));
    assert_eq!(out.trim(), "Daemon is not running.");
}
