use assert_cmd::Command;

fn slurmgate(home: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("slurmgate").unwrap();
    cmd.env("HOME", home).env_remove("SLURMGATE_TOKEN");
    cmd
}

#[test]
fn help_lists_subcommands() {
    let home = tempfile::tempdir().unwrap();
    let output = slurmgate(home.path()).arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for sub in ["alloc", "attach", "shell", "sessions", "close"] {
        assert!(stdout.contains(sub), "missing {sub} in help");
    }
}

#[test]
fn missing_token_fails() {
    let home = tempfile::tempdir().unwrap();
    let output = slurmgate(home.path()).arg("sessions").output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no token"), "stderr: {stderr}");
}

#[test]
fn malformed_config_fails() {
    let home = tempfile::tempdir().unwrap();
    let path = home.path().join("bad.toml");
    std::fs::write(&path, "[default\nserver = ").unwrap();
    let output = slurmgate(home.path())
        .args(["--config", path.to_str().unwrap(), "sessions"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to parse config"), "stderr: {stderr}");
}

#[test]
fn unreachable_server_fails() {
    let home = tempfile::tempdir().unwrap();
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let output = slurmgate(home.path())
        .args(["--server", &format!("http://{addr}"), "--token", "t", "sessions"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to reach"), "stderr: {stderr}");
}
