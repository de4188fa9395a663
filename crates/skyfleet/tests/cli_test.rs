use assert_cmd::Command;
use predicates::prelude::*;

/// CLIヘルプに全サブコマンドが並ぶことを確認
#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("sky").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("execute"))
        .stdout(predicate::str::contains("initialize"))
        .stdout(predicate::str::contains("launch"))
        .stdout(predicate::str::contains("network"))
        .stdout(predicate::str::contains("reboot"))
        .stdout(predicate::str::contains("resources"))
        .stdout(predicate::str::contains("shutdown"))
        .stdout(predicate::str::contains("elb"))
        .stdout(predicate::str::contains("s3-download"));
}

/// launchコマンドのヘルプが正しく表示されることを確認
#[test]
fn test_launch_help() {
    let mut cmd = Command::cargo_bin("sky").unwrap();
    cmd.arg("launch")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--image"))
        .stdout(predicate::str::contains("--clone"))
        .stdout(predicate::str::contains("--ebs-size"))
        .stdout(predicate::str::contains("--tag"));
}

/// --image と --clone は同時指定できない
#[test]
fn test_launch_image_conflicts_with_clone() {
    let mut cmd = Command::cargo_bin("sky").unwrap();
    cmd.arg("launch")
        .arg("web-1")
        .arg("--image")
        .arg("base")
        .arg("--clone")
        .arg("web-0")
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

/// executeコマンドは対象インスタンスとコマンドが必須
#[test]
fn test_execute_requires_arguments() {
    let mut cmd = Command::cargo_bin("sky").unwrap();
    cmd.arg("execute").assert().failure();

    let mut cmd = Command::cargo_bin("sky").unwrap();
    cmd.arg("execute").arg("web-1").assert().failure();
}

/// shutdownコマンドのヘルプが正しく表示されることを確認
#[test]
fn test_shutdown_help() {
    let mut cmd = Command::cargo_bin("sky").unwrap();
    cmd.arg("shutdown")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--terminate"))
        .stdout(predicate::str::contains("--auto-shutdown-after"));
}

/// 不正なサブコマンドでエラーになることを確認
#[test]
fn test_invalid_command() {
    let mut cmd = Command::cargo_bin("sky").unwrap();
    cmd.arg("not-a-command").assert().failure();
}

/// networkサブコマンドのヘルプが正しく表示されることを確認
#[test]
fn test_network_help() {
    let mut cmd = Command::cargo_bin("sky").unwrap();
    cmd.arg("network")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("add"))
        .stdout(predicate::str::contains("remove"))
        .stdout(predicate::str::contains("purge"));
}
