use assert_cmd::Command;
use serial_test::serial;

#[test]
#[serial]
fn help_exits_nonzero_without_running() {
    let assert = Command::cargo_bin("fambench")
        .unwrap()
        .arg("--help")
        .assert()
        .failure();
    let stderr = String::from_utf8_lossy(&assert.get_output().stderr).to_string();
    assert!(stderr.contains("config_type"));
    assert!(stderr.contains("num_dataitems"));
    assert!(stderr.contains("nodesperPE"));
}

#[test]
#[serial]
fn positional_arguments_drive_a_passing_run() {
    let assert = Command::cargo_bin("fambench")
        .unwrap()
        .args(["random", "2", "2", "4096", "2", "1"])
        .env("FAMBENCH_NUM_PES", "2")
        .assert()
        .success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    assert!(stdout.contains("fambench result: ok"));
    assert!(stdout.contains("nonblocking_gather_index_full"));
}

#[test]
#[serial]
fn empty_affinity_configuration_fails() {
    let assert = Command::cargo_bin("fambench")
        .unwrap()
        // run asks for 4 memory servers; nodesperPE 2 leaves every PE
        // without an affinity set, which is fatal for even distribution
        .args(["even", "1", "1", "4096", "4", "2"])
        .assert()
        .failure();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    assert!(stdout.contains("FAILED"));
}
