#![cfg(unix)]

mod helpers;

use std::fs;
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use helpers::{Sandbox, level_container};

fn bin() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_arx-roundtrip"));
    // Keep the process environment from leaking harness settings in.
    for (key, _) in std::env::vars() {
        if key.starts_with("ARX_RT_") {
            command.env_remove(key);
        }
    }
    command.env_remove("RUST_LOG").env_remove("RUST_LOG_FORMAT");
    command
}

fn sandbox_args(sandbox: &Sandbox) -> Vec<String> {
    vec![
        "--fixture".into(),
        sandbox.fixture.display().to_string(),
        "--working-file".into(),
        sandbox.working_file.display().to_string(),
        "--asset-root".into(),
        sandbox.asset_root.display().to_string(),
        "--blender".into(),
        sandbox.blender.display().to_string(),
        "--arx-binary".into(),
        sandbox.arx.display().to_string(),
        "--log".into(),
        sandbox.log.display().to_string(),
        "--ready-poll-ms".into(),
        "50".into(),
        "--ready-timeout-secs".into(),
        "1".into(),
        "--tool-timeout-secs".into(),
        "10".into(),
    ]
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn help_lists_subcommands() {
    let output = bin().arg("--help").output().expect("spawn");
    assert!(output.status.success());
    let text = stdout(&output);
    for name in ["run", "restore", "script", "inspect"] {
        assert!(text.contains(name), "missing {name} in:\n{text}");
    }
}

#[test]
fn bare_invocation_runs_the_pipeline() {
    let sandbox = Sandbox::new();
    let output = bin().args(sandbox_args(&sandbox)).output().expect("spawn");

    assert!(output.status.success(), "{}", stderr(&output));
    let text = stdout(&output);
    assert!(text.contains("round trip: exported_via_ui"), "{text}");
    assert!(text.contains("arx: loaded"), "{text}");
    assert!(sandbox.log.is_file());
}

#[test]
fn missing_fixture_exits_with_status_one() {
    let sandbox = Sandbox::new();
    fs::write(&sandbox.working_file, b"keep me").unwrap();
    fs::remove_file(&sandbox.fixture).unwrap();

    let output = bin().arg("run").args(sandbox_args(&sandbox)).output().expect("spawn");

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("error [RT-PRECONDITION]"), "{}", stderr(&output));
    assert_eq!(fs::read(&sandbox.working_file).unwrap(), b"keep me");
}

#[test]
fn arx_failure_still_exits_zero() {
    let sandbox = Sandbox::new();
    sandbox.install_arx("exit 3");

    let output = bin().arg("run").args(sandbox_args(&sandbox)).output().expect("spawn");

    assert!(output.status.success(), "{}", stderr(&output));
    assert!(stdout(&output).contains("arx: failed"));
}

#[test]
fn json_report_on_stdout() {
    let sandbox = Sandbox::new();
    let output = bin()
        .args(["run", "--json"])
        .args(sandbox_args(&sandbox))
        .output()
        .expect("spawn");

    assert!(output.status.success(), "{}", stderr(&output));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json report");
    assert_eq!(report["automation"]["trace"]["final_state"], "done");
    assert_eq!(report["comparison"]["identical_bytes"], true);
}

#[test]
fn config_file_and_env_are_layered() {
    let sandbox = Sandbox::new();
    let config_path = sandbox.dir.path().join("harness.json");
    fs::write(
        &config_path,
        serde_json::json!({
            "fixture": sandbox.fixture,
            "working_file": sandbox.working_file,
            "asset_root": sandbox.asset_root,
            "blender": sandbox.blender,
            "arx_binary": sandbox.arx,
            "log": sandbox.log,
            "scene": "FromFile",
            "ready_timeout_secs": 1,
        })
        .to_string(),
    )
    .unwrap();

    let output = bin()
        .args(["script", "--scene", "FromFlag"])
        .env("ARX_RT_CONFIG", &config_path)
        .env("ARX_RT_LEVEL", "4")
        .output()
        .expect("spawn");

    assert!(output.status.success(), "{}", stderr(&output));
    let script = stdout(&output);
    assert!(script.contains("SCENE_NAME = \"FromFlag\""), "{script}");
    assert!(script.contains("LEVEL_ID = 4"), "{script}");
}

#[test]
fn unknown_config_key_is_rejected() {
    let sandbox = Sandbox::new();
    let config_path = sandbox.dir.path().join("harness.json");
    fs::write(&config_path, r#"{"levle": 2}"#).unwrap();

    let output = bin()
        .args(["script", "--config"])
        .arg(&config_path)
        .output()
        .expect("spawn");

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("levle"), "{}", stderr(&output));
}

#[test]
fn restore_subcommand_only_copies() {
    let sandbox = Sandbox::new();
    fs::write(&sandbox.working_file, b"stale").unwrap();

    let output = bin()
        .args(["restore", "--fixture"])
        .arg(&sandbox.fixture)
        .arg("--working-file")
        .arg(&sandbox.working_file)
        .output()
        .expect("spawn");

    assert!(output.status.success(), "{}", stderr(&output));
    assert!(stdout(&output).starts_with("restored "));
    assert_eq!(
        fs::read(&sandbox.working_file).unwrap(),
        fs::read(&sandbox.fixture).unwrap()
    );
    assert!(!sandbox.log.exists());
}

#[test]
fn inspect_compares_two_containers() {
    let sandbox = Sandbox::new();
    let candidate = sandbox.dir.path().join("candidate.fts");
    fs::write(&candidate, level_container(117_000, &[0x01; 40])).unwrap();

    let output = bin()
        .arg("inspect")
        .arg(&candidate)
        .arg("--against")
        .arg(&sandbox.fixture)
        .output()
        .expect("spawn");

    assert!(output.status.success(), "{}", stderr(&output));
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(value["uncompressed_size_delta"], -3000);
    assert_eq!(value["large_size_delta"], true);
    assert_eq!(value["candidate_header"]["count"], 2);
}

#[test]
fn inspect_rejects_truncated_file() {
    let sandbox = Sandbox::new();
    let broken = sandbox.dir.path().join("broken.fts");
    fs::write(&broken, [0u8; 100]).unwrap();

    let output = bin().arg("inspect").arg(&broken).output().expect("spawn");

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("RT-LEVEL-FILE"), "{}", stderr(&output));
}

#[test]
fn sigint_kills_blender_and_exits_130() {
    let sandbox = Sandbox::new();
    let pid_file = sandbox.dir.path().join("blender.pid");
    sandbox.install_blender(&format!(
        "echo $$ > \"{}\"\necho 'ARX_ROUNDTRIP ready'\nexec sleep 30",
        pid_file.display()
    ));

    let mut child = bin()
        .arg("run")
        .args(sandbox_args(&sandbox))
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn");

    let deadline = Instant::now() + Duration::from_secs(10);
    while !pid_file.is_file() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }
    thread::sleep(Duration::from_millis(100));
    let harness_pid = child.id().to_string();
    let sent = Command::new("kill")
        .args(["-INT", &harness_pid])
        .status()
        .expect("kill");
    assert!(sent.success());

    let started = Instant::now();
    let output = child.wait_with_output().expect("wait");

    assert_eq!(output.status.code(), Some(130), "{}", stderr(&output));
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(stderr(&output).contains("interrupted"), "{}", stderr(&output));
    let blender_pid = fs::read_to_string(&pid_file).expect("pid written");
    let alive = Command::new("kill")
        .args(["-0", blender_pid.trim()])
        .status()
        .is_ok_and(|status| status.success());
    assert!(!alive, "blender stub {} survived", blender_pid.trim());
    assert!(sandbox.log_text().contains("run cancelled"), "{}", sandbox.log_text());
}
