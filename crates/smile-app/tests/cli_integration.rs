//! Integration tests for the smile2unlock CLI binary.
//!
//! Each test gets its own config file pointing the store into a temp
//! directory.

use std::io::Write;
use std::net::UdpSocket;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use std::time::{Duration, Instant};

use smile_core::store::{keys, ConfigStore, FileStore};
use smile_core::{RecognitionStatus, StatusMessage};
use smile_ipc::datagram::DatagramPublisher;
use smile_ipc::StatusPublisher;

struct Env {
    _dir: tempfile::TempDir,
    config: PathBuf,
    store: PathBuf,
    port: u16,
}

impl Env {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("store.toml");
        let port = UdpSocket::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let config = dir.path().join("config.toml");
        std::fs::write(
            &config,
            format!(
                "[recognizer]\nexecutable = {:?}\n\n[channel]\nport = {port}\n\n[store]\npath = {:?}\n",
                dir.path().join("no-such-recognizer").to_string_lossy(),
                store.to_string_lossy(),
            ),
        )
        .unwrap();
        Self {
            _dir: dir,
            config,
            store,
            port,
        }
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_smile2unlock"));
        cmd.arg("--config").arg(&self.config);
        cmd
    }

    fn store(&self) -> FileStore {
        FileStore::open(&self.store)
    }
}

fn run(cmd: &mut Command) -> String {
    let output = cmd.output().expect("Failed to execute command");
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    if !output.status.success() {
        panic!(
            "Command failed with status {:?}\nstdout: {stdout}\nstderr: {stderr}",
            output.status
        );
    }
    stdout
}

fn run_with_stdin(cmd: &mut Command, input: &str) -> Output {
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child.stdin.take().unwrap().write_all(input.as_bytes()).unwrap();
    child.wait_with_output().unwrap()
}

fn set_password(env: &Env, input: &str) -> Output {
    run_with_stdin(env.cmd().arg("set-password").arg("--stdin"), input)
}

#[test]
fn set_password_writes_encrypted_entries() {
    let env = Env::new();
    let output = set_password(&env, "correct horse\ncorrect horse\n");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let store = env.store();
    let ciphertext = store.get(keys::PASSWORD).unwrap().unwrap();
    assert!(store.get(keys::KEY).unwrap().is_some());
    assert!(store.get(keys::IV).unwrap().is_some());
    assert!(!ciphertext.contains("correct"));

    let raw = std::fs::read_to_string(&env.store).unwrap();
    assert!(!raw.contains("correct horse"));
}

#[test]
fn mismatched_confirmation_is_rejected() {
    let env = Env::new();
    let output = set_password(&env, "first\nsecond\n");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("do not match"));
    assert!(env.store().get(keys::PASSWORD).unwrap().is_none());
}

#[test]
fn resetting_password_rotates_key() {
    let env = Env::new();
    assert!(set_password(&env, "one\none\n").status.success());
    let key1 = env.store().get(keys::KEY).unwrap();
    assert!(set_password(&env, "two\ntwo\n").status.success());
    assert_ne!(env.store().get(keys::KEY).unwrap(), key1);
}

#[test]
fn config_toggles_round_trip() {
    let env = Env::new();
    run(env.cmd().args(["config", "set", "warmup", "true"]));
    assert_eq!(run(env.cmd().args(["config", "get", "warmup"])).trim(), "true");
    assert!(env.store().get_bool(keys::WARMUP, false).unwrap());

    run(env.cmd().args(["config", "unset", "warmup"]));
    assert_eq!(run(env.cmd().args(["config", "get", "warmup"])).trim(), "<unset>");
}

#[test]
fn config_refuses_secrets_and_bad_values() {
    let env = Env::new();
    let secret = env.cmd().args(["config", "set", "password", "x"]).output().unwrap();
    assert!(!secret.status.success());

    let bad_bool = env.cmd().args(["config", "set", "auto_start", "maybe"]).output().unwrap();
    assert!(!bad_bool.status.success());

    let unknown = env.cmd().args(["config", "get", "colour"]).output().unwrap();
    assert!(!unknown.status.success());
}

#[test]
fn config_show_masks_secrets() {
    let env = Env::new();
    assert!(set_password(&env, "pw\npw\n").status.success());
    let shown = run(env.cmd().args(["config", "show"]));
    assert!(shown.contains("password\t<set>"), "{shown}");
    assert!(shown.contains("auto_start\t<unset>"), "{shown}");
    let key = env.store().get(keys::KEY).unwrap().unwrap();
    assert!(!shown.contains(&key));
}

#[test]
fn authenticate_without_password_fails() {
    let env = Env::new();
    let output = env.cmd().arg("authenticate").output().unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("no password enrolled"));
}

#[test]
fn authenticate_reports_missing_recognizer() {
    let env = Env::new();
    assert!(set_password(&env, "pw\npw\n").status.success());
    let output = env.cmd().arg("authenticate").output().unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to launch recognizer"), "{stderr}");
    assert!(!String::from_utf8_lossy(&output.stdout).contains("pw"));
}

#[test]
fn on_show_respects_auto_start() {
    let env = Env::new();
    let out = run(env.cmd().args(["authenticate", "--on-show"]));
    assert!(out.contains("auto_start is off"));
}

fn send_until_exit(port: u16, child: &mut std::process::Child, message: &StatusMessage) {
    let mut publisher = DatagramPublisher::connect(&format!("127.0.0.1:{port}")).unwrap();
    let deadline = Instant::now() + Duration::from_secs(10);
    while child.try_wait().unwrap().is_none() && Instant::now() < deadline {
        publisher.publish(message).unwrap();
        std::thread::sleep(Duration::from_millis(50));
    }
}

#[test]
fn listen_prints_received_statuses() {
    let env = Env::new();
    let mut child = env
        .cmd()
        .args(["listen", "--count", "1", "--timeout-secs", "20"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let message = StatusMessage::new(RecognitionStatus::Success).with_username("alice");
    send_until_exit(env.port, &mut child, &message);

    let output = child.wait_with_output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("success\talice"), "{stdout}");
}

#[test]
fn listen_times_out_quietly() {
    let env = Env::new();
    let out = run(env.cmd().args(["listen", "--timeout-secs", "1"]));
    assert!(out.contains("(0 messages)"), "{out}");
}

#[test]
fn listen_deadline_holds_under_a_steady_stream() {
    let env = Env::new();
    let mut child = env
        .cmd()
        .args(["listen", "--timeout-secs", "1"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let start = Instant::now();
    let message = StatusMessage::new(RecognitionStatus::Recognizing);
    send_until_exit(env.port, &mut child, &message);
    let output = child.wait_with_output().unwrap();
    assert!(start.elapsed() < Duration::from_secs(5), "took {:?}", start.elapsed());
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains(" messages)"));
}

#[test]
fn config_unset_refuses_unknown_and_secret_keys() {
    let env = Env::new();
    assert!(set_password(&env, "pw\npw\n").status.success());

    let unknown = env.cmd().args(["config", "unset", "colour"]).output().unwrap();
    assert!(!unknown.status.success());
    let secret = env.cmd().args(["config", "unset", "key"]).output().unwrap();
    assert!(!secret.status.success());
    assert!(env.store().get(keys::KEY).unwrap().is_some());
}
