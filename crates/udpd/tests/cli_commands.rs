#![cfg(all(unix, feature = "cli"))]

use std::io::Read;
use std::net::UdpSocket;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

fn free_udp_port() -> u16 {
    UdpSocket::bind("127.0.0.1:0")
        .and_then(|socket| socket.local_addr())
        .map(|addr| addr.port())
        .expect("ephemeral port should be available")
}

fn udpd() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_udpd"));
    command
        .env_remove("UDPD_PORT")
        .env_remove("UDPD_BIND_ADDR")
        .env_remove("UDPD_REMOTE_HOST")
        .arg("--log-level")
        .arg("error");
    command
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Option<std::process::ExitStatus> {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().expect("child status should be readable") {
            return Some(status);
        }
        if start.elapsed() >= timeout {
            return None;
        }
        thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn listen_prints_snapshot_from_send() {
    let port = free_udp_port();

    let mut listener = udpd()
        .arg("--format")
        .arg("json")
        .arg("listen")
        .arg("--port")
        .arg(port.to_string())
        .arg("--bind")
        .arg("127.0.0.1")
        .arg("--interval")
        .arg("20ms")
        .arg("--count")
        .arg("1")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("listen command should start");

    let mut sender = udpd()
        .arg("--format")
        .arg("json")
        .arg("send")
        .arg("127.0.0.1")
        .arg("--port")
        .arg(port.to_string())
        .arg("--samples")
        .arg("4")
        .arg("--frames")
        .arg("500")
        .arg("--interval")
        .arg("10ms")
        .arg("--start-sequence")
        .arg("100")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("send command should start");

    let status = wait_with_timeout(&mut listener, Duration::from_secs(10));
    let _ = sender.kill();
    let _ = sender.wait();

    let Some(status) = status else {
        let _ = listener.kill();
        let _ = listener.wait();
        panic!("listen did not exit after one snapshot");
    };
    assert!(status.success());

    let mut stdout = String::new();
    listener
        .stdout
        .take()
        .expect("stdout should be piped")
        .read_to_string(&mut stdout)
        .expect("stdout should be readable");

    let line = stdout.lines().next().expect("one snapshot line");
    let snapshot: serde_json::Value = serde_json::from_str(line).expect("snapshot should be json");
    assert_eq!(snapshot["sample_count"], 4);
    assert!(snapshot["sequence"].as_i64().expect("sequence") >= 100);
    assert_eq!(snapshot["samples"].as_array().map(Vec::len), Some(4));
    assert!(snapshot["diagnostics"]["accepted"].as_u64().expect("accepted") >= 1);
}

#[test]
fn send_reports_summary() {
    let port = free_udp_port();
    let output = udpd()
        .arg("--format")
        .arg("json")
        .arg("send")
        .arg("127.0.0.1")
        .arg("--port")
        .arg(port.to_string())
        .arg("--frames")
        .arg("3")
        .arg("--interval")
        .arg("1ms")
        .arg("--start-sequence")
        .arg("7")
        .output()
        .expect("send should run");

    assert!(output.status.success());
    let summary: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("summary should be json");
    assert_eq!(summary["samples_per_frame"], 8);
    assert_eq!(summary["next_sequence"], 10);
    assert_eq!(
        summary["frames_sent"].as_u64().unwrap() + summary["frames_failed"].as_u64().unwrap(),
        3
    );
}

#[test]
fn oversized_frame_is_a_usage_error() {
    let output = udpd()
        .arg("send")
        .arg("127.0.0.1")
        .arg("--port")
        .arg(free_udp_port().to_string())
        .arg("--samples")
        .arg("500")
        .output()
        .expect("send should run");

    assert_eq!(output.status.code(), Some(64));
    assert!(String::from_utf8_lossy(&output.stderr).contains("--samples 500"));
}

#[test]
fn listen_rejects_zero_capacity() {
    let output = udpd()
        .arg("listen")
        .arg("--port")
        .arg("0")
        .arg("--bind")
        .arg("127.0.0.1")
        .arg("--max-samples")
        .arg("0")
        .output()
        .expect("listen should run");

    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn version_prints_package_version() {
    let output = udpd().arg("version").output().expect("version should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("udpd {}", env!("CARGO_PKG_VERSION")));
}
