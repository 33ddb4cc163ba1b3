use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::process::{Child, Command};
use std::thread;
use std::time::Duration;

struct SimProcess {
    child: Child,
    api_addr: String,
    feed_addr: String,
    _static_dir: tempfile::TempDir,
}

fn ephemeral_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind ephemeral port for integration test");
    let addr = listener
        .local_addr()
        .expect("Failed to resolve bound address");
    format!("127.0.0.1:{}", addr.port())
}

fn wait_for(addr: &str) {
    // Loop until port is open (up to 5s)
    let start = std::time::Instant::now();
    while start.elapsed().as_secs() < 5 {
        if TcpStream::connect(addr).is_ok() {
            return;
        }
        thread::sleep(Duration::from_millis(100));
    }
}

impl SimProcess {
    fn start() -> Self {
        let bin_path = env!("CARGO_BIN_EXE_factory-sim");

        let static_dir = tempfile::tempdir().expect("Failed to create static dir");
        std::fs::write(
            static_dir.path().join("index.html"),
            "<html><body>fleet dashboard</body></html>",
        )
        .expect("Failed to write index.html");

        let api_addr = ephemeral_addr();
        let feed_addr = ephemeral_addr();
        let port = api_addr.rsplit(':').next().unwrap_or("0").to_string();

        let child = Command::new(bin_path)
            .args(["--host", "127.0.0.1", "--port", &port])
            .args(["--feed-addr", &feed_addr])
            .args(["--machines", "3", "--seed", "11", "--publish-ms", "200"])
            .args(["--cache-ttl-secs", "1"])
            .arg("--static-dir")
            .arg(static_dir.path())
            .spawn()
            .expect("Failed to start factory-sim");

        wait_for(&api_addr);
        wait_for(&feed_addr);

        Self {
            child,
            api_addr,
            feed_addr,
            _static_dir: static_dir,
        }
    }

    fn get(&self, path: &str) -> (u16, String) {
        let mut stream = TcpStream::connect(&self.api_addr).expect("Failed to connect to API");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("Failed to set timeout");
        write!(
            stream,
            "GET {path} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
            self.api_addr
        )
        .expect("Failed to send request");

        let mut raw = String::new();
        stream.read_to_string(&mut raw).expect("Failed to read response");
        let status = raw
            .split_whitespace()
            .nth(1)
            .and_then(|code| code.parse().ok())
            .unwrap_or(0);
        let body = raw
            .split_once("\r\n\r\n")
            .map(|(_, body)| body.to_string())
            .unwrap_or_default();
        (status, body)
    }

    fn get_json(&self, path: &str) -> (u16, serde_json::Value) {
        let (status, body) = self.get(path);
        let value = serde_json::from_str(&body).expect("Response body should be JSON");
        (status, value)
    }
}

impl Drop for SimProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[test]
fn test_health_and_status() {
    let sim = SimProcess::start();

    let (status, health) = sim.get_json("/health");
    assert_eq!(status, 200);
    assert_eq!(health["status"], "healthy");

    let (status, fleet) = sim.get_json("/api/status");
    assert_eq!(status, 200);
    let machines = fleet["machines"].as_array().expect("machines array");
    assert_eq!(machines.len(), 3);
    for (i, machine) in machines.iter().enumerate() {
        assert_eq!(machine["id"], i);
        assert_eq!(machine["status"], "idle");
    }
}

#[test]
fn test_fleet_advances_without_feed_clients() {
    let sim = SimProcess::start();

    let (status, _) = sim.get_json("/api/start/0");
    assert_eq!(status, 200);
    let (_, before) = sim.get_json("/api/status");

    thread::sleep(Duration::from_millis(2500));
    let (_, after) = sim.get_json("/api/status");

    assert_ne!(before["timestamp"], after["timestamp"]);
    let machine = &after["machines"][0];
    assert_eq!(machine["status"], "running");
    assert!(machine["operating_hours"].as_f64().unwrap_or(0.0) > 0.0);
    assert_eq!(after["machines"][1]["operating_hours"], 0.0);
}

#[test]
fn test_commands() {
    let sim = SimProcess::start();

    let (status, reply) = sim.get_json("/api/start/0");
    assert_eq!(status, 200);
    assert_eq!(reply, serde_json::json!({"status": "success"}));

    let (status, reply) = sim.get_json("/api/start/999");
    assert_eq!(status, 200);
    assert_eq!(reply["status"], "error");
    assert_eq!(reply["message"], "Invalid machine ID");

    let (status, _) = sim.get("/api/stop/abc");
    assert_eq!(status, 422);

    let (status, _) = sim.get("/api/unknown");
    assert_eq!(status, 404);
}

#[test]
fn test_dashboard_and_metrics() {
    let sim = SimProcess::start();

    let (status, body) = sim.get("/");
    assert_eq!(status, 200);
    assert!(body.contains("fleet dashboard"));

    let (status, body) = sim.get("/metrics");
    assert_eq!(status, 200);
    assert!(body.contains("factory_machine_health"));
}

#[test]
fn test_feed_streams_snapshots() {
    let sim = SimProcess::start();

    let stream = TcpStream::connect(&sim.feed_addr).expect("Failed to connect to feed");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("Failed to set timeout");
    let mut reader = BufReader::new(stream.try_clone().expect("Failed to clone stream"));

    let mut line = String::new();
    reader.read_line(&mut line).expect("Failed to read snapshot");
    let snapshot: serde_json::Value = serde_json::from_str(line.trim()).expect("Invalid snapshot");
    assert_eq!(snapshot["machines"].as_array().map(|m| m.len()), Some(3));

    let mut writer = stream;
    writer
        .write_all(b"{\"type\":\"command\",\"machine_id\":2,\"action\":\"start\"}\n")
        .expect("Failed to send command");

    let mut result = serde_json::Value::Null;
    for _ in 0..20 {
        line.clear();
        reader.read_line(&mut line).expect("Failed to read feed line");
        let value: serde_json::Value = serde_json::from_str(line.trim()).expect("Invalid line");
        if value["type"] == "command_result" {
            result = value;
            break;
        }
    }
    assert_eq!(result["status"], "success");
    assert_eq!(result["machine_status"], "running");
}
