use crate::events::{EventSink, FleetEvent};
use crate::http::apply_command;
use crate::metrics::{self, FEED_CLIENTS};
use crate::protocol::{CommandResultMsg, IncomingMessage};
use fleet_core::SharedFleet;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Pending output above this size means the client is not keeping up; new
/// snapshots are skipped for it until the backlog drains.
const MAX_PENDING_BYTES: usize = 64 * 1024;

/// Longest unterminated input accepted from a client before it is dropped.
const MAX_LINE_BYTES: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("failed to bind feed listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("feed listener setup failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Debug)]
pub struct FeedConfig {
    pub bind_addr: String,
    pub publish_interval: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8765".to_string(),
            publish_interval: Duration::from_secs(1),
        }
    }
}

struct FeedClient {
    stream: TcpStream,
    addr: SocketAddr,
    recv_buf: Vec<u8>,
    send_buf: Vec<u8>,
    send_offset: usize,
    closed: bool,
}

impl FeedClient {
    fn new(stream: TcpStream, addr: SocketAddr) -> Self {
        Self {
            stream,
            addr,
            recv_buf: Vec::with_capacity(1024),
            send_buf: Vec::new(),
            send_offset: 0,
            closed: false,
        }
    }

    fn pending(&self) -> usize {
        self.send_buf.len() - self.send_offset
    }

    fn queue_line(&mut self, line: &[u8]) {
        if self.send_offset > 0 {
            self.send_buf.drain(..self.send_offset);
            self.send_offset = 0;
        }
        self.send_buf.extend_from_slice(line);
        self.send_buf.push(b'\n');
    }

    /// Read whatever is available; returns complete lines, or `None` once the
    /// peer has gone away or has sent an over-long line.
    fn read_lines(&mut self) -> Option<Vec<String>> {
        let mut temp = [0u8; 1024];
        while self.recv_buf.len() <= MAX_LINE_BYTES {
            match self.stream.read(&mut temp) {
                Ok(0) => return None,
                Ok(n) => self.recv_buf.extend_from_slice(&temp[..n]),
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    debug!(client_addr = %self.addr, error = %err, "Feed read error");
                    return None;
                }
            }
        }

        let mut lines = Vec::new();
        while let Some(pos) = self.recv_buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.recv_buf.drain(..=pos).collect();
            if let Ok(text) = std::str::from_utf8(&line) {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    lines.push(trimmed.to_string());
                }
            }
        }

        if self.recv_buf.len() > MAX_LINE_BYTES {
            warn!(
                client_addr = %self.addr,
                buffered = self.recv_buf.len(),
                "Feed client sent an over-long line"
            );
            return None;
        }
        Some(lines)
    }

    /// Push pending output; `false` once the peer has gone away.
    fn flush(&mut self) -> bool {
        while self.send_offset < self.send_buf.len() {
            match self.stream.write(&self.send_buf[self.send_offset..]) {
                Ok(0) => return false,
                Ok(n) => self.send_offset += n,
                Err(err) if err.kind() == ErrorKind::WouldBlock => return true,
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => {
                    debug!(client_addr = %self.addr, error = %err, "Feed write error");
                    return false;
                }
            }
        }
        self.send_buf.clear();
        self.send_offset = 0;
        true
    }
}

/// Newline-delimited JSON feed of fleet snapshots.
///
/// Each publish interval with at least one client connected advances the
/// fleet once and pushes the resulting snapshot to every client. A client
/// that disconnects is dropped on its own; the loop keeps serving the rest.
pub struct FeedServer {
    listener: TcpListener,
    config: FeedConfig,
}

impl FeedServer {
    pub fn bind(config: FeedConfig) -> Result<Self, FeedError> {
        let listener = TcpListener::bind(&config.bind_addr).map_err(|source| FeedError::Bind {
            addr: config.bind_addr.clone(),
            source,
        })?;
        listener.set_nonblocking(true)?;
        Ok(Self { listener, config })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, FeedError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn run(self, fleet: SharedFleet, events: Arc<dyn EventSink>, stop: Arc<AtomicBool>) {
        info!(
            addr = ?self.listener.local_addr().ok(),
            publish_interval_ms = self.config.publish_interval.as_millis() as u64,
            "Feed listening"
        );

        let mut clients: Vec<FeedClient> = Vec::new();
        let mut last_publish = Instant::now();

        while !stop.load(Ordering::Relaxed) {
            let joined = self.accept_clients(&mut clients, events.as_ref());

            for client in clients.iter_mut() {
                let Some(lines) = client.read_lines() else {
                    client.closed = true;
                    continue;
                };
                for line in lines {
                    if let Some(reply) = handle_incoming(&line, &fleet, events.as_ref()) {
                        client.queue_line(&reply);
                    }
                }
            }
            drop_closed(&mut clients, events.as_ref());

            // New clients get a snapshot right away instead of waiting a full interval.
            let due = joined > 0 || last_publish.elapsed() >= self.config.publish_interval;
            if due && !clients.is_empty() {
                let (report, snapshot) = fleet.advance_and_snapshot();
                metrics::record_tick(report.failed.len());
                metrics::record_snapshot(&snapshot);
                for machine_id in report.failed {
                    events.record(FleetEvent::MachineFailed { machine_id });
                }

                match serde_json::to_vec(&snapshot) {
                    Ok(line) => {
                        for client in clients.iter_mut() {
                            if client.pending() < MAX_PENDING_BYTES {
                                client.queue_line(&line);
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "Failed to serialize snapshot"),
                }
                last_publish = Instant::now();
            }

            for client in clients.iter_mut() {
                if !client.flush() {
                    client.closed = true;
                }
            }
            drop_closed(&mut clients, events.as_ref());

            std::thread::sleep(Duration::from_millis(5));
        }

        info!(clients = clients.len(), "Feed stopped");
        FEED_CLIENTS.set(0);
    }

    fn accept_clients(&self, clients: &mut Vec<FeedClient>, events: &dyn EventSink) -> usize {
        let mut joined = 0;
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        warn!(client_addr = %addr, error = %e, "Failed to configure feed client");
                        continue;
                    }
                    let _ = stream.set_nodelay(true);
                    info!(client_addr = %addr, "Feed client connected");
                    events.record(FleetEvent::FeedClientConnected { addr });
                    clients.push(FeedClient::new(stream, addr));
                    FEED_CLIENTS.set(clients.len() as i64);
                    joined += 1;
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) => {
                    warn!("Feed accept error: {}", err);
                    break;
                }
            }
        }
        joined
    }
}

fn drop_closed(clients: &mut Vec<FeedClient>, events: &dyn EventSink) {
    let before = clients.len();
    clients.retain(|client| {
        if client.closed {
            info!(client_addr = %client.addr, "Feed client disconnected");
            events.record(FleetEvent::FeedClientDisconnected { addr: client.addr });
        }
        !client.closed
    });
    if clients.len() != before {
        FEED_CLIENTS.set(clients.len() as i64);
    }
}

fn handle_incoming(line: &str, fleet: &SharedFleet, events: &dyn EventSink) -> Option<Vec<u8>> {
    let Some(IncomingMessage::Command(cmd)) = IncomingMessage::parse(line) else {
        debug!(line, "Ignoring unrecognized feed message");
        return None;
    };
    let (reply, status) = apply_command(fleet, events, cmd.machine_id, cmd.action, "feed");
    let mut msg = CommandResultMsg::new(cmd.machine_id, cmd.action, reply);
    msg.machine_status = status;
    serde_json::to_vec(&msg).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopSink;
    use fleet_core::{Fleet, FleetConfig, MachineStatus};
    use std::net::TcpListener;

    fn connected_pair() -> (FeedClient, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let peer = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (stream, addr) = listener.accept().unwrap();
        stream.set_nonblocking(true).unwrap();
        (FeedClient::new(stream, addr), peer)
    }

    #[test]
    fn splits_complete_lines() {
        let (mut client, mut peer) = connected_pair();
        peer.write_all(b"first\n\n  second  \npartial").unwrap();

        let mut lines = Vec::new();
        for _ in 0..100 {
            lines.extend(client.read_lines().unwrap());
            if lines.len() == 2 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(lines, vec!["first".to_string(), "second".to_string()]);
        assert_eq!(client.recv_buf, b"partial");
    }

    #[test]
    fn drops_client_sending_unterminated_flood() {
        let (mut client, mut peer) = connected_pair();
        let writer = std::thread::spawn(move || {
            let chunk = vec![b'x'; 16 * 1024];
            for _ in 0..16 {
                if peer.write_all(&chunk).is_err() {
                    break;
                }
            }
            peer
        });

        let mut dropped = false;
        for _ in 0..500 {
            match client.read_lines() {
                None => {
                    dropped = true;
                    break;
                }
                Some(lines) => assert!(lines.is_empty()),
            }
            assert!(client.recv_buf.len() <= MAX_LINE_BYTES + 1024);
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(dropped);
        drop(client);
        let _ = writer.join();
    }

    #[test]
    fn command_result_carries_new_status() {
        let fleet = SharedFleet::new(Fleet::new(&FleetConfig {
            machine_count: 2,
            seed: Some(3),
            ..Default::default()
        }));
        let line = r#"{"type":"command","machine_id":1,"action":"start"}"#;
        let reply = handle_incoming(line, &fleet, &NoopSink).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&reply).unwrap();
        assert_eq!(value["type"], "command_result");
        assert_eq!(value["status"], "success");
        assert_eq!(value["machine_status"], "running");
        assert_eq!(fleet.snapshot().machines[1].status, MachineStatus::Running);

        assert!(handle_incoming("garbage", &fleet, &NoopSink).is_none());
    }
}
