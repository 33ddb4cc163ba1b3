//! Audit trail for operator commands and fleet state changes.
//!
//! Entries are appended as JSON lines so the file can be tailed or shipped
//! to a log pipeline without extra parsing.

use chrono::Utc;
use fleet_io::{EventSink, FleetEvent};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;
use tracing::warn;

/// Types of events that are logged in the audit trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// Process came up
    SystemStart,
    /// Process is exiting after a bounded run
    SystemShutdown,
    /// A start/stop/maintenance command reached a machine
    CommandApplied,
    /// A command named a machine that does not exist
    CommandRejected,
    /// A running machine broke down
    MachineFailed,
    FeedClientConnected,
    FeedClientDisconnected,
}

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Microseconds since the logger was opened
    pub timestamp_us: u64,
    /// Wall-clock Unix timestamp in microseconds
    pub unix_us: i64,
    pub event_type: AuditEventType,
    /// Additional event-specific details
    pub details: serde_json::Value,
}

/// Thread-safe audit logger that writes to a JSONL file
pub struct AuditLogger {
    writer: Mutex<BufWriter<File>>,
    opened_at: Instant,
}

impl AuditLogger {
    /// Create a new audit logger writing to the specified path.
    /// The file is opened in append mode to preserve existing logs.
    pub fn new(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            writer: Mutex::new(BufWriter::with_capacity(8192, file)),
            opened_at: Instant::now(),
        })
    }

    pub fn log(&self, entry: AuditEntry) -> std::io::Result<()> {
        let mut writer = self.writer.lock().unwrap_or_else(|p| p.into_inner());
        serde_json::to_writer(&mut *writer, &entry)?;
        writer.write_all(b"\n")?;
        writer.flush()
    }

    /// Stamp and append one event.
    pub fn log_event(
        &self,
        event_type: AuditEventType,
        details: serde_json::Value,
    ) -> std::io::Result<()> {
        self.log(AuditEntry {
            timestamp_us: self.opened_at.elapsed().as_micros() as u64,
            unix_us: Utc::now().timestamp_micros(),
            event_type,
            details,
        })
    }
}

impl EventSink for AuditLogger {
    fn record(&self, event: FleetEvent) {
        let (event_type, details) = match event {
            FleetEvent::CommandApplied {
                machine_id,
                action,
                previous_status,
                status,
                source,
            } => (
                AuditEventType::CommandApplied,
                serde_json::json!({
                    "machine_id": machine_id,
                    "action": action,
                    "previous_status": previous_status,
                    "status": status,
                    "source": source,
                }),
            ),
            FleetEvent::CommandRejected {
                machine_id,
                action,
                source,
            } => (
                AuditEventType::CommandRejected,
                serde_json::json!({
                    "machine_id": machine_id,
                    "action": action,
                    "reason": fleet_io::protocol::INVALID_MACHINE_ID,
                    "source": source,
                }),
            ),
            FleetEvent::MachineFailed { machine_id } => (
                AuditEventType::MachineFailed,
                serde_json::json!({ "machine_id": machine_id }),
            ),
            FleetEvent::FeedClientConnected { addr } => (
                AuditEventType::FeedClientConnected,
                serde_json::json!({ "client_addr": addr.to_string() }),
            ),
            FleetEvent::FeedClientDisconnected { addr } => (
                AuditEventType::FeedClientDisconnected,
                serde_json::json!({ "client_addr": addr.to_string() }),
            ),
        };

        if let Err(e) = self.log_event(event_type, details) {
            warn!(error = %e, "Failed to write audit entry");
        }
    }
}
