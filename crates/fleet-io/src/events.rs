use fleet_core::{MachineAction, MachineStatus};
use std::net::SocketAddr;

/// Notable things that happen at the serving edge, for audit trails.
#[derive(Debug, Clone, PartialEq)]
pub enum FleetEvent {
    CommandApplied {
        machine_id: u32,
        action: MachineAction,
        previous_status: MachineStatus,
        status: MachineStatus,
        source: &'static str,
    },
    CommandRejected {
        machine_id: i64,
        action: MachineAction,
        source: &'static str,
    },
    MachineFailed {
        machine_id: u32,
    },
    FeedClientConnected {
        addr: SocketAddr,
    },
    FeedClientDisconnected {
        addr: SocketAddr,
    },
}

pub trait EventSink: Send + Sync {
    fn record(&self, event: FleetEvent);
}

/// Sink used when auditing is disabled.
pub struct NoopSink;

impl EventSink for NoopSink {
    fn record(&self, _event: FleetEvent) {}
}
