use crate::infra::audit::AuditLogger;
use fleet_core::{AdvanceReport, FleetSnapshot, LoopConfig, LoopStats, SharedFleet, SimulationLoop};
use fleet_io::metrics;
use fleet_io::{EventSink, FleetEvent};
use std::sync::{atomic::AtomicBool, Arc};
use std::thread;
use std::time::Duration;
use tracing::info;

pub fn init() {
    metrics::init_metrics();
}

/// Advance the fleet on a fixed cadence, mirroring each tick into the
/// metrics registry and the audit trail.
pub fn start_ticker(
    fleet: SharedFleet,
    tick_interval: Duration,
    audit: Option<Arc<AuditLogger>>,
    stop: Arc<AtomicBool>,
) -> thread::JoinHandle<LoopStats> {
    info!(tick_ms = tick_interval.as_millis() as u64, "Starting simulation ticker");
    thread::spawn(move || {
        let observer = move |report: &AdvanceReport, snapshot: &FleetSnapshot| {
            metrics::record_tick(report.failed.len());
            metrics::record_snapshot(snapshot);
            if let Some(ref audit) = audit {
                for &machine_id in &report.failed {
                    audit.record(FleetEvent::MachineFailed { machine_id });
                }
            }
        };
        let mut sim = SimulationLoop::new(fleet, LoopConfig { tick_interval }, observer);
        sim.run(&stop);
        sim.stats().clone()
    })
}
