//! Prometheus metrics for the factory fleet.
//!
//! Per-machine readings are mirrored from every published snapshot; command
//! and feed counters are updated at the serving edge.

use fleet_core::{tags, FleetSnapshot, MachineAction, MachineStatus};
use prometheus::{
    Encoder, GaugeVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::LazyLock;

/// Global metrics registry
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

fn machine_gauge(tag: tags::Tag) -> GaugeVec {
    let gauge = GaugeVec::new(Opts::new(tag.metric, tag.help), &["machine"]).unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
}

// ============================================================================
// Machine Metrics
// ============================================================================

pub static MACHINE_HEALTH: LazyLock<GaugeVec> = LazyLock::new(|| machine_gauge(tags::HEALTH));

pub static MACHINE_TEMPERATURE: LazyLock<GaugeVec> =
    LazyLock::new(|| machine_gauge(tags::TEMPERATURE));

pub static MACHINE_VIBRATION: LazyLock<GaugeVec> = LazyLock::new(|| machine_gauge(tags::VIBRATION));

pub static MACHINE_OPERATING_HOURS: LazyLock<GaugeVec> =
    LazyLock::new(|| machine_gauge(tags::OPERATING_HOURS));

pub static MACHINE_RUNNING: LazyLock<GaugeVec> = LazyLock::new(|| machine_gauge(tags::RUNNING));

/// Machines that transitioned to the error state
pub static MACHINE_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "factory_machine_failures_total",
        "Machines that transitioned to the error state",
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

// ============================================================================
// Simulation Metrics
// ============================================================================

/// Fleet advance steps executed
pub static TICKS: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new("factory_ticks_total", "Fleet advance steps executed").unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

// ============================================================================
// Serving Metrics
// ============================================================================

/// Control commands by action and outcome
pub static COMMANDS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let counter = IntCounterVec::new(
        Opts::new("factory_commands_total", "Control commands by action and outcome"),
        &["action", "outcome"],
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Requests refused by the rate limiter
pub static RATE_LIMITED: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "factory_rate_limited_total",
        "HTTP requests refused by the rate limiter",
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Connected streaming feed clients
pub static FEED_CLIENTS: LazyLock<IntGauge> = LazyLock::new(|| {
    let gauge = IntGauge::new("factory_feed_clients", "Connected streaming feed clients").unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

/// Mirror one snapshot into the per-machine gauges.
pub fn record_snapshot(snapshot: &FleetSnapshot) {
    for machine in &snapshot.machines {
        let label = machine.id.to_string();
        let labels = [label.as_str()];
        MACHINE_HEALTH.with_label_values(&labels).set(machine.health);
        MACHINE_TEMPERATURE.with_label_values(&labels).set(machine.temperature);
        MACHINE_VIBRATION.with_label_values(&labels).set(machine.vibration);
        MACHINE_OPERATING_HOURS
            .with_label_values(&labels)
            .set(machine.operating_hours);
        let running = if machine.status == MachineStatus::Running { 1.0 } else { 0.0 };
        MACHINE_RUNNING.with_label_values(&labels).set(running);
    }
}

pub fn record_tick(failed: usize) {
    TICKS.inc();
    MACHINE_FAILURES.inc_by(failed as u64);
}

pub fn record_command(action: MachineAction, applied: bool) {
    let outcome = if applied { "applied" } else { "invalid_index" };
    COMMANDS.with_label_values(&[action.as_str(), outcome]).inc();
}

/// Render the registry in the Prometheus text format.
pub fn encode() -> Result<Vec<u8>, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(buffer)
}

/// Initialize all metrics (forces lazy initialization)
pub fn init_metrics() {
    let _ = &*MACHINE_HEALTH;
    let _ = &*MACHINE_TEMPERATURE;
    let _ = &*MACHINE_VIBRATION;
    let _ = &*MACHINE_OPERATING_HOURS;
    let _ = &*MACHINE_RUNNING;
    let _ = MACHINE_FAILURES.get();
    let _ = TICKS.get();
    for action in MachineAction::ALL {
        let _ = COMMANDS.with_label_values(&[action.as_str(), "applied"]);
    }
    let _ = RATE_LIMITED.get();
    let _ = FEED_CLIENTS.get();
}
