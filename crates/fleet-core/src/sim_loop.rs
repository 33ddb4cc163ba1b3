use crate::fleet::AdvanceReport;
use crate::shared::SharedFleet;
use crate::snapshot::FleetSnapshot;
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Clone, Debug)]
pub struct LoopConfig {
    pub tick_interval: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Clone, Default, Debug)]
pub struct LoopStats {
    pub ticks: u64,
    pub late_ticks: u64,
    pub max_overrun_us: u64,
    pub failures: u64,
}

/// Receives every fleet state produced by [`SimulationLoop`].
pub trait TickObserver: Send {
    fn on_tick(&mut self, report: &AdvanceReport, snapshot: &FleetSnapshot);
}

impl<F> TickObserver for F
where
    F: FnMut(&AdvanceReport, &FleetSnapshot) + Send,
{
    fn on_tick(&mut self, report: &AdvanceReport, snapshot: &FleetSnapshot) {
        self(report, snapshot)
    }
}

/// Fixed-cadence driver that advances the fleet independently of readers.
pub struct SimulationLoop<O: TickObserver> {
    fleet: SharedFleet,
    config: LoopConfig,
    observer: O,
    stats: LoopStats,
}

impl<O: TickObserver> SimulationLoop<O> {
    pub fn new(fleet: SharedFleet, config: LoopConfig, observer: O) -> Self {
        Self {
            fleet,
            config,
            observer,
            stats: LoopStats::default(),
        }
    }

    pub fn run(&mut self, stop: &AtomicBool) {
        let mut next_tick = Instant::now() + self.config.tick_interval;

        while !stop.load(Ordering::Relaxed) {
            let now = Instant::now();
            if now < next_tick {
                // Sleep in short slices so a stop request is seen promptly.
                thread::sleep((next_tick - now).min(Duration::from_millis(50)));
                continue;
            }

            let overrun = now.duration_since(next_tick);
            if overrun > self.config.tick_interval {
                self.stats.late_ticks += 1;
                let overrun_us = overrun.as_micros() as u64;
                self.stats.max_overrun_us = self.stats.max_overrun_us.max(overrun_us);
                next_tick = now;
            }

            self.tick();
            next_tick += self.config.tick_interval;
        }

        info!(
            "simulation loop stopped after {} ticks ({} failures)",
            self.stats.ticks, self.stats.failures
        );
    }

    pub fn tick(&mut self) {
        let (report, snapshot) = self.fleet.advance_and_snapshot();
        self.stats.ticks += 1;
        if !report.failed.is_empty() {
            self.stats.failures += report.failed.len() as u64;
            warn!("machines failed this tick: {:?}", report.failed);
        }
        self.observer.on_tick(&report, &snapshot);
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }
}
