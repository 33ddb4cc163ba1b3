use chrono::{DateTime, Utc};
use log::{debug, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::{Duration, Instant};

use crate::error::CommandError;
use crate::machine::{Machine, MachineAction, MachineStatus, DEFAULT_MACHINE_TYPE};
use crate::snapshot::{FleetSnapshot, MachineSnapshot};

#[derive(Clone, Debug)]
pub struct FleetConfig {
    pub machine_count: usize,
    pub machine_type: String,
    /// Fixed RNG seed for reproducible runs; entropy-seeded when `None`.
    pub seed: Option<u64>,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            machine_count: 5,
            machine_type: DEFAULT_MACHINE_TYPE.to_string(),
            seed: None,
        }
    }
}

/// Result of one [`Fleet::advance_to`] call.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AdvanceReport {
    pub elapsed: Duration,
    /// Ids of machines that transitioned to `Error` during this tick.
    pub failed: Vec<u32>,
}

/// What a successfully dispatched command did to its machine.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CommandOutcome {
    pub machine_id: u32,
    pub action: MachineAction,
    pub previous_status: MachineStatus,
    pub status: MachineStatus,
    pub health: f64,
}

pub struct Fleet {
    machines: Vec<Machine>,
    simulation_time: DateTime<Utc>,
    last_real_update: Instant,
    rng: StdRng,
}

impl Fleet {
    pub fn new(config: &FleetConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::with_rng(config.machine_count, &config.machine_type, rng)
    }

    pub fn with_rng(machine_count: usize, machine_type: &str, rng: StdRng) -> Self {
        let machines = (0..machine_count)
            .map(|i| Machine::new(i as u32, machine_type))
            .collect();
        Self {
            machines,
            simulation_time: Utc::now(),
            last_real_update: Instant::now(),
            rng,
        }
    }

    /// Advance simulated time by the wall time elapsed since the last call.
    pub fn advance(&mut self) -> AdvanceReport {
        self.advance_to(Instant::now())
    }

    /// Advance as if the current instant were `now`. An instant earlier than
    /// the previous update counts as zero elapsed time.
    pub fn advance_to(&mut self, now: Instant) -> AdvanceReport {
        let elapsed = now.saturating_duration_since(self.last_real_update);
        self.last_real_update = now;
        if let Ok(delta) = chrono::Duration::from_std(elapsed) {
            self.simulation_time += delta;
        }

        let elapsed_secs = elapsed.as_secs_f64();
        let mut failed = Vec::new();
        for machine in &mut self.machines {
            if machine.update(elapsed_secs, &mut self.rng) {
                warn!(
                    "machine {} failed (health {:.2}, {:.1} operating hours)",
                    machine.id(),
                    machine.health(),
                    machine.operating_hours()
                );
                failed.push(machine.id());
            }
        }

        AdvanceReport { elapsed, failed }
    }

    pub fn snapshot(&self) -> FleetSnapshot {
        FleetSnapshot {
            timestamp: self.simulation_time,
            machines: self.machines.iter().map(MachineSnapshot::from).collect(),
        }
    }

    /// Dispatch `action` to the machine at `index`. Out-of-range indices are
    /// rejected without touching any machine.
    pub fn command(
        &mut self,
        index: usize,
        action: MachineAction,
    ) -> Result<CommandOutcome, CommandError> {
        let len = self.machines.len();
        let machine = self
            .machines
            .get_mut(index)
            .ok_or(CommandError::InvalidIndex { index, len })?;

        let previous_status = machine.status();
        machine.apply(action, &mut self.rng, Utc::now());
        debug!(
            "machine {} {}: {} -> {}",
            machine.id(),
            action,
            previous_status,
            machine.status()
        );

        Ok(CommandOutcome {
            machine_id: machine.id(),
            action,
            previous_status,
            status: machine.status(),
            health: machine.health(),
        })
    }

    pub fn machine(&self, index: usize) -> Option<&Machine> {
        self.machines.get(index)
    }

    pub fn machines(&self) -> &[Machine] {
        &self.machines
    }

    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }

    pub fn simulation_time(&self) -> DateTime<Utc> {
        self.simulation_time
    }
}
