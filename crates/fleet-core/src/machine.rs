use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::UnknownAction;

pub const DEFAULT_MACHINE_TYPE: &str = "CNC";

const SECS_PER_HOUR: f64 = 3600.0;
const MAX_HEALTH: f64 = 100.0;
const MIN_HEALTH: f64 = 0.0;
const AMBIENT_TEMP_C: f64 = 25.0;
const RUNNING_BASE_TEMP_C: f64 = 30.0;
const TEMP_PER_DAMAGE: f64 = 0.3;
const VIBRATION_PER_DAMAGE: f64 = 0.01;
const FAILURE_RATE_AT_ZERO_HEALTH: f64 = 0.0001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineStatus {
    #[default]
    Idle,
    Running,
    Error,
}

impl MachineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Control command that can be dispatched to a single machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineAction {
    Start,
    Stop,
    Maintenance,
}

impl MachineAction {
    pub const ALL: [MachineAction; 3] = [Self::Start, Self::Stop, Self::Maintenance];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for MachineAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MachineAction {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "maintenance" => Ok(Self::Maintenance),
            other => Err(UnknownAction(other.to_string())),
        }
    }
}

/// One simulated machine: physical readings plus the idle/running/error
/// state machine.
///
/// Readings only drift while the machine is running. The only way out of
/// `Error` is [`Machine::perform_maintenance`].
#[derive(Debug, Clone, PartialEq)]
pub struct Machine {
    id: u32,
    machine_type: String,
    status: MachineStatus,
    health: f64,
    temperature_c: f64,
    vibration: f64,
    last_maintenance: DateTime<Utc>,
    operating_hours: f64,
}

impl Machine {
    pub fn new(id: u32, machine_type: impl Into<String>) -> Self {
        Self {
            id,
            machine_type: machine_type.into(),
            status: MachineStatus::Idle,
            health: MAX_HEALTH,
            temperature_c: AMBIENT_TEMP_C,
            vibration: 0.0,
            last_maintenance: Utc::now(),
            operating_hours: 0.0,
        }
    }

    /// Advance this machine by `elapsed_secs` of wall time.
    ///
    /// Returns `true` when the machine failed during this tick. The failure
    /// draw happens once per call whatever the elapsed time, so the failure
    /// rate depends on the tick cadence. Zero, negative and NaN elapsed
    /// times leave the machine untouched.
    pub fn update<R: Rng + ?Sized>(&mut self, elapsed_secs: f64, rng: &mut R) -> bool {
        if self.status != MachineStatus::Running || !(elapsed_secs > 0.0) {
            return false;
        }

        let hours = elapsed_secs / SECS_PER_HOUR;
        self.operating_hours += hours;

        let wear = rng.gen_range(0.01..=0.05) * hours;
        self.health = (self.health - wear).clamp(MIN_HEALTH, MAX_HEALTH);

        let damage = MAX_HEALTH - self.health;
        self.temperature_c =
            RUNNING_BASE_TEMP_C + rng.gen_range(-2.0..=2.0) + damage * TEMP_PER_DAMAGE;
        self.vibration = rng.gen_range(0.1..=0.5) + damage * VIBRATION_PER_DAMAGE;

        let failure_probability = FAILURE_RATE_AT_ZERO_HEALTH * (1.0 - self.health / MAX_HEALTH);
        if rng.gen::<f64>() < failure_probability {
            self.status = MachineStatus::Error;
            return true;
        }
        false
    }

    /// No-op while the machine is in `Error`.
    pub fn start(&mut self) {
        if self.status != MachineStatus::Error {
            self.status = MachineStatus::Running;
        }
    }

    pub fn stop(&mut self) {
        if self.status == MachineStatus::Running {
            self.status = MachineStatus::Idle;
        }
    }

    /// Restore 20-40 health points (capped at 100) and clear any fault.
    pub fn perform_maintenance<R: Rng + ?Sized>(&mut self, rng: &mut R, now: DateTime<Utc>) {
        self.health = (self.health + rng.gen_range(20.0..=40.0)).min(MAX_HEALTH);
        self.last_maintenance = now;
        if self.status == MachineStatus::Error {
            self.status = MachineStatus::Idle;
        }
    }

    pub fn apply<R: Rng + ?Sized>(
        &mut self,
        action: MachineAction,
        rng: &mut R,
        now: DateTime<Utc>,
    ) {
        match action {
            MachineAction::Start => self.start(),
            MachineAction::Stop => self.stop(),
            MachineAction::Maintenance => self.perform_maintenance(rng, now),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn machine_type(&self) -> &str {
        &self.machine_type
    }

    pub fn status(&self) -> MachineStatus {
        self.status
    }

    pub fn health(&self) -> f64 {
        self.health
    }

    pub fn temperature_c(&self) -> f64 {
        self.temperature_c
    }

    pub fn vibration(&self) -> f64 {
        self.vibration
    }

    pub fn last_maintenance(&self) -> DateTime<Utc> {
        self.last_maintenance
    }

    pub fn operating_hours(&self) -> f64 {
        self.operating_hours
    }

    #[cfg(test)]
    pub(crate) fn force_state(&mut self, status: MachineStatus, health: f64) {
        self.status = status;
        self.health = health;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn new_machine_has_defaults() {
        let m = Machine::new(1, "CNC");
        assert_eq!(m.id(), 1);
        assert_eq!(m.machine_type(), "CNC");
        assert_eq!(m.status(), MachineStatus::Idle);
        assert_eq!(m.health(), 100.0);
        assert_eq!(m.temperature_c(), 25.0);
        assert_eq!(m.vibration(), 0.0);
        assert_eq!(m.operating_hours(), 0.0);
    }

    #[test]
    fn update_ignores_non_positive_elapsed() {
        let mut rng = rng();
        let mut m = Machine::new(0, "CNC");
        m.start();
        m.force_state(MachineStatus::Running, 90.0);
        let before = m.clone();
        for elapsed in [-3600.0, 0.0, f64::NAN] {
            assert!(!m.update(elapsed, &mut rng));
            assert_eq!(m, before);
        }
    }

    #[test]
    fn update_is_noop_unless_running() {
        let mut rng = rng();
        for status in [MachineStatus::Idle, MachineStatus::Error] {
            let mut m = Machine::new(0, "CNC");
            m.force_state(status, 80.0);
            let before = m.clone();
            assert!(!m.update(3600.0, &mut rng));
            assert_eq!(m, before);
        }
    }

    #[test]
    fn running_hour_degrades_machine() {
        let mut rng = rng();
        for _ in 0..200 {
            let mut m = Machine::new(0, "CNC");
            m.start();
            m.update(3600.0, &mut rng);
            assert!(m.health() < 100.0);
            assert!(m.temperature_c() > 25.0);
            assert!(m.vibration() > 0.0);
            assert_eq!(m.operating_hours(), 1.0);
        }
    }

    #[test]
    fn health_never_goes_negative() {
        let mut rng = rng();
        let mut m = Machine::new(0, "CNC");
        m.force_state(MachineStatus::Running, 0.01);
        m.update(10.0 * 3600.0, &mut rng);
        assert_eq!(m.health(), 0.0);
    }

    #[test]
    fn maintenance_restores_between_20_and_40() {
        let mut rng = rng();
        for _ in 0..200 {
            let mut m = Machine::new(0, "CNC");
            m.force_state(MachineStatus::Idle, 50.0);
            m.perform_maintenance(&mut rng, Utc::now());
            assert!(m.health() >= 70.0 && m.health() <= 90.0, "health {}", m.health());
        }
    }

    #[test]
    fn maintenance_caps_health_at_100() {
        let mut rng = rng();
        let mut m = Machine::new(0, "CNC");
        m.force_state(MachineStatus::Idle, 95.0);
        m.perform_maintenance(&mut rng, Utc::now());
        assert_eq!(m.health(), 100.0);
    }

    #[test]
    fn maintenance_repairs_failed_machine() {
        let mut rng = rng();
        let mut m = Machine::new(0, "CNC");
        m.force_state(MachineStatus::Error, 10.0);
        let stamp = Utc::now();
        m.perform_maintenance(&mut rng, stamp);
        assert_eq!(m.status(), MachineStatus::Idle);
        assert_eq!(m.last_maintenance(), stamp);
    }

    #[test]
    fn start_is_ignored_on_failed_machine() {
        let mut m = Machine::new(0, "CNC");
        m.force_state(MachineStatus::Error, 40.0);
        m.start();
        assert_eq!(m.status(), MachineStatus::Error);
    }

    #[test]
    fn stop_only_affects_running_machine() {
        let mut m = Machine::new(0, "CNC");
        m.stop();
        assert_eq!(m.status(), MachineStatus::Idle);

        m.force_state(MachineStatus::Error, 40.0);
        m.stop();
        assert_eq!(m.status(), MachineStatus::Error);

        m.force_state(MachineStatus::Running, 40.0);
        m.stop();
        assert_eq!(m.status(), MachineStatus::Idle);
    }

    #[test]
    fn worn_machine_eventually_fails() {
        let mut rng = rng();
        let mut m = Machine::new(0, "CNC");
        m.force_state(MachineStatus::Running, 0.0);
        let failed = (0..1_000_000).any(|_| m.update(0.001, &mut rng));
        assert!(failed);
        assert_eq!(m.status(), MachineStatus::Error);
    }

    #[test]
    fn pristine_machine_never_fails() {
        let mut rng = rng();
        let mut m = Machine::new(0, "CNC");
        m.start();
        // At health 100 the failure probability is exactly zero.
        for _ in 0..10_000 {
            m.force_state(MachineStatus::Running, 100.0);
            assert!(!m.update(0.0, &mut rng));
        }
    }

    #[test]
    fn parses_actions() {
        assert_eq!("start".parse::<MachineAction>(), Ok(MachineAction::Start));
        assert_eq!("maintenance".parse::<MachineAction>(), Ok(MachineAction::Maintenance));
        assert!("reboot".parse::<MachineAction>().is_err());
    }
}
