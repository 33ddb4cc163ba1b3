use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::machine::{Machine, MachineStatus};

/// Point-in-time view of one machine, as reported to dashboards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineSnapshot {
    pub id: u32,
    #[serde(rename = "type")]
    pub machine_type: String,
    pub status: MachineStatus,
    pub health: f64,
    pub temperature: f64,
    pub vibration: f64,
    pub operating_hours: f64,
    pub last_maintenance: DateTime<Utc>,
}

impl From<&Machine> for MachineSnapshot {
    fn from(m: &Machine) -> Self {
        Self {
            id: m.id(),
            machine_type: m.machine_type().to_string(),
            status: m.status(),
            health: m.health(),
            temperature: m.temperature_c(),
            vibration: m.vibration(),
            operating_hours: m.operating_hours(),
            last_maintenance: m.last_maintenance(),
        }
    }
}

/// Immutable read of the whole fleet at `timestamp` (simulated time).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetSnapshot {
    pub timestamp: DateTime<Utc>,
    pub machines: Vec<MachineSnapshot>,
}

impl FleetSnapshot {
    pub fn running_count(&self) -> usize {
        self.count_with(MachineStatus::Running)
    }

    pub fn error_count(&self) -> usize {
        self.count_with(MachineStatus::Error)
    }

    fn count_with(&self, status: MachineStatus) -> usize {
        self.machines.iter().filter(|m| m.status == status).count()
    }
}
