pub mod error;
pub mod fleet;
pub mod machine;
pub mod shared;
pub mod sim_loop;
pub mod snapshot;
pub mod tags;

pub use error::{CommandError, UnknownAction};
pub use fleet::{AdvanceReport, CommandOutcome, Fleet, FleetConfig};
pub use machine::{Machine, MachineAction, MachineStatus, DEFAULT_MACHINE_TYPE};
pub use shared::SharedFleet;
pub use sim_loop::{LoopConfig, LoopStats, SimulationLoop, TickObserver};
pub use snapshot::{FleetSnapshot, MachineSnapshot};
