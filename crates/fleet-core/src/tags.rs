#[derive(Debug, Clone, Copy)]
pub struct Tag {
    pub key: &'static str,
    pub metric: &'static str,
    pub help: &'static str,
}

pub const HEALTH: Tag = Tag {
    key: "health",
    metric: "factory_machine_health",
    help: "Machine health score (0-100)",
};

pub const TEMPERATURE: Tag = Tag {
    key: "temperature",
    metric: "factory_machine_temperature_celsius",
    help: "Machine temperature in Celsius",
};

pub const VIBRATION: Tag = Tag {
    key: "vibration",
    metric: "factory_machine_vibration",
    help: "Machine vibration amplitude",
};

pub const OPERATING_HOURS: Tag = Tag {
    key: "operating_hours",
    metric: "factory_machine_operating_hours",
    help: "Accumulated operating hours while running",
};

pub const RUNNING: Tag = Tag {
    key: "status",
    metric: "factory_machine_running",
    help: "Machine running flag (1=running, 0=idle or error)",
};

pub const MACHINE_TAGS: &[Tag] = &[HEALTH, TEMPERATURE, VIBRATION, OPERATING_HOURS, RUNNING];
