use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing value for {0}")]
    MissingValue(String),
    #[error("invalid value {value:?} for {flag}")]
    InvalidValue { flag: String, value: String },
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub show_help: bool,
    pub run_seconds: Option<u64>,
    pub host: String,
    pub port: u16,
    pub feed_addr: String,
    pub feed_enabled: bool,
    pub machines: usize,
    pub machine_type: String,
    pub publish_ms: u64,
    pub tick_ms: Option<u64>,
    pub cache_ttl_secs: u64,
    pub static_dir: PathBuf,
    pub cors_origins: Vec<String>,
    pub seed: Option<u64>,
    pub json_logs: bool,
    pub debug: bool,
    pub log_dir: Option<PathBuf>,
    pub audit_path: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            show_help: false,
            run_seconds: None,
            host: "0.0.0.0".to_string(),
            port: 8000,
            feed_addr: "127.0.0.1:8765".to_string(),
            feed_enabled: true,
            machines: 5,
            machine_type: fleet_core::DEFAULT_MACHINE_TYPE.to_string(),
            publish_ms: 1000,
            tick_ms: Some(1000),
            cache_ttl_secs: 5,
            static_dir: PathBuf::from("static"),
            cors_origins: vec!["http://localhost:8000".to_string()],
            seed: None,
            json_logs: false,
            debug: false,
            log_dir: None,
            audit_path: None,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let args: Vec<String> = std::env::args().collect();
        Self::from_args(&args, |key| std::env::var(key).ok())
    }

    /// Environment values are applied first; flags override them.
    pub fn from_args(
        args: &[String],
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut cfg = RuntimeConfig::default();

        if let Some(host) = env("HOST") {
            cfg.host = host;
        }
        if let Some(port) = env("PORT") {
            cfg.port = parse_value("PORT", &port)?;
        }
        if let Some(addr) = env("FEED_ADDR") {
            cfg.feed_addr = addr;
        }
        if let Some(count) = env("MACHINES") {
            cfg.machines = parse_value("MACHINES", &count)?;
        }
        if let Some(kind) = env("MACHINE_TYPE") {
            cfg.machine_type = kind;
        }
        if let Some(dir) = env("STATIC_DIR") {
            cfg.static_dir = PathBuf::from(dir);
        }
        if let Some(origins) = env("CORS_ORIGINS") {
            cfg.cors_origins = split_origins(&origins);
        }
        if let Some(debug) = env("DEBUG") {
            cfg.debug = is_truthy(&debug);
        }

        let mut i = 1;
        while i < args.len() {
            let flag = args[i].as_str();
            match flag {
                "--run-seconds" => {
                    cfg.run_seconds = Some(parse_value(flag, next_value(args, &mut i)?)?);
                }
                "--host" => {
                    cfg.host = next_value(args, &mut i)?.to_string();
                }
                "--port" => {
                    cfg.port = parse_value(flag, next_value(args, &mut i)?)?;
                }
                "--feed-addr" => {
                    cfg.feed_addr = next_value(args, &mut i)?.to_string();
                }
                "--no-feed" => {
                    cfg.feed_enabled = false;
                }
                "--machines" => {
                    cfg.machines = parse_value(flag, next_value(args, &mut i)?)?;
                }
                "--machine-type" => {
                    cfg.machine_type = next_value(args, &mut i)?.to_string();
                }
                "--publish-ms" => {
                    cfg.publish_ms = parse_positive(flag, next_value(args, &mut i)?)?;
                }
                "--tick-ms" => {
                    cfg.tick_ms = Some(parse_positive(flag, next_value(args, &mut i)?)?);
                }
                "--no-ticker" => {
                    cfg.tick_ms = None;
                }
                "--cache-ttl-secs" => {
                    cfg.cache_ttl_secs = parse_value(flag, next_value(args, &mut i)?)?;
                }
                "--static-dir" => {
                    cfg.static_dir = PathBuf::from(next_value(args, &mut i)?);
                }
                "--cors-origins" => {
                    cfg.cors_origins = split_origins(next_value(args, &mut i)?);
                }
                "--seed" => {
                    cfg.seed = Some(parse_value(flag, next_value(args, &mut i)?)?);
                }
                "--json-logs" => {
                    cfg.json_logs = true;
                }
                "--debug" => {
                    cfg.debug = true;
                }
                "--log-dir" => {
                    cfg.log_dir = Some(PathBuf::from(next_value(args, &mut i)?));
                }
                "--audit-log" => {
                    cfg.audit_path = Some(PathBuf::from(next_value(args, &mut i)?));
                }
                "--help" | "-h" => {
                    cfg.show_help = true;
                    break;
                }
                _ => {}
            }
            i += 1;
        }
        Ok(cfg)
    }

    pub fn api_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_ms)
    }

    pub fn print_help() {
        println!(
            r#"factory-sim - Simulated factory machine fleet with HTTP and streaming feed

USAGE:
    factory-sim [OPTIONS]

OPTIONS:
    --host <HOST>           HTTP bind host [env: HOST] [default: 0.0.0.0]
    --port <PORT>           HTTP port [env: PORT] [default: 8000]
    --feed-addr <ADDR>      Streaming feed bind address [env: FEED_ADDR] [default: 127.0.0.1:8765]
    --no-feed               Disable the streaming feed
    --machines <N>          Number of simulated machines [env: MACHINES] [default: 5]
    --machine-type <TYPE>   Machine type label [env: MACHINE_TYPE] [default: CNC]
    --publish-ms <MS>       Feed publish interval [default: 1000]
    --tick-ms <MS>          Fleet advance cadence [default: 1000]
    --no-ticker             Only advance the fleet while feed clients are connected
    --cache-ttl-secs <SECS> Status endpoint cache lifetime [default: 5]
    --static-dir <PATH>     Dashboard asset directory [env: STATIC_DIR] [default: static]
    --cors-origins <LIST>   Comma-separated allowed origins, or * [env: CORS_ORIGINS]
    --seed <N>              Seed the fleet's random source for reproducible runs
    --run-seconds <SECS>    Run for a fixed duration then exit
    --json-logs             Output logs in JSON format (for log aggregation)
    --debug                 Debug-level logging everywhere [env: DEBUG]
    --log-dir <PATH>        Also write daily-rolling log files to this directory
    --audit-log <PATH>      Enable audit logging to specified JSONL file
    -h, --help              Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log filter (e.g., RUST_LOG=debug,fleet_io=trace)
    Variables can also be placed in a .env file in the working directory.

EXAMPLES:
    # Dashboard on the default port with a ten machine fleet
    factory-sim --machines 10

    # Production run with all observability
    factory-sim --json-logs --log-dir /var/log/factory --audit-log /var/log/factory/audit.jsonl

    # Short reproducible run without the feed
    factory-sim --run-seconds 10 --no-feed --seed 7 --tick-ms 250
"#
        );
    }
}

fn next_value<'a>(args: &'a [String], i: &mut usize) -> Result<&'a str, ConfigError> {
    let flag = &args[*i];
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| ConfigError::MissingValue(flag.clone()))
}

fn parse_value<T: std::str::FromStr>(flag: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        flag: flag.to_string(),
        value: value.to_string(),
    })
}

fn parse_positive(flag: &str, value: &str) -> Result<u64, ConfigError> {
    match parse_value::<u64>(flag, value)? {
        0 => Err(ConfigError::InvalidValue {
            flag: flag.to_string(),
            value: value.to_string(),
        }),
        n => Ok(n),
    }
}

fn split_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_truthy(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("factory-sim")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn defaults_without_flags() {
        let cfg = RuntimeConfig::from_args(&args(&[]), no_env).unwrap();
        assert_eq!(cfg.api_addr(), "0.0.0.0:8000");
        assert_eq!(cfg.machines, 5);
        assert_eq!(cfg.machine_type, "CNC");
        assert!(cfg.feed_enabled);
        assert_eq!(cfg.tick_ms, Some(1000));
        assert_eq!(cfg.cors_origins, vec!["http://localhost:8000".to_string()]);
    }

    #[test]
    fn flags_override_environment() {
        let env = |key: &str| match key {
            "PORT" => Some("9000".to_string()),
            "MACHINES" => Some("8".to_string()),
            "CORS_ORIGINS" => Some("http://a.test, http://b.test".to_string()),
            "DEBUG" => Some("true".to_string()),
            _ => None,
        };
        let cfg = RuntimeConfig::from_args(&args(&["--port", "9100", "--no-feed"]), env).unwrap();
        assert_eq!(cfg.port, 9100);
        assert_eq!(cfg.machines, 8);
        assert_eq!(cfg.cors_origins.len(), 2);
        assert!(cfg.debug);
        assert!(!cfg.feed_enabled);
    }

    #[test]
    fn rejects_bad_numbers() {
        let err = RuntimeConfig::from_args(&args(&["--machines", "many"]), no_env).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                flag: "--machines".to_string(),
                value: "many".to_string()
            }
        );
        assert!(RuntimeConfig::from_args(&args(&["--tick-ms", "0"]), no_env).is_err());
        assert_eq!(
            RuntimeConfig::from_args(&args(&["--port"]), no_env).unwrap_err(),
            ConfigError::MissingValue("--port".to_string())
        );
    }

    #[test]
    fn ticker_can_be_disabled() {
        let cfg = RuntimeConfig::from_args(&args(&["--no-ticker"]), no_env).unwrap();
        assert_eq!(cfg.tick_ms, None);
        let cfg = RuntimeConfig::from_args(&args(&["--tick-ms", "250"]), no_env).unwrap();
        assert_eq!(cfg.tick_ms, Some(250));
    }

    #[test]
    fn help_stops_parsing() {
        let cfg = RuntimeConfig::from_args(&args(&["-h", "--port", "nope"]), no_env).unwrap();
        assert!(cfg.show_help);
    }
}
