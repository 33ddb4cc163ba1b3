use crate::infra::audit::{AuditEventType, AuditLogger};
use crate::runtime::config::{ConfigError, RuntimeConfig};
use crate::runtime::logging::init_tracing;
use crate::runtime::telemetry;
use fleet_core::{Fleet, FleetConfig, SharedFleet};
use fleet_io::{
    serve_api, ApiConfig, EventSink, FeedConfig, FeedError, FeedServer, NoopSink, ServerError,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Api(#[from] ServerError),
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error("failed to open audit log {path}: {source}")]
    Audit {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Parse configuration and run; returns the process exit code.
pub fn run_from_args() -> i32 {
    let _ = dotenvy::dotenv();

    let config = match RuntimeConfig::from_env() {
        Ok(config) => config,
        Err(e) => return config_failure(e),
    };
    if config.show_help {
        RuntimeConfig::print_help();
        return 0;
    }

    let _log_guard = init_tracing(config.json_logs, config.debug, config.log_dir.as_deref());
    match run(config) {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "Startup failed");
            1
        }
    }
}

fn config_failure(e: ConfigError) -> i32 {
    eprintln!("factory-sim: {e}");
    eprintln!("Run with --help for usage.");
    2
}

pub fn run(config: RuntimeConfig) -> Result<(), StartupError> {
    telemetry::init();

    let audit_logger = init_audit_logger(&config)?;
    let events: Arc<dyn EventSink> = match audit_logger {
        Some(ref logger) => logger.clone(),
        None => Arc::new(NoopSink),
    };

    let fleet = SharedFleet::new(Fleet::new(&FleetConfig {
        machine_count: config.machines,
        machine_type: config.machine_type.clone(),
        seed: config.seed,
    }));
    info!(
        machines = config.machines,
        machine_type = %config.machine_type,
        seeded = config.seed.is_some(),
        "Fleet created"
    );

    let stop = Arc::new(AtomicBool::new(false));

    let api = serve_api(
        fleet.clone(),
        ApiConfig {
            bind_addr: config.api_addr(),
            status_cache_ttl: Duration::from_secs(config.cache_ttl_secs),
            static_dir: config.static_dir.clone(),
            cors_origins: config.cors_origins.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            ..Default::default()
        },
        Arc::clone(&events),
        Arc::clone(&stop),
    )?;

    let feed_handle = if config.feed_enabled {
        let feed = FeedServer::bind(FeedConfig {
            bind_addr: config.feed_addr.clone(),
            publish_interval: config.publish_interval(),
        })?;
        let feed_fleet = fleet.clone();
        let feed_events = Arc::clone(&events);
        let feed_stop = Arc::clone(&stop);
        Some(thread::spawn(move || feed.run(feed_fleet, feed_events, feed_stop)))
    } else {
        info!("Streaming feed disabled");
        None
    };

    let ticker_handle = config.tick_ms.map(|ms| {
        telemetry::start_ticker(
            fleet.clone(),
            Duration::from_millis(ms),
            audit_logger.clone(),
            Arc::clone(&stop),
        )
    });

    if let Some(ref logger) = audit_logger {
        let _ = logger.log_event(
            AuditEventType::SystemStart,
            serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "machines": config.machines,
                "api_addr": api.local_addr.to_string(),
                "feed_enabled": config.feed_enabled,
                "ticker_enabled": config.tick_ms.is_some(),
            }),
        );
    }

    info!(api_addr = %api.local_addr, "Factory simulator running");

    let Some(seconds) = config.run_seconds else {
        let _ = api.handle.join();
        if let Some(handle) = feed_handle {
            let _ = handle.join();
        }
        if let Some(handle) = ticker_handle {
            let _ = handle.join();
        }
        return Ok(());
    };

    info!(seconds, "Running for limited duration");
    thread::sleep(Duration::from_secs(seconds));
    stop.store(true, Ordering::Relaxed);

    let _ = api.handle.join();
    if let Some(handle) = feed_handle {
        let _ = handle.join();
    }
    let stats = ticker_handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default();

    let snapshot = fleet.snapshot();
    info!(
        ticks = stats.ticks,
        late_ticks = stats.late_ticks,
        failures = stats.failures,
        running = snapshot.running_count(),
        in_error = snapshot.error_count(),
        "Run complete"
    );

    if let Some(ref logger) = audit_logger {
        let _ = logger.log_event(
            AuditEventType::SystemShutdown,
            serde_json::json!({
                "ticks": stats.ticks,
                "failures": stats.failures,
                "running": snapshot.running_count(),
                "in_error": snapshot.error_count(),
            }),
        );
    }

    Ok(())
}

fn init_audit_logger(config: &RuntimeConfig) -> Result<Option<Arc<AuditLogger>>, StartupError> {
    let Some(path) = config.audit_path.as_ref() else {
        return Ok(None);
    };
    let logger = AuditLogger::new(path).map_err(|source| StartupError::Audit {
        path: path.display().to_string(),
        source,
    })?;
    info!(path = %path.display(), "Audit logging enabled");
    Ok(Some(Arc::new(logger)))
}
