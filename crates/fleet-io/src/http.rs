//! HTTP API for dashboards.
//!
//! Routing and response building live in [`ApiState::handle`], which is
//! independent of the socket so it can be exercised directly; [`serve_api`]
//! only moves requests between tiny_http and that handler.

use crate::cache::TtlCache;
use crate::events::{EventSink, FleetEvent};
use crate::metrics::{self, RATE_LIMITED};
use crate::protocol::{machine_index, CommandReply, HealthReply};
use crate::rate_limit::RateLimiter;
use fleet_core::{MachineAction, MachineStatus, SharedFleet};
use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tiny_http::{Header, Method, Request, Response, Server};
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind HTTP server on {addr}: {reason}")]
    Bind { addr: String, reason: String },
    #[error("HTTP server on {0} is not listening on an IP socket")]
    NotIp(String),
}

/// Requests allowed per client per minute, by endpoint group.
#[derive(Clone, Debug)]
pub struct RateLimits {
    pub health: u32,
    pub status: u32,
    pub start_stop: u32,
    pub maintenance: u32,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            health: 10,
            status: 30,
            start_stop: 10,
            maintenance: 5,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub bind_addr: String,
    pub status_cache_ttl: Duration,
    pub static_dir: PathBuf,
    pub cors_origins: Vec<String>,
    pub version: String,
    pub rate_limits: RateLimits,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
            status_cache_ttl: Duration::from_secs(5),
            static_dir: PathBuf::from("static"),
            cors_origins: vec!["http://localhost:8000".to_string()],
            version: env!("CARGO_PKG_VERSION").to_string(),
            rate_limits: RateLimits::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    Health,
    Status,
    Metrics,
    Command { action: MachineAction, raw_id: &'a str },
    Index,
    Static(&'a str),
    NotFound,
}

pub fn route(url: &str) -> Route<'_> {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    match path {
        "/" | "/index.html" => return Route::Index,
        "/health" => return Route::Health,
        "/api/status" => return Route::Status,
        "/metrics" => return Route::Metrics,
        _ => {}
    }

    if let Some(rest) = path.strip_prefix("/static/") {
        return Route::Static(rest);
    }

    if let Some(rest) = path.strip_prefix("/api/") {
        if let Some((action, raw_id)) = rest.split_once('/') {
            if let Ok(action) = action.parse::<MachineAction>() {
                if !raw_id.is_empty() && !raw_id.contains('/') {
                    return Route::Command { action, raw_id };
                }
            }
        }
    }
    Route::NotFound
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
    pub allow_origin: Option<String>,
    pub preflight: bool,
}

impl ApiResponse {
    fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self::raw(status, "application/json", body),
            Err(e) => {
                error!(error = %e, "Failed to serialize response");
                Self::raw(500, "text/plain", b"Internal Server Error".to_vec())
            }
        }
    }

    fn raw(status: u16, content_type: &'static str, body: Vec<u8>) -> Self {
        Self {
            status,
            content_type,
            body,
            allow_origin: None,
            preflight: false,
        }
    }

    fn text(status: u16, body: &str) -> Self {
        Self::raw(status, "text/plain", body.as_bytes().to_vec())
    }
}

struct Limiters {
    health: RateLimiter,
    status: RateLimiter,
    start_stop: RateLimiter,
    maintenance: RateLimiter,
}

/// Everything a request handler needs; shared by the server thread.
pub struct ApiState {
    fleet: SharedFleet,
    config: ApiConfig,
    status_cache: TtlCache,
    limiters: Limiters,
    events: Arc<dyn EventSink>,
}

impl ApiState {
    pub fn new(fleet: SharedFleet, config: ApiConfig, events: Arc<dyn EventSink>) -> Self {
        let limits = &config.rate_limits;
        let limiters = Limiters {
            health: RateLimiter::per_minute(limits.health),
            status: RateLimiter::per_minute(limits.status),
            start_stop: RateLimiter::per_minute(limits.start_stop),
            maintenance: RateLimiter::per_minute(limits.maintenance),
        };
        Self {
            fleet,
            status_cache: TtlCache::new(config.status_cache_ttl),
            limiters,
            config,
            events,
        }
    }

    pub fn handle(
        &self,
        method: &Method,
        url: &str,
        client: Option<IpAddr>,
        origin: Option<&str>,
    ) -> ApiResponse {
        let mut response = if *method == Method::Options {
            let mut preflight = ApiResponse::raw(204, "text/plain", Vec::new());
            preflight.preflight = true;
            preflight
        } else if *method != Method::Get && *method != Method::Head {
            ApiResponse::text(405, "Method Not Allowed")
        } else {
            self.dispatch(route(url), client.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)))
        };
        response.allow_origin = allow_origin(&self.config.cors_origins, origin);
        response
    }

    fn dispatch(&self, route: Route<'_>, client: IpAddr) -> ApiResponse {
        if let Some(limiter) = self.limiter_for(&route) {
            if !limiter.check(client, Instant::now()) {
                RATE_LIMITED.inc();
                warn!(client = %client, ?route, "Rate limit exceeded");
                let message = format!("Rate limit exceeded: {} per 1 minute", limiter.limit());
                return ApiResponse::json(429, &serde_json::json!({ "error": message }));
            }
        }

        match route {
            Route::Health => ApiResponse::json(200, &HealthReply::healthy(&self.config.version)),
            Route::Status => self.status(),
            Route::Metrics => match metrics::encode() {
                Ok(body) => ApiResponse::raw(200, "text/plain; version=0.0.4", body),
                Err(e) => {
                    warn!("Failed to encode metrics: {}", e);
                    ApiResponse::text(500, "Internal Server Error")
                }
            },
            Route::Command { action, raw_id } => self.command(action, raw_id),
            Route::Index => self.static_file("index.html"),
            Route::Static(rel) => self.static_file(rel),
            Route::NotFound => {
                ApiResponse::json(404, &serde_json::json!({ "detail": "Not Found" }))
            }
        }
    }

    fn limiter_for(&self, route: &Route<'_>) -> Option<&RateLimiter> {
        match route {
            Route::Health => Some(&self.limiters.health),
            Route::Status => Some(&self.limiters.status),
            Route::Command {
                action: MachineAction::Maintenance,
                ..
            } => Some(&self.limiters.maintenance),
            Route::Command { .. } => Some(&self.limiters.start_stop),
            _ => None,
        }
    }

    fn status(&self) -> ApiResponse {
        let body = self
            .status_cache
            .get_or_fill(Instant::now(), || serde_json::to_vec(&self.fleet.snapshot()));
        match body {
            Ok(body) => ApiResponse::raw(200, "application/json", body),
            Err(e) => {
                error!(error = %e, "Failed to serialize fleet snapshot");
                ApiResponse::text(500, "Internal Server Error")
            }
        }
    }

    fn command(&self, action: MachineAction, raw_id: &str) -> ApiResponse {
        let machine_id = match raw_id.parse::<i64>() {
            Ok(id) => id,
            Err(_) => {
                let detail = serde_json::json!({
                    "detail": [{
                        "loc": ["path", "machine_id"],
                        "msg": "value is not a valid integer",
                        "type": "type_error.integer",
                    }]
                });
                return ApiResponse::json(422, &detail);
            }
        };

        let (reply, _) =
            apply_command(&self.fleet, self.events.as_ref(), machine_id, action, "http");
        ApiResponse::json(200, &reply)
    }

    fn static_file(&self, rel: &str) -> ApiResponse {
        let Some(path) = resolve_static(&self.config.static_dir, rel) else {
            return ApiResponse::json(404, &serde_json::json!({ "detail": "Not Found" }));
        };
        match std::fs::read(&path) {
            Ok(body) => ApiResponse::raw(200, content_type_for(&path), body),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Static file unavailable");
                ApiResponse::json(404, &serde_json::json!({ "detail": "Not Found" }))
            }
        }
    }
}

/// Dispatch one control command and report it to metrics, logs and the
/// event sink. Shared by the HTTP endpoints and the streaming feed.
///
/// Alongside the reply, returns the status the command left the machine in,
/// taken under the same lock as the command itself.
pub fn apply_command(
    fleet: &SharedFleet,
    events: &dyn EventSink,
    machine_id: i64,
    action: MachineAction,
    source: &'static str,
) -> (CommandReply, Option<MachineStatus>) {
    let result = machine_index(machine_id).map(|index| fleet.command(index, action));
    match result {
        Some(Ok(outcome)) => {
            metrics::record_command(action, true);
            info!(
                machine_id = outcome.machine_id,
                action = %action,
                from = %outcome.previous_status,
                to = %outcome.status,
                source,
                "Command applied"
            );
            events.record(FleetEvent::CommandApplied {
                machine_id: outcome.machine_id,
                action,
                previous_status: outcome.previous_status,
                status: outcome.status,
                source,
            });
            (CommandReply::success(), Some(outcome.status))
        }
        Some(Err(_)) | None => {
            metrics::record_command(action, false);
            warn!(machine_id, action = %action, source, "Command for unknown machine");
            events.record(FleetEvent::CommandRejected {
                machine_id,
                action,
                source,
            });
            (CommandReply::invalid_machine(), None)
        }
    }
}

pub fn allow_origin(origins: &[String], origin: Option<&str>) -> Option<String> {
    if origins.iter().any(|o| o == "*") {
        return Some("*".to_string());
    }
    let origin = origin?;
    origins
        .iter()
        .any(|allowed| allowed == origin)
        .then(|| origin.to_string())
}

/// Map a request path under `/static/` to a file inside `root`. Anything
/// that could escape `root` is refused.
pub fn resolve_static(root: &Path, rel: &str) -> Option<PathBuf> {
    let rel = Path::new(rel);
    if rel.as_os_str().is_empty() {
        return None;
    }
    if !rel.components().all(|c| matches!(c, Component::Normal(_))) {
        return None;
    }
    Some(root.join(rel))
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("js") | Some("jsx") | Some("mjs") => "application/javascript",
        Some("css") => "text/css",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("ico") => "image/x-icon",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

pub struct ApiServer {
    pub local_addr: SocketAddr,
    pub handle: thread::JoinHandle<()>,
}

/// Bind the API server and start serving on a background thread until
/// `stop` is raised.
pub fn serve_api(
    fleet: SharedFleet,
    config: ApiConfig,
    events: Arc<dyn EventSink>,
    stop: Arc<AtomicBool>,
) -> Result<ApiServer, ServerError> {
    let server = Server::http(&config.bind_addr).map_err(|e| ServerError::Bind {
        addr: config.bind_addr.clone(),
        reason: e.to_string(),
    })?;
    let local_addr = server
        .server_addr()
        .to_ip()
        .ok_or_else(|| ServerError::NotIp(config.bind_addr.clone()))?;

    info!(addr = %local_addr, static_dir = %config.static_dir.display(), "API server listening");

    let state = ApiState::new(fleet, config, events);
    let handle = thread::spawn(move || {
        while !stop.load(Ordering::Relaxed) {
            match server.recv_timeout(Duration::from_millis(100)) {
                Ok(Some(request)) => respond(&state, request),
                Ok(None) => {}
                Err(e) => {
                    error!(error = %e, "API server receive failed");
                    break;
                }
            }
        }
        info!("API server stopped");
    });

    Ok(ApiServer { local_addr, handle })
}

fn respond(state: &ApiState, request: Request) {
    let origin = request
        .headers()
        .iter()
        .find(|h| h.field.equiv("Origin"))
        .map(|h| h.value.as_str().to_string());
    let client = request.remote_addr().map(|addr| addr.ip());

    let reply = state.handle(request.method(), request.url(), client, origin.as_deref());
    debug!(
        method = %request.method(),
        url = request.url(),
        status = reply.status,
        "Request served"
    );

    let mut response = Response::from_data(reply.body).with_status_code(reply.status);
    let mut headers = vec![("Content-Type", reply.content_type.to_string())];
    if let Some(allowed) = reply.allow_origin {
        if allowed != "*" {
            headers.push(("Access-Control-Allow-Credentials", "true".to_string()));
            headers.push(("Vary", "Origin".to_string()));
        }
        headers.push(("Access-Control-Allow-Origin", allowed));
        if reply.preflight {
            headers.push(("Access-Control-Allow-Methods", "GET, OPTIONS".to_string()));
            headers.push(("Access-Control-Allow-Headers", "*".to_string()));
        }
    }
    for (name, value) in headers {
        if let Ok(header) = Header::from_bytes(name.as_bytes(), value.as_bytes()) {
            response.add_header(header);
        }
    }

    if let Err(e) = request.respond(response) {
        debug!(error = %e, "Client went away before response was sent");
    }
}
