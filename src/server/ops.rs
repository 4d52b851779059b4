//! Built-in endpoint adapters.
//!
//! Each adapter decodes one request into a typed struct, validates it, makes
//! one call into the [`Host`] collaborator and encodes one typed response.
//! Adapters that touch host state are returned as [`Dispatch::Privileged`]
//! jobs; the rest answer on the request thread.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use super::router::{Builtin, CommandRequest, CommandResponse};
use crate::core::{LogFilter, LogRingBuffer};
use crate::error::{CommandError, Result};
use crate::host::{BuildOptions, BuildTarget, Host, ImportMode};

/// Interval between `is_compiling` polls in `/awaitCompile`.
pub const COMPILE_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub const DEFAULT_COMPILE_TIMEOUT_SEC: i64 = 60;
pub const DEFAULT_ERRORS_LIMIT: usize = 200;
pub const MAX_ERRORS_LIMIT: usize = 1000;

/// Work for the privileged thread, producing the response.
pub type PrivilegedJob = Box<dyn FnOnce(&mut dyn Host) -> CommandResponse + Send + 'static>;

/// Where a request is answered.
pub enum Dispatch {
    Immediate(CommandResponse),
    Privileged(PrivilegedJob),
}

impl Dispatch {
    fn privileged<F>(f: F) -> Self
    where
        F: FnOnce(&mut dyn Host) -> Result<CommandResponse> + Send + 'static,
    {
        Dispatch::Privileged(Box::new(move |host| respond(f(host))))
    }
}

/// Collapse a handler result into exactly one response.
pub fn respond(result: Result<CommandResponse>) -> CommandResponse {
    result.unwrap_or_else(|e| {
        if e.status() >= 500 {
            log::error!("Command failed: {}", e);
        } else {
            log::debug!("Command rejected ({}): {}", e.status(), e);
        }
        e.to_response()
    })
}

/// Host state mirrored for request threads, refreshed by the pump every tick.
#[derive(Debug, Default)]
pub struct HostStatus {
    compiling: AtomicBool,
}

impl HostStatus {
    pub fn set_compiling(&self, compiling: bool) {
        self.compiling.store(compiling, Ordering::Relaxed);
    }

    pub fn is_compiling(&self) -> bool {
        self.compiling.load(Ordering::Relaxed)
    }
}

/// Route a built-in endpoint to its adapter.
pub fn dispatch(builtin: Builtin, request: CommandRequest, logs: &LogRingBuffer, status: &HostStatus) -> Dispatch {
    match builtin {
        Builtin::Health => Dispatch::Immediate(health(status)),
        Builtin::Refresh => Dispatch::privileged(move |host| refresh(&request, host)),
        Builtin::AwaitCompile => Dispatch::privileged(move |host| await_compile(&request, host)),
        Builtin::Build => Dispatch::privileged(move |host| build(&request, host)),
        Builtin::Errors => match ErrorsParams::from_request(&request) {
            Err(e) => Dispatch::Immediate(e.to_response()),
            Ok(params) => match params.source {
                LogSource::Buffer => Dispatch::Immediate(errors(&params, logs)),
                LogSource::Console => Dispatch::privileged(move |host| console_errors(&params, host)),
            },
        },
        Builtin::ClearErrors => match LogSource::from_request(&request) {
            Err(e) => Dispatch::Immediate(e.to_response()),
            Ok(LogSource::Buffer) => {
                logs.clear();
                Dispatch::Immediate(CommandResponse::ok())
            }
            Ok(LogSource::Console) => Dispatch::privileged(console_clear),
        },
    }
}

// ========== Health ==========

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    compiling: bool,
}

pub fn health(status: &HostStatus) -> CommandResponse {
    CommandResponse::json(
        200,
        &HealthResponse {
            ok: true,
            compiling: status.is_compiling(),
        },
    )
}

// ========== Refresh ==========

#[derive(Debug, Default, Deserialize)]
struct RefreshRequest {
    #[serde(default)]
    reimport: Option<Vec<String>>,
    #[serde(default)]
    force: bool,
}

pub fn refresh(request: &CommandRequest, host: &mut dyn Host) -> Result<CommandResponse> {
    let req: RefreshRequest = request.body_json()?;
    let mode = ImportMode::from_force(req.force);

    match req.reimport.filter(|paths| !paths.is_empty()) {
        Some(paths) => {
            log::info!("Reimporting {} asset(s) (force={})", paths.len(), req.force);
            for path in &paths {
                host.import_asset(path, mode)
                    .map_err(|e| CommandError::collaborator(e.context(format!("reimport {}", path))))?;
            }
        }
        None => {
            log::info!("Refreshing asset database (force={})", req.force);
            host.refresh_assets(mode).map_err(CommandError::collaborator)?;
        }
    }
    Ok(CommandResponse::ok())
}

// ========== AwaitCompile ==========

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AwaitCompileRequest {
    #[serde(default = "default_compile_timeout")]
    timeout_sec: i64,
}

fn default_compile_timeout() -> i64 {
    DEFAULT_COMPILE_TIMEOUT_SEC
}

/// Block the privileged thread until compilation ends or the deadline passes.
pub fn await_compile(request: &CommandRequest, host: &mut dyn Host) -> Result<CommandResponse> {
    let req: AwaitCompileRequest = request.body_json()?;
    let seconds = req.timeout_sec.max(1) as u64;
    // Past Instant's range means no deadline at all.
    let deadline = Instant::now().checked_add(Duration::from_secs(seconds));

    while host.is_compiling() && deadline.is_none_or(|d| Instant::now() < d) {
        thread::sleep(COMPILE_POLL_INTERVAL);
    }

    if host.is_compiling() {
        log::warn!("Compilation still running after {}s", seconds);
        return Err(CommandError::Timeout { seconds });
    }
    Ok(CommandResponse::ok())
}

// ========== Build ==========

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildRequest {
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    output_path: Option<String>,
    #[serde(default)]
    scenes: Vec<String>,
    #[serde(default)]
    development: bool,
    #[serde(default = "default_clean")]
    clean: bool,
}

fn default_clean() -> bool {
    true
}

#[derive(Serialize)]
struct BuildResponse {
    ok: bool,
    result: String,
    output: String,
}

/// Build state machine. Terminal phases map one-to-one onto responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuildPhase {
    Validating,
    SwitchingTarget,
    Building,
    Rejected,
    Succeeded,
    Failed,
}

struct ValidBuild {
    target: BuildTarget,
    output: String,
    scenes: Vec<String>,
    development: bool,
    clean: bool,
}

impl BuildRequest {
    fn validate(self) -> Result<ValidBuild> {
        let target = self.target.filter(|t| !t.trim().is_empty());
        let output = self.output_path.filter(|p| !p.trim().is_empty());
        let (Some(target), Some(output)) = (target, output) else {
            return Err(CommandError::validation("missing fields: target/outputPath/scenes"));
        };
        if self.scenes.is_empty() {
            return Err(CommandError::validation("missing fields: target/outputPath/scenes"));
        }
        let target = BuildTarget::parse(&target)
            .ok_or_else(|| CommandError::validation("unsupported target"))?;

        Ok(ValidBuild {
            target,
            output,
            scenes: self.scenes,
            development: self.development,
            clean: self.clean,
        })
    }
}

fn enter(phase: BuildPhase) {
    log::debug!("Build phase: {:?}", phase);
}

pub fn build(request: &CommandRequest, host: &mut dyn Host) -> Result<CommandResponse> {
    enter(BuildPhase::Validating);
    let req = request
        .body_json::<BuildRequest>()
        .and_then(BuildRequest::validate)
        .inspect_err(|_| enter(BuildPhase::Rejected))?;

    let output = PathBuf::from(&req.output);
    if req.clean && output.is_dir() {
        // Best effort: a stale directory that cannot be removed does not block the build.
        if let Err(e) = fs::remove_dir_all(&output) {
            log::warn!("Clean build: failed to remove {}: {}", output.display(), e);
        }
    }
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| {
            enter(BuildPhase::Failed);
            CommandError::Internal(format!("failed to create {}: {}", parent.display(), e))
        })?;
    }

    if host.active_build_target() != req.target {
        enter(BuildPhase::SwitchingTarget);
        log::info!("Switching build target to {}", req.target);
        host.switch_build_target(req.target).map_err(|e| {
            enter(BuildPhase::Failed);
            CommandError::StateConflict(format!("failed to switch build target: {:#}", e))
        })?;
    }

    enter(BuildPhase::Building);
    let options = BuildOptions {
        scenes: req.scenes,
        target: req.target,
        location: output,
        development: req.development,
    };
    log::info!(
        "Building {} ({} scene(s), development={}) -> {}",
        options.target,
        options.scenes.len(),
        options.development,
        req.output
    );
    let report = host.build_player(&options).map_err(|e| {
        enter(BuildPhase::Failed);
        CommandError::collaborator(e)
    })?;

    let ok = report.succeeded();
    enter(if ok { BuildPhase::Succeeded } else { BuildPhase::Failed });
    log::info!("Build finished: {}", report.result);

    Ok(CommandResponse::json(
        if ok { 200 } else { 500 },
        &BuildResponse {
            ok,
            result: report.result.to_string(),
            output: req.output,
        },
    ))
}

// ========== Errors ==========

/// Which log store `/errors` reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogSource {
    /// Ring buffer fed by the log capture (default, lock-protected, immediate)
    #[default]
    Buffer,
    /// Host console via [`crate::host::ConsoleInspector`] (privileged, optional)
    Console,
}

#[derive(Debug, Default)]
struct ErrorsQuery {
    level: Option<String>,
    limit: Option<String>,
    source: Option<String>,
}

impl ErrorsQuery {
    /// Repeated keys keep the last value; unknown keys are ignored.
    fn from_request(request: &CommandRequest) -> Result<Self> {
        let pairs: Vec<(String, String)> = request.query_as()?;
        let mut query = Self::default();
        for (key, value) in pairs {
            match key.as_str() {
                "level" => query.level = Some(value),
                "limit" => query.limit = Some(value),
                "source" => query.source = Some(value),
                _ => {}
            }
        }
        Ok(query)
    }
}

impl LogSource {
    fn parse(source: Option<&str>) -> Result<Self> {
        match source.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            None | Some("") | Some("buffer") => Ok(LogSource::Buffer),
            Some("console") => Ok(LogSource::Console),
            Some(other) => Err(CommandError::validation(format!("unknown log source: {}", other))),
        }
    }

    fn from_request(request: &CommandRequest) -> Result<Self> {
        let query = ErrorsQuery::from_request(request)?;
        Self::parse(query.source.as_deref())
    }
}

/// Parsed `/errors` query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorsParams {
    pub filter: LogFilter,
    pub limit: usize,
    pub source: LogSource,
}

impl ErrorsParams {
    /// `level` defaults to `error`; `limit` defaults to 200 and is clamped to [1, 1000].
    /// Repeated keys keep the last value.
    pub fn from_request(request: &CommandRequest) -> Result<Self> {
        let query = ErrorsQuery::from_request(request)?;
        let filter = LogFilter::parse(Some(query.level.as_deref().unwrap_or("error")));
        let limit = query
            .limit
            .and_then(|l| l.trim().parse::<i64>().ok())
            .map(|l| l.clamp(1, MAX_ERRORS_LIMIT as i64) as usize)
            .unwrap_or(DEFAULT_ERRORS_LIMIT);
        let source = LogSource::parse(query.source.as_deref())?;
        Ok(Self { filter, limit, source })
    }
}

pub fn errors(params: &ErrorsParams, logs: &LogRingBuffer) -> CommandResponse {
    CommandResponse::json(200, &logs.query(params.filter, params.limit))
}

fn console_unavailable() -> CommandError {
    CommandError::Unsupported("console inspector unavailable".into())
}

pub fn console_errors(params: &ErrorsParams, host: &mut dyn Host) -> Result<CommandResponse> {
    let console = host.console().ok_or_else(console_unavailable)?;
    let entries = console.entries().map_err(CommandError::collaborator)?;
    Ok(CommandResponse::json(200, &params.filter.apply(entries, params.limit)))
}

pub fn console_clear(host: &mut dyn Host) -> Result<CommandResponse> {
    let console = host.console().ok_or_else(console_unavailable)?;
    console.clear().map_err(CommandError::collaborator)?;
    Ok(CommandResponse::ok())
}
