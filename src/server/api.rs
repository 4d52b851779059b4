//! HTTP listener and request dispatch using rouille.
//!
//! # Purpose
//!
//! Owns the loopback listening socket, turns every rouille request into an
//! owned [`CommandRequest`], resolves it against the [`Router`] and either
//! answers on the request thread or hands the work to the [`WorkQueue`].
//!
//! # Key types
//!
//! - [`RemoteServer`] - lifecycle (start/stop/restart), routing, pump entry point
//! - [`ServerState`] - Uninitialized → Listening → Stopped
//!
//! # Thread safety
//!
//! - rouille runs each request on its own thread (no pool, unbounded)
//! - privileged work crosses threads only as a boxed `FnOnce` plus a one-shot reply slot
//! - the request thread blocks on the reply slot; the socket is never touched cross-thread
//! - all `RemoteServer` methods take `&self`, so one instance can be shared via `Arc`

use std::net::{Ipv4Addr, SocketAddr};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use super::ops::{self, Dispatch, HostStatus, PrivilegedJob};
use super::router::{CommandRequest, CommandResponse, MethodFilter, Route, RouteHandler, Router};
use crate::config::ServerConfig;
use crate::core::{LogRingBuffer, WorkQueue, response_slot};
use crate::error::{CommandError, Result};
use crate::host::Host;

/// How long `stop()` waits for the accept loop to wind down.
const STOP_TIMEOUT: Duration = Duration::from_millis(500);

/// Listener lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Uninitialized,
    Listening,
    Stopped,
}

struct Listener {
    addr: SocketAddr,
    handle: thread::JoinHandle<()>,
    stop_tx: mpsc::Sender<()>,
}

enum Lifecycle {
    Uninitialized,
    Listening(Listener),
    Stopped,
}

/// State shared with every request thread.
struct Shared {
    config: ServerConfig,
    router: Router,
    queue: WorkQueue,
    logs: Arc<LogRingBuffer>,
    status: HostStatus,
}

/// Loopback command server. One instance per host process.
pub struct RemoteServer {
    shared: Arc<Shared>,
    lifecycle: Mutex<Lifecycle>,
}

impl RemoteServer {
    /// Server with its own log buffer sized from `config.log_capacity`.
    pub fn new(config: ServerConfig) -> Self {
        let logs = Arc::new(LogRingBuffer::with_capacity(config.log_capacity));
        Self::with_logs(config, logs)
    }

    /// Server reading from an existing log buffer (e.g. one already fed by [`crate::core::LogCapture`]).
    pub fn with_logs(config: ServerConfig, logs: Arc<LogRingBuffer>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                router: Router::new(),
                queue: WorkQueue::new(),
                logs,
                status: HostStatus::default(),
            }),
            lifecycle: Mutex::new(Lifecycle::Uninitialized),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    pub fn logs(&self) -> &Arc<LogRingBuffer> {
        &self.shared.logs
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.shared.queue
    }

    pub fn state(&self) -> ServerState {
        match &*self.lifecycle.lock().unwrap_or_else(|e| e.into_inner()) {
            Lifecycle::Uninitialized => ServerState::Uninitialized,
            Lifecycle::Listening(_) => ServerState::Listening,
            Lifecycle::Stopped => ServerState::Stopped,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == ServerState::Listening
    }

    /// Bound address while listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.lifecycle.lock().unwrap_or_else(|e| e.into_inner()) {
            Lifecycle::Listening(listener) => Some(listener.addr),
            _ => None,
        }
    }

    /// Bind `127.0.0.1:port` and start accepting. No-op if already listening.
    ///
    /// On bind failure the error is logged, the state becomes `Stopped`, and
    /// nothing is retried.
    pub fn start(&self) -> Result<SocketAddr> {
        let mut lifecycle = self.lifecycle.lock().unwrap_or_else(|e| e.into_inner());
        if let Lifecycle::Listening(listener) = &*lifecycle {
            return Ok(listener.addr);
        }

        let port = self.shared.config.port;
        let shared = Arc::clone(&self.shared);
        let server = match rouille::Server::new((Ipv4Addr::LOCALHOST, port), move |request| {
            shared.handle(request)
        }) {
            Ok(server) => server,
            Err(e) => {
                log::error!("[Remote] Failed to start on 127.0.0.1:{}: {}", port, e);
                *lifecycle = Lifecycle::Stopped;
                return Err(CommandError::Transport(std::io::Error::other(e)));
            }
        };

        let addr = server.server_addr();
        let (handle, stop_tx) = server.stoppable();
        *lifecycle = Lifecycle::Listening(Listener { addr, handle, stop_tx });
        log::info!("[Remote] Listening on http://{}/", addr);
        Ok(addr)
    }

    /// Release the socket and join the accept loop (bounded wait). Idempotent.
    pub fn stop(&self) {
        let previous = {
            let mut lifecycle = self.lifecycle.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *lifecycle, Lifecycle::Stopped)
        };
        let Lifecycle::Listening(listener) = previous else {
            return;
        };

        // The loop may already be gone; nothing to signal then.
        let _ = listener.stop_tx.send(());
        let deadline = Instant::now() + STOP_TIMEOUT;
        while !listener.handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        if listener.handle.is_finished() {
            if listener.handle.join().is_err() {
                log::warn!("[Remote] Accept loop panicked during shutdown");
            }
        } else {
            log::warn!("[Remote] Accept loop did not stop within {:?}; detaching", STOP_TIMEOUT);
        }
        log::info!("[Remote] Stopped");
    }

    pub fn restart(&self) -> Result<SocketAddr> {
        self.stop();
        self.start()
    }

    /// Drain the work queue on the privileged thread. Call once per host tick.
    ///
    /// Also refreshes the host status snapshot served by `/health`.
    pub fn pump(&self, host: &mut dyn Host) -> usize {
        self.shared.status.set_compiling(host.is_compiling());
        let executed = self.shared.queue.pump(host);
        if executed > 0 {
            self.shared.status.set_compiling(host.is_compiling());
        }
        executed
    }

    /// Register a custom prefix endpoint. Returns `true` when it replaced an existing one.
    pub fn register_endpoint(&self, prefix: &str, method: MethodFilter, handler: RouteHandler) -> Result<bool> {
        let runs_on = if handler.is_privileged() { "privileged" } else { "request" };
        let replaced = self.shared.router.register(prefix, method, handler)?;
        if replaced {
            log::warn!("[Remote] Replaced custom endpoint: {} ({:?}, {} thread)", prefix, method, runs_on);
        } else if self.shared.config.debug_logging {
            log::info!("[Remote] Registered custom endpoint: {} ({:?}, {} thread)", prefix, method, runs_on);
        }
        Ok(replaced)
    }

    /// Custom endpoint prefixes in match order.
    pub fn custom_endpoints(&self) -> Vec<String> {
        self.shared.router.custom_prefixes()
    }

    pub fn unregister_endpoint(&self, prefix: &str) -> bool {
        self.shared.router.unregister(prefix)
    }

    /// Answer one rouille request. Blocks until privileged work completes.
    pub fn handle(&self, request: &rouille::Request) -> rouille::Response {
        self.shared.handle(request)
    }

    /// Answer one already-read request. Blocks until privileged work completes.
    pub fn dispatch(&self, request: CommandRequest) -> CommandResponse {
        self.shared.dispatch(request)
    }
}

impl Drop for RemoteServer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    fn handle(&self, request: &rouille::Request) -> rouille::Response {
        let response = match CommandRequest::from_http(request, self.config.max_body_bytes) {
            Ok(command) => self.dispatch(command),
            Err(e) => {
                log::warn!("[Remote] {} {}: {}", request.method(), request.url(), e);
                e.to_response()
            }
        };
        response.into_http()
    }

    fn dispatch(&self, request: CommandRequest) -> CommandResponse {
        let label = request.label();
        if self.config.debug_logging {
            log::info!("[Remote] {}", label);
        } else {
            log::debug!("[Remote] {}", label);
        }

        let job: PrivilegedJob = match self.router.resolve(request.method(), request.path()) {
            Route::NotFound => return CommandResponse::not_found(),
            Route::Builtin(builtin) => {
                match guard(&label, || ops::dispatch(builtin, request, &self.logs, &self.status)) {
                    Ok(Dispatch::Immediate(response)) => return response,
                    Ok(Dispatch::Privileged(job)) => job,
                    Err(response) => return response,
                }
            }
            Route::Custom { handler: RouteHandler::Immediate(f), .. } => {
                return guard(&label, || f(&request)).unwrap_or_else(|r| r);
            }
            Route::Custom { handler: RouteHandler::Privileged(f), .. } => {
                Box::new(move |host: &mut dyn Host| f(&request, host))
            }
        };

        self.run_privileged(label, job)
    }

    /// Queue `job` for the pump and wait for its single response.
    fn run_privileged(&self, label: String, job: PrivilegedJob) -> CommandResponse {
        let (responder, slot) = response_slot();
        let queued_at = Instant::now();
        self.queue.submit(label.clone(), move |host| responder.respond(job(host)));

        match slot.wait() {
            Some(response) => {
                log::debug!("[Remote] {} -> {} in {:?}", label, response.status(), queued_at.elapsed());
                response
            }
            None => CommandError::Internal(format!("{} failed on the privileged thread", label)).to_response(),
        }
    }
}

/// Run a request-thread handler, turning a panic into a JSON 500.
fn guard<T>(label: &str, f: impl FnOnce() -> T) -> std::result::Result<T, CommandResponse> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|_| {
        log::error!("[Remote] Handler for {} panicked", label);
        CommandError::Internal(format!("handler for {} panicked", label)).to_response()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{LogRecord, Severity};
    use crate::host::{BuildOptions, BuildReport, BuildResult, BuildTarget, ImportMode};
    use serde_json::Value;
    use std::io::Read;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Records collaborator calls so tests can assert on them from outside the pump thread.
    #[derive(Default)]
    struct Calls {
        refreshes: AtomicUsize,
        builds: AtomicUsize,
    }

    struct MockHost {
        calls: Arc<Calls>,
        compiling: bool,
    }

    impl Host for MockHost {
        fn is_compiling(&self) -> bool {
            self.compiling
        }
        fn import_asset(&mut self, _path: &str, _mode: ImportMode) -> anyhow::Result<()> {
            Ok(())
        }
        fn refresh_assets(&mut self, _mode: ImportMode) -> anyhow::Result<()> {
            self.calls.refreshes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn active_build_target(&self) -> BuildTarget {
            BuildTarget::Android
        }
        fn switch_build_target(&mut self, _target: BuildTarget) -> anyhow::Result<()> {
            Ok(())
        }
        fn build_player(&mut self, _options: &BuildOptions) -> anyhow::Result<BuildReport> {
            self.calls.builds.fetch_add(1, Ordering::SeqCst);
            Ok(BuildReport::new(BuildResult::Succeeded))
        }
    }

    /// Host thread pumping the server every few milliseconds until dropped.
    struct HostLoop {
        running: Arc<AtomicBool>,
        handle: Option<thread::JoinHandle<()>>,
    }

    impl HostLoop {
        fn spawn(server: Arc<RemoteServer>, calls: Arc<Calls>, compiling: bool) -> Self {
            let running = Arc::new(AtomicBool::new(true));
            let flag = Arc::clone(&running);
            let handle = thread::spawn(move || {
                let mut host = MockHost { calls, compiling };
                while flag.load(Ordering::SeqCst) {
                    server.pump(&mut host);
                    thread::sleep(Duration::from_millis(2));
                }
            });
            Self { running, handle: Some(handle) }
        }
    }

    impl Drop for HostLoop {
        fn drop(&mut self) {
            self.running.store(false, Ordering::SeqCst);
            if let Some(handle) = self.handle.take() {
                handle.join().unwrap();
            }
        }
    }

    fn test_server() -> Arc<RemoteServer> {
        Arc::new(RemoteServer::new(ServerConfig { port: 0, ..Default::default() }))
    }

    fn call(server: &RemoteServer, method: &str, url: &str, body: &str) -> (u16, Value) {
        let request = rouille::Request::fake_http(method, url, vec![], body.as_bytes().to_vec());
        let response = server.handle(&request);
        let status = response.status_code;
        let (mut reader, _) = response.data.into_reader_and_size();
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn test_health_is_immediate() {
        let server = test_server();
        // No pump running: immediate routes must still answer
        let (status, body) = call(&server, "GET", "/health", "");
        assert_eq!(status, 200);
        assert_eq!(body, serde_json::json!({"ok": true, "compiling": false}));
    }

    #[test]
    fn test_unknown_route_404() {
        let server = test_server();
        let (status, body) = call(&server, "GET", "/does/not/exist", "");
        assert_eq!(status, 404);
        assert_eq!(body, serde_json::json!({"error": "not found"}));
    }

    /// Test: Privileged route waits for the pump and gets its response
    #[test]
    fn test_refresh_runs_on_pump() {
        let server = test_server();
        let calls = Arc::new(Calls::default());
        let _host = HostLoop::spawn(Arc::clone(&server), Arc::clone(&calls), false);

        let (status, body) = call(&server, "POST", "/refresh", "{}");
        assert_eq!(status, 200);
        assert_eq!(body, serde_json::json!({"ok": true}));
        assert_eq!(calls.refreshes.load(Ordering::SeqCst), 1);
    }

    /// Test: Health reflects the compiling flag captured by the pump
    #[test]
    fn test_health_reflects_pumped_status() {
        let server = test_server();
        let calls = Arc::new(Calls::default());
        let host = HostLoop::spawn(Arc::clone(&server), calls, true);

        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let (_, body) = call(&server, "GET", "/health", "");
            if body["compiling"] == true {
                break;
            }
            assert!(Instant::now() < deadline, "compiling flag never published");
            thread::sleep(Duration::from_millis(5));
        }
        drop(host);
    }

    #[test]
    fn test_build_missing_scenes_never_calls_collaborator() {
        let server = test_server();
        let calls = Arc::new(Calls::default());
        let _host = HostLoop::spawn(Arc::clone(&server), Arc::clone(&calls), false);

        let (status, body) = call(
            &server,
            "POST",
            "/build",
            r#"{"target":"Android","outputPath":"out/app.apk"}"#,
        );
        assert_eq!(status, 400);
        assert!(body["error"].as_str().unwrap().contains("scenes"));
        assert_eq!(calls.builds.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_errors_and_clear_use_ring_buffer() {
        let server = test_server();
        server.logs().append(LogRecord::new(Severity::Error, "boom", "trace"));
        server.logs().append(LogRecord::new(Severity::Log, "fine", ""));

        let (status, body) = call(&server, "GET", "/errors", "");
        assert_eq!(status, 200);
        let entries = body.as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["message"], "boom");
        assert_eq!(entries[0]["stack"], "trace");
        assert_eq!(entries[0]["type"], "Error");

        let (_, body) = call(&server, "GET", "/errors?level=all&limit=10", "");
        assert_eq!(body.as_array().unwrap().len(), 2);

        let (status, body) = call(&server, "POST", "/errors/clear", "");
        assert_eq!(status, 200);
        assert_eq!(body, serde_json::json!({"ok": true}));
        assert!(server.logs().is_empty());
    }

    #[test]
    fn test_console_source_without_capability() {
        let server = test_server();
        let _host = HostLoop::spawn(Arc::clone(&server), Arc::new(Calls::default()), false);
        let (status, body) = call(&server, "GET", "/errors?source=console", "");
        assert_eq!(status, 501);
        assert_eq!(body["error"], "console inspector unavailable");
    }

    /// Test: Custom privileged and immediate endpoints
    #[test]
    fn test_custom_endpoints() {
        let server = test_server();
        let _host = HostLoop::spawn(Arc::clone(&server), Arc::new(Calls::default()), true);

        server
            .register_endpoint(
                "/echo",
                MethodFilter::Any,
                RouteHandler::immediate(|req| CommandResponse::json(200, &req.path())),
            )
            .unwrap();
        server
            .register_endpoint(
                "/compiling",
                MethodFilter::Get,
                RouteHandler::privileged(|_, host| CommandResponse::json(200, &host.is_compiling())),
            )
            .unwrap();

        assert_eq!(call(&server, "GET", "/echo/a/b", ""), (200, Value::from("/echo/a/b")));
        assert_eq!(call(&server, "GET", "/compiling", ""), (200, Value::from(true)));

        assert_eq!(server.custom_endpoints(), vec!["/echo", "/compiling"]);
        assert!(server.unregister_endpoint("/echo"));
        assert_eq!(call(&server, "GET", "/echo", "").0, 404);
        assert_eq!(server.custom_endpoints(), vec!["/compiling"]);
    }

    /// Test: A panicking privileged handler degrades to a JSON 500
    #[test]
    fn test_privileged_panic_becomes_500() {
        let server = test_server();
        let _host = HostLoop::spawn(Arc::clone(&server), Arc::new(Calls::default()), false);

        server
            .register_endpoint(
                "/explode",
                MethodFilter::Post,
                RouteHandler::privileged(|_, _| panic!("kaboom")),
            )
            .unwrap();

        let (status, body) = call(&server, "POST", "/explode", "");
        assert_eq!(status, 500);
        assert!(body["error"].as_str().unwrap().contains("/explode"));

        // Pump survived
        let (status, _) = call(&server, "POST", "/refresh", "");
        assert_eq!(status, 200);
    }

    #[test]
    fn test_immediate_panic_becomes_500() {
        let server = test_server();
        server
            .register_endpoint("/bad", MethodFilter::Any, RouteHandler::immediate(|_| panic!("nope")))
            .unwrap();
        let (status, body) = call(&server, "GET", "/bad", "");
        assert_eq!(status, 500);
        assert!(body["error"].is_string());
    }

    #[test]
    fn test_register_replaces_duplicate() {
        let server = test_server();
        let handler = || RouteHandler::immediate(|_| CommandResponse::ok());
        assert!(!server.register_endpoint("/x", MethodFilter::Any, handler()).unwrap());
        assert!(server.register_endpoint("/x", MethodFilter::Any, handler()).unwrap());
        assert!(server.register_endpoint("", MethodFilter::Any, handler()).is_err());
    }

    /// Test: Lifecycle transitions and idempotence
    #[test]
    fn test_start_stop_lifecycle() {
        let server = test_server();
        assert_eq!(server.state(), ServerState::Uninitialized);
        assert!(server.local_addr().is_none());

        let addr = server.start().unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
        assert!(server.is_running());
        assert_eq!(server.start().unwrap(), addr);

        server.stop();
        assert_eq!(server.state(), ServerState::Stopped);
        server.stop();
        assert_eq!(server.state(), ServerState::Stopped);

        server.restart().unwrap();
        assert!(server.is_running());
        server.stop();
    }

    /// Test: Binding a port that is already taken leaves the server stopped
    #[test]
    fn test_bind_failure_leaves_stopped() {
        let first = test_server();
        let addr = first.start().unwrap();

        let second = RemoteServer::new(ServerConfig { port: addr.port(), ..Default::default() });
        assert!(second.start().is_err());
        assert_eq!(second.state(), ServerState::Stopped);
        first.stop();
    }
}
