//! Loopback HTTP command server for remote control of the host.
//!
//! # Purpose
//!
//! Lets CI scripts and CLIs drive the host (asset refresh, compile wait,
//! platform builds, log inspection) over HTTP, while every host operation
//! still runs on the host's single privileged thread.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────┐    WorkQueue (crossbeam)    ┌──────────────────────┐
//! │  Request threads         │  ─── PendingAction ──────▶  │  Privileged thread   │
//! │  (rouille, 1 per req)    │                             │  (host tick)         │
//! │                          │                             │                      │
//! │  POST /build             │  ──▶ build(req, host) ───▶  │  server.pump(host)   │
//! │    waits on ResponseSlot │  ◀── Responder::respond ──  │                      │
//! └──────────────────────────┘                             └──────────────────────┘
//!          │
//!          │  Arc<LogRingBuffer>, HostStatus (read directly, no queueing)
//!          ▼
//!     GET /health, GET /errors
//! ```
//!
//! - **rouille** - sync HTTP server, one thread per request
//! - **WorkQueue** - boxed actions from request threads to the host thread
//! - **HostStatus** - snapshot of host flags refreshed by each pump
//!
//! # Endpoints
//!
//! | Method | Path            | Runs on     | Description                          |
//! |--------|-----------------|-------------|--------------------------------------|
//! | GET    | `/health`       | request     | `{ok, compiling}`                    |
//! | POST   | `/refresh`      | privileged  | Reimport paths or refresh everything |
//! | POST   | `/awaitCompile` | privileged  | Wait for compilation (408 on timeout)|
//! | GET    | `/errors`       | request*    | Filtered tail of captured logs       |
//! | POST   | `/errors/clear` | request*    | Clear captured logs                  |
//! | POST   | `/build`        | privileged  | Platform build                       |
//! | any    | custom prefix   | either      | Registered via `register_endpoint`   |
//!
//! \* `?source=console` reads the host console instead and runs privileged.

mod api;
mod ops;
mod router;

pub use api::{RemoteServer, ServerState};
pub use ops::{
    COMPILE_POLL_INTERVAL, DEFAULT_COMPILE_TIMEOUT_SEC, DEFAULT_ERRORS_LIMIT, ErrorsParams, HostStatus, LogSource,
    MAX_ERRORS_LIMIT,
};
pub use router::{
    Builtin, CommandRequest, CommandResponse, ImmediateFn, MethodFilter, PrivilegedFn, Route, RouteHandler, Router,
};
