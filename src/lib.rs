//! editor-remote - loopback command server for a host with a single privileged thread
//!
//! Re-exports all modules for use by the binary target and embedding hosts.

// Core engine (log store, log capture, work queue)
pub mod core;

// App modules
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod host;
pub mod server;

// Re-export commonly used types
pub use client::RemoteClient;
pub use config::ServerConfig;
pub use self::core::{LogCapture, LogFilter, LogRecord, LogRingBuffer, Severity, WorkQueue};
pub use error::CommandError;
pub use host::{BuildOptions, BuildReport, BuildResult, BuildTarget, ConsoleInspector, Host, ImportMode};
pub use server::{CommandRequest, CommandResponse, MethodFilter, RemoteServer, RouteHandler, ServerState};
