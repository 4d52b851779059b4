use clap::{Parser, Subcommand};
use log::LevelFilter;
use std::path::PathBuf;

const VERSION_INFO: &str = const_format::concatcp!(
    env!("CARGO_PKG_VERSION"), "\n",
    "HTTP:   rouille 3 (thread per request, loopback only)\n",
    "Client: reqwest (blocking)\n",
    "Target: ", std::env::consts::ARCH, "-", std::env::consts::OS
);

/// Loopback command server driving a simulated host.
///
/// Without a subcommand the server runs; with one, the command is sent to a
/// running server on the same port.
#[derive(Parser, Debug)]
#[command(author, version = VERSION_INFO, about, long_about = None)]
pub struct Args {
    /// Port to listen on / connect to (127.0.0.1 only). Overrides EDITOR_REMOTE_PORT
    #[arg(short = 'p', long = "port", value_name = "PORT", global = true)]
    pub port: Option<u16>,

    /// Number of log records kept for /errors. Overrides EDITOR_REMOTE_LOG_CAPACITY
    #[arg(long = "capacity", value_name = "N")]
    pub log_capacity: Option<usize>,

    /// Most verbose level kept for /errors (off, error, warn, info, debug, trace).
    /// Overrides EDITOR_REMOTE_CAPTURE_LEVEL
    #[arg(long = "capture", value_name = "LEVEL")]
    pub capture_level: Option<LevelFilter>,

    /// Log every request and endpoint registration at info level
    #[arg(short = 'd', long = "debug")]
    pub debug: bool,

    /// Host tick interval in milliseconds (how often queued work is pumped)
    #[arg(long = "tick", value_name = "MS", default_value_t = 16)]
    pub tick_ms: u64,

    /// Simulated compile duration after a refresh, in milliseconds
    #[arg(long = "compile-ms", value_name = "MS", default_value_t = 1500)]
    pub compile_ms: u64,

    /// Write logs to a file instead of stderr (default: editor-remote.log)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE")]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbosity: u8,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Client commands sent to a running server.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Check server health
    Health {
        /// Keep retrying for up to this many seconds until the server answers
        #[arg(long = "wait", value_name = "SEC")]
        wait: Option<u64>,
    },
    /// Refresh the asset database, or reimport the given paths
    Refresh {
        /// Force reimport
        #[arg(long)]
        force: bool,
        /// Asset paths to reimport (empty = full refresh)
        paths: Vec<String>,
    },
    /// Wait for script compilation to finish
    Compile {
        #[arg(long = "timeout", value_name = "SEC", default_value_t = 120)]
        timeout: i64,
    },
    /// Print captured log entries
    Errors {
        /// all, error, warning or log
        #[arg(long, default_value = "error")]
        level: String,
        #[arg(long, default_value_t = 50)]
        limit: usize,
        /// Read the host console instead of the capture buffer
        #[arg(long)]
        console: bool,
    },
    /// Clear captured log entries
    Clear {
        #[arg(long)]
        console: bool,
    },
    /// Build the player
    Build {
        /// Target platform (android, ios, windows, macos, linux, webgl)
        target: String,
        /// Output path
        output: String,
        /// Scenes to include
        #[arg(long = "scene", value_name = "SCENE", required = true)]
        scenes: Vec<String>,
        #[arg(long)]
        development: bool,
        /// Keep the existing output instead of deleting it first
        #[arg(long = "no-clean")]
        no_clean: bool,
    },
    /// Poll the log buffer and print new entries until interrupted
    Monitor {
        #[arg(long, default_value = "error")]
        level: String,
        #[arg(long = "interval", value_name = "SEC", default_value_t = 5)]
        interval: u64,
    },
}
