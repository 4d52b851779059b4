mod sim;

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{debug, info};
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use editor_remote::cli::{Args, Command};
use editor_remote::client::{BuildCommand, LogEntry, RemoteClient};
use editor_remote::core::{LogCapture, LogRingBuffer};
use editor_remote::server::{CommandResponse, MethodFilter, RemoteServer, RouteHandler};
use editor_remote::ServerConfig;

use sim::SimulatedHost;

#[derive(Serialize)]
struct SimStatus {
    target: String,
    compiling: bool,
}

fn init_logging(args: &Args, config: &ServerConfig, logs: &Arc<LogRingBuffer>) -> Result<()> {
    // 0 (default) = warn, 1 (-v) = info, 2 (-vv) = debug, 3+ (-vvv) = trace
    let default_level = match args.verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level));
    builder
        .filter_module("tiny_http", log::LevelFilter::Warn)
        .format_timestamp_millis();

    if let Some(log_path_opt) = &args.log_file {
        let log_path = log_path_opt
            .clone()
            .unwrap_or_else(|| PathBuf::from("editor-remote.log"));
        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file {}", log_path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    LogCapture::new(builder.build(), Arc::clone(logs))
        .with_level(config.capture_level)
        .install()
        .context("Failed to install logger")?;
    Ok(())
}

fn print_entry(entry: &LogEntry) {
    println!("[{}] {}: {}", entry.time, entry.kind, entry.message);
}

/// Send one command to a running server and print the outcome.
fn run_command(command: Command, port: u16) -> Result<()> {
    let client = RemoteClient::new(port)?;
    debug!("Sending {:?} to {}", command, client.base_url());

    match command {
        Command::Health { wait } => {
            let ready = wait.is_none_or(|secs| client.wait_for_server(Duration::from_secs(secs)));
            if !ready {
                bail!("Server at {} did not answer in time", client.base_url());
            }
            let health = client.health()?;
            println!("Server is healthy (compiling: {})", health.compiling);
        }
        Command::Refresh { force, paths } => {
            client.refresh(&paths, force)?;
            if paths.is_empty() {
                println!("Assets refreshed");
            } else {
                println!("Reimported {} asset(s)", paths.len());
            }
        }
        Command::Compile { timeout } => {
            println!("Waiting for compilation (timeout: {}s)...", timeout);
            client.await_compile(timeout)?;
            println!("Compilation complete");
        }
        Command::Errors { level, limit, console } => {
            let entries = client.errors(&level, limit, console)?;
            if entries.is_empty() {
                println!("No {} entries found", level);
            } else {
                println!("Found {} {} entries:", entries.len(), level);
                entries.iter().for_each(print_entry);
            }
        }
        Command::Clear { console } => {
            client.clear_errors(console)?;
            println!("Log cleared");
        }
        Command::Build { target, output, scenes, development, no_clean } => {
            println!("Building for {}...", target);
            let outcome = client.build(&BuildCommand {
                target,
                output_path: output,
                scenes,
                development,
                clean: !no_clean,
            })?;
            if !outcome.ok {
                bail!("Build {}: {}", outcome.result, outcome.output);
            }
            println!("Build complete: {}", outcome.output);
        }
        Command::Monitor { level, interval } => {
            println!("Monitoring {} logs every {}s (Ctrl+C to stop)", level, interval);
            let mut seen = HashSet::new();
            loop {
                match client.errors(&level, 100, false) {
                    Ok(entries) => entries
                        .iter()
                        .filter(|e| seen.insert(format!("{}_{}", e.time, e.message)))
                        .for_each(print_entry),
                    Err(e) => log::warn!("{:#}", e),
                }
                thread::sleep(Duration::from_secs(interval.max(1)));
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Priority: CLI → ENV → defaults
    let config = ServerConfig::from_env()?.with_overrides(
        args.port,
        args.log_capacity,
        args.capture_level,
        args.debug,
    );

    let logs = Arc::new(LogRingBuffer::with_capacity(config.log_capacity));
    init_logging(&args, &config, &logs)?;

    if let Some(command) = args.command.clone() {
        return run_command(command, config.port);
    }

    info!("editor-remote starting...");
    debug!("Command-line args: {:?}", args);
    debug!("Config: {:?}", config);

    let server = RemoteServer::with_logs(config, logs);
    server.register_endpoint(
        "/sim/status",
        MethodFilter::Get,
        RouteHandler::privileged(|_, host| {
            CommandResponse::json(
                200,
                &SimStatus {
                    target: host.active_build_target().to_string(),
                    compiling: host.is_compiling(),
                },
            )
        }),
    )?;
    let addr = server.start()?;
    println!("editor-remote listening on http://{}/", addr);
    info!("Custom endpoints: {:?}", server.custom_endpoints());

    // This thread is the privileged thread from here on.
    let mut host = SimulatedHost::new(Duration::from_millis(args.compile_ms));
    let tick = Duration::from_millis(args.tick_ms.max(1));
    loop {
        server.pump(&mut host);
        thread::sleep(tick);
    }
}
