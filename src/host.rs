//! Interfaces to the host application's privileged operations.
//!
//! The server never implements asset import, compilation or platform builds
//! itself. It calls into a [`Host`] that only ever runs on the privileged
//! thread: every method here is invoked from [`crate::core::WorkQueue::pump`].

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

use crate::core::LogRecord;

/// How assets are (re)imported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImportMode {
    #[default]
    Default,
    /// Reimport even if the asset looks unchanged
    ForceUpdate,
}

impl ImportMode {
    pub fn from_force(force: bool) -> Self {
        if force { ImportMode::ForceUpdate } else { ImportMode::Default }
    }
}

/// Platforms the build endpoint accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BuildTarget {
    Android,
    #[serde(rename = "iOS")]
    Ios,
    StandaloneWindows64,
    StandaloneOSX,
    StandaloneLinux64,
    WebGL,
}

impl BuildTarget {
    /// Parse a request's `target` field. Case-insensitive; `None` for unknown names.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "android" => Some(BuildTarget::Android),
            "ios" => Some(BuildTarget::Ios),
            "windows" | "win64" | "standalonewindows64" => Some(BuildTarget::StandaloneWindows64),
            "macos" | "osx" | "standaloneosx" => Some(BuildTarget::StandaloneOSX),
            "linux" | "linux64" | "standalonelinux64" => Some(BuildTarget::StandaloneLinux64),
            "webgl" => Some(BuildTarget::WebGL),
            _ => None,
        }
    }
}

impl fmt::Display for BuildTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildTarget::Android => "Android",
            BuildTarget::Ios => "iOS",
            BuildTarget::StandaloneWindows64 => "StandaloneWindows64",
            BuildTarget::StandaloneOSX => "StandaloneOSX",
            BuildTarget::StandaloneLinux64 => "StandaloneLinux64",
            BuildTarget::WebGL => "WebGL",
        };
        f.write_str(name)
    }
}

/// Immutable options bundle handed to the build collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    pub scenes: Vec<String>,
    pub target: BuildTarget,
    pub location: PathBuf,
    pub development: bool,
}

/// Outcome code reported by the build collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BuildResult {
    Unknown,
    Succeeded,
    Failed,
    Cancelled,
}

impl fmt::Display for BuildResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildResult::Unknown => "Unknown",
            BuildResult::Succeeded => "Succeeded",
            BuildResult::Failed => "Failed",
            BuildResult::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub result: BuildResult,
}

impl BuildReport {
    pub fn new(result: BuildResult) -> Self {
        Self { result }
    }

    pub fn succeeded(&self) -> bool {
        self.result == BuildResult::Succeeded
    }
}

/// Host-internal console, reached through unstable introspection.
///
/// Optional: hosts that cannot expose it return `None` from [`Host::console`].
pub trait ConsoleInspector {
    /// All entries currently shown in the host console, oldest first.
    fn entries(&mut self) -> anyhow::Result<Vec<LogRecord>>;
    fn clear(&mut self) -> anyhow::Result<()>;
}

/// Privileged host state and operations.
///
/// Implementations are owned by the host's main thread and passed to
/// [`crate::server::RemoteServer::pump`] on every tick. They do not need to be `Send`.
pub trait Host {
    /// Whether script compilation is in progress.
    fn is_compiling(&self) -> bool;

    fn import_asset(&mut self, path: &str, mode: ImportMode) -> anyhow::Result<()>;

    /// Full asset database refresh.
    fn refresh_assets(&mut self, mode: ImportMode) -> anyhow::Result<()>;

    fn active_build_target(&self) -> BuildTarget;

    fn switch_build_target(&mut self, target: BuildTarget) -> anyhow::Result<()>;

    /// Run one player build. Success is judged only by the returned report's result.
    fn build_player(&mut self, options: &BuildOptions) -> anyhow::Result<BuildReport>;

    fn console(&mut self) -> Option<&mut dyn ConsoleInspector> {
        None
    }
}
