//! Stand-in host used by the `editor-remote` binary.
//!
//! Lets the server run without a real editor: refreshes start a timed
//! "compilation", builds write a small manifest to the output path, and a
//! host console records what happened.

use anyhow::{Context, Result, bail};
use serde::Serialize;
use std::fs;
use std::time::{Duration, Instant};

use editor_remote::core::{LogRecord, Severity};
use editor_remote::host::{BuildOptions, BuildReport, BuildResult, BuildTarget, ConsoleInspector, Host, ImportMode};

#[derive(Default)]
pub struct SimConsole {
    entries: Vec<LogRecord>,
}

impl SimConsole {
    fn push(&mut self, severity: Severity, message: impl Into<String>) {
        self.entries.push(LogRecord::new(severity, message, ""));
    }
}

impl ConsoleInspector for SimConsole {
    fn entries(&mut self) -> Result<Vec<LogRecord>> {
        Ok(self.entries.clone())
    }

    fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }
}

#[derive(Serialize)]
struct BuildManifest<'a> {
    target: String,
    scenes: &'a [String],
    development: bool,
    built_at: String,
}

pub struct SimulatedHost {
    compile_time: Duration,
    compiling_until: Option<Instant>,
    target: BuildTarget,
    console: SimConsole,
}

impl SimulatedHost {
    pub fn new(compile_time: Duration) -> Self {
        Self {
            compile_time,
            compiling_until: None,
            target: BuildTarget::StandaloneLinux64,
            console: SimConsole::default(),
        }
    }

    fn start_compile(&mut self) {
        self.compiling_until = Some(Instant::now() + self.compile_time);
        log::info!("Simulated compilation started ({:?})", self.compile_time);
    }

    fn write_artifact(options: &BuildOptions) -> Result<()> {
        let manifest = BuildManifest {
            target: options.target.to_string(),
            scenes: &options.scenes,
            development: options.development,
            built_at: chrono::Local::now().to_rfc3339(),
        };
        let json = serde_json::to_vec_pretty(&manifest)?;

        let file = if options.location.extension().is_some() {
            options.location.clone()
        } else {
            fs::create_dir_all(&options.location)
                .with_context(|| format!("Failed to create {}", options.location.display()))?;
            options.location.join("build.json")
        };
        fs::write(&file, json).with_context(|| format!("Failed to write {}", file.display()))?;
        Ok(())
    }
}

impl Host for SimulatedHost {
    fn is_compiling(&self) -> bool {
        self.compiling_until.is_some_and(|until| Instant::now() < until)
    }

    fn import_asset(&mut self, path: &str, mode: ImportMode) -> Result<()> {
        if path.trim().is_empty() {
            bail!("empty asset path");
        }
        self.console.push(Severity::Log, format!("Imported {} ({:?})", path, mode));
        if path.ends_with(".cs") {
            self.start_compile();
        }
        Ok(())
    }

    fn refresh_assets(&mut self, mode: ImportMode) -> Result<()> {
        self.console.push(Severity::Log, format!("Asset database refreshed ({:?})", mode));
        self.start_compile();
        Ok(())
    }

    fn active_build_target(&self) -> BuildTarget {
        self.target
    }

    fn switch_build_target(&mut self, target: BuildTarget) -> Result<()> {
        self.console
            .push(Severity::Log, format!("Switching active build target {} -> {}", self.target, target));
        self.target = target;
        Ok(())
    }

    fn build_player(&mut self, options: &BuildOptions) -> Result<BuildReport> {
        if self.is_compiling() {
            self.console.push(Severity::Error, "Cannot build while scripts are compiling");
            return Ok(BuildReport::new(BuildResult::Cancelled));
        }
        if let Some(scene) = options.scenes.iter().find(|s| !s.ends_with(".unity")) {
            self.console.push(Severity::Error, format!("Scene {} is not a scene file", scene));
            return Ok(BuildReport::new(BuildResult::Failed));
        }

        Self::write_artifact(options)?;
        self.console.push(
            Severity::Log,
            format!("Build succeeded: {} -> {}", options.target, options.location.display()),
        );
        Ok(BuildReport::new(BuildResult::Succeeded))
    }

    fn console(&mut self) -> Option<&mut dyn ConsoleInspector> {
        Some(&mut self.console)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(location: std::path::PathBuf, scenes: &[&str]) -> BuildOptions {
        BuildOptions {
            scenes: scenes.iter().map(|s| s.to_string()).collect(),
            target: BuildTarget::WebGL,
            location,
            development: true,
        }
    }

    #[test]
    fn test_refresh_starts_compile() {
        let mut host = SimulatedHost::new(Duration::from_secs(60));
        assert!(!host.is_compiling());
        host.refresh_assets(ImportMode::Default).unwrap();
        assert!(host.is_compiling());
    }

    #[test]
    fn test_import_only_scripts_compile() {
        let mut host = SimulatedHost::new(Duration::from_secs(60));
        host.import_asset("Assets/tex.png", ImportMode::ForceUpdate).unwrap();
        assert!(!host.is_compiling());
        host.import_asset("Assets/Player.cs", ImportMode::Default).unwrap();
        assert!(host.is_compiling());
        assert!(host.import_asset("  ", ImportMode::Default).is_err());
    }

    /// Test: Successful build writes a manifest into the output directory
    #[test]
    fn test_build_writes_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("web");
        let mut host = SimulatedHost::new(Duration::ZERO);

        let report = host.build_player(&options(out.clone(), &["Assets/Main.unity"])).unwrap();
        assert!(report.succeeded());

        let manifest: serde_json::Value =
            serde_json::from_slice(&fs::read(out.join("build.json")).unwrap()).unwrap();
        assert_eq!(manifest["target"], "WebGL");
        assert_eq!(manifest["scenes"][0], "Assets/Main.unity");
    }

    #[test]
    fn test_build_rejects_non_scene() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = SimulatedHost::new(Duration::ZERO);
        let report = host.build_player(&options(dir.path().join("x"), &["Assets/readme.txt"])).unwrap();
        assert_eq!(report.result, BuildResult::Failed);

        let console = host.console().unwrap();
        let entries = console.entries().unwrap();
        assert_eq!(entries.last().unwrap().severity(), Severity::Error);
        console.clear().unwrap();
        assert!(console.entries().unwrap().is_empty());
    }
}
