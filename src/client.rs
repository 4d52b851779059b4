//! Blocking HTTP client for a running server.
//!
//! Used by the binary's subcommands and by integration tests. Every call maps
//! to one endpoint; non-2xx responses become errors carrying the server's
//! `error` message.

use anyhow::{Context, Result, anyhow, bail};
use reqwest::blocking::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::Ipv4Addr;
use std::thread;
use std::time::{Duration, Instant};

/// Per-request timeout. Builds and compile waits can run long.
const DEFAULT_TIMEOUT_SECS: u64 = 3600;

/// One captured log entry as served by `/errors`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LogEntry {
    pub time: String,
    pub message: String,
    pub stack: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Health {
    pub ok: bool,
    pub compiling: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BuildOutcome {
    pub ok: bool,
    pub result: String,
    pub output: String,
}

/// Body of `POST /build`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildCommand {
    pub target: String,
    pub output_path: String,
    pub scenes: Vec<String>,
    pub development: bool,
    pub clean: bool,
}

#[derive(Serialize)]
struct RefreshBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    reimport: Option<&'a [String]>,
    force: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AwaitCompileBody {
    timeout_sec: i64,
}

pub struct RemoteClient {
    client: Client,
    base_url: String,
}

impl std::fmt::Debug for RemoteClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteClient").field("base_url", &self.base_url).finish()
    }
}

impl RemoteClient {
    /// Client for `http://127.0.0.1:{port}`.
    pub fn new(port: u16) -> Result<Self> {
        Self::with_base_url(format!("http://{}:{}", Ipv4Addr::LOCALHOST, port))
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .user_agent(concat!("editor-remote/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send and decode, turning non-2xx replies into errors.
    fn send<T: DeserializeOwned>(&self, label: &str, request: RequestBuilder) -> Result<T> {
        let response = request.send().with_context(|| format!("{} failed", label))?;
        let status = response.status();
        let body: Value = response
            .json()
            .with_context(|| format!("{}: invalid JSON response", label))?;

        if !status.is_success() {
            if body["timeout"] == true {
                bail!("{}: timed out ({})", label, status.as_u16());
            }
            let message = body["error"].as_str().unwrap_or("unknown error");
            bail!("{}: {} ({})", label, message, status.as_u16());
        }
        serde_json::from_value(body).map_err(|e| anyhow!("{}: unexpected response: {}", label, e))
    }

    pub fn health(&self) -> Result<Health> {
        self.send("GET /health", self.client.get(self.url("/health")))
    }

    /// Poll `/health` until it answers or `timeout` passes.
    pub fn wait_for_server(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            match self.health() {
                Ok(health) if health.ok => return true,
                Ok(_) => {}
                Err(e) => log::debug!("Server not ready: {:#}", e),
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return false;
            }
            thread::sleep(Duration::from_millis(250));
        }
    }

    pub fn refresh(&self, reimport: &[String], force: bool) -> Result<()> {
        let reimport = Some(reimport).filter(|paths| !paths.is_empty());
        let body = RefreshBody { reimport, force };
        let _: Value = self.send("POST /refresh", self.client.post(self.url("/refresh")).json(&body))?;
        Ok(())
    }

    pub fn await_compile(&self, timeout_sec: i64) -> Result<()> {
        let body = AwaitCompileBody { timeout_sec };
        let _: Value = self.send(
            "POST /awaitCompile",
            self.client.post(self.url("/awaitCompile")).json(&body),
        )?;
        Ok(())
    }

    pub fn errors(&self, level: &str, limit: usize, console: bool) -> Result<Vec<LogEntry>> {
        let limit = limit.to_string();
        let mut query = vec![("level", level), ("limit", limit.as_str())];
        if console {
            query.push(("source", "console"));
        }
        self.send("GET /errors", self.client.get(self.url("/errors")).query(&query))
    }

    pub fn clear_errors(&self, console: bool) -> Result<()> {
        let mut request = self.client.post(self.url("/errors/clear"));
        if console {
            request = request.query(&[("source", "console")]);
        }
        let _: Value = self.send("POST /errors/clear", request)?;
        Ok(())
    }

    /// Run a build. A failed build report is returned as `Ok` with `ok == false`.
    pub fn build(&self, command: &BuildCommand) -> Result<BuildOutcome> {
        let response = self
            .client
            .post(self.url("/build"))
            .json(command)
            .send()
            .context("POST /build failed")?;
        let status = response.status();
        let body: Value = response.json().context("POST /build: invalid JSON response")?;
        if body.get("result").is_some() {
            return serde_json::from_value(body).context("POST /build: unexpected response");
        }
        let message = body["error"].as_str().unwrap_or("unknown error");
        bail!("POST /build: {} ({})", message, status.as_u16())
    }
}
