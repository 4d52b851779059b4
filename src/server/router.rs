//! Request/response types and route resolution.
//!
//! Built-in routes are a fixed table matched by exact path and method.
//! Custom routes are prefixes registered at runtime; they are consulted only
//! when no built-in matches, in registration order.

use indexmap::IndexMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::io::Read;
use std::sync::{Arc, RwLock};

use crate::error::{CommandError, Result};
use crate::host::Host;

/// Owned copy of an HTTP request, safe to move to the privileged thread.
///
/// The body is read off the network before the request leaves the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    method: String,
    path: String,
    query: String,
    body: Vec<u8>,
}

impl CommandRequest {
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        query: impl Into<String>,
        body: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            query: query.into(),
            body: body.into(),
        }
    }

    /// Copy method, path, query and at most `max_body` bytes of body out of a rouille request.
    pub fn from_http(request: &rouille::Request, max_body: usize) -> Result<Self> {
        let mut body = Vec::new();
        if let Some(data) = request.data() {
            data.take(max_body as u64 + 1).read_to_end(&mut body)?;
            if body.len() > max_body {
                return Err(CommandError::PayloadTooLarge { limit: max_body });
            }
        }
        Ok(Self::new(
            request.method(),
            request.url(),
            request.raw_query_string(),
            body,
        ))
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Raw query string without the leading `?`.
    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Decode the body as JSON. An empty body decodes as `{}`.
    pub fn body_json<T: DeserializeOwned>(&self) -> Result<T> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(serde_json::from_slice(b"{}")?);
        }
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Decode the query string into a typed struct.
    pub fn query_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_urlencoded::from_str(&self.query)
            .map_err(|e| CommandError::validation(format!("invalid query: {}", e)))
    }

    /// `METHOD /path` for logs.
    pub fn label(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

/// Status code plus an already-encoded JSON body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    status: u16,
    body: Vec<u8>,
}

#[derive(Serialize)]
struct OkBody {
    ok: bool,
}

impl CommandResponse {
    /// Encode `value` as the JSON body. Encoding failures degrade to a 500.
    pub fn json<T: Serialize + ?Sized>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self { status, body },
            Err(e) => {
                log::error!("Failed to encode response: {}", e);
                Self {
                    status: 500,
                    body: br#"{"error":"failed to encode response"}"#.to_vec(),
                }
            }
        }
    }

    /// `200 {"ok":true}`
    pub fn ok() -> Self {
        Self::json(200, &OkBody { ok: true })
    }

    pub fn not_found() -> Self {
        CommandError::NotFound.to_response()
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Rouille computes `Content-Length` from the owned body.
    pub fn into_http(self) -> rouille::Response {
        rouille::Response::from_data("application/json; charset=utf-8", self.body)
            .with_status_code(self.status)
    }
}

/// Which HTTP methods a route accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodFilter {
    Get,
    Post,
    Any,
}

impl MethodFilter {
    pub fn matches(self, method: &str) -> bool {
        match self {
            MethodFilter::Get => method.eq_ignore_ascii_case("GET"),
            MethodFilter::Post => method.eq_ignore_ascii_case("POST"),
            MethodFilter::Any => true,
        }
    }
}

pub type ImmediateFn = dyn Fn(&CommandRequest) -> CommandResponse + Send + Sync;
pub type PrivilegedFn = dyn Fn(&CommandRequest, &mut dyn Host) -> CommandResponse + Send + Sync;

/// Handler for a custom route, tagged with where it must run.
#[derive(Clone)]
pub enum RouteHandler {
    /// Runs on the request thread; must not touch host state.
    Immediate(Arc<ImmediateFn>),
    /// Queued and run by the pump on the privileged thread.
    Privileged(Arc<PrivilegedFn>),
}

impl RouteHandler {
    pub fn immediate<F>(f: F) -> Self
    where
        F: Fn(&CommandRequest) -> CommandResponse + Send + Sync + 'static,
    {
        RouteHandler::Immediate(Arc::new(f))
    }

    pub fn privileged<F>(f: F) -> Self
    where
        F: Fn(&CommandRequest, &mut dyn Host) -> CommandResponse + Send + Sync + 'static,
    {
        RouteHandler::Privileged(Arc::new(f))
    }

    pub fn is_privileged(&self) -> bool {
        matches!(self, RouteHandler::Privileged(_))
    }
}

impl fmt::Debug for RouteHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteHandler::Immediate(_) => f.write_str("Immediate"),
            RouteHandler::Privileged(_) => f.write_str("Privileged"),
        }
    }
}

/// Fixed endpoints served by [`super::ops`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Health,
    Refresh,
    AwaitCompile,
    Errors,
    ClearErrors,
    Build,
}

const BUILTINS: &[(&str, MethodFilter, Builtin)] = &[
    ("/health", MethodFilter::Any, Builtin::Health),
    ("/refresh", MethodFilter::Post, Builtin::Refresh),
    ("/awaitCompile", MethodFilter::Post, Builtin::AwaitCompile),
    ("/errors", MethodFilter::Get, Builtin::Errors),
    ("/errors/clear", MethodFilter::Post, Builtin::ClearErrors),
    ("/build", MethodFilter::Post, Builtin::Build),
];

/// Result of matching a request against the route tables.
#[derive(Debug, Clone)]
pub enum Route {
    Builtin(Builtin),
    Custom { prefix: String, handler: RouteHandler },
    NotFound,
}

struct CustomRoute {
    method: MethodFilter,
    handler: RouteHandler,
}

/// Route table. Lookups run concurrently on request threads; registration is rare.
#[derive(Default)]
pub struct Router {
    custom: RwLock<IndexMap<String, CustomRoute>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a custom prefix route.
    ///
    /// A duplicate prefix replaces the previous handler in place (keeping its
    /// match position) and returns `Ok(true)`. Empty prefixes are rejected.
    pub fn register(&self, prefix: &str, method: MethodFilter, handler: RouteHandler) -> Result<bool> {
        let prefix = normalize_prefix(prefix)
            .ok_or_else(|| CommandError::validation("endpoint prefix must not be empty"))?;
        let mut custom = self.custom.write().unwrap_or_else(|e| e.into_inner());
        let replaced = custom.insert(prefix, CustomRoute { method, handler }).is_some();
        Ok(replaced)
    }

    /// Remove a custom route. Returns whether it existed.
    pub fn unregister(&self, prefix: &str) -> bool {
        let Some(prefix) = normalize_prefix(prefix) else {
            return false;
        };
        let mut custom = self.custom.write().unwrap_or_else(|e| e.into_inner());
        custom.shift_remove(&prefix).is_some()
    }

    /// Registered custom prefixes in match order.
    pub fn custom_prefixes(&self) -> Vec<String> {
        let custom = self.custom.read().unwrap_or_else(|e| e.into_inner());
        custom.keys().cloned().collect()
    }

    pub fn resolve(&self, method: &str, path: &str) -> Route {
        if let Some((_, _, builtin)) = BUILTINS
            .iter()
            .find(|(p, m, _)| *p == path && m.matches(method))
        {
            return Route::Builtin(*builtin);
        }

        let custom = self.custom.read().unwrap_or_else(|e| e.into_inner());
        custom
            .iter()
            .find(|(prefix, route)| prefix_matches(prefix, path) && route.method.matches(method))
            .map(|(prefix, route)| Route::Custom {
                prefix: prefix.clone(),
                handler: route.handler.clone(),
            })
            .unwrap_or(Route::NotFound)
    }
}

fn normalize_prefix(prefix: &str) -> Option<String> {
    let trimmed = prefix.trim().trim_end_matches('/');
    let trimmed = trimmed.trim_start_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    Some(format!("/{}", trimmed))
}

fn prefix_matches(prefix: &str, path: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
