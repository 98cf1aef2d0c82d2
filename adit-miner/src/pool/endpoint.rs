//! Pool endpoints and the ordered connection registry.
//!
//! Endpoints are parsed once from their URI and shared as `Arc<Endpoint>`;
//! the only mutable field is the unrecoverable flag, which a client may set
//! when the endpoint has failed in a way that makes retrying pointless.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use url::Url;

use crate::error::{Error, Result};

/// Host value meaning "terminate the process when this endpoint is reached".
pub const EXIT_HOST: &str = "exit";

/// Protocol spoken by an endpoint, derived from its URI scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolFamily {
    /// HTTP work polling (getwork)
    Getwork,
    /// Stratum-family TCP
    Stratum,
    /// In-process simulator
    Simulation,
}

impl fmt::Display for ProtocolFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolFamily::Getwork => write!(f, "getwork"),
            ProtocolFamily::Stratum => write!(f, "stratum"),
            ProtocolFamily::Simulation => write!(f, "simulation"),
        }
    }
}

/// One configured remote pool address with protocol metadata.
#[derive(Debug)]
pub struct Endpoint {
    uri: String,
    host: String,
    port: u16,
    family: ProtocolFamily,
    unrecoverable: AtomicBool,
}

impl Endpoint {
    /// Parse a pool URI into an endpoint.
    ///
    /// The bare word `exit` is accepted as the termination sentinel.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();

        if trimmed.eq_ignore_ascii_case(EXIT_HOST) {
            return Ok(Self {
                uri: EXIT_HOST.to_string(),
                host: EXIT_HOST.to_string(),
                port: 0,
                family: ProtocolFamily::Simulation,
                unrecoverable: AtomicBool::new(false),
            });
        }

        let url = Url::parse(trimmed).map_err(|e| Error::InvalidUri {
            uri: input.to_string(),
            reason: e.to_string(),
        })?;

        let family = match url.scheme() {
            "http" | "getwork" => ProtocolFamily::Getwork,
            s if s.starts_with("stratum") => ProtocolFamily::Stratum,
            "sim" | "simulation" => ProtocolFamily::Simulation,
            other => {
                return Err(Error::InvalidUri {
                    uri: input.to_string(),
                    reason: format!("unknown scheme '{}'", other),
                })
            }
        };

        let host = url.host_str().unwrap_or("localhost").to_string();
        let port = url.port().unwrap_or(match family {
            ProtocolFamily::Getwork => 80,
            ProtocolFamily::Stratum => 4444,
            ProtocolFamily::Simulation => 0,
        });

        Ok(Self {
            uri: trimmed.to_string(),
            host,
            port,
            family,
            unrecoverable: AtomicBool::new(false),
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn family(&self) -> ProtocolFamily {
        self.family
    }

    /// `host:port` for display.
    pub fn display_host(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether this is the termination sentinel.
    pub fn is_exit(&self) -> bool {
        self.host.eq_ignore_ascii_case(EXIT_HOST)
    }

    /// Mark the endpoint as not worth retrying; it is removed on the next
    /// rotation.
    pub fn mark_unrecoverable(&self) {
        self.unrecoverable.store(true, Ordering::Release);
    }

    pub fn is_unrecoverable(&self) -> bool {
        self.unrecoverable.load(Ordering::Acquire)
    }
}

/// One row of the registry introspection snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionEntry {
    pub index: usize,
    pub active: bool,
    pub uri: String,
}

/// Ordered list of endpoints plus the active-index cursor.
///
/// Index 0 is the preferred endpoint; everything else is a fallback. While
/// the registry is non-empty the cursor stays within bounds; callers on the
/// terminal path may observe it against an empty registry.
#[derive(Debug, Default)]
pub struct Registry {
    endpoints: Vec<Arc<Endpoint>>,
    active: usize,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn add(&mut self, endpoint: Arc<Endpoint>) {
        self.endpoints.push(endpoint);
    }

    /// Remove by index. Callers validate the index and maintain the cursor.
    pub fn remove(&mut self, index: usize) -> Arc<Endpoint> {
        self.endpoints.remove(index)
    }

    pub fn get(&self, index: usize) -> Option<&Arc<Endpoint>> {
        self.endpoints.get(index)
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn set_active_index(&mut self, index: usize) {
        self.active = index;
    }

    /// The endpoint under the cursor, if any.
    pub fn active(&self) -> Option<&Arc<Endpoint>> {
        self.endpoints.get(self.active)
    }

    /// Wrap the cursor back to the preferred endpoint when it points past
    /// the end.
    pub fn clamp_active(&mut self) {
        if self.active >= self.endpoints.len() {
            self.active = 0;
        }
    }

    /// Advance the cursor to the next endpoint, wrapping at the end.
    pub fn advance_active(&mut self) {
        self.active += 1;
        self.clamp_active();
    }

    /// Case-insensitive lookup by canonical URI.
    pub fn find_by_uri(&self, uri: &str) -> Option<usize> {
        self.endpoints
            .iter()
            .position(|e| e.uri().eq_ignore_ascii_case(uri))
    }

    /// `(index, active, uri)` triples for introspection.
    pub fn snapshot(&self) -> Vec<ConnectionEntry> {
        self.endpoints
            .iter()
            .enumerate()
            .map(|(index, e)| ConnectionEntry {
                index,
                active: index == self.active,
                uri: e.uri().to_string(),
            })
            .collect()
    }
}
