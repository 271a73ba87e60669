//! Domain types exchanged with the coordinator.
//!
//! Wire-level shapes (PascalCase fields, base64 KV values) stay inside the
//! HTTP client; everything here is plain Rust data.

use serde::Serialize;
use std::collections::HashMap;

/// One node providing a service, as reported by the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogNode {
    pub node: String,
    pub address: String,
    pub service_tags: Vec<String>,
    pub service_port: u16,
}

/// A single node's catalog record: identity plus its registered services,
/// keyed by service id.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub node: String,
    pub address: String,
    pub services: HashMap<String, AgentService>,
}

/// A service instance as the local agent (or a node record) reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentService {
    pub service: String,
    pub tags: Vec<String>,
    pub port: u16,
}

/// Registration payload for the local agent's service endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceRegistration {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Tags")]
    pub tags: Vec<String>,
}

/// The local agent's own configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub node_name: String,
    pub advertise_addr: String,
}

/// A KV entry. `session` is the holder when the key is lock-acquired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvPair {
    pub key: String,
    pub value: Vec<u8>,
    pub session: Option<String>,
}

/// What the coordinator does with a session's held KV pairs when the
/// session is invalidated (TTL expiry or explicit destroy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionBehavior {
    /// Held locks are released; the pairs remain.
    Release,
    /// Held pairs are deleted outright.
    Delete,
}

impl SessionBehavior {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionBehavior::Release => "release",
            SessionBehavior::Delete => "delete",
        }
    }

    pub(crate) fn parse(s: &str) -> Self {
        match s {
            "delete" => SessionBehavior::Delete,
            _ => SessionBehavior::Release,
        }
    }
}

/// A coordinator session: a server-side liveness object with a TTL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEntry {
    pub name: String,
    pub ttl: String,
    pub behavior: SessionBehavior,
}

/// A user event on the coordinator's event stream.
///
/// `id` is assigned by the coordinator on fire and is empty on outbound
/// events built by callers. `node_filter` is a regex the coordinator applies
/// to node names when delivering the event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEvent {
    pub id: String,
    pub name: String,
    pub payload: Vec<u8>,
    pub node_filter: String,
}
