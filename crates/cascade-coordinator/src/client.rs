//! The [`Coordinator`] operation contract and its HTTP implementation.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::{Client, ClientBuilder, Response, StatusCode};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::CoordinatorError;
use crate::types::{
    AgentConfig, AgentService, CatalogNode, KvPair, NodeRecord, ServiceRegistration,
    SessionBehavior, SessionEntry, UserEvent,
};

/// How long to wait for a TCP connect before giving up.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Headroom added to a blocking query's `wait` before the request itself
/// times out. The coordinator may hold the connection slightly past `wait`.
const BLOCKING_QUERY_GRACE: Duration = Duration::from_secs(5);

/// Per-request timeout for all non-blocking operations.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Operations the roll engine needs from the coordinator.
///
/// Every call maps one-to-one onto a coordinator HTTP endpoint. All errors
/// are surfaced as-is; retrying is the caller's concern (in practice no
/// caller retries, every failure aborts the roll).
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Nodes providing `service`, optionally filtered by tag
    /// (empty string = no filter).
    async fn service_nodes(
        &self,
        service: &str,
        tag: &str,
    ) -> Result<Vec<CatalogNode>, CoordinatorError>;

    /// A single node's catalog record, or `None` if the node is unknown.
    async fn catalog_node(&self, name: &str) -> Result<Option<NodeRecord>, CoordinatorError>;

    /// All catalog services, mapped to their tags.
    async fn catalog_services(&self) -> Result<BTreeMap<String, Vec<String>>, CoordinatorError>;

    /// The local agent's configuration.
    async fn agent_self(&self) -> Result<AgentConfig, CoordinatorError>;

    /// Services registered with the local agent, keyed by service id.
    async fn agent_services(&self) -> Result<HashMap<String, AgentService>, CoordinatorError>;

    /// Register (or re-register) a service with the local agent.
    async fn register_service(
        &self,
        registration: &ServiceRegistration,
    ) -> Result<(), CoordinatorError>;

    /// Read a single KV pair.
    async fn kv_get(&self, key: &str) -> Result<Option<KvPair>, CoordinatorError>;

    /// Atomic-conditional lock acquire. Returns whether the write was
    /// accepted; `false` means another live session holds the key.
    async fn kv_acquire(&self, pair: &KvPair) -> Result<bool, CoordinatorError>;

    /// Conditional lock release. Returns whether the holder matched.
    async fn kv_release(&self, pair: &KvPair) -> Result<bool, CoordinatorError>;

    /// Create a session; returns its id.
    async fn session_create(&self, entry: &SessionEntry) -> Result<String, CoordinatorError>;

    /// Renew a session's TTL. `None` means the session no longer exists.
    async fn session_renew(&self, id: &str) -> Result<Option<SessionEntry>, CoordinatorError>;

    /// Destroy a session, triggering its invalidation behavior.
    async fn session_destroy(&self, id: &str) -> Result<(), CoordinatorError>;

    /// Fire a user event; returns the coordinator-assigned event id.
    async fn event_fire(&self, event: &UserEvent) -> Result<String, CoordinatorError>;

    /// Blocking query against the event stream: the current window of
    /// events named `name` plus its index, waiting up to `wait` for the
    /// index to move past `index`.
    async fn event_list(
        &self,
        name: &str,
        index: u64,
        wait: Duration,
    ) -> Result<(Vec<UserEvent>, u64), CoordinatorError>;
}

/// Production [`Coordinator`] over the Consul-compatible HTTP API.
pub struct ConsulCoordinator {
    client: Client,
    base_url: String,
}

impl ConsulCoordinator {
    /// `base_url` is the agent's HTTP address, e.g. `http://127.0.0.1:8500`.
    pub fn new(base_url: impl Into<String>) -> Result<Self, CoordinatorError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Url::parse(&base_url)?;

        // No global timeout: blocking event queries hold the connection for
        // their full `wait`. Each request sets its own deadline instead.
        let client = ClientBuilder::new()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        Ok(Self { client, base_url })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Read the body of a successful response, or map the failure to a
    /// status error. `not_found_is_none` turns a 404 into `Ok(None)` for
    /// endpoints where absence is a normal answer.
    async fn read_body(
        path: &str,
        response: Response,
        not_found_is_none: bool,
    ) -> Result<Option<Vec<u8>>, CoordinatorError> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND && not_found_is_none {
            return Ok(None);
        }
        let body = response.bytes().await?;
        if !status.is_success() {
            return Err(CoordinatorError::Status {
                status,
                path: path.to_string(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        Ok(Some(body.to_vec()))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<T, CoordinatorError> {
        let response = self
            .client
            .get(self.endpoint(path))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        let body = Self::read_body(path, response, false).await?;
        Ok(serde_json::from_slice(&body.unwrap_or_default())?)
    }
}

#[async_trait]
impl Coordinator for ConsulCoordinator {
    async fn service_nodes(
        &self,
        service: &str,
        tag: &str,
    ) -> Result<Vec<CatalogNode>, CoordinatorError> {
        let path = format!("/v1/catalog/service/{service}");
        let mut request = self
            .client
            .get(self.endpoint(&path))
            .timeout(REQUEST_TIMEOUT);
        if !tag.is_empty() {
            request = request.query(&[("tag", tag)]);
        }
        let response = request.send().await?;
        let body = Self::read_body(&path, response, false).await?;
        let nodes: Vec<CatalogNodeWire> = serde_json::from_slice(&body.unwrap_or_default())?;
        Ok(nodes.into_iter().map(CatalogNode::from).collect())
    }

    async fn catalog_node(&self, name: &str) -> Result<Option<NodeRecord>, CoordinatorError> {
        let path = format!("/v1/catalog/node/{name}");
        let record: Option<NodeRecordWire> = self.get_json(&path).await?;
        Ok(record.map(NodeRecord::from))
    }

    async fn catalog_services(&self) -> Result<BTreeMap<String, Vec<String>>, CoordinatorError> {
        self.get_json("/v1/catalog/services").await
    }

    async fn agent_self(&self) -> Result<AgentConfig, CoordinatorError> {
        let agent: AgentSelfWire = self.get_json("/v1/agent/self").await?;
        Ok(AgentConfig {
            node_name: agent.config.node_name,
            advertise_addr: agent.config.advertise_addr,
        })
    }

    async fn agent_services(&self) -> Result<HashMap<String, AgentService>, CoordinatorError> {
        let services: HashMap<String, AgentServiceWire> =
            self.get_json("/v1/agent/services").await?;
        Ok(services
            .into_iter()
            .map(|(id, s)| (id, AgentService::from(s)))
            .collect())
    }

    async fn register_service(
        &self,
        registration: &ServiceRegistration,
    ) -> Result<(), CoordinatorError> {
        let path = "/v1/agent/service/register";
        let response = self
            .client
            .put(self.endpoint(path))
            .timeout(REQUEST_TIMEOUT)
            .json(registration)
            .send()
            .await?;
        Self::read_body(path, response, false).await?;
        Ok(())
    }

    async fn kv_get(&self, key: &str) -> Result<Option<KvPair>, CoordinatorError> {
        let path = format!("/v1/kv/{key}");
        let response = self
            .client
            .get(self.endpoint(&path))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        let Some(body) = Self::read_body(&path, response, true).await? else {
            return Ok(None);
        };
        let pairs: Vec<KvPairWire> = serde_json::from_slice(&body)?;
        match pairs.into_iter().next() {
            Some(wire) => Ok(Some(wire.into_pair()?)),
            None => Ok(None),
        }
    }

    async fn kv_acquire(&self, pair: &KvPair) -> Result<bool, CoordinatorError> {
        self.kv_lock_op(pair, "acquire").await
    }

    async fn kv_release(&self, pair: &KvPair) -> Result<bool, CoordinatorError> {
        self.kv_lock_op(pair, "release").await
    }

    async fn session_create(&self, entry: &SessionEntry) -> Result<String, CoordinatorError> {
        let path = "/v1/session/create";
        let body = SessionCreateWire {
            name: &entry.name,
            ttl: &entry.ttl,
            behavior: entry.behavior.as_str(),
        };
        let response = self
            .client
            .put(self.endpoint(path))
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await?;
        let body = Self::read_body(path, response, false).await?;
        let created: SessionIdWire = serde_json::from_slice(&body.unwrap_or_default())?;
        debug!(session = %created.id, "created coordinator session");
        Ok(created.id)
    }

    async fn session_renew(&self, id: &str) -> Result<Option<SessionEntry>, CoordinatorError> {
        let path = format!("/v1/session/renew/{id}");
        let response = self
            .client
            .put(self.endpoint(&path))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        let Some(body) = Self::read_body(&path, response, true).await? else {
            return Ok(None);
        };
        let entries: Vec<SessionEntryWire> = serde_json::from_slice(&body)?;
        Ok(entries.into_iter().next().map(SessionEntry::from))
    }

    async fn session_destroy(&self, id: &str) -> Result<(), CoordinatorError> {
        let path = format!("/v1/session/destroy/{id}");
        let response = self
            .client
            .put(self.endpoint(&path))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        Self::read_body(&path, response, false).await?;
        Ok(())
    }

    async fn event_fire(&self, event: &UserEvent) -> Result<String, CoordinatorError> {
        let path = format!("/v1/event/fire/{}", event.name);
        let mut request = self
            .client
            .put(self.endpoint(&path))
            .timeout(REQUEST_TIMEOUT)
            .body(event.payload.clone());
        if !event.node_filter.is_empty() {
            request = request.query(&[("node", &event.node_filter)]);
        }
        let response = request.send().await?;
        let body = Self::read_body(&path, response, false).await?;
        let fired: EventIdWire = serde_json::from_slice(&body.unwrap_or_default())?;
        debug!(event = %event.name, id = %fired.id, "fired user event");
        Ok(fired.id)
    }

    async fn event_list(
        &self,
        name: &str,
        index: u64,
        wait: Duration,
    ) -> Result<(Vec<UserEvent>, u64), CoordinatorError> {
        let path = "/v1/event/list";
        let response = self
            .client
            .get(self.endpoint(path))
            .timeout(wait + BLOCKING_QUERY_GRACE)
            .query(&[
                ("name", name.to_string()),
                ("index", index.to_string()),
                ("wait", format!("{}s", wait.as_secs())),
            ])
            .send()
            .await?;

        let new_index = response
            .headers()
            .get("X-Consul-Index")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(index);

        let body = Self::read_body(path, response, false).await?;
        let events: Vec<UserEventWire> = serde_json::from_slice(&body.unwrap_or_default())?;
        let events = events
            .into_iter()
            .map(UserEventWire::into_event)
            .collect::<Result<_, _>>()?;
        Ok((events, new_index))
    }
}

impl ConsulCoordinator {
    async fn kv_lock_op(&self, pair: &KvPair, op: &str) -> Result<bool, CoordinatorError> {
        let path = format!("/v1/kv/{}", pair.key);
        let session = pair.session.as_deref().unwrap_or_default();
        let response = self
            .client
            .put(self.endpoint(&path))
            .timeout(REQUEST_TIMEOUT)
            .query(&[(op, session)])
            .body(pair.value.clone())
            .send()
            .await?;
        let body = Self::read_body(&path, response, false).await?;
        Ok(serde_json::from_slice(&body.unwrap_or_default())?)
    }
}

// Wire shapes. The coordinator speaks PascalCase JSON and base64-encodes
// KV values and event payloads in transit.

#[derive(Deserialize)]
struct CatalogNodeWire {
    #[serde(rename = "Node")]
    node: String,
    #[serde(rename = "Address")]
    address: String,
    #[serde(rename = "ServiceTags", default)]
    service_tags: Vec<String>,
    #[serde(rename = "ServicePort", default)]
    service_port: u16,
}

impl From<CatalogNodeWire> for CatalogNode {
    fn from(wire: CatalogNodeWire) -> Self {
        CatalogNode {
            node: wire.node,
            address: wire.address,
            service_tags: wire.service_tags,
            service_port: wire.service_port,
        }
    }
}

#[derive(Deserialize)]
struct NodeRecordWire {
    #[serde(rename = "Node")]
    node: NodeIdentityWire,
    #[serde(rename = "Services", default)]
    services: HashMap<String, AgentServiceWire>,
}

#[derive(Deserialize)]
struct NodeIdentityWire {
    #[serde(rename = "Node")]
    node: String,
    #[serde(rename = "Address")]
    address: String,
}

impl From<NodeRecordWire> for NodeRecord {
    fn from(wire: NodeRecordWire) -> Self {
        NodeRecord {
            node: wire.node.node,
            address: wire.node.address,
            services: wire
                .services
                .into_iter()
                .map(|(id, s)| (id, AgentService::from(s)))
                .collect(),
        }
    }
}

#[derive(Deserialize)]
struct AgentServiceWire {
    #[serde(rename = "Service")]
    service: String,
    #[serde(rename = "Tags", default)]
    tags: Vec<String>,
    #[serde(rename = "Port", default)]
    port: u16,
}

impl From<AgentServiceWire> for AgentService {
    fn from(wire: AgentServiceWire) -> Self {
        AgentService {
            service: wire.service,
            tags: wire.tags,
            port: wire.port,
        }
    }
}

#[derive(Deserialize)]
struct AgentSelfWire {
    #[serde(rename = "Config")]
    config: AgentConfigWire,
}

#[derive(Deserialize)]
struct AgentConfigWire {
    #[serde(rename = "NodeName")]
    node_name: String,
    #[serde(rename = "AdvertiseAddr", default)]
    advertise_addr: String,
}

#[derive(Deserialize)]
struct KvPairWire {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Value")]
    value: Option<String>,
    #[serde(rename = "Session")]
    session: Option<String>,
}

impl KvPairWire {
    fn into_pair(self) -> Result<KvPair, CoordinatorError> {
        let value = match self.value {
            Some(encoded) => BASE64.decode(encoded)?,
            None => Vec::new(),
        };
        Ok(KvPair {
            key: self.key,
            value,
            session: self.session,
        })
    }
}

#[derive(serde::Serialize)]
struct SessionCreateWire<'a> {
    #[serde(rename = "Name")]
    name: &'a str,
    #[serde(rename = "TTL")]
    ttl: &'a str,
    #[serde(rename = "Behavior")]
    behavior: &'a str,
}

#[derive(Deserialize)]
struct SessionIdWire {
    #[serde(rename = "ID")]
    id: String,
}

#[derive(Deserialize)]
struct SessionEntryWire {
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "TTL", default)]
    ttl: String,
    #[serde(rename = "Behavior", default)]
    behavior: String,
}

impl From<SessionEntryWire> for SessionEntry {
    fn from(wire: SessionEntryWire) -> Self {
        SessionEntry {
            name: wire.name,
            ttl: wire.ttl,
            behavior: SessionBehavior::parse(&wire.behavior),
        }
    }
}

#[derive(Deserialize)]
struct EventIdWire {
    #[serde(rename = "ID")]
    id: String,
}

#[derive(Deserialize)]
struct UserEventWire {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Payload")]
    payload: Option<String>,
    #[serde(rename = "NodeFilter", default)]
    node_filter: String,
}

impl UserEventWire {
    fn into_event(self) -> Result<UserEvent, CoordinatorError> {
        let payload = match self.payload {
            Some(encoded) => BASE64.decode(encoded)?,
            None => Vec::new(),
        };
        Ok(UserEvent {
            id: self.id,
            name: self.name,
            payload,
            node_filter: self.node_filter,
        })
    }
}
