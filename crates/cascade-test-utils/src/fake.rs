//! In-memory fake of the coordinator operation contract.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use cascade_coordinator::{
    AgentConfig, AgentService, CatalogNode, Coordinator, CoordinatorError, KvPair, NodeRecord,
    ServiceRegistration, SessionBehavior, SessionEntry, UserEvent,
};
use parking_lot::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use crate::factories::reply_payload;

/// How often a blocked `event_list` re-checks the event log.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Default)]
struct State {
    nodes: Vec<CatalogNode>,
    extra_services: BTreeMap<String, Vec<String>>,
    kv: HashMap<String, KvPair>,
    sessions: HashMap<String, SessionEntry>,
    renewals: HashMap<String, u32>,
    events: Vec<UserEvent>,
    event_index: u64,
    fired: Vec<UserEvent>,
    replies: HashMap<String, Vec<String>>,
    fail_next_acquire: bool,
    local_agent: Option<AgentConfig>,
    local_services: HashMap<String, AgentService>,
    next_event_id: u64,
}

/// An in-memory coordinator.
///
/// Catalog nodes, KV pairs, and sessions behave like the real service's
/// (conditional acquire/release, delete-on-invalidate sessions). Firing a
/// `cascade.cm` event automatically appends any replies scripted for the
/// targeted host, each echoing the fired event's id in `ref`.
#[derive(Default)]
pub struct FakeCoordinator {
    state: Mutex<State>,
}

impl FakeCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node under the `cascade` service with the given tags.
    pub fn register_node(&self, name: &str, tags: &[&str]) {
        let mut state = self.state.lock();
        state.nodes.push(crate::factories::catalog_node(name, tags));
    }

    /// Add a non-cascade catalog service (for catalog listing tests).
    pub fn add_catalog_service(&self, name: &str, tags: &[&str]) {
        let mut state = self.state.lock();
        state
            .extra_services
            .insert(name.to_string(), tags.iter().map(|t| t.to_string()).collect());
    }

    /// Seed a KV pair directly (e.g. the run-order manifest).
    pub fn kv_put(&self, key: &str, value: &[u8]) {
        let mut state = self.state.lock();
        state.kv.insert(
            key.to_string(),
            KvPair {
                key: key.to_string(),
                value: value.to_vec(),
                session: None,
            },
        );
    }

    /// Script the reply messages a host emits when a run event is fired at
    /// it. Consumed by the first matching fire.
    pub fn script_replies(&self, host: &str, msgs: &[&str]) {
        let mut state = self.state.lock();
        state
            .replies
            .insert(host.to_string(), msgs.iter().map(|m| m.to_string()).collect());
    }

    /// Append a raw event to the stream, bypassing fire bookkeeping.
    pub fn inject_event(&self, name: &str, payload: Vec<u8>) {
        let mut state = self.state.lock();
        let id = format!("evt-{}", state.next_event_id);
        state.next_event_id += 1;
        state.events.push(UserEvent {
            id,
            name: name.to_string(),
            payload,
            node_filter: String::new(),
        });
        state.event_index += 1;
    }

    /// Make the next conditional acquire fail without recording a holder,
    /// reproducing an acquire that lost a race with a mid-cleanup lock.
    pub fn fail_next_acquire(&self) {
        self.state.lock().fail_next_acquire = true;
    }

    /// Configure the local agent identity and its registered services.
    pub fn set_local_agent(&self, node_name: &str, advertise_addr: &str) {
        self.state.lock().local_agent = Some(AgentConfig {
            node_name: node_name.to_string(),
            advertise_addr: advertise_addr.to_string(),
        });
    }

    pub fn add_local_service(&self, id: &str, service: &str, tags: &[&str], port: u16) {
        self.state.lock().local_services.insert(
            id.to_string(),
            AgentService {
                service: service.to_string(),
                tags: tags.iter().map(|t| t.to_string()).collect(),
                port,
            },
        );
    }

    /// Invalidate a session as if its TTL expired.
    pub fn expire_session(&self, id: &str) {
        let mut state = self.state.lock();
        if let Some(entry) = state.sessions.remove(id) {
            apply_invalidation(&mut state, id, entry.behavior);
        }
    }

    // Introspection for assertions.

    /// Outbound events fired through the contract, in order.
    pub fn fired_events(&self) -> Vec<UserEvent> {
        self.state.lock().fired.clone()
    }

    pub fn renewal_count(&self, session_id: &str) -> u32 {
        self.state
            .lock()
            .renewals
            .get(session_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn session_alive(&self, session_id: &str) -> bool {
        self.state.lock().sessions.contains_key(session_id)
    }

    pub fn live_sessions(&self) -> usize {
        self.state.lock().sessions.len()
    }

    pub fn kv_peek(&self, key: &str) -> Option<KvPair> {
        self.state.lock().kv.get(key).cloned()
    }
}

fn apply_invalidation(state: &mut State, session_id: &str, behavior: SessionBehavior) {
    match behavior {
        SessionBehavior::Delete => {
            state
                .kv
                .retain(|_, pair| pair.session.as_deref() != Some(session_id));
        }
        SessionBehavior::Release => {
            for pair in state.kv.values_mut() {
                if pair.session.as_deref() == Some(session_id) {
                    pair.session = None;
                }
            }
        }
    }
}

#[async_trait]
impl Coordinator for FakeCoordinator {
    async fn service_nodes(
        &self,
        _service: &str,
        tag: &str,
    ) -> Result<Vec<CatalogNode>, CoordinatorError> {
        let state = self.state.lock();
        Ok(state
            .nodes
            .iter()
            .filter(|n| tag.is_empty() || n.service_tags.iter().any(|t| t == tag))
            .cloned()
            .collect())
    }

    async fn catalog_node(&self, name: &str) -> Result<Option<NodeRecord>, CoordinatorError> {
        let state = self.state.lock();
        Ok(state.nodes.iter().find(|n| n.node == name).map(|n| {
            let mut services = HashMap::new();
            services.insert(
                "cascade".to_string(),
                AgentService {
                    service: "cascade".to_string(),
                    tags: n.service_tags.clone(),
                    port: n.service_port,
                },
            );
            NodeRecord {
                node: n.node.clone(),
                address: n.address.clone(),
                services,
            }
        }))
    }

    async fn catalog_services(&self) -> Result<BTreeMap<String, Vec<String>>, CoordinatorError> {
        let state = self.state.lock();
        let mut services = state.extra_services.clone();
        if !state.nodes.is_empty() {
            let mut tags: Vec<String> = state
                .nodes
                .iter()
                .flat_map(|n| n.service_tags.iter().cloned())
                .collect();
            tags.sort();
            tags.dedup();
            services.insert("cascade".to_string(), tags);
        }
        Ok(services)
    }

    async fn agent_self(&self) -> Result<AgentConfig, CoordinatorError> {
        let state = self.state.lock();
        Ok(state
            .local_agent
            .clone()
            .expect("local agent not configured on FakeCoordinator"))
    }

    async fn agent_services(&self) -> Result<HashMap<String, AgentService>, CoordinatorError> {
        Ok(self.state.lock().local_services.clone())
    }

    async fn register_service(
        &self,
        registration: &ServiceRegistration,
    ) -> Result<(), CoordinatorError> {
        self.state.lock().local_services.insert(
            registration.name.clone(),
            AgentService {
                service: registration.name.clone(),
                tags: registration.tags.clone(),
                port: 0,
            },
        );
        Ok(())
    }

    async fn kv_get(&self, key: &str) -> Result<Option<KvPair>, CoordinatorError> {
        Ok(self.state.lock().kv.get(key).cloned())
    }

    async fn kv_acquire(&self, pair: &KvPair) -> Result<bool, CoordinatorError> {
        let mut state = self.state.lock();
        if state.fail_next_acquire {
            state.fail_next_acquire = false;
            return Ok(false);
        }
        if let Some(existing) = state.kv.get(&pair.key) {
            if existing.session.is_some() {
                return Ok(false);
            }
        }
        state.kv.insert(pair.key.clone(), pair.clone());
        Ok(true)
    }

    async fn kv_release(&self, pair: &KvPair) -> Result<bool, CoordinatorError> {
        let mut state = self.state.lock();
        match state.kv.get_mut(&pair.key) {
            Some(existing) if existing.session == pair.session && pair.session.is_some() => {
                existing.session = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn session_create(&self, entry: &SessionEntry) -> Result<String, CoordinatorError> {
        let mut state = self.state.lock();
        let id = format!("session-{}", Uuid::new_v4());
        state.sessions.insert(id.clone(), entry.clone());
        state.renewals.insert(id.clone(), 0);
        Ok(id)
    }

    async fn session_renew(&self, id: &str) -> Result<Option<SessionEntry>, CoordinatorError> {
        let mut state = self.state.lock();
        if let Some(entry) = state.sessions.get(id).cloned() {
            *state.renewals.entry(id.to_string()).or_insert(0) += 1;
            Ok(Some(entry))
        } else {
            Ok(None)
        }
    }

    async fn session_destroy(&self, id: &str) -> Result<(), CoordinatorError> {
        let mut state = self.state.lock();
        if let Some(entry) = state.sessions.remove(id) {
            apply_invalidation(&mut state, id, entry.behavior);
        }
        Ok(())
    }

    async fn event_fire(&self, event: &UserEvent) -> Result<String, CoordinatorError> {
        let mut state = self.state.lock();
        let id = format!("evt-{}", state.next_event_id);
        state.next_event_id += 1;

        let fired = UserEvent {
            id: id.clone(),
            ..event.clone()
        };
        state.fired.push(fired.clone());
        state.events.push(fired);
        state.event_index += 1;

        let host = event
            .node_filter
            .strip_prefix('^')
            .unwrap_or(&event.node_filter)
            .to_string();
        if let Some(msgs) = state.replies.remove(&host) {
            let source = format!("node {host}");
            for msg in msgs {
                let reply_id = format!("evt-{}", state.next_event_id);
                state.next_event_id += 1;
                state.events.push(UserEvent {
                    id: reply_id,
                    name: event.name.clone(),
                    payload: reply_payload(&source, &msg, &id),
                    node_filter: String::new(),
                });
                state.event_index += 1;
            }
        }

        Ok(id)
    }

    async fn event_list(
        &self,
        name: &str,
        index: u64,
        wait: Duration,
    ) -> Result<(Vec<UserEvent>, u64), CoordinatorError> {
        let deadline = Instant::now() + wait;
        loop {
            {
                let state = self.state.lock();
                if state.event_index > index {
                    let events = state
                        .events
                        .iter()
                        .filter(|e| e.name == name)
                        .cloned()
                        .collect();
                    return Ok((events, state.event_index));
                }
            }
            if Instant::now() >= deadline {
                let state = self.state.lock();
                let events = state
                    .events
                    .iter()
                    .filter(|e| e.name == name)
                    .cloned()
                    .collect();
                return Ok((events, index));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}
