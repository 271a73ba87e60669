//! Typed async client for the cascade coordinator.
//!
//! The coordinator is a Consul-compatible service exposing catalog, agent,
//! KV, session, and user-event endpoints. This crate wraps that HTTP API
//! behind the object-safe [`Coordinator`] trait so the roll engine can be
//! driven against an in-memory implementation in tests, and provides the
//! [`EventWatch`] long-poll primitive used to follow the user-event stream.

mod client;
mod error;
mod types;
mod watch;

pub use client::{ConsulCoordinator, Coordinator};
pub use error::CoordinatorError;
pub use types::{
    AgentConfig, AgentService, CatalogNode, KvPair, NodeRecord, ServiceRegistration,
    SessionBehavior, SessionEntry, UserEvent,
};
pub use watch::{EventWatch, WatchHandle};
