//! The roll engine: ordered, single-flight rolling CM runs.
//!
//! A roll resolves its target nodes in a deterministic order, takes the
//! cluster-wide roll lock, fires a `cascade.cm` user event at each node in
//! turn, and waits for a terminal reply before moving on. A failure halts
//! the roll; teardown always releases the lock (or lets the session TTL
//! clean it up server-side).

mod dispatch;
mod error;
mod lock;
mod resolver;
mod roller;

pub use dispatch::CascadeEvent;
pub use error::RollError;
pub use lock::{invoking_user, RollLock, ROLL_KEY};
pub use resolver::{resolve_nodes, RUN_ORDER_KEY, SERVICE_NAME};
pub use roller::Roller;
