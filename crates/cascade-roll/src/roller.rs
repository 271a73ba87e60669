//! Roll orchestration: resolve, lock, dispatch each node, tear down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cascade_coordinator::{Coordinator, WatchHandle};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::dispatch;
use crate::error::RollError;
use crate::lock::{invoking_user, RollLock};
use crate::resolver::resolve_nodes;

/// Progress channel depth. Small; it only has to absorb one bursty event
/// batch ahead of the renderer.
const PROGRESS_BUFFER: usize = 3;

/// Pause after each dispatch before renewing and moving on. Guards against
/// event-window de-duplication collisions in the coordinator and races
/// between a finished watch's teardown and the next watch's startup.
const DISPATCH_PACING: Duration = Duration::from_secs(1);

/// A single rolling run: the lock is held from construction until
/// [`Roller::destroy`].
///
/// `nodes` is the resolver's ordered output and may be overwritten before
/// the roll starts; that is how a single-host run discards the resolved
/// set. Share the roller in an `Arc` so a signal task can tear it down
/// while the main task is blocked in [`Roller::roll`].
pub struct Roller {
    /// Dispatch order. Mutable until the roll starts.
    pub nodes: Vec<String>,

    coordinator: Arc<dyn Coordinator>,
    lock: RollLock,
    progress: mpsc::Sender<String>,
    active_watch: Mutex<Option<WatchHandle>>,
    torn_down: AtomicBool,
}

impl std::fmt::Debug for Roller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Roller")
            .field("nodes", &self.nodes)
            .finish_non_exhaustive()
    }
}

impl Roller {
    /// Resolve targets and take the roll lock. Fails fast without touching
    /// any node: empty target set, lock contention, and transport errors
    /// all surface here.
    ///
    /// Returns the roller plus the receiving end of its progress channel;
    /// the caller owns rendering.
    pub async fn new(
        coordinator: Arc<dyn Coordinator>,
        role: &str,
    ) -> Result<(Self, mpsc::Receiver<String>), RollError> {
        let user = invoking_user();
        let nodes = resolve_nodes(coordinator.as_ref(), role).await?;
        let lock = RollLock::acquire(coordinator.as_ref(), &user).await?;
        let (progress, progress_rx) = mpsc::channel(PROGRESS_BUFFER);

        info!(%user, targets = nodes.len(), "roll lock acquired");

        let roller = Self {
            nodes,
            coordinator,
            lock,
            progress,
            active_watch: Mutex::new(None),
            torn_down: AtomicBool::new(false),
        };
        Ok((roller, progress_rx))
    }

    /// Dispatch every node strictly sequentially.
    ///
    /// After each successful dispatch: pacing sleep, then session renewal.
    /// A terminal `fail`, a lost session, or any coordinator error stops
    /// the roll; nodes after the failure are never dispatched. If teardown
    /// ran mid-roll (interrupt), the loop stops cleanly with `Ok`.
    pub async fn roll(&self) -> Result<(), RollError> {
        for node in &self.nodes {
            if self.torn_down.load(Ordering::SeqCst) {
                return Ok(());
            }

            dispatch::dispatch(
                self.coordinator.as_ref(),
                &self.progress,
                &self.active_watch,
                node,
            )
            .await?;

            tokio::time::sleep(DISPATCH_PACING).await;

            if self.torn_down.load(Ordering::SeqCst) {
                return Ok(());
            }
            self.lock.renew(self.coordinator.as_ref()).await?;
            debug!(%node, "dispatch complete, session renewed");
        }
        Ok(())
    }

    /// Tear down: stop the active watch, release the lock, destroy the
    /// session. Idempotent; must run on every exit path, including the
    /// signal task's.
    pub async fn destroy(&self) -> Result<(), RollError> {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(watch) = self.active_watch.lock().take() {
            watch.stop();
        }

        self.lock.release(self.coordinator.as_ref()).await
    }

    /// Id of the session holding the roll lock.
    pub fn session_id(&self) -> &str {
        self.lock.session_id()
    }
}
