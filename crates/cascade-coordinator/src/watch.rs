//! Long-poll watch over the user-event stream.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::client::Coordinator;
use crate::error::CoordinatorError;
use crate::types::UserEvent;

/// Default blocking-query wait. The coordinator returns early whenever the
/// event index advances; this only bounds an idle poll.
const DEFAULT_WAIT: Duration = Duration::from_secs(60);

/// An index-tracking pull loop over [`Coordinator::event_list`].
///
/// Each delivered batch is the coordinator's current event window, so an
/// event may appear in more than one batch; the watch does not deduplicate.
/// A [`WatchHandle`] cloned off before the loop starts lets another task
/// unblock the watcher (teardown on interrupt).
pub struct EventWatch {
    name: String,
    wait: Duration,
    index: u64,
    primed: bool,
    cancel: CancellationToken,
}

/// Remote stop handle for an [`EventWatch`].
#[derive(Clone)]
pub struct WatchHandle {
    cancel: CancellationToken,
}

impl WatchHandle {
    /// Stop the watch. The watcher's pending `next_batch` resolves to
    /// `Ok(None)`.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl EventWatch {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            wait: DEFAULT_WAIT,
            index: 0,
            primed: false,
            cancel: CancellationToken::new(),
        }
    }

    /// Override the per-poll wait (mainly for tests).
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    pub fn handle(&self) -> WatchHandle {
        WatchHandle {
            cancel: self.cancel.clone(),
        }
    }

    /// Stop the watch from the owning task.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// The next event batch, or `None` once the watch is stopped.
    ///
    /// Blocks until the coordinator's event index advances past the last
    /// delivered batch. The very first call returns the current window
    /// as-is, which is how replies that raced ahead of the watch are
    /// picked up.
    pub async fn next_batch(
        &mut self,
        coordinator: &dyn Coordinator,
    ) -> Result<Option<Vec<UserEvent>>, CoordinatorError> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(None);
            }

            let poll = coordinator.event_list(&self.name, self.index, self.wait);
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(None),
                result = poll => {
                    let (events, new_index) = result?;
                    let advanced = !self.primed || new_index != self.index;
                    self.primed = true;
                    self.index = new_index;
                    if advanced && !events.is_empty() {
                        return Ok(Some(events));
                    }
                    // Idle poll expired with no index movement; go around.
                }
            }
        }
    }
}
