//! Per-node dispatch: fire the run event, watch for the correlated reply.

use cascade_coordinator::{Coordinator, EventWatch, UserEvent, WatchHandle};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::RollError;

/// User-event name carrying CM run requests and their replies.
pub(crate) const EVENT_NAME: &str = "cascade.cm";

/// `source` label on events this process emits.
const EVENT_SOURCE: &str = "cascade cli";

pub(crate) const MSG_RUN: &str = "run";
pub(crate) const MSG_SUCCESS: &str = "success";
pub(crate) const MSG_FAIL: &str = "fail";

/// The wire object exchanged over the `cascade.cm` event stream.
///
/// Outbound events carry `msg: "run"` and an empty `ref`; replies echo the
/// outbound event's id in `ref` and report progress tokens in `msg`, ending
/// with `success` or `fail`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeEvent {
    pub source: String,
    pub msg: String,
    #[serde(rename = "ref")]
    pub ref_id: String,
}

impl CascadeEvent {
    pub(crate) fn run_request() -> Self {
        CascadeEvent {
            source: EVENT_SOURCE.to_string(),
            msg: MSG_RUN.to_string(),
            ref_id: String::new(),
        }
    }
}

/// One end-to-end dispatch cycle against `host`.
///
/// Fires `cascade.cm` at the host (the `^` anchor keeps `web1` from also
/// matching `web10`), then follows the event stream until a reply whose
/// `ref` matches the fired event id reports a terminal message. Progress
/// tokens are forwarded on `progress` as they arrive; duplicates are
/// possible since the stream is a windowed history.
///
/// The watch's stop handle is parked in `watch_slot` so teardown can
/// unblock the stream from another task; a cancelled watch resolves the
/// dispatch as clean (the roller decides what an interrupt means).
pub(crate) async fn dispatch(
    coordinator: &dyn Coordinator,
    progress: &mpsc::Sender<String>,
    watch_slot: &Mutex<Option<WatchHandle>>,
    host: &str,
) -> Result<(), RollError> {
    let payload = serde_json::to_vec(&CascadeEvent::run_request())?;
    let request = UserEvent {
        id: String::new(),
        name: EVENT_NAME.to_string(),
        payload,
        node_filter: format!("^{host}"),
    };

    let mut watch = EventWatch::new(EVENT_NAME);
    *watch_slot.lock() = Some(watch.handle());

    let cur_id = match coordinator.event_fire(&request).await {
        Ok(id) => id,
        Err(err) => {
            *watch_slot.lock() = None;
            return Err(err.into());
        }
    };
    debug!(%host, event = %cur_id, "dispatched run request");

    // Header line for the renderer.
    let _ = progress.send(host.to_string()).await;

    let outcome = follow_replies(coordinator, progress, &mut watch, &cur_id).await;
    *watch_slot.lock() = None;

    match outcome? {
        Reply::Failed => Err(RollError::RemoteFail),
        Reply::Succeeded | Reply::WatchStopped => Ok(()),
    }
}

enum Reply {
    Succeeded,
    Failed,
    /// The watch was cancelled from outside before a terminal reply.
    WatchStopped,
}

async fn follow_replies(
    coordinator: &dyn Coordinator,
    progress: &mpsc::Sender<String>,
    watch: &mut EventWatch,
    cur_id: &str,
) -> Result<Reply, RollError> {
    while let Some(batch) = watch.next_batch(coordinator).await? {
        for event in &batch {
            let reply: CascadeEvent = match serde_json::from_slice(&event.payload) {
                Ok(reply) => reply,
                Err(err) => {
                    // One malformed event must not poison the stream.
                    warn!(event = %event.id, "skipping undecodable event payload: {err}");
                    continue;
                }
            };

            // Sole correlation rule: replies echo our event id in `ref`.
            if reply.ref_id != cur_id {
                continue;
            }

            let _ = progress.send(reply.msg.clone()).await;

            match reply.msg.as_str() {
                MSG_SUCCESS => {
                    watch.stop();
                    return Ok(Reply::Succeeded);
                }
                MSG_FAIL => {
                    watch.stop();
                    return Ok(Reply::Failed);
                }
                _ => {}
            }
        }
    }
    Ok(Reply::WatchStopped)
}
