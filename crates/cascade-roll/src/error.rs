use cascade_coordinator::CoordinatorError;
use thiserror::Error;

/// Everything that can abort a roll. All variants are fatal to the current
/// run; the roller tears down and the error reaches the operator as-is.
#[derive(Error, Debug)]
pub enum RollError {
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    #[error("lock held by {holder}")]
    LockHeld { holder: String },

    #[error("possibly a stale lock, try again shortly")]
    LockStale,

    #[error("session renewal failed")]
    LockLost,

    #[error("failed to release lock")]
    ReleaseFailed,

    #[error("no nodes matching role {role}")]
    NoNodes { role: String },

    #[error("failed to decode run order manifest: {0}")]
    ManifestParse(#[from] serde_yaml::Error),

    #[error("failed to encode event payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("failure roll stopped")]
    RemoteFail,
}
