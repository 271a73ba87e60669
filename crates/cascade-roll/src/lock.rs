//! The cluster-wide roll lock.
//!
//! A TTL session plus one conditionally-acquired KV pair. The session's
//! delete-on-invalidate behavior is the safety net: if the holder dies
//! without releasing, the pair is deleted when the TTL runs out.

use cascade_coordinator::{Coordinator, KvPair, SessionBehavior, SessionEntry};
use tracing::{debug, warn};

use crate::error::RollError;

/// KV key of the roll mutex. Its value is the invoking user's name.
pub const ROLL_KEY: &str = "cascade/roll";

const SESSION_NAME: &str = "cascade";

/// Session TTL; also the cadence ceiling for renewals. Generous enough to
/// cover a slow per-node CM run between renewals.
const SESSION_TTL: &str = "250s";

/// The name the lock is attributed to: `$USER`, except that a sudo'd
/// invocation is attributed to the human behind it rather than to root.
pub fn invoking_user() -> String {
    let user = std::env::var("USER").unwrap_or_default();
    if user == "root" {
        if let Ok(sudo_user) = std::env::var("SUDO_USER") {
            if !sudo_user.is_empty() {
                return sudo_user;
            }
        }
    }
    user
}

/// A held roll lock: the live session and the acquired pair.
pub struct RollLock {
    session_id: String,
    pair: KvPair,
}

impl RollLock {
    /// Create a session and conditionally acquire the roll key.
    ///
    /// A rejected acquire is diagnosed by re-reading the key: a pair means
    /// someone holds the lock, no pair means the acquire lost a race with a
    /// lock that is mid-cleanup. Either way the fresh session is destroyed
    /// so it does not linger until its TTL.
    pub async fn acquire(coordinator: &dyn Coordinator, user: &str) -> Result<Self, RollError> {
        let entry = SessionEntry {
            name: SESSION_NAME.to_string(),
            ttl: SESSION_TTL.to_string(),
            behavior: SessionBehavior::Delete,
        };
        let session_id = coordinator.session_create(&entry).await?;

        let pair = KvPair {
            key: ROLL_KEY.to_string(),
            value: user.as_bytes().to_vec(),
            session: Some(session_id.clone()),
        };

        match coordinator.kv_acquire(&pair).await {
            Ok(true) => {
                debug!(session = %session_id, %user, "acquired roll lock");
                Ok(Self { session_id, pair })
            }
            Ok(false) => {
                Self::discard_session(coordinator, &session_id).await;
                match coordinator.kv_get(ROLL_KEY).await? {
                    Some(current) => Err(RollError::LockHeld {
                        holder: String::from_utf8_lossy(&current.value).into_owned(),
                    }),
                    None => Err(RollError::LockStale),
                }
            }
            Err(err) => {
                Self::discard_session(coordinator, &session_id).await;
                Err(err.into())
            }
        }
    }

    async fn discard_session(coordinator: &dyn Coordinator, session_id: &str) {
        if let Err(err) = coordinator.session_destroy(session_id).await {
            warn!(session = %session_id, "failed to destroy unused roll session: {err}");
        }
    }

    /// Reset the session TTL. Must run after every per-node dispatch; a
    /// vanished session means the lock is gone and the roll must stop.
    pub async fn renew(&self, coordinator: &dyn Coordinator) -> Result<(), RollError> {
        match coordinator.session_renew(&self.session_id).await? {
            Some(_) => Ok(()),
            None => Err(RollError::LockLost),
        }
    }

    /// Release the pair, then destroy the session.
    ///
    /// The session destroy runs even when the release is rejected: session
    /// invalidation deletes the held pair server-side, so a failed release
    /// still converges. The rejection is surfaced as an error regardless,
    /// since the operator should know the explicit release did not take.
    pub async fn release(&self, coordinator: &dyn Coordinator) -> Result<(), RollError> {
        let released = coordinator.kv_release(&self.pair).await?;
        if !released {
            warn!(
                key = ROLL_KEY,
                "lock release rejected; session invalidation will delete the pair"
            );
        }

        coordinator.session_destroy(&self.session_id).await?;

        if released {
            Ok(())
        } else {
            Err(RollError::ReleaseFailed)
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // All USER/SUDO_USER cases live in one test so no parallel test in this
    // binary races the environment.
    #[test]
    fn invoking_user_prefers_sudo_user_over_root() {
        std::env::set_var("USER", "alice");
        std::env::remove_var("SUDO_USER");
        assert_eq!(invoking_user(), "alice");

        std::env::set_var("USER", "root");
        std::env::set_var("SUDO_USER", "bob");
        assert_eq!(invoking_user(), "bob");

        std::env::set_var("USER", "root");
        std::env::set_var("SUDO_USER", "");
        assert_eq!(invoking_user(), "root");

        // SUDO_USER only matters when USER is root.
        std::env::set_var("USER", "carol");
        std::env::set_var("SUDO_USER", "bob");
        assert_eq!(invoking_user(), "carol");

        std::env::remove_var("SUDO_USER");
    }
}
