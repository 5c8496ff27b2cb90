//! Persisted session and its lifecycle notifications.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::error::Error;
use crate::models::UserProfile;
use crate::storage::{ClientStorage, TOKEN_KEY, USER_KEY};
use crate::types::{BearerToken, Role, UserId};

const EVENT_CAPACITY: usize = 16;

/// Authenticated identity of this client.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub user_id: UserId,
    pub role: Role,
    pub token: BearerToken,
    pub profile: UserProfile,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// Explicit logout.
    LoggedOut,
    /// The API answered 401 to an authenticated request.
    CredentialRejected,
    /// Replacing the session failed to persist; the previous one is gone too.
    PersistFailed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Established { user_id: UserId, role: Role },
    Ended { reason: EndReason },
}

/// Single owner of the persisted session.
///
/// Every establish/end bumps an epoch counter; in-flight work tagged with an
/// older epoch belongs to a session that no longer exists.
pub struct SessionStore {
    storage: Arc<dyn ClientStorage>,
    epoch: AtomicU64,
    // serializes establish/end so the epoch and the stored keys move together
    write_lock: Mutex<()>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionStore {
    #[must_use]
    pub fn new(storage: Arc<dyn ClientStorage>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            storage,
            epoch: AtomicU64::new(0),
            write_lock: Mutex::new(()),
            events,
        }
    }

    /// Read the persisted session.
    ///
    /// Returns `None` when either the identity or the token is absent or
    /// unreadable. Never fails.
    #[must_use]
    pub fn current_session(&self) -> Option<Session> {
        let token = match self.storage.get(TOKEN_KEY) {
            Ok(Some(t)) if !t.is_empty() => BearerToken::new(t),
            Ok(_) => return None,
            Err(e) => {
                tracing::debug!(error = %e, "Token unreadable, treating as signed out");
                return None;
            }
        };
        let raw = match self.storage.get(USER_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::debug!(error = %e, "Identity unreadable, treating as signed out");
                return None;
            }
        };
        let profile: UserProfile = match serde_json::from_str(&raw) {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(error = %e, "Malformed stored identity, treating as signed out");
                return None;
            }
        };
        Some(Session {
            user_id: profile.id,
            role: profile.role.clone().unwrap_or(Role::Public),
            token,
            profile,
        })
    }

    /// The active user, if any.
    #[must_use]
    pub fn current_user_id(&self) -> Option<UserId> {
        self.current_session().map(|s| s.user_id)
    }

    /// Bearer credential to attach to outgoing calls.
    #[must_use]
    pub fn bearer_token(&self) -> Option<BearerToken> {
        self.storage
            .get(TOKEN_KEY)
            .ok()
            .flatten()
            .filter(|t| !t.is_empty())
            .map(BearerToken::new)
    }

    /// Current session epoch.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Persist a new session.
    ///
    /// Either both keys are written or neither remains: on any write failure
    /// both are removed and the error is returned. If a session was active
    /// before the failed write, subscribers get
    /// [`SessionEvent::Ended`] with [`EndReason::PersistFailed`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the profile cannot be serialized, or
    /// [`Error::Storage`] if a write fails.
    pub fn establish_session(
        &self,
        profile: UserProfile,
        token: BearerToken,
    ) -> Result<Session, Error> {
        let serialized = serde_json::to_string(&profile)?;

        let guard = self.write_lock.lock();
        let replacing = self.bearer_token().is_some();
        let written = self
            .storage
            .set(TOKEN_KEY, token.as_str())
            .and_then(|()| self.storage.set(USER_KEY, &serialized));
        if let Err(e) = written {
            tracing::error!(error = %e, replacing, "Session write failed, rolling back");
            if replacing {
                self.end_locked(EndReason::PersistFailed);
            } else {
                self.clear_keys();
                self.epoch.fetch_add(1, Ordering::AcqRel);
            }
            drop(guard);
            return Err(e);
        }
        self.epoch.fetch_add(1, Ordering::AcqRel);
        drop(guard);

        let session = Session {
            user_id: profile.id,
            role: profile.role.clone().unwrap_or(Role::Public),
            token,
            profile,
        };
        tracing::info!(user_id = %session.user_id, role = %session.role, "Session established");
        let _ = self.events.send(SessionEvent::Established {
            user_id: session.user_id,
            role: session.role.clone(),
        });
        Ok(session)
    }

    /// Remove the persisted session and notify subscribers.
    pub fn end_session(&self, reason: EndReason) {
        let guard = self.write_lock.lock();
        self.end_locked(reason);
        drop(guard);
    }

    /// End the session only if it is still the one tagged by `epoch`.
    ///
    /// Returns `false` when another caller already ended or replaced it.
    pub fn end_session_if_epoch(&self, epoch: u64, reason: EndReason) -> bool {
        let guard = self.write_lock.lock();
        if self.epoch() != epoch {
            return false;
        }
        self.end_locked(reason);
        drop(guard);
        true
    }

    /// Subscribe to session lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn end_locked(&self, reason: EndReason) {
        self.clear_keys();
        self.epoch.fetch_add(1, Ordering::AcqRel);
        tracing::info!(?reason, "Session ended");
        let _ = self.events.send(SessionEvent::Ended { reason });
    }

    fn clear_keys(&self) {
        for key in [TOKEN_KEY, USER_KEY] {
            if let Err(e) = self.storage.remove(key) {
                tracing::warn!(error = %e, key, "Failed to remove session key");
            }
        }
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("epoch", &self.epoch())
            .finish_non_exhaustive()
    }
}
