use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine;
use parking_lot::RwLock;
use tokio::sync::watch;

use crate::error::ClientError;
use crate::model::Target;

/// Progress of the JMX re-authentication handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    /// No challenge outstanding.
    Settled,
    /// A target challenged a request; credentials are needed. The counter
    /// increments on every challenge.
    Pending(u64),
    /// The outstanding challenge was given up on.
    Abandoned(u64),
}

/// Process-wide state for the currently connected target.
///
/// Cheap to clone; every clone shares the same selection, credential store
/// and authentication status. Pass it to each component that needs it.
#[derive(Clone)]
pub struct TargetContext {
    inner: Arc<Inner>,
}

struct Inner {
    selected: watch::Sender<Option<Target>>,
    credentials: RwLock<HashMap<String, String>>,
    auth: watch::Sender<AuthStatus>,
}

impl TargetContext {
    pub fn new() -> Self {
        let (selected, _) = watch::channel(None);
        let (auth, _) = watch::channel(AuthStatus::Settled);
        Self {
            inner: Arc::new(Inner {
                selected,
                credentials: RwLock::new(HashMap::new()),
                auth,
            }),
        }
    }

    /// Subscribe to the selected target. New subscribers see the latest
    /// value immediately.
    pub fn target(&self) -> watch::Receiver<Option<Target>> {
        self.inner.selected.subscribe()
    }

    pub fn current(&self) -> Option<Target> {
        self.inner.selected.borrow().clone()
    }

    /// The selected target, or [`ClientError::NoTarget`].
    pub fn require(&self) -> Result<Target, ClientError> {
        self.current().ok_or(ClientError::NoTarget)
    }

    pub fn select(&self, target: Target) {
        tracing::info!(target_id = %target.id(), "target selected");
        self.inner.selected.send_if_modified(|current| {
            if current.as_ref() == Some(&target) {
                false
            } else {
                *current = Some(target);
                true
            }
        });
    }

    pub fn disconnect(&self) {
        let changed = self.inner.selected.send_if_modified(|current| current.take().is_some());
        if changed {
            tracing::info!("target disconnected");
        }
    }

    /// Record that the target challenged a request for JMX credentials.
    pub fn set_auth_failure(&self) {
        self.inner.auth.send_modify(|status| {
            let round = match *status {
                AuthStatus::Settled => 1,
                AuthStatus::Pending(n) | AuthStatus::Abandoned(n) => n + 1,
            };
            *status = AuthStatus::Pending(round);
        });
        tracing::warn!(target_id = ?self.current().map(|t| t.id()), "target requires authentication");
    }

    /// Resolve once the outstanding challenge has been answered.
    ///
    /// Returns immediately if no challenge is outstanding and fails with
    /// [`ClientError::AuthAbandoned`] if the challenge is given up on.
    pub async fn auth_retry(&self) -> Result<(), ClientError> {
        let mut rx = self.inner.auth.subscribe();
        loop {
            match *rx.borrow_and_update() {
                AuthStatus::Settled => return Ok(()),
                AuthStatus::Abandoned(_) => return Err(ClientError::AuthAbandoned),
                AuthStatus::Pending(_) => {}
            }
            rx.changed()
                .await
                .map_err(|_| ClientError::AuthAbandoned)?;
        }
    }

    /// Observe challenges so a front end can prompt for credentials.
    pub fn auth_requests(&self) -> watch::Receiver<AuthStatus> {
        self.inner.auth.subscribe()
    }

    pub fn auth_status(&self) -> AuthStatus {
        *self.inner.auth.borrow()
    }

    /// Store JMX credentials for `target` and settle any outstanding
    /// challenge.
    pub fn store_credentials(&self, target: &Target, username: &str, password: &str) {
        let encoded = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", username, password));
        self.inner
            .credentials
            .write()
            .insert(target.id(), encoded);
        tracing::debug!(target_id = %target.id(), "stored target credentials");
        self.inner.auth.send_replace(AuthStatus::Settled);
    }

    /// Give up on the outstanding challenge; waiters fail.
    pub fn abandon_auth(&self) {
        self.inner.auth.send_modify(|status| {
            if let AuthStatus::Pending(n) = *status {
                *status = AuthStatus::Abandoned(n);
            }
        });
    }

    pub fn has_credentials(&self, target: &Target) -> bool {
        self.inner.credentials.read().contains_key(&target.id())
    }

    /// Base64 `user:password` for `target`, if stored.
    pub fn credentials(&self, target: &Target) -> Option<String> {
        self.inner.credentials.read().get(&target.id()).cloned()
    }

    pub fn forget_credentials(&self, target: &Target) {
        self.inner.credentials.write().remove(&target.id());
    }
}

impl Default for TargetContext {
    fn default() -> Self {
        Self::new()
    }
}
