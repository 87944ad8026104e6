//! Authentication session lookup consumed by the access gate.

use async_trait::async_trait;
use exam_core::model::UserId;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 16;

/// The signed-in identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub user_id: UserId,
    pub email: Option<String>,
}

/// Authentication state change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(UserId),
    SignedOut,
    Refreshed,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    #[error("auth service unavailable: {0}")]
    Unavailable(String),
}

/// Source of the current session and of change notifications.
#[async_trait]
pub trait AuthSessions: Send + Sync {
    /// The current session, or `None` when signed out.
    ///
    /// # Errors
    ///
    /// Returns `AuthError` when the identity service cannot be reached.
    async fn current_session(&self) -> Result<Option<AuthSession>, AuthError>;

    /// Subscribe to auth changes. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}

/// In-process session holder, used by the terminal runner and tests.
#[derive(Clone)]
pub struct LocalAuth {
    session: Arc<Mutex<Option<AuthSession>>>,
    events: broadcast::Sender<AuthEvent>,
}

impl Default for LocalAuth {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalAuth {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            session: Arc::new(Mutex::new(None)),
            events,
        }
    }

    /// Replace the current session and notify subscribers.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Unavailable` if the session lock is poisoned.
    pub fn sign_in(&self, session: AuthSession) -> Result<(), AuthError> {
        let user_id = session.user_id;
        *self
            .session
            .lock()
            .map_err(|e| AuthError::Unavailable(e.to_string()))? = Some(session);
        tracing::debug!(user.id = %user_id, "signed in");
        // No subscribers is fine.
        let _ = self.events.send(AuthEvent::SignedIn(user_id));
        Ok(())
    }

    /// Clear the current session and notify subscribers.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Unavailable` if the session lock is poisoned.
    pub fn sign_out(&self) -> Result<(), AuthError> {
        self.session
            .lock()
            .map_err(|e| AuthError::Unavailable(e.to_string()))?
            .take();
        tracing::debug!("signed out");
        let _ = self.events.send(AuthEvent::SignedOut);
        Ok(())
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }
}

#[async_trait]
impl AuthSessions for LocalAuth {
    async fn current_session(&self) -> Result<Option<AuthSession>, AuthError> {
        let guard = self
            .session
            .lock()
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;
        Ok(guard.clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sign_in_and_out_notify_subscribers() {
        let auth = LocalAuth::new();
        let mut rx = auth.subscribe();
        let user_id = UserId::random();

        auth.sign_in(AuthSession {
            user_id,
            email: None,
        })
        .unwrap();
        assert_eq!(rx.recv().await.unwrap(), AuthEvent::SignedIn(user_id));
        assert_eq!(
            auth.current_session().await.unwrap().map(|s| s.user_id),
            Some(user_id)
        );

        auth.sign_out().unwrap();
        assert_eq!(rx.recv().await.unwrap(), AuthEvent::SignedOut);
        assert!(auth.current_session().await.unwrap().is_none());
    }

    #[test]
    fn dropping_receiver_unsubscribes() {
        let auth = LocalAuth::new();
        let rx = auth.subscribe();
        assert_eq!(auth.subscriber_count(), 1);
        drop(rx);
        assert_eq!(auth.subscriber_count(), 0);
    }
}
