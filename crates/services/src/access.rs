//! Entitlement gate: decides whether the signed-in user may take a test.
//!
//! Every check draws a fresh request token. A finished check only writes its
//! result when its token is still the latest issued, so a slow lookup can
//! never overwrite the answer of a newer one.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use exam_core::Clock;
use exam_core::model::entitlement::evaluate;
use exam_core::model::{DenyReason, EntitlementRecord};
use storage::auth::AuthSessions;
use storage::repository::EntitlementRepository;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

/// Authorization state of the current user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessStatus {
    Loading,
    LoggedOut,
    NoAccess {
        reason: DenyReason,
        expires_at: Option<DateTime<Utc>>,
    },
    Allowed {
        expires_at: Option<DateTime<Utc>>,
        never_expires: bool,
    },
}

impl AccessStatus {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessStatus::Allowed { .. })
    }

    /// Maps an entitlement lookup onto a status.
    #[must_use]
    pub fn from_record(record: Option<&EntitlementRecord>, now: DateTime<Utc>) -> Self {
        let expires_at = record.and_then(|r| r.expires_at);
        match evaluate(record, now) {
            Ok(()) => AccessStatus::Allowed {
                expires_at,
                never_expires: record.is_some_and(|r| r.never_expires),
            },
            Err(reason) => AccessStatus::NoAccess { reason, expires_at },
        }
    }
}

impl fmt::Display for AccessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessStatus::Loading => f.write_str("checking access"),
            AccessStatus::LoggedOut => f.write_str("not signed in"),
            AccessStatus::NoAccess { reason, .. } => write!(f, "no access ({reason})"),
            AccessStatus::Allowed { .. } => f.write_str("allowed"),
        }
    }
}

#[derive(Debug, Clone)]
struct GateSnapshot {
    token: u64,
    status: AccessStatus,
}

struct GateInner {
    auth: Arc<dyn AuthSessions>,
    entitlements: Arc<dyn EntitlementRepository>,
    clock: Clock,
    issued: AtomicU64,
    state: watch::Sender<GateSnapshot>,
}

/// Shared handle to the gate. Clones observe the same state.
#[derive(Clone)]
pub struct AccessGate {
    inner: Arc<GateInner>,
}

impl AccessGate {
    #[must_use]
    pub fn new(
        auth: Arc<dyn AuthSessions>,
        entitlements: Arc<dyn EntitlementRepository>,
        clock: Clock,
    ) -> Self {
        let (state, _) = watch::channel(GateSnapshot {
            token: 0,
            status: AccessStatus::Loading,
        });
        Self {
            inner: Arc::new(GateInner {
                auth,
                entitlements,
                clock,
                issued: AtomicU64::new(0),
                state,
            }),
        }
    }

    /// Latest applied status.
    #[must_use]
    pub fn status(&self) -> AccessStatus {
        self.inner.state.borrow().status.clone()
    }

    /// Observe status changes.
    #[must_use]
    pub fn subscribe_status(&self) -> StatusWatch {
        StatusWatch {
            rx: self.inner.state.subscribe(),
        }
    }

    /// Re-run the entitlement check and return the status in effect afterwards.
    ///
    /// Concurrent calls are allowed; only the most recently started one is applied.
    pub async fn refresh(&self) -> AccessStatus {
        let token = self.inner.issued.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.state.send_if_modified(|snap| {
            if token > snap.token {
                snap.token = token;
                snap.status = AccessStatus::Loading;
                true
            } else {
                false
            }
        });

        let status = self.check().await;

        let applied = self.inner.state.send_if_modified(|snap| {
            if snap.token == token {
                snap.status = status.clone();
                true
            } else {
                false
            }
        });
        if applied {
            tracing::debug!(token, %status, "access status updated");
        } else {
            tracing::debug!(token, "discarding stale access check");
        }
        self.status()
    }

    async fn check(&self) -> AccessStatus {
        let session = match self.inner.auth.current_session().await {
            Ok(Some(session)) => session,
            Ok(None) => return AccessStatus::LoggedOut,
            Err(err) => {
                tracing::warn!(error = %err, "session lookup failed, treating as signed out");
                return AccessStatus::LoggedOut;
            }
        };

        match self.inner.entitlements.get_entitlement(session.user_id).await {
            Ok(record) => AccessStatus::from_record(record.as_ref(), self.inner.clock.now()),
            Err(err) => {
                if err.is_transient() {
                    tracing::warn!(user.id = %session.user_id, error = %err, "entitlement read failed");
                } else {
                    tracing::error!(user.id = %session.user_id, error = %err, "entitlement read refused");
                }
                AccessStatus::NoAccess {
                    reason: DenyReason::Blocked,
                    expires_at: None,
                }
            }
        }
    }

    /// Check now and again on every authentication change.
    ///
    /// Must be called inside a Tokio runtime. The returned guard stops
    /// listening when dropped.
    #[must_use]
    pub fn watch_auth(&self) -> GateSubscription {
        let mut events = self.inner.auth.subscribe();
        let gate = self.clone();
        let handle = tokio::spawn(async move {
            let mut checks = JoinSet::new();
            let first = gate.clone();
            checks.spawn(async move {
                first.refresh().await;
            });
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(event) => {
                            tracing::debug!(?event, "auth changed");
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::debug!(skipped, "auth events lagged");
                        }
                        Err(RecvError::Closed) => break,
                    },
                    Some(_) = checks.join_next() => continue,
                }
                let next = gate.clone();
                checks.spawn(async move {
                    next.refresh().await;
                });
            }
            while checks.join_next().await.is_some() {}
        });
        GateSubscription { handle }
    }
}

/// Receiver side of the gate status.
pub struct StatusWatch {
    rx: watch::Receiver<GateSnapshot>,
}

impl StatusWatch {
    #[must_use]
    pub fn current(&self) -> AccessStatus {
        self.rx.borrow().status.clone()
    }

    /// Wait for the next change. `None` once the gate is gone.
    pub async fn changed(&mut self) -> Option<AccessStatus> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().status.clone())
    }

    /// Wait until the gate settles on anything other than `Loading`.
    pub async fn settled(&mut self) -> Option<AccessStatus> {
        let snap = self
            .rx
            .wait_for(|snap| snap.status != AccessStatus::Loading)
            .await
            .ok()?;
        Some(snap.status.clone())
    }
}

/// Keeps the auth listener alive. Dropping it unsubscribes.
pub struct GateSubscription {
    handle: JoinHandle<()>,
}

impl GateSubscription {
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for GateSubscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration;
    use exam_core::model::UserId;
    use exam_core::time::fixed_now;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use storage::auth::{AuthSession, LocalAuth};
    use storage::repository::{InMemoryRepository, StorageError};
    use tokio::sync::Notify;

    fn record(user_id: UserId) -> EntitlementRecord {
        EntitlementRecord {
            user_id,
            active: true,
            never_expires: false,
            expires_at: Some(fixed_now() + Duration::days(1)),
            note: None,
        }
    }

    fn signed_in() -> (LocalAuth, UserId) {
        let auth = LocalAuth::new();
        let user_id = UserId::random();
        auth.sign_in(AuthSession {
            user_id,
            email: None,
        })
        .unwrap();
        (auth, user_id)
    }

    fn build_gate(auth: &LocalAuth, repo: Arc<dyn EntitlementRepository>) -> AccessGate {
        AccessGate::new(Arc::new(auth.clone()), repo, Clock::fixed(fixed_now()))
    }

    /// Replies from a script; a step with a gate waits for its release.
    struct Scripted {
        steps: Mutex<VecDeque<(Option<Arc<Notify>>, Result<Option<EntitlementRecord>, StorageError>)>>,
        entered: Notify,
    }

    #[async_trait]
    impl EntitlementRepository for Scripted {
        async fn get_entitlement(
            &self,
            _user_id: UserId,
        ) -> Result<Option<EntitlementRecord>, StorageError> {
            let (release, reply) = self
                .steps
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected entitlement read");
            self.entered.notify_one();
            if let Some(release) = release {
                release.notified().await;
            }
            reply
        }

        async fn upsert_entitlement(&self, _record: &EntitlementRecord) -> Result<(), StorageError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn starts_loading_then_reports_logged_out() {
        let auth = LocalAuth::new();
        let gate = build_gate(&auth, Arc::new(InMemoryRepository::new()));
        assert_eq!(gate.status(), AccessStatus::Loading);
        assert_eq!(gate.refresh().await, AccessStatus::LoggedOut);
    }

    #[tokio::test]
    async fn missing_row_is_denied() {
        let (auth, _) = signed_in();
        let gate = build_gate(&auth, Arc::new(InMemoryRepository::new()));
        assert_eq!(
            gate.refresh().await,
            AccessStatus::NoAccess {
                reason: DenyReason::MissingRow,
                expires_at: None
            }
        );
    }

    #[tokio::test]
    async fn valid_record_is_allowed() {
        let (auth, user_id) = signed_in();
        let repo = InMemoryRepository::new();
        repo.upsert_entitlement(&record(user_id)).await.unwrap();
        let gate = build_gate(&auth, Arc::new(repo));
        assert!(gate.refresh().await.is_allowed());
    }

    #[tokio::test]
    async fn expired_and_inactive_records_are_denied() {
        let (auth, user_id) = signed_in();
        let repo = InMemoryRepository::new();
        let gate = build_gate(&auth, Arc::new(repo.clone()));

        let expired = EntitlementRecord {
            expires_at: Some(fixed_now()),
            ..record(user_id)
        };
        repo.upsert_entitlement(&expired).await.unwrap();
        assert!(matches!(
            gate.refresh().await,
            AccessStatus::NoAccess {
                reason: DenyReason::Expired,
                ..
            }
        ));

        let inactive = EntitlementRecord {
            active: false,
            never_expires: true,
            ..record(user_id)
        };
        repo.upsert_entitlement(&inactive).await.unwrap();
        assert!(matches!(
            gate.refresh().await,
            AccessStatus::NoAccess {
                reason: DenyReason::Inactive,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn read_failures_block_access() {
        let (auth, _) = signed_in();
        for err in [
            StorageError::PermissionDenied("rls".into()),
            StorageError::Connection("offline".into()),
        ] {
            let repo = Scripted {
                steps: Mutex::new(VecDeque::from([(None, Err(err))])),
                entered: Notify::new(),
            };
            let gate = build_gate(&auth, Arc::new(repo));
            assert_eq!(
                gate.refresh().await,
                AccessStatus::NoAccess {
                    reason: DenyReason::Blocked,
                    expires_at: None
                }
            );
        }
    }

    #[tokio::test]
    async fn stale_check_never_overwrites_newer_result() {
        let (auth, user_id) = signed_in();
        let release = Arc::new(Notify::new());
        let repo = Arc::new(Scripted {
            steps: Mutex::new(VecDeque::from([
                (Some(Arc::clone(&release)), Ok(Some(record(user_id)))),
                (None, Ok(None)),
            ])),
            entered: Notify::new(),
        });
        let gate = build_gate(&auth, repo.clone());

        let slow = tokio::spawn({
            let gate = gate.clone();
            async move { gate.refresh().await }
        });
        repo.entered.notified().await;

        let denied = AccessStatus::NoAccess {
            reason: DenyReason::MissingRow,
            expires_at: None,
        };
        assert_eq!(gate.refresh().await, denied);

        release.notify_one();
        assert_eq!(slow.await.unwrap(), denied);
        assert_eq!(gate.status(), denied);
    }

    #[tokio::test]
    async fn watch_auth_follows_sign_in_and_unsubscribes_on_drop() {
        let auth = LocalAuth::new();
        let repo = InMemoryRepository::new();
        let user_id = UserId::random();
        repo.upsert_entitlement(&EntitlementRecord {
            never_expires: true,
            expires_at: None,
            ..record(user_id)
        })
        .await
        .unwrap();
        let gate = build_gate(&auth, Arc::new(repo));
        let mut status = gate.subscribe_status();

        let subscription = gate.watch_auth();
        assert_eq!(status.settled().await, Some(AccessStatus::LoggedOut));

        auth.sign_in(AuthSession {
            user_id,
            email: None,
        })
        .unwrap();
        let allowed = loop {
            match status.changed().await {
                Some(s @ AccessStatus::Allowed { .. }) => break s,
                Some(_) => {}
                None => panic!("gate dropped"),
            }
        };
        assert_eq!(
            allowed,
            AccessStatus::Allowed {
                expires_at: None,
                never_expires: true
            }
        );
        assert!(subscription.is_active());

        drop(subscription);
        for _ in 0..100 {
            if auth.subscriber_count() == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(auth.subscriber_count(), 0);
    }
}
