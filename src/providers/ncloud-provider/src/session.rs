//! The single live session of a provider instance.
//!
//! All mutation goes through [`SessionStore`]. A writer lock covers each
//! read-modify-write of the in-memory session together with its persistence,
//! so storage always ends up holding the last value written to memory. Token
//! exchanges are serialized by a separate async lock so that concurrent
//! refreshes collapse into one remote call; the writer lock is never held
//! across an await.

use crate::clock::Clock;
use crate::error::CallError;
use chrono::{DateTime, Duration, Utc};
use ncloud_core::auth::{SessionEvent, SessionStatus};
use ncloud_core::storage::SessionStorage;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user_id: Option<String>,
    /// Cookie header value sent with authenticated requests.
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub status: SessionStatus,
    pub credentials: Option<Credentials>,
}

impl Session {
    pub fn unauthenticated() -> Self {
        Self::without_credentials(SessionStatus::Unauthenticated)
    }

    pub fn active(credentials: Credentials) -> Self {
        Self {
            status: SessionStatus::Active,
            credentials: Some(credentials),
        }
    }

    fn without_credentials(status: SessionStatus) -> Self {
        Self {
            status,
            credentials: None,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.credentials.as_ref()?.user_id.as_deref()
    }

    pub fn access_token(&self) -> Option<&str> {
        self.credentials.as_ref().map(|c| c.access_token.as_str())
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.credentials.as_ref().map(|c| c.expires_at)
    }
}

/// On-disk shape of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedSession {
    user_id: Option<String>,
    access_token: String,
    refresh_token: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    expires_at: DateTime<Utc>,
}

impl From<&Credentials> for PersistedSession {
    fn from(c: &Credentials) -> Self {
        Self {
            user_id: c.user_id.clone(),
            access_token: c.access_token.clone(),
            refresh_token: c.refresh_token.clone(),
            expires_at: c.expires_at,
        }
    }
}

impl From<PersistedSession> for Credentials {
    fn from(p: PersistedSession) -> Self {
        Self {
            user_id: p.user_id,
            access_token: p.access_token,
            refresh_token: p.refresh_token,
            expires_at: p.expires_at,
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session persistence degraded: {0}")]
    Persistence(String),
    #[error("session refresh rejected: {0}")]
    RefreshRejected(String),
    #[error("no active session")]
    NotAuthenticated,
    #[error(transparent)]
    Call(#[from] CallError),
}

/// Exchanges a session's refresh credential for fresh credentials.
#[async_trait::async_trait]
pub trait TokenExchange: Send + Sync {
    async fn exchange(
        &self,
        credentials: &Credentials,
        cancel: &CancellationToken,
    ) -> Result<Credentials, CallError>;
}

pub struct SessionStore {
    state: RwLock<Session>,
    writer: StdMutex<()>,
    storage: Arc<dyn SessionStorage>,
    storage_key: String,
    refresh_margin: Duration,
    clock: Arc<dyn Clock>,
    exchange: Arc<dyn TokenExchange>,
    refresh_lock: Mutex<()>,
    events: broadcast::Sender<SessionEvent>,
}

fn truncate_to_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at)
}

impl SessionStore {
    /// Restores the persisted session, falling back to `Unauthenticated`
    /// when the record is missing, unreadable or corrupt.
    pub fn load(
        storage: Arc<dyn SessionStorage>,
        storage_key: impl Into<String>,
        refresh_margin: std::time::Duration,
        clock: Arc<dyn Clock>,
        exchange: Arc<dyn TokenExchange>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        let storage_key = storage_key.into();
        let session = match storage.load(&storage_key) {
            Ok(Some(raw)) => match serde_json::from_str::<PersistedSession>(&raw) {
                Ok(record) if !record.access_token.is_empty() => Session::active(record.into()),
                Ok(_) => {
                    tracing::warn!(key = %storage_key, "persisted session has no token, ignoring");
                    Session::unauthenticated()
                }
                Err(err) => {
                    tracing::warn!(key = %storage_key, error = %err, "persisted session is corrupt, ignoring");
                    Session::unauthenticated()
                }
            },
            Ok(None) => Session::unauthenticated(),
            Err(err) => {
                tracing::warn!(key = %storage_key, error = %err, "failed to read persisted session");
                Session::unauthenticated()
            }
        };
        tracing::debug!(status = ?session.status, "session loaded");

        Self {
            state: RwLock::new(session),
            writer: StdMutex::new(()),
            storage,
            storage_key,
            refresh_margin: Duration::from_std(refresh_margin).unwrap_or(Duration::seconds(60)),
            clock,
            exchange,
            refresh_lock: Mutex::new(()),
            events,
        }
    }

    fn snapshot(&self) -> Session {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swaps the in-memory session and reports whether the status changed.
    fn replace(&self, session: Session) -> SessionStatus {
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let previous = guard.status;
        *guard = session;
        previous
    }

    fn notify_status(&self, previous: SessionStatus, current: SessionStatus) {
        if previous != current {
            tracing::info!(from = ?previous, to = ?current, "session status changed");
            let _ = self
                .events
                .send(SessionEvent::StatusChanged { status: current });
        }
    }

    fn degraded(&self, message: String) -> SessionError {
        tracing::warn!(error = %message, "session persistence degraded");
        let _ = self.events.send(SessionEvent::PersistenceDegraded {
            message: message.clone(),
        });
        SessionError::Persistence(message)
    }

    /// The live session. An active session whose expiry has passed is
    /// reported as `Expired`; nothing is refreshed here.
    pub fn current(&self) -> Session {
        let mut session = self.snapshot();
        if session.status == SessionStatus::Active {
            if let Some(expires_at) = session.expires_at() {
                if expires_at <= self.clock.now() {
                    session.status = SessionStatus::Expired;
                }
            }
        }
        session
    }

    pub fn status(&self) -> SessionStatus {
        self.current().status
    }

    /// Credentials usable for a request right now.
    pub fn credentials(&self) -> Option<Credentials> {
        let session = self.current();
        if session.status.is_active() {
            session.credentials
        } else {
            None
        }
    }

    fn lock_writer(&self) -> std::sync::MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Derives the next session from the live one and persists it, all under
    /// the writer lock. Returns `false` when `update` declines to change
    /// anything.
    fn commit<F>(&self, update: F) -> Result<bool, SessionError>
    where
        F: FnOnce(&Session) -> Option<Session>,
    {
        let _writer = self.lock_writer();
        let Some(mut session) = update(&self.snapshot()) else {
            return Ok(false);
        };
        if let Some(credentials) = session.credentials.as_mut() {
            credentials.expires_at = truncate_to_millis(credentials.expires_at);
        }
        let record = session.credentials.as_ref().map(PersistedSession::from);
        let status = session.status;
        let previous = self.replace(session);
        self.notify_status(previous, status);

        let persisted = match record {
            Some(record) => serde_json::to_string(&record)
                .map_err(|e| e.to_string())
                .and_then(|raw| {
                    self.storage
                        .store(&self.storage_key, &raw)
                        .map_err(|e| e.to_string())
                }),
            None => self
                .storage
                .remove(&self.storage_key)
                .map_err(|e| e.to_string()),
        };
        persisted.map_err(|message| self.degraded(message))?;
        Ok(true)
    }

    /// Replaces the session and persists it.
    ///
    /// The in-memory value is updated even when storage fails; the failure is
    /// returned and broadcast as `PersistenceDegraded`.
    pub fn save(&self, session: Session) -> Result<(), SessionError> {
        self.commit(|_| Some(session)).map(|_| ())
    }

    /// Marks a login ceremony as running unless a usable session exists.
    pub fn begin_login(&self) {
        let _writer = self.lock_writer();
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if guard.status != SessionStatus::Active {
            let previous = guard.status;
            *guard = Session::without_credentials(SessionStatus::Pending);
            drop(guard);
            self.notify_status(previous, SessionStatus::Pending);
        }
    }

    /// Undoes [`begin_login`](Self::begin_login) after a failed ceremony.
    pub fn abandon_login(&self) {
        let _writer = self.lock_writer();
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if guard.status == SessionStatus::Pending {
            *guard = Session::unauthenticated();
            drop(guard);
            self.notify_status(SessionStatus::Pending, SessionStatus::Unauthenticated);
        }
    }

    /// Logs out locally: `Unauthenticated`, persisted record removed.
    pub fn clear(&self) -> Result<(), SessionError> {
        self.save(Session::unauthenticated())
    }

    /// The remote no longer honours the credentials.
    pub fn revoke(&self) -> Result<(), SessionError> {
        self.save(Session::without_credentials(SessionStatus::Revoked))
    }

    /// Expires the session, unless `token` has already been replaced.
    fn expire_if_current(&self, token: &str) -> Result<bool, SessionError> {
        self.commit(|live| {
            (live.status == SessionStatus::Active && live.access_token() == Some(token))
                .then(|| Session::without_credentials(SessionStatus::Expired))
        })
    }

    /// Records the user id on whatever credentials are live at the time.
    pub fn set_user_id(&self, user_id: String) -> Result<(), SessionError> {
        self.commit(|live| {
            let credentials = live.credentials.as_ref()?;
            if credentials.user_id.as_deref() == Some(user_id.as_str()) {
                return None;
            }
            let mut updated = live.clone();
            if let Some(credentials) = updated.credentials.as_mut() {
                credentials.user_id = Some(user_id);
            }
            Some(updated)
        })
        .map(|_| ())
    }

    /// True when an active session with a refresh credential is within the
    /// safety margin of its expiry (or past it).
    pub fn needs_refresh(&self) -> bool {
        let session = self.snapshot();
        match (&session.status, &session.credentials) {
            (SessionStatus::Active, Some(credentials)) => {
                credentials.refresh_token.is_some()
                    && credentials.expires_at - self.clock.now() <= self.refresh_margin
            }
            _ => false,
        }
    }

    async fn lock_refresh(
        &self,
        cancel: &CancellationToken,
    ) -> Result<tokio::sync::MutexGuard<'_, ()>, SessionError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CallError::Cancelled.into()),
            guard = self.refresh_lock.lock() => Ok(guard),
        }
    }

    /// Refreshes the session if it is inside the safety margin.
    ///
    /// Concurrent callers queue on one lock; whoever gets it first performs
    /// the exchange and the rest observe the refreshed session.
    pub async fn refresh(&self, cancel: &CancellationToken) -> Result<Session, SessionError> {
        let _guard = self.lock_refresh(cancel).await?;
        if !self.needs_refresh() {
            return Ok(self.current());
        }
        let credentials = self
            .snapshot()
            .credentials
            .ok_or(SessionError::NotAuthenticated)?;
        self.exchange_locked(credentials, cancel).await
    }

    /// Refreshes after the remote rejected `rejected_token`, unless another
    /// caller already replaced that token.
    pub async fn refresh_after_rejection(
        &self,
        rejected_token: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Session, SessionError> {
        let _guard = self.lock_refresh(cancel).await?;
        let session = self.snapshot();
        let credentials = match (session.status, session.credentials) {
            (SessionStatus::Active, Some(credentials)) => credentials,
            _ => return Err(SessionError::NotAuthenticated),
        };
        if rejected_token.is_some_and(|token| token != credentials.access_token) {
            tracing::debug!("credentials already refreshed by a concurrent call");
            return Ok(self.current());
        }
        if credentials.refresh_token.is_none() {
            self.expire_if_current(&credentials.access_token).ok();
            return Err(SessionError::RefreshRejected(
                "session has no refresh credential".into(),
            ));
        }
        self.exchange_locked(credentials, cancel).await
    }

    async fn exchange_locked(
        &self,
        credentials: Credentials,
        cancel: &CancellationToken,
    ) -> Result<Session, SessionError> {
        tracing::debug!(expires_at = %credentials.expires_at, "refreshing session");
        match self.exchange.exchange(&credentials, cancel).await {
            Ok(mut refreshed) => {
                // Logout or a new login may have landed while the exchange ran.
                let applied = self.commit(|live| match (live.status, &live.credentials) {
                    (SessionStatus::Active, Some(current))
                        if current.access_token == credentials.access_token =>
                    {
                        if refreshed.user_id.is_none() {
                            refreshed.user_id = current.user_id.clone();
                        }
                        Some(Session::active(refreshed))
                    }
                    _ => None,
                });
                match applied {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::debug!("session replaced during refresh, discarding exchanged credentials");
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "refreshed session kept in memory only");
                    }
                }
                let session = self.current();
                if session.status.is_active() {
                    Ok(session)
                } else {
                    Err(SessionError::NotAuthenticated)
                }
            }
            Err(err @ (CallError::Cancelled
            | CallError::Transient { .. }
            | CallError::Exhausted { .. }
            | CallError::RateLimited { .. })) => Err(err.into()),
            Err(err) => {
                match self.expire_if_current(&credentials.access_token) {
                    Ok(true) => tracing::warn!(error = %err, "session refresh rejected, session expired"),
                    Ok(false) if self.status().is_active() => {
                        tracing::debug!(error = %err, "refresh rejected for a session already replaced");
                        return Ok(self.current());
                    }
                    Ok(false) => {}
                    Err(persist) => {
                        tracing::warn!(error = %persist, "failed to drop expired session record")
                    }
                }
                Err(SessionError::RefreshRejected(err.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use ncloud_core::storage::{MemoryStorage, StorageError, StorageResult};
    use std::sync::atomic::{AtomicU32, Ordering};

    const KEY: &str = "ncloud/session";

    #[derive(Default)]
    struct CountingExchange {
        calls: AtomicU32,
        reject: bool,
    }

    #[async_trait::async_trait]
    impl TokenExchange for CountingExchange {
        async fn exchange(
            &self,
            credentials: &Credentials,
            _cancel: &CancellationToken,
        ) -> Result<Credentials, CallError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            if self.reject {
                return Err(CallError::Unauthorized {
                    message: "refresh token revoked".into(),
                });
            }
            Ok(Credentials {
                access_token: format!("MUSIC_U=refreshed{n}"),
                expires_at: credentials.expires_at + Duration::days(30),
                ..credentials.clone()
            })
        }
    }

    struct FailingStorage;

    impl SessionStorage for FailingStorage {
        fn load(&self, _key: &str) -> StorageResult<Option<String>> {
            Ok(None)
        }
        fn store(&self, _key: &str, _value: &str) -> StorageResult<()> {
            Err(StorageError::Unavailable("disk full".into()))
        }
        fn remove(&self, _key: &str) -> StorageResult<()> {
            Ok(())
        }
    }

    fn credentials(expires_at: DateTime<Utc>) -> Credentials {
        Credentials {
            user_id: Some("42".into()),
            access_token: "MUSIC_U=abc".into(),
            refresh_token: Some("MUSIC_U=abc".into()),
            expires_at,
        }
    }

    fn store_with(
        storage: Arc<dyn SessionStorage>,
        clock: Arc<ManualClock>,
        exchange: Arc<CountingExchange>,
    ) -> SessionStore {
        let (events, _) = broadcast::channel(16);
        SessionStore::load(
            storage,
            KEY,
            std::time::Duration::from_secs(60),
            clock,
            exchange,
            events,
        )
    }

    #[test]
    fn missing_or_corrupt_record_is_unauthenticated() {
        let storage = Arc::new(MemoryStorage::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = store_with(storage.clone(), clock.clone(), Arc::default());
        assert_eq!(store.current(), Session::unauthenticated());

        storage.store(KEY, "{not json").unwrap();
        let store = store_with(storage, clock, Arc::default());
        assert_eq!(store.status(), SessionStatus::Unauthenticated);
    }

    #[test]
    fn persisted_layout_is_flat_camel_case() {
        let storage = Arc::new(MemoryStorage::new());
        let now = Utc::now();
        let store = store_with(
            storage.clone(),
            Arc::new(ManualClock::new(now)),
            Arc::default(),
        );
        let expires_at = DateTime::from_timestamp_millis(1_800_000_000_123).unwrap();
        store.save(Session::active(credentials(expires_at))).unwrap();

        let raw = storage.load(KEY).unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["userId"], "42");
        assert_eq!(value["accessToken"], "MUSIC_U=abc");
        assert_eq!(value["refreshToken"], "MUSIC_U=abc");
        assert_eq!(value["expiresAt"], 1_800_000_000_123i64);
    }

    #[test]
    fn save_then_fresh_load_round_trips() {
        let storage = Arc::new(MemoryStorage::new());
        let now = Utc::now();
        let clock = Arc::new(ManualClock::new(now));
        let first = store_with(storage.clone(), clock.clone(), Arc::default());
        first
            .save(Session::active(credentials(now + Duration::days(10))))
            .unwrap();

        let second = store_with(storage, clock, Arc::default());
        assert_eq!(second.current(), first.current());
        assert_eq!(second.status(), SessionStatus::Active);
    }

    #[tokio::test]
    async fn fresh_session_is_active_without_refresh() {
        let now = Utc::now();
        let exchange = Arc::new(CountingExchange::default());
        let store = store_with(
            Arc::new(MemoryStorage::new()),
            Arc::new(ManualClock::new(now)),
            exchange.clone(),
        );
        store
            .save(Session::active(credentials(now + Duration::hours(1))))
            .unwrap();

        assert_eq!(store.status(), SessionStatus::Active);
        assert!(!store.needs_refresh());
        store.refresh(&CancellationToken::new()).await.unwrap();
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn concurrent_refreshes_collapse_into_one_exchange() {
        let now = Utc::now();
        let exchange = Arc::new(CountingExchange::default());
        let store = Arc::new(store_with(
            Arc::new(MemoryStorage::new()),
            Arc::new(ManualClock::new(now)),
            exchange.clone(),
        ));
        store
            .save(Session::active(credentials(now + Duration::seconds(30))))
            .unwrap();
        assert!(store.needs_refresh());

        let cancel = CancellationToken::new();
        let results =
            futures::future::join_all((0..8).map(|_| store.refresh(&cancel))).await;

        assert_eq!(exchange.calls.load(Ordering::SeqCst), 1);
        for session in results {
            assert_eq!(session.unwrap().access_token(), Some("MUSIC_U=refreshed1"));
        }
    }

    #[tokio::test]
    async fn rejection_refresh_skips_already_replaced_token() {
        let now = Utc::now();
        let exchange = Arc::new(CountingExchange::default());
        let store = store_with(
            Arc::new(MemoryStorage::new()),
            Arc::new(ManualClock::new(now)),
            exchange.clone(),
        );
        store
            .save(Session::active(credentials(now + Duration::days(5))))
            .unwrap();
        let cancel = CancellationToken::new();

        store
            .refresh_after_rejection(Some("MUSIC_U=abc"), &cancel)
            .await
            .unwrap();
        store
            .refresh_after_rejection(Some("MUSIC_U=abc"), &cancel)
            .await
            .unwrap();
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejected_refresh_expires_session() {
        let now = Utc::now();
        let storage = Arc::new(MemoryStorage::new());
        let exchange = Arc::new(CountingExchange {
            reject: true,
            ..CountingExchange::default()
        });
        let store = store_with(
            storage.clone(),
            Arc::new(ManualClock::new(now)),
            exchange,
        );
        store
            .save(Session::active(credentials(now + Duration::seconds(10))))
            .unwrap();

        let err = store.refresh(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SessionError::RefreshRejected(_)));
        assert_eq!(store.status(), SessionStatus::Expired);
        assert_eq!(storage.load(KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn logout_during_refresh_is_not_undone() {
        let now = Utc::now();
        let storage = Arc::new(MemoryStorage::new());
        let exchange = Arc::new(CountingExchange::default());
        let store = store_with(
            storage.clone(),
            Arc::new(ManualClock::new(now)),
            exchange.clone(),
        );
        store
            .save(Session::active(credentials(now + Duration::seconds(30))))
            .unwrap();

        let cancel = CancellationToken::new();
        let (refreshed, _) = tokio::join!(store.refresh(&cancel), async {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            store.clear().unwrap();
        });

        assert_eq!(exchange.calls.load(Ordering::SeqCst), 1);
        assert!(matches!(refreshed, Err(SessionError::NotAuthenticated)));
        assert_eq!(store.status(), SessionStatus::Unauthenticated);
        assert_eq!(storage.load(KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn login_during_refresh_keeps_new_credentials() {
        let now = Utc::now();
        let storage = Arc::new(MemoryStorage::new());
        let store = store_with(
            storage.clone(),
            Arc::new(ManualClock::new(now)),
            Arc::default(),
        );
        store
            .save(Session::active(credentials(now + Duration::seconds(30))))
            .unwrap();
        let replacement = Credentials {
            user_id: Some("77".into()),
            access_token: "MUSIC_U=second-login".into(),
            refresh_token: Some("MUSIC_U=second-login".into()),
            expires_at: now + Duration::days(30),
        };

        let cancel = CancellationToken::new();
        let (refreshed, _) = tokio::join!(store.refresh(&cancel), async {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            store.save(Session::active(replacement.clone())).unwrap();
        });

        let session = refreshed.unwrap();
        assert_eq!(session.access_token(), Some("MUSIC_U=second-login"));
        let raw = storage.load(KEY).unwrap().unwrap();
        assert!(raw.contains("MUSIC_U=second-login"));
    }

    #[test]
    fn concurrent_writers_leave_storage_matching_memory() {
        let now = Utc::now();
        let storage = Arc::new(MemoryStorage::new());
        let store = store_with(
            storage.clone(),
            Arc::new(ManualClock::new(now)),
            Arc::default(),
        );
        store
            .save(Session::active(credentials(now + Duration::days(1))))
            .unwrap();

        std::thread::scope(|scope| {
            for i in 0..8 {
                let store = &store;
                scope.spawn(move || {
                    for round in 0..50 {
                        if (i + round) % 2 == 0 {
                            let mut next = credentials(now + Duration::days(1));
                            next.access_token = format!("MUSIC_U=t{i}-{round}");
                            store.save(Session::active(next)).unwrap();
                        } else {
                            store.set_user_id(format!("u{i}-{round}")).unwrap();
                        }
                    }
                });
            }
        });

        let live = store.current().credentials.unwrap();
        let raw = storage.load(KEY).unwrap().unwrap();
        let persisted: PersistedSession = serde_json::from_str(&raw).unwrap();
        assert_eq!(persisted.access_token, live.access_token);
        assert_eq!(persisted.user_id, live.user_id);
    }

    #[test]
    fn user_id_update_keeps_latest_token() {
        let now = Utc::now();
        let store = store_with(
            Arc::new(MemoryStorage::new()),
            Arc::new(ManualClock::new(now)),
            Arc::default(),
        );
        store
            .save(Session::active(credentials(now + Duration::days(1))))
            .unwrap();
        let mut rotated = credentials(now + Duration::days(30));
        rotated.access_token = "MUSIC_U=rotated".into();
        store.save(Session::active(rotated)).unwrap();

        store.set_user_id("1001".into()).unwrap();
        let session = store.current();
        assert_eq!(session.access_token(), Some("MUSIC_U=rotated"));
        assert_eq!(session.user_id(), Some("1001"));

        store.clear().unwrap();
        store.set_user_id("1002".into()).unwrap();
        assert_eq!(store.current(), Session::unauthenticated());
    }

    #[test]
    fn passing_expiry_reports_expired() {
        let now = Utc::now();
        let clock = Arc::new(ManualClock::new(now));
        let store = store_with(
            Arc::new(MemoryStorage::new()),
            clock.clone(),
            Arc::default(),
        );
        store
            .save(Session::active(credentials(now + Duration::minutes(5))))
            .unwrap();
        clock.advance(Duration::minutes(6));
        assert_eq!(store.status(), SessionStatus::Expired);
        assert!(store.credentials().is_none());
    }

    #[test]
    fn persistence_failure_still_updates_memory() {
        let (events, mut rx) = broadcast::channel(16);
        let now = Utc::now();
        let store = SessionStore::load(
            Arc::new(FailingStorage),
            KEY,
            std::time::Duration::from_secs(60),
            Arc::new(ManualClock::new(now)),
            Arc::new(CountingExchange::default()),
            events,
        );

        let err = store
            .save(Session::active(credentials(now + Duration::days(1))))
            .unwrap_err();
        assert!(matches!(err, SessionError::Persistence(_)));
        assert_eq!(store.status(), SessionStatus::Active);

        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::StatusChanged {
                status: SessionStatus::Active
            }
        );
        assert!(matches!(
            rx.try_recv().unwrap(),
            SessionEvent::PersistenceDegraded { .. }
        ));
    }

    #[test]
    fn login_marks_pending_only_without_active_session() {
        let now = Utc::now();
        let store = store_with(
            Arc::new(MemoryStorage::new()),
            Arc::new(ManualClock::new(now)),
            Arc::default(),
        );
        store.begin_login();
        assert_eq!(store.status(), SessionStatus::Pending);
        store.abandon_login();
        assert_eq!(store.status(), SessionStatus::Unauthenticated);

        store
            .save(Session::active(credentials(now + Duration::days(1))))
            .unwrap();
        store.begin_login();
        assert_eq!(store.status(), SessionStatus::Active);
    }
}
