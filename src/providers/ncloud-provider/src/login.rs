//! QR login ceremony.
//!
//! One ceremony at a time: `start` hands out a ticket, `poll` walks it
//! through scan and confirmation, and expiry or `cancel` end it. A ticket
//! past its expiry is dead even if the remote later reports confirmation.

use crate::clock::Clock;
use crate::cookie::parse_login_cookie;
use crate::error::CallError;
use crate::session::{Credentials, Session, SessionStore};
use ncloud_core::auth::{LoginPoll, LoginState, LoginTicket};
use ncloud_core::provider::{ProviderError, ProviderResult};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A freshly issued login key and what to render for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrCode {
    pub key: String,
    pub qr_url: Option<String>,
    /// Inline image (data URI) of the code.
    pub qr_image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QrStatus {
    WaitingScan,
    WaitingConfirm,
    Expired,
    /// Raw cookie string issued for the new session.
    Confirmed { cookie: String },
}

/// Remote half of the ceremony.
#[async_trait::async_trait]
pub trait LoginBackend: Send + Sync {
    async fn create_qr(&self, cancel: &CancellationToken) -> Result<QrCode, CallError>;

    async fn check_qr(&self, key: &str, cancel: &CancellationToken) -> Result<QrStatus, CallError>;

    async fn fetch_user_id(
        &self,
        cookie: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, CallError>;
}

#[derive(Debug)]
struct Ceremony {
    state: LoginState,
    ticket: Option<LoginTicket>,
    /// Bumped on every start and cancel so an in-flight poll can tell its
    /// ticket was discarded while it waited on the remote.
    generation: u64,
}

/// Returns a ceremony stuck in `TicketRequested` to `Idle` when the ticket
/// request fails or its future is dropped before a ticket arrives.
struct TicketRequest<'a> {
    flow: &'a LoginFlow,
    generation: u64,
    armed: bool,
}

impl TicketRequest<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TicketRequest<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut ceremony = self.flow.lock();
        if ceremony.generation == self.generation && ceremony.state == LoginState::TicketRequested {
            ceremony.state = LoginState::Idle;
            drop(ceremony);
            self.flow.session.abandon_login();
            tracing::debug!("login ticket request abandoned");
        }
    }
}

pub struct LoginFlow {
    backend: Arc<dyn LoginBackend>,
    session: Arc<SessionStore>,
    clock: Arc<dyn Clock>,
    ticket_ttl: chrono::Duration,
    poll_interval_ms: u64,
    ceremony: Mutex<Ceremony>,
}

impl LoginFlow {
    pub fn new(
        backend: Arc<dyn LoginBackend>,
        session: Arc<SessionStore>,
        clock: Arc<dyn Clock>,
        ticket_ttl: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            backend,
            session,
            clock,
            ticket_ttl: chrono::Duration::from_std(ticket_ttl)
                .unwrap_or(chrono::Duration::seconds(120)),
            poll_interval_ms: poll_interval.as_millis() as u64,
            ceremony: Mutex::new(Ceremony {
                state: LoginState::Idle,
                ticket: None,
                generation: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Ceremony> {
        self.ceremony.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> LoginState {
        self.lock().state
    }

    pub fn ticket(&self) -> Option<LoginTicket> {
        self.lock().ticket.clone()
    }

    /// What a poll reports for a ceremony that has already finished.
    fn settled(&self, state: LoginState) -> Option<LoginPoll> {
        match state {
            LoginState::Success => Some(LoginPoll::Confirmed {
                user_id: self.session.current().user_id().map(str::to_string),
            }),
            LoginState::Expired => Some(LoginPoll::Expired),
            LoginState::Cancelled => Some(LoginPoll::Cancelled),
            _ => None,
        }
    }

    fn expire(&self, ceremony: &mut Ceremony) {
        tracing::info!("login ticket expired");
        ceremony.state = LoginState::Expired;
        ceremony.ticket = None;
        self.session.abandon_login();
    }

    /// Opens a ceremony. A live ticket blocks a second one; a ticket that
    /// has already expired is replaced.
    pub async fn start(&self, cancel: &CancellationToken) -> ProviderResult<LoginTicket> {
        let generation = {
            let mut ceremony = self.lock();
            if ceremony.state.is_in_progress() {
                let now = self.clock.now();
                let stale = ceremony
                    .ticket
                    .as_ref()
                    .is_some_and(|t| t.is_expired_at(now));
                if !stale {
                    return Err(ProviderError::AlreadyInProgress {
                        operation: "login".into(),
                    });
                }
                self.expire(&mut ceremony);
            }
            ceremony.generation += 1;
            ceremony.state = LoginState::TicketRequested;
            ceremony.ticket = None;
            ceremony.generation
        };
        self.session.begin_login();
        let mut request = TicketRequest {
            flow: self,
            generation,
            armed: true,
        };

        let code = match self.backend.create_qr(cancel).await {
            Ok(code) => code,
            Err(err) => {
                tracing::warn!(error = %err, "login ticket request failed");
                return Err(err.into());
            }
        };

        let now = self.clock.now();
        let ticket = LoginTicket {
            qr_image_payload: code
                .qr_image
                .clone()
                .or_else(|| code.qr_url.clone())
                .unwrap_or_default(),
            qr_token: code.key,
            qr_url: code.qr_url,
            created_at: now,
            expires_at: now + self.ticket_ttl,
            poll_interval_ms: self.poll_interval_ms,
        };

        request.disarm();
        let mut ceremony = self.lock();
        if ceremony.generation != generation {
            return Err(ProviderError::Cancelled);
        }
        ceremony.state = LoginState::AwaitingScan;
        ceremony.ticket = Some(ticket.clone());
        tracing::info!(expires_at = %ticket.expires_at, "login ticket issued");
        Ok(ticket)
    }

    /// Queries the remote once and advances the ceremony.
    pub async fn poll(&self, cancel: &CancellationToken) -> ProviderResult<LoginPoll> {
        let (generation, key) = {
            let mut ceremony = self.lock();
            match ceremony.state {
                LoginState::Idle => {
                    return Err(ProviderError::InvalidArgument {
                        message: "no login in progress".into(),
                    })
                }
                LoginState::TicketRequested => return Ok(LoginPoll::Pending),
                LoginState::AwaitingScan | LoginState::AwaitingConfirm => {}
                finished @ (LoginState::Success | LoginState::Expired | LoginState::Cancelled) => {
                    return Ok(self.settled(finished).unwrap_or(LoginPoll::Cancelled))
                }
            }
            let now = self.clock.now();
            let Some(ticket) = ceremony.ticket.as_ref() else {
                self.expire(&mut ceremony);
                return Ok(LoginPoll::Expired);
            };
            if ticket.is_expired_at(now) {
                self.expire(&mut ceremony);
                return Ok(LoginPoll::Expired);
            }
            (ceremony.generation, ticket.qr_token.clone())
        };

        let status = self.backend.check_qr(&key, cancel).await?;

        let cookie = {
            let mut ceremony = self.lock();
            if ceremony.generation != generation {
                return Ok(LoginPoll::Cancelled);
            }
            // An overlapping poll may have finished this ceremony already.
            if let Some(outcome) = self.settled(ceremony.state) {
                return Ok(outcome);
            }
            if !ceremony.state.is_in_progress() {
                return Ok(LoginPoll::Cancelled);
            }
            let now = self.clock.now();
            if ceremony
                .ticket
                .as_ref()
                .map_or(true, |t| t.is_expired_at(now))
            {
                self.expire(&mut ceremony);
                return Ok(LoginPoll::Expired);
            }
            match status {
                QrStatus::WaitingScan => {
                    return Ok(match ceremony.state {
                        LoginState::AwaitingConfirm => LoginPoll::Scanned,
                        _ => LoginPoll::Pending,
                    })
                }
                QrStatus::WaitingConfirm => {
                    if ceremony.state != LoginState::AwaitingConfirm {
                        tracing::info!("login code scanned, awaiting confirmation");
                    }
                    ceremony.state = LoginState::AwaitingConfirm;
                    return Ok(LoginPoll::Scanned);
                }
                QrStatus::Expired => {
                    self.expire(&mut ceremony);
                    return Ok(LoginPoll::Expired);
                }
                QrStatus::Confirmed { cookie } => {
                    let Some(parsed) = parse_login_cookie(&cookie, now) else {
                        ceremony.state = LoginState::Idle;
                        ceremony.ticket = None;
                        drop(ceremony);
                        self.session.abandon_login();
                        return Err(CallError::permanent("confirmed login carried no cookie").into());
                    };
                    if !parsed.has_login_cookie {
                        tracing::warn!("confirmed login cookie has no login credential");
                    }
                    let credentials = Credentials {
                        user_id: None,
                        access_token: parsed.header.clone(),
                        refresh_token: Some(parsed.header.clone()),
                        expires_at: parsed.expires_at,
                    };
                    if let Err(err) = self.session.save(Session::active(credentials)) {
                        tracing::warn!(error = %err, "signed in, but the session was not persisted");
                    }
                    ceremony.state = LoginState::Success;
                    ceremony.ticket = None;
                    parsed
                }
            }
        };

        tracing::info!(expires_at = %cookie.expires_at, "login confirmed");

        let user_id = match self.backend.fetch_user_id(&cookie.header, cancel).await {
            Ok(Some(user_id)) => {
                if let Err(err) = self.session.set_user_id(user_id.clone()) {
                    tracing::warn!(error = %err, "user id kept in memory only");
                }
                Some(user_id)
            }
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(error = %err, "could not resolve the signed-in user");
                None
            }
        };
        Ok(LoginPoll::Confirmed { user_id })
    }

    /// Ends a running ceremony; a no-op once it is idle or finished.
    pub fn cancel(&self) -> LoginState {
        let mut ceremony = self.lock();
        if ceremony.state.is_in_progress() {
            ceremony.state = LoginState::Cancelled;
            ceremony.ticket = None;
            ceremony.generation += 1;
            drop(ceremony);
            self.session.abandon_login();
            tracing::info!("login cancelled");
            return LoginState::Cancelled;
        }
        ceremony.state
    }

    /// Polls at the ticket cadence until the ceremony finishes.
    pub async fn wait_for_completion(&self, cancel: &CancellationToken) -> ProviderResult<LoginPoll> {
        loop {
            let outcome = self.poll(cancel).await?;
            if outcome.is_terminal() {
                return Ok(outcome);
            }
            let interval = Duration::from_millis(
                self.ticket()
                    .map_or(self.poll_interval_ms, |t| t.poll_interval_ms)
                    .max(1),
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.cancel();
                    return Err(ProviderError::Cancelled);
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}
