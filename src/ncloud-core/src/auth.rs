//! Login and session shapes exchanged between a provider and its host.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of the single live session held by a provider instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Unauthenticated,
    /// A login ceremony is running and no usable credentials exist yet.
    Pending,
    Active,
    Expired,
    Revoked,
}

impl SessionStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, SessionStatus::Active)
    }
}

/// QR ticket handed to the host for rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginTicket {
    /// Remote key identifying this ceremony.
    pub qr_token: String,
    /// What the host renders: an inline image (data URI) when the remote
    /// supplied one, otherwise the URL to encode.
    pub qr_image_payload: String,
    /// The URL the QR code encodes, when known.
    pub qr_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub poll_interval_ms: u64,
}

impl LoginTicket {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// States of the QR login ceremony.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginState {
    Idle,
    TicketRequested,
    AwaitingScan,
    AwaitingConfirm,
    Success,
    Expired,
    Cancelled,
}

impl LoginState {
    /// True while a ticket is alive and owned by the ceremony.
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            LoginState::TicketRequested | LoginState::AwaitingScan | LoginState::AwaitingConfirm
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoginState::Success | LoginState::Expired | LoginState::Cancelled
        )
    }
}

/// Outcome of one poll of the login ceremony.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoginPoll {
    /// Waiting for the user to scan.
    Pending,
    /// Scanned, waiting for confirmation on the device.
    Scanned,
    /// Confirmed; a new session is active.
    Confirmed { user_id: Option<String> },
    /// The ticket expired; call `get_login_ticket` again.
    Expired,
    Cancelled,
}

impl LoginPoll {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoginPoll::Confirmed { .. } | LoginPoll::Expired | LoginPoll::Cancelled
        )
    }
}

/// Notifications a provider pushes to its host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    StatusChanged { status: SessionStatus },
    /// The session changed in memory but could not be written to storage.
    PersistenceDegraded { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_progress_states_exclude_terminal_ones() {
        for state in [
            LoginState::TicketRequested,
            LoginState::AwaitingScan,
            LoginState::AwaitingConfirm,
        ] {
            assert!(state.is_in_progress());
            assert!(!state.is_terminal());
        }
        for state in [LoginState::Success, LoginState::Expired, LoginState::Cancelled] {
            assert!(!state.is_in_progress());
            assert!(state.is_terminal());
        }
        assert!(!LoginState::Idle.is_in_progress());
    }

    #[test]
    fn poll_serializes_with_status_tag() {
        let json = serde_json::to_string(&LoginPoll::Confirmed {
            user_id: Some("42".into()),
        })
        .unwrap();
        assert_eq!(json, r#"{"status":"confirmed","user_id":"42"}"#);
    }
}
