use crate::auth::{LoginPoll, LoginTicket, SessionStatus};
use crate::config::ProviderConfig;
use crate::models::{
    Album, AlbumId, Artist, ArtistId, Page, PageRequest, Playlist, PlaylistId, SearchKind,
    SearchResult, StreamDetails, Track, TrackId,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Capability flags describing optional provider features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProviderCapabilities {
    pub search: bool,
    pub browse: bool,
    pub playlists: bool,
    pub library_playlists: bool,
    pub artwork: bool,
    pub qr_login: bool,
}

impl ProviderCapabilities {
    pub fn supports_playlists(&self) -> bool {
        self.playlists
    }

    pub fn supports_library_playlists(&self) -> bool {
        self.library_playlists
    }

    pub fn supports_qr_login(&self) -> bool {
        self.qr_login
    }
}

/// Failures a provider surfaces to its host.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },
    #[error("authentication required: {message}")]
    AuthenticationRequired { message: String },
    #[error("remote service unavailable: {message}")]
    RemoteUnavailable { message: String },
    #[error("rate limited: {message}")]
    RateLimited { message: String },
    #[error("{operation} is already in progress")]
    AlreadyInProgress { operation: String },
    #[error("entity not found: {entity}")]
    NotFound { entity: String },
    #[error("operation not supported: {operation}")]
    NotSupported { operation: String },
    #[error("operation was cancelled")]
    Cancelled,
    #[error("session persistence degraded: {message}")]
    PersistenceDegraded { message: String },
    #[error("{message}")]
    Other { message: String },
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Browse kinds supported by the host UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrowseKind {
    Artists,
    Albums,
    Playlists,
}

/// Items returned from browse views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionItem {
    Album(Album),
    Artist(Artist),
    Playlist(Playlist),
}

/// Provider interface.
///
/// Providers return **stream URLs only**; playback is handled by the host.
/// Every remote operation takes a cancellation token; cancelling it aborts
/// rate-limit waits and in-flight requests.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// Stable provider identifier (e.g., "ncloud").
    fn id(&self) -> &str;

    /// Human-friendly provider name.
    fn name(&self) -> &str;

    /// Advertised capabilities.
    fn capabilities(&self) -> ProviderCapabilities;

    /// Builds the provider's runtime state from host configuration.
    async fn on_load(&self, config: ProviderConfig) -> ProviderResult<()>;

    /// Tears down runtime state; in-flight operations are cancelled.
    async fn on_unload(&self);

    async fn search(
        &self,
        query: &str,
        kinds: &[SearchKind],
        paging: PageRequest,
        cancel: &CancellationToken,
    ) -> ProviderResult<SearchResult>;

    async fn browse(
        &self,
        kind: BrowseKind,
        paging: PageRequest,
        cancel: &CancellationToken,
    ) -> ProviderResult<Page<CollectionItem>>;

    /// Playlists in the signed-in user's library.
    async fn list_playlists(
        &self,
        paging: PageRequest,
        cancel: &CancellationToken,
    ) -> ProviderResult<Page<Playlist>>;

    async fn get_playlist(
        &self,
        playlist_id: &PlaylistId,
        cancel: &CancellationToken,
    ) -> ProviderResult<Playlist>;

    async fn list_playlist_tracks(
        &self,
        playlist_id: &PlaylistId,
        paging: PageRequest,
        cancel: &CancellationToken,
    ) -> ProviderResult<Page<Track>>;

    async fn get_album(
        &self,
        album_id: &AlbumId,
        cancel: &CancellationToken,
    ) -> ProviderResult<Album>;

    async fn list_album_tracks(
        &self,
        album_id: &AlbumId,
        cancel: &CancellationToken,
    ) -> ProviderResult<Vec<Track>>;

    async fn get_artist(
        &self,
        artist_id: &ArtistId,
        cancel: &CancellationToken,
    ) -> ProviderResult<Artist>;

    async fn get_track(
        &self,
        track_id: &TrackId,
        cancel: &CancellationToken,
    ) -> ProviderResult<Track>;

    /// Resolves a short-lived playable URL for the given track.
    async fn get_stream_url(
        &self,
        track_id: &TrackId,
        cancel: &CancellationToken,
    ) -> ProviderResult<StreamDetails>;

    /// Current session status; `Unauthenticated` is a normal answer.
    fn session_status(&self) -> SessionStatus;

    /// Opens a QR login ceremony and returns the ticket to render.
    async fn get_login_ticket(&self, _cancel: &CancellationToken) -> ProviderResult<LoginTicket> {
        Err(ProviderError::NotSupported {
            operation: "get_login_ticket".into(),
        })
    }

    async fn poll_login(&self, _cancel: &CancellationToken) -> ProviderResult<LoginPoll> {
        Err(ProviderError::NotSupported {
            operation: "poll_login".into(),
        })
    }

    async fn cancel_login(&self) -> ProviderResult<()> {
        Err(ProviderError::NotSupported {
            operation: "cancel_login".into(),
        })
    }

    async fn logout(&self, _cancel: &CancellationToken) -> ProviderResult<()> {
        Err(ProviderError::NotSupported {
            operation: "logout".into(),
        })
    }
}
