//! Provider for NetEase-compatible cloud music APIs.
//!
//! [`NcloudProvider`] owns no runtime state until the host calls
//! [`Provider::on_load`]; unloading cancels everything still in flight.

pub mod cache;
pub mod client;
pub mod clock;
pub mod cookie;
pub mod error;
pub mod login;
mod mapping;
pub mod models;
pub mod rate_limit;
pub mod retry;
pub mod session;
pub mod transport;

use client::ApiClient;
use clock::{Clock, SystemClock};
use error::CallError;
use login::LoginFlow;
use ncloud_core::auth::{LoginPoll, LoginTicket, SessionEvent, SessionStatus};
use ncloud_core::config::ProviderConfig;
use ncloud_core::models::{
    Album, AlbumId, Artist, ArtistId, Page, PageRequest, Playlist, PlaylistId, SearchKind,
    SearchResult, StreamDetails, Track, TrackId,
};
use ncloud_core::provider::{
    BrowseKind, CollectionItem, Provider, ProviderCapabilities, ProviderError, ProviderResult,
};
use ncloud_core::storage::SessionStorage;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

pub const PROVIDER_ID: &str = "ncloud";
pub const PROVIDER_NAME: &str = "NCloud Music";

const EVENT_CAPACITY: usize = 32;

struct Runtime {
    client: Arc<ApiClient>,
    login: LoginFlow,
    shutdown: CancellationToken,
}

pub struct NcloudProvider {
    storage: Arc<dyn SessionStorage>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<SessionEvent>,
    runtime: RwLock<Option<Arc<Runtime>>>,
}

impl NcloudProvider {
    pub fn new(storage: Arc<dyn SessionStorage>) -> Self {
        Self::with_clock(storage, Arc::new(SystemClock))
    }

    pub fn with_clock(storage: Arc<dyn SessionStorage>, clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            storage,
            clock,
            events,
            runtime: RwLock::new(None),
        }
    }

    /// Session status changes and persistence warnings.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn runtime(&self) -> ProviderResult<Arc<Runtime>> {
        self.runtime
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| ProviderError::Other {
                message: "provider is not loaded".into(),
            })
    }

    /// Runs `op` against the loaded runtime, aborting it on unload.
    async fn with_runtime<T, F, Fut>(&self, op: F) -> ProviderResult<T>
    where
        F: FnOnce(Arc<Runtime>) -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let runtime = self.runtime()?;
        let shutdown = runtime.shutdown.clone();
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => Err(ProviderError::Cancelled),
            result = op(runtime) => result.map_err(ProviderError::from),
        }
    }

    /// Asks the remote whether the stored session is still valid.
    pub async fn verify_session(&self, cancel: &CancellationToken) -> ProviderResult<SessionStatus> {
        self.with_runtime(|rt| async move { rt.client.verify_session(cancel).await })
            .await
    }

    /// Polls the running login ceremony until it finishes.
    pub async fn wait_for_login(&self, cancel: &CancellationToken) -> ProviderResult<LoginPoll> {
        let runtime = self.runtime()?;
        let shutdown = runtime.shutdown.clone();
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => Err(ProviderError::Cancelled),
            result = runtime.login.wait_for_completion(cancel) => result,
        }
    }

    /// Drops every cached lookup.
    pub async fn clear_cache(&self) -> ProviderResult<()> {
        let runtime = self.runtime()?;
        runtime.client.clear_caches().await;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Provider for NcloudProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            search: true,
            browse: true,
            playlists: true,
            library_playlists: true,
            artwork: true,
            qr_login: true,
        }
    }

    async fn on_load(&self, config: ProviderConfig) -> ProviderResult<()> {
        config.validate().map_err(|e| ProviderError::InvalidArgument {
            message: e.to_string(),
        })?;
        let client = Arc::new(
            ApiClient::new(
                PROVIDER_ID,
                &config,
                self.storage.clone(),
                self.clock.clone(),
                self.events.clone(),
            )
            .map_err(ProviderError::from)?,
        );
        let login = LoginFlow::new(
            client.clone(),
            client.session().clone(),
            self.clock.clone(),
            Duration::from_secs(config.login.ticket_ttl_secs),
            Duration::from_millis(config.login.poll_interval_ms),
        );
        let runtime = Arc::new(Runtime {
            client,
            login,
            shutdown: CancellationToken::new(),
        });

        let previous = self
            .runtime
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(runtime.clone());
        if let Some(previous) = previous {
            previous.shutdown.cancel();
        }
        tracing::info!(
            provider = PROVIDER_ID,
            base_url = %config.api_base_url,
            session = ?runtime.client.session().status(),
            "provider loaded"
        );
        Ok(())
    }

    async fn on_unload(&self) {
        let runtime = self
            .runtime
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(runtime) = runtime {
            runtime.shutdown.cancel();
            runtime.login.cancel();
            tracing::info!(provider = PROVIDER_ID, "provider unloaded");
        }
    }

    async fn search(
        &self,
        query: &str,
        kinds: &[SearchKind],
        paging: PageRequest,
        cancel: &CancellationToken,
    ) -> ProviderResult<SearchResult> {
        self.with_runtime(|rt| async move { rt.client.search(query, kinds, paging, cancel).await })
            .await
    }

    async fn browse(
        &self,
        kind: BrowseKind,
        paging: PageRequest,
        cancel: &CancellationToken,
    ) -> ProviderResult<Page<CollectionItem>> {
        match kind {
            BrowseKind::Playlists => {
                let page = self.list_playlists(paging, cancel).await?;
                Ok(Page {
                    items: page.items.into_iter().map(CollectionItem::Playlist).collect(),
                    next: page.next,
                })
            }
            BrowseKind::Artists | BrowseKind::Albums => Err(ProviderError::NotSupported {
                operation: format!("browse {kind:?}"),
            }),
        }
    }

    async fn list_playlists(
        &self,
        paging: PageRequest,
        cancel: &CancellationToken,
    ) -> ProviderResult<Page<Playlist>> {
        self.with_runtime(|rt| async move { rt.client.list_user_playlists(paging, cancel).await })
            .await
    }

    async fn get_playlist(
        &self,
        playlist_id: &PlaylistId,
        cancel: &CancellationToken,
    ) -> ProviderResult<Playlist> {
        self.with_runtime(|rt| async move { rt.client.get_playlist(playlist_id, cancel).await })
            .await
    }

    async fn list_playlist_tracks(
        &self,
        playlist_id: &PlaylistId,
        paging: PageRequest,
        cancel: &CancellationToken,
    ) -> ProviderResult<Page<Track>> {
        self.with_runtime(|rt| async move {
            rt.client
                .get_playlist_tracks(playlist_id, paging, cancel)
                .await
        })
        .await
    }

    async fn get_album(
        &self,
        album_id: &AlbumId,
        cancel: &CancellationToken,
    ) -> ProviderResult<Album> {
        self.with_runtime(|rt| async move { rt.client.get_album(album_id, cancel).await })
            .await
    }

    async fn list_album_tracks(
        &self,
        album_id: &AlbumId,
        cancel: &CancellationToken,
    ) -> ProviderResult<Vec<Track>> {
        self.with_runtime(|rt| async move { rt.client.list_album_tracks(album_id, cancel).await })
            .await
    }

    async fn get_artist(
        &self,
        artist_id: &ArtistId,
        cancel: &CancellationToken,
    ) -> ProviderResult<Artist> {
        self.with_runtime(|rt| async move { rt.client.get_artist(artist_id, cancel).await })
            .await
    }

    async fn get_track(
        &self,
        track_id: &TrackId,
        cancel: &CancellationToken,
    ) -> ProviderResult<Track> {
        self.with_runtime(|rt| async move { rt.client.get_track(track_id, cancel).await })
            .await
    }

    async fn get_stream_url(
        &self,
        track_id: &TrackId,
        cancel: &CancellationToken,
    ) -> ProviderResult<StreamDetails> {
        self.with_runtime(|rt| async move { rt.client.resolve_stream_url(track_id, cancel).await })
            .await
    }

    fn session_status(&self) -> SessionStatus {
        match self.runtime() {
            Ok(runtime) => runtime.client.session().status(),
            Err(_) => SessionStatus::Unauthenticated,
        }
    }

    async fn get_login_ticket(&self, cancel: &CancellationToken) -> ProviderResult<LoginTicket> {
        let runtime = self.runtime()?;
        let shutdown = runtime.shutdown.clone();
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => Err(ProviderError::Cancelled),
            result = runtime.login.start(cancel) => result,
        }
    }

    async fn poll_login(&self, cancel: &CancellationToken) -> ProviderResult<LoginPoll> {
        let runtime = self.runtime()?;
        let shutdown = runtime.shutdown.clone();
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => Err(ProviderError::Cancelled),
            result = runtime.login.poll(cancel) => result,
        }
    }

    async fn cancel_login(&self) -> ProviderResult<()> {
        self.runtime()?.login.cancel();
        Ok(())
    }

    async fn logout(&self, cancel: &CancellationToken) -> ProviderResult<()> {
        let runtime = self.runtime()?;
        runtime.login.cancel();
        self.with_runtime(|rt| async move { rt.client.logout(cancel).await })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ncloud_core::storage::MemoryStorage;

    #[tokio::test]
    async fn operations_before_load_fail_cleanly() {
        let provider = NcloudProvider::new(Arc::new(MemoryStorage::new()));
        let cancel = CancellationToken::new();
        let err = provider
            .search("piano", &[SearchKind::Track], PageRequest::first_page(10), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Other { .. }));
        assert_eq!(provider.session_status(), SessionStatus::Unauthenticated);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let provider = NcloudProvider::new(Arc::new(MemoryStorage::new()));
        let config = ProviderConfig::new("ftp://music.example", 1000, 5.0);
        let err = provider.on_load(config).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidArgument { .. }));

        let vanishing_rate = ProviderConfig::new("http://music.example", 1000, 1e-300);
        let err = provider.on_load(vanishing_rate).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidArgument { .. }));
        assert!(provider.clear_cache().await.is_err());
    }

    #[tokio::test]
    async fn browse_supports_playlists_only() {
        let provider = NcloudProvider::new(Arc::new(MemoryStorage::new()));
        provider
            .on_load(ProviderConfig::new("http://127.0.0.1:9", 1000, 5.0))
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        let err = provider
            .browse(BrowseKind::Albums, PageRequest::first_page(10), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotSupported { .. }));

        // No session yet: playlists need sign-in, and nothing is sent.
        let err = provider
            .browse(BrowseKind::Playlists, PageRequest::first_page(10), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::AuthenticationRequired { .. }));
    }

    #[tokio::test]
    async fn unload_drops_runtime() {
        let provider = NcloudProvider::new(Arc::new(MemoryStorage::new()));
        provider.on_load(ProviderConfig::default()).await.unwrap();
        assert!(provider.clear_cache().await.is_ok());
        provider.on_unload().await;
        assert!(provider.clear_cache().await.is_err());
    }
}
