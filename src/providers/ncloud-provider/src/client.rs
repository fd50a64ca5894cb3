//! Remote operations: rate limit, retry, session-aware auth, normalization
//! and caching composed per endpoint.

use crate::cache::{CacheKey, ResultCache};
use crate::clock::Clock;
use crate::cookie::{parse_login_cookie, DEFAULT_SESSION_LIFETIME_DAYS};
use crate::error::CallError;
use crate::login::{LoginBackend, QrCode, QrStatus};
use crate::mapping::{
    map_album, map_all, map_artist, map_playlist, map_stream, map_tracks,
};
use crate::models::{
    AccountResponse, AlbumResponse, ArtistResponse, LoginStatusResponse, PlaylistDetailResponse,
    QrCheckResponse, QrCreateResponse, QrKeyResponse, RefreshResponse, SearchResponse,
    SongUrlResponse, SongsResponse, UserPlaylistsResponse,
};
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;
use crate::session::{Credentials, SessionError, SessionStore, TokenExchange};
use crate::transport::{ApiRequest, HttpTransport, RawResponse};
use ncloud_core::auth::{SessionEvent, SessionStatus};
use ncloud_core::config::ProviderConfig;
use ncloud_core::models::{
    Album, AlbumId, Artist, ArtistId, Page, PageRequest, Playlist, PlaylistId, SearchKind,
    SearchResult, StreamDetails, Track, TrackId,
};
use ncloud_core::storage::SessionStorage;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

const QR_CHECK_CODES: &[i64] = &[800, 801, 802, 803];

/// Transport behind the shared rate limiter and retry policy.
struct Remote {
    transport: HttpTransport,
    limiter: RateLimiter,
    retry: RetryPolicy,
}

impl Remote {
    /// One attempt: one token, one round trip.
    async fn attempt(
        &self,
        request: &ApiRequest,
        cookie: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<RawResponse, CallError> {
        self.limiter.acquire(cancel).await?;
        self.transport.execute(request, cookie, cancel).await
    }

    /// Retried call that leaves credential rejections to the caller.
    async fn call(
        &self,
        request: &ApiRequest,
        cookie: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Value, CallError> {
        self.retry
            .run(request.endpoint, cancel, move || async move {
                self.attempt(request, cookie, cancel).await
            })
            .await
            .map(|response| response.body)
    }
}

fn decode<T: DeserializeOwned>(endpoint: &str, body: Value) -> Result<T, CallError> {
    serde_json::from_value(body)
        .map_err(|e| CallError::permanent(format!("unexpected {endpoint} response: {e}")))
}

fn session_failure(err: SessionError) -> CallError {
    match err {
        SessionError::Call(err) => err,
        SessionError::RefreshRejected(message) => CallError::AuthenticationRequired { message },
        SessionError::NotAuthenticated => CallError::AuthenticationRequired {
            message: "no active session".into(),
        },
        SessionError::Persistence(message) => CallError::permanent(message),
    }
}

/// Exchanges the session cookie through `/login/refresh`.
struct RefreshEndpoint {
    remote: Arc<Remote>,
    clock: Arc<dyn Clock>,
}

#[async_trait::async_trait]
impl TokenExchange for RefreshEndpoint {
    async fn exchange(
        &self,
        credentials: &Credentials,
        cancel: &CancellationToken,
    ) -> Result<Credentials, CallError> {
        let cookie = credentials
            .refresh_token
            .as_deref()
            .unwrap_or(&credentials.access_token);
        let request = ApiRequest::get("/login/refresh");
        let body = self.remote.call(&request, Some(cookie), cancel).await?;
        let response: RefreshResponse = decode(request.endpoint, body)?;

        let now = self.clock.now();
        let renewed = response
            .cookie
            .as_deref()
            .and_then(|raw| parse_login_cookie(raw, now))
            .filter(|parsed| parsed.has_login_cookie);
        let (token, expires_at) = match renewed {
            Some(parsed) => (parsed.header, parsed.expires_at),
            // The remote extended the existing cookie without reissuing it.
            None => (
                cookie.to_string(),
                now + chrono::Duration::days(DEFAULT_SESSION_LIFETIME_DAYS),
            ),
        };
        tracing::info!(expires_at = %expires_at, "session refreshed");
        Ok(Credentials {
            user_id: credentials.user_id.clone(),
            access_token: token.clone(),
            refresh_token: Some(token),
            expires_at,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Auth {
    /// Cookie sent when a session exists.
    Optional,
    /// Fails with `AuthenticationRequired` before any round trip when no
    /// active session exists.
    Required,
}

enum KindHits {
    Tracks(Vec<Track>),
    Albums(Vec<Album>),
    Artists(Vec<Artist>),
    Playlists(Vec<Playlist>),
}

fn search_type(kind: SearchKind) -> u32 {
    match kind {
        SearchKind::Track => 1,
        SearchKind::Album => 10,
        SearchKind::Artist => 100,
        SearchKind::Playlist => 1000,
    }
}

pub struct ApiClient {
    provider_id: String,
    remote: Arc<Remote>,
    session: Arc<SessionStore>,
    clock: Arc<dyn Clock>,
    search_cache: ResultCache<SearchResult>,
    track_cache: ResultCache<Track>,
    album_cache: ResultCache<(Album, Vec<Track>)>,
    artist_cache: ResultCache<Artist>,
    playlist_cache: ResultCache<Playlist>,
    search_ttl: Duration,
    detail_ttl: Duration,
    stream_level: String,
}

impl ApiClient {
    pub fn new(
        provider_id: impl Into<String>,
        config: &ProviderConfig,
        storage: Arc<dyn SessionStorage>,
        clock: Arc<dyn Clock>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Result<Self, CallError> {
        let remote = Arc::new(Remote {
            transport: HttpTransport::new(config)?,
            limiter: RateLimiter::from_config(config)?,
            retry: RetryPolicy::from_config(&config.retry),
        });
        let exchange = Arc::new(RefreshEndpoint {
            remote: remote.clone(),
            clock: clock.clone(),
        });
        let session = Arc::new(SessionStore::load(
            storage,
            config.session.storage_key.clone(),
            Duration::from_secs(config.session.refresh_margin_secs),
            clock.clone(),
            exchange,
            events,
        ));
        let capacity = config.cache.capacity;

        Ok(Self {
            provider_id: provider_id.into(),
            remote,
            session,
            clock,
            search_cache: ResultCache::new(capacity),
            track_cache: ResultCache::new(capacity),
            album_cache: ResultCache::new(capacity),
            artist_cache: ResultCache::new(capacity),
            playlist_cache: ResultCache::new(capacity),
            search_ttl: Duration::from_secs(config.cache.search_ttl_secs),
            detail_ttl: Duration::from_secs(config.cache.detail_ttl_secs),
            stream_level: config.stream_level.clone(),
        })
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    /// Refreshes ahead of expiry when the session is inside the margin.
    async fn ensure_fresh(&self, auth: Auth, cancel: &CancellationToken) -> Result<(), CallError> {
        if !self.session.needs_refresh() {
            return Ok(());
        }
        match self.session.refresh(cancel).await {
            Ok(_) => Ok(()),
            Err(SessionError::RefreshRejected(message)) if auth == Auth::Required => {
                Err(CallError::AuthenticationRequired { message })
            }
            Err(SessionError::Call(CallError::Cancelled)) => Err(CallError::Cancelled),
            Err(err) => {
                tracing::warn!(error = %err, "proactive session refresh failed");
                Ok(())
            }
        }
    }

    async fn call(
        &self,
        request: ApiRequest,
        auth: Auth,
        cancel: &CancellationToken,
    ) -> Result<Value, CallError> {
        self.ensure_fresh(auth, cancel).await?;

        let Some(credentials) = self.session.credentials() else {
            if auth == Auth::Required {
                return Err(CallError::AuthenticationRequired {
                    message: format!("{} requires a signed-in session", request.endpoint),
                });
            }
            return match self.remote.call(&request, None, cancel).await {
                Err(CallError::Unauthorized { message }) => {
                    Err(CallError::AuthenticationRequired { message })
                }
                other => other,
            };
        };

        let request = &request;
        let rejected = credentials.access_token.as_str();
        let refreshed = &AtomicBool::new(false);
        let result = self
            .remote
            .retry
            .run_authenticated(
                request.endpoint,
                cancel,
                move || async move {
                    let cookie = self.session.credentials().map(|c| c.access_token);
                    self.remote.attempt(request, cookie.as_deref(), cancel).await
                },
                move || async move {
                    self.session
                        .refresh_after_rejection(Some(rejected), cancel)
                        .await
                        .map_err(session_failure)?;
                    refreshed.store(true, Ordering::SeqCst);
                    Ok::<(), CallError>(())
                },
            )
            .await;

        if let Err(CallError::AuthenticationRequired { message }) = &result {
            if refreshed.load(Ordering::SeqCst) && self.session.status() == SessionStatus::Active {
                tracing::warn!(endpoint = request.endpoint, error = %message, "credentials rejected after refresh, signing out");
                if let Err(err) = self.session.clear() {
                    tracing::warn!(error = %err, "failed to drop rejected session");
                }
            }
        }
        result.map(|response| response.body)
    }

    /// Runs a cached lookup. Cancelling `cancel` abandons only this caller's
    /// wait; a waiter whose computation was cancelled by a different caller
    /// retries once with its own token.
    async fn cached<V, F, Fut>(
        &self,
        cache: &ResultCache<V>,
        key: CacheKey,
        ttl: Duration,
        cancel: &CancellationToken,
        compute: F,
    ) -> Result<V, CallError>
    where
        V: Clone + Send + Sync + 'static,
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<V, CallError>>,
    {
        match cache.get_or_compute(key.clone(), ttl, cancel, compute()).await {
            Err(CallError::Cancelled) if !cancel.is_cancelled() => {
                cache.get_or_compute(key, ttl, cancel, compute()).await
            }
            other => other,
        }
    }

    /// Fans out one request per kind and merges them, keeping each kind's
    /// remote relevance order.
    pub async fn search(
        &self,
        query: &str,
        kinds: &[SearchKind],
        paging: PageRequest,
        cancel: &CancellationToken,
    ) -> Result<SearchResult, CallError> {
        // The remote search is case-insensitive; send the same text the cache keys on.
        let normalized = query.trim().to_lowercase();
        let query = normalized.as_str();
        if query.is_empty() {
            return Err(CallError::InvalidArgument {
                message: "search query must not be empty".into(),
            });
        }
        let kinds: BTreeSet<SearchKind> = kinds.iter().copied().collect();
        if kinds.is_empty() {
            return Err(CallError::InvalidArgument {
                message: "at least one search kind is required".into(),
            });
        }
        if paging.limit == 0 {
            return Err(CallError::InvalidArgument {
                message: "page limit must be positive".into(),
            });
        }

        let key = CacheKey::new(
            "search",
            [
                normalized.clone(),
                kinds
                    .iter()
                    .map(|k| k.as_str())
                    .collect::<Vec<_>>()
                    .join(","),
                paging.offset.to_string(),
                paging.limit.to_string(),
            ],
        );
        let kinds = &kinds;
        self.cached(&self.search_cache, key, self.search_ttl, cancel, move || async move {
            let hits = futures::future::try_join_all(
                kinds
                    .iter()
                    .map(|kind| self.search_kind(query, *kind, paging, cancel)),
            )
            .await?;
            let mut result = SearchResult::default();
            for hit in hits {
                match hit {
                    KindHits::Tracks(tracks) => result.tracks = tracks,
                    KindHits::Albums(albums) => result.albums = albums,
                    KindHits::Artists(artists) => result.artists = artists,
                    KindHits::Playlists(playlists) => result.playlists = playlists,
                }
            }
            tracing::debug!(
                query,
                tracks = result.tracks.len(),
                albums = result.albums.len(),
                artists = result.artists.len(),
                playlists = result.playlists.len(),
                "search completed"
            );
            Ok::<_, CallError>(result)
        })
        .await
    }

    async fn search_kind(
        &self,
        query: &str,
        kind: SearchKind,
        paging: PageRequest,
        cancel: &CancellationToken,
    ) -> Result<KindHits, CallError> {
        let request = ApiRequest::get("/cloudsearch")
            .param("keywords", query)
            .param("type", search_type(kind))
            .param("limit", paging.limit)
            .param("offset", paging.offset);
        let body = self.call(request, Auth::Optional, cancel).await?;
        let result = decode::<SearchResponse>("/cloudsearch", body)?
            .result
            .unwrap_or_default();
        let id = self.provider_id.as_str();
        Ok(match kind {
            SearchKind::Track => KindHits::Tracks(map_tracks(&result.songs, &[], id)),
            SearchKind::Album => {
                KindHits::Albums(map_all(&result.albums, "album", |a| map_album(a, id)))
            }
            SearchKind::Artist => {
                KindHits::Artists(map_all(&result.artists, "artist", |a| map_artist(a, id)))
            }
            SearchKind::Playlist => KindHits::Playlists(map_all(
                &result.playlists,
                "playlist",
                |p| map_playlist(p, id),
            )),
        })
    }

    /// Resolves (and remembers) the signed-in user's id.
    async fn user_id(&self, cancel: &CancellationToken) -> Result<String, CallError> {
        if let Some(user_id) = self.session.current().user_id() {
            return Ok(user_id.to_string());
        }
        let body = self
            .call(ApiRequest::get("/user/account"), Auth::Required, cancel)
            .await?;
        let user_id = decode::<AccountResponse>("/user/account", body)?
            .user_id()
            .ok_or_else(|| CallError::AuthenticationRequired {
                message: "account lookup returned no user".into(),
            })?;
        if let Err(err) = self.session.set_user_id(user_id.clone()) {
            tracing::warn!(error = %err, "user id kept in memory only");
        }
        Ok(user_id)
    }

    /// Playlists in the user's library. Never cached.
    pub async fn list_user_playlists(
        &self,
        paging: PageRequest,
        cancel: &CancellationToken,
    ) -> Result<Page<Playlist>, CallError> {
        if !self.session.status().is_active() {
            return Err(CallError::AuthenticationRequired {
                message: "library playlists require a signed-in session".into(),
            });
        }
        let uid = self.user_id(cancel).await?;
        let request = ApiRequest::get("/user/playlist")
            .param("uid", uid)
            .param("limit", paging.limit)
            .param("offset", paging.offset);
        let body = self.call(request, Auth::Required, cancel).await?;
        let response: UserPlaylistsResponse = decode("/user/playlist", body)?;
        let items = map_all(&response.playlist, "playlist", |p| {
            map_playlist(p, &self.provider_id)
        });
        Ok(Page::with_more(
            items,
            paging,
            response.more.unwrap_or(false),
        ))
    }

    /// Tracks of a playlist, in the remote's order. Never cached.
    pub async fn get_playlist_tracks(
        &self,
        playlist_id: &PlaylistId,
        paging: PageRequest,
        cancel: &CancellationToken,
    ) -> Result<Page<Track>, CallError> {
        let request = ApiRequest::get("/playlist/track/all")
            .param("id", &playlist_id.0)
            .param("limit", paging.limit)
            .param("offset", paging.offset);
        let body = self.call(request, Auth::Optional, cancel).await?;
        let response: SongsResponse = decode("/playlist/track/all", body)?;
        let more = paging.limit > 0 && response.songs.len() >= paging.limit as usize;
        let items = map_tracks(&response.songs, &response.privileges, &self.provider_id);
        Ok(Page::with_more(items, paging, more))
    }

    /// A short-lived playable URL. Never cached.
    pub async fn resolve_stream_url(
        &self,
        track_id: &TrackId,
        cancel: &CancellationToken,
    ) -> Result<StreamDetails, CallError> {
        let request = ApiRequest::get("/song/url/v1")
            .param("id", &track_id.0)
            .param("level", &self.stream_level);
        let body = self.call(request, Auth::Optional, cancel).await?;
        let response: SongUrlResponse = decode("/song/url/v1", body)?;
        let entry = response
            .data
            .iter()
            .find(|d| d.id.as_deref() == Some(track_id.0.as_str()))
            .or_else(|| response.data.first());
        entry
            .and_then(|raw| map_stream(raw, track_id, self.clock.now()))
            .ok_or_else(|| CallError::NotFound {
                entity: format!("stream for track {}", track_id.0),
            })
    }

    pub async fn get_track(
        &self,
        track_id: &TrackId,
        cancel: &CancellationToken,
    ) -> Result<Track, CallError> {
        let key = CacheKey::new("track", [&track_id.0]);
        self.cached(&self.track_cache, key, self.detail_ttl, cancel, move || async move {
            let request = ApiRequest::get("/song/detail").param("ids", &track_id.0);
            let body = self.call(request, Auth::Optional, cancel).await?;
            let response: SongsResponse = decode("/song/detail", body)?;
            map_tracks(&response.songs, &response.privileges, &self.provider_id)
                .into_iter()
                .find(|t| t.id == *track_id)
                .ok_or_else(|| CallError::NotFound {
                    entity: format!("track {}", track_id.0),
                })
        })
        .await
    }

    async fn album_with_tracks(
        &self,
        album_id: &AlbumId,
        cancel: &CancellationToken,
    ) -> Result<(Album, Vec<Track>), CallError> {
        let key = CacheKey::new("album", [&album_id.0]);
        self.cached(&self.album_cache, key, self.detail_ttl, cancel, move || async move {
            let request = ApiRequest::get("/album").param("id", &album_id.0);
            let body = self.call(request, Auth::Optional, cancel).await?;
            let response: AlbumResponse = decode("/album", body)?;
            let album = response
                .album
                .as_ref()
                .and_then(|a| map_album(a, &self.provider_id))
                .ok_or_else(|| CallError::NotFound {
                    entity: format!("album {}", album_id.0),
                })?;
            let tracks = map_tracks(&response.songs, &[], &self.provider_id);
            Ok::<_, CallError>((album, tracks))
        })
        .await
    }

    pub async fn get_album(
        &self,
        album_id: &AlbumId,
        cancel: &CancellationToken,
    ) -> Result<Album, CallError> {
        Ok(self.album_with_tracks(album_id, cancel).await?.0)
    }

    pub async fn list_album_tracks(
        &self,
        album_id: &AlbumId,
        cancel: &CancellationToken,
    ) -> Result<Vec<Track>, CallError> {
        Ok(self.album_with_tracks(album_id, cancel).await?.1)
    }

    pub async fn get_artist(
        &self,
        artist_id: &ArtistId,
        cancel: &CancellationToken,
    ) -> Result<Artist, CallError> {
        let key = CacheKey::new("artist", [&artist_id.0]);
        self.cached(&self.artist_cache, key, self.detail_ttl, cancel, move || async move {
            let request = ApiRequest::get("/artists").param("id", &artist_id.0);
            let body = self.call(request, Auth::Optional, cancel).await?;
            let response: ArtistResponse = decode("/artists", body)?;
            response
                .artist
                .as_ref()
                .and_then(|a| map_artist(a, &self.provider_id))
                .ok_or_else(|| CallError::NotFound {
                    entity: format!("artist {}", artist_id.0),
                })
        })
        .await
    }

    pub async fn get_playlist(
        &self,
        playlist_id: &PlaylistId,
        cancel: &CancellationToken,
    ) -> Result<Playlist, CallError> {
        let key = CacheKey::new("playlist", [&playlist_id.0]);
        self.cached(&self.playlist_cache, key, self.detail_ttl, cancel, move || async move {
            let request = ApiRequest::get("/playlist/detail").param("id", &playlist_id.0);
            let body = self.call(request, Auth::Optional, cancel).await?;
            let response: PlaylistDetailResponse = decode("/playlist/detail", body)?;
            response
                .playlist
                .as_ref()
                .and_then(|p| map_playlist(p, &self.provider_id))
                .ok_or_else(|| CallError::NotFound {
                    entity: format!("playlist {}", playlist_id.0),
                })
        })
        .await
    }

    /// Asks the remote whether the stored credentials still work; a session
    /// the remote no longer recognises becomes `Revoked`.
    pub async fn verify_session(
        &self,
        cancel: &CancellationToken,
    ) -> Result<SessionStatus, CallError> {
        let Some(credentials) = self.session.credentials() else {
            return Ok(self.session.status());
        };
        let request = ApiRequest::get("/login/status");
        let account = match self
            .remote
            .call(&request, Some(&credentials.access_token), cancel)
            .await
        {
            Ok(body) => decode::<LoginStatusResponse>(request.endpoint, body)?
                .data
                .and_then(|data| data.user_id()),
            Err(CallError::Unauthorized { .. }) => None,
            Err(err) => return Err(err),
        };
        match account {
            Some(user_id) => {
                if let Err(err) = self.session.set_user_id(user_id) {
                    tracing::warn!(error = %err, "user id kept in memory only");
                }
            }
            None => {
                tracing::warn!("remote no longer recognises the session");
                if let Err(err) = self.session.revoke() {
                    tracing::warn!(error = %err, "failed to drop revoked session");
                }
            }
        }
        Ok(self.session.status())
    }

    /// Best-effort remote logout followed by a local reset.
    pub async fn logout(&self, cancel: &CancellationToken) -> Result<(), CallError> {
        if let Some(credentials) = self.session.credentials() {
            let request = ApiRequest::get("/logout");
            match self
                .remote
                .call(&request, Some(&credentials.access_token), cancel)
                .await
            {
                Ok(_) => tracing::debug!("remote logout acknowledged"),
                Err(CallError::Cancelled) => return Err(CallError::Cancelled),
                Err(err) => tracing::warn!(error = %err, "remote logout failed, clearing locally"),
            }
        }
        if let Err(err) = self.session.clear() {
            tracing::warn!(error = %err, "failed to remove persisted session");
        }
        Ok(())
    }

    /// Drops every cached lookup.
    pub async fn clear_caches(&self) {
        self.search_cache.invalidate_all().await;
        self.track_cache.invalidate_all().await;
        self.album_cache.invalidate_all().await;
        self.artist_cache.invalidate_all().await;
        self.playlist_cache.invalidate_all().await;
    }
}

#[async_trait::async_trait]
impl LoginBackend for ApiClient {
    async fn create_qr(&self, cancel: &CancellationToken) -> Result<QrCode, CallError> {
        let key_request = ApiRequest::get("/login/qr/key");
        let body = self.remote.call(&key_request, None, cancel).await?;
        let key = decode::<QrKeyResponse>(key_request.endpoint, body)?
            .data
            .and_then(|d| d.unikey)
            .ok_or_else(|| CallError::permanent("login key response carried no key"))?;

        let create_request = ApiRequest::get("/login/qr/create")
            .param("key", &key)
            .param("qrimg", "true");
        let body = self.remote.call(&create_request, None, cancel).await?;
        let data = decode::<QrCreateResponse>(create_request.endpoint, body)?
            .data
            .unwrap_or_default();
        if data.qrurl.is_none() && data.qrimg.is_none() {
            return Err(CallError::permanent("QR response carried neither image nor URL"));
        }
        Ok(QrCode {
            key,
            qr_url: data.qrurl,
            qr_image: data.qrimg,
        })
    }

    async fn check_qr(&self, key: &str, cancel: &CancellationToken) -> Result<QrStatus, CallError> {
        let request = ApiRequest::get("/login/qr/check")
            .param("key", key)
            .accepting(QR_CHECK_CODES);
        let body = self.remote.call(&request, None, cancel).await?;
        let response: QrCheckResponse = decode(request.endpoint, body)?;
        match response.code {
            Some(800) => Ok(QrStatus::Expired),
            Some(801) => Ok(QrStatus::WaitingScan),
            Some(802) => Ok(QrStatus::WaitingConfirm),
            Some(803) => match response.cookie.filter(|c| !c.trim().is_empty()) {
                Some(cookie) => Ok(QrStatus::Confirmed { cookie }),
                None => Err(CallError::permanent("login confirmed without a cookie")),
            },
            other => Err(CallError::permanent(format!(
                "unexpected login status {other:?}: {}",
                response.message.unwrap_or_default()
            ))),
        }
    }

    async fn fetch_user_id(
        &self,
        cookie: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, CallError> {
        let request = ApiRequest::get("/user/account");
        let body = self.remote.call(&request, Some(cookie), cancel).await?;
        Ok(decode::<AccountResponse>(request.endpoint, body)?.user_id())
    }
}
