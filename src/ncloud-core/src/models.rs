use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A provider-scoped track identifier.
///
/// Providers MUST treat this as an opaque, case-sensitive identifier that is
/// stable across runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct TrackId(pub String);

impl TrackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl AsRef<str> for TrackId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TrackId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for TrackId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A provider-scoped album identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash)]
pub struct AlbumId(pub String);

impl AlbumId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl From<&str> for AlbumId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for AlbumId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A provider-scoped artist identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash)]
pub struct ArtistId(pub String);

impl ArtistId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl From<&str> for ArtistId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// A provider-scoped playlist identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct PlaylistId(pub String);

impl PlaylistId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl From<&str> for PlaylistId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for PlaylistId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Opaque handle a provider later exchanges for a playable stream URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct StreamRef(pub String);

/// Lightweight artist reference embedded in tracks and albums.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistRef {
    pub id: Option<ArtistId>,
    pub name: String,
}

/// Lightweight album reference embedded in tracks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumRef {
    pub id: Option<AlbumId>,
    pub name: String,
}

/// Normalized track record.
///
/// `stream_ref` is `None` and `unplayable` is set whenever the remote record
/// cannot be resolved to audio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub provider_id: String,
    pub title: String,
    pub artists: Vec<ArtistRef>,
    pub album: Option<AlbumRef>,
    /// Duration in milliseconds when known.
    pub duration_ms: Option<u64>,
    pub artwork_url: Option<String>,
    pub stream_ref: Option<StreamRef>,
    pub unplayable: bool,
}

impl Track {
    /// Artist names joined for display.
    pub fn artist_names(&self) -> String {
        self.artists
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Album {
    pub id: AlbumId,
    pub provider_id: String,
    pub title: String,
    pub artists: Vec<ArtistRef>,
    pub artwork_url: Option<String>,
    pub track_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artist {
    pub id: ArtistId,
    pub provider_id: String,
    pub name: String,
    pub artwork_url: Option<String>,
    pub album_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: PlaylistId,
    pub provider_id: String,
    pub name: String,
    pub description: Option<String>,
    pub owner: Option<String>,
    pub artwork_url: Option<String>,
    pub track_count: Option<u32>,
}

/// Catalog kinds a search can fan out over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchKind {
    Track,
    Album,
    Artist,
    Playlist,
}

impl SearchKind {
    pub const ALL: [SearchKind; 4] = [
        SearchKind::Track,
        SearchKind::Album,
        SearchKind::Artist,
        SearchKind::Playlist,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SearchKind::Track => "track",
            SearchKind::Album => "album",
            SearchKind::Artist => "artist",
            SearchKind::Playlist => "playlist",
        }
    }
}

impl std::str::FromStr for SearchKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "track" | "tracks" | "song" | "songs" => Ok(SearchKind::Track),
            "album" | "albums" => Ok(SearchKind::Album),
            "artist" | "artists" => Ok(SearchKind::Artist),
            "playlist" | "playlists" => Ok(SearchKind::Playlist),
            other => Err(format!("unknown search kind: {other}")),
        }
    }
}

/// Merged search results. Each list keeps the remote relevance order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub tracks: Vec<Track>,
    pub albums: Vec<Album>,
    pub artists: Vec<Artist>,
    pub playlists: Vec<Playlist>,
}

impl SearchResult {
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
            && self.albums.is_empty()
            && self.artists.is_empty()
            && self.playlists.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Mp3,
    Flac,
    Aac,
    Unknown,
}

impl ContentType {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "mp3" => ContentType::Mp3,
            "flac" => ContentType::Flac,
            "m4a" | "aac" => ContentType::Aac,
            _ => ContentType::Unknown,
        }
    }
}

/// A short-lived, provider-issued stream location. Hosts must not keep it
/// past `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDetails {
    pub track_id: TrackId,
    pub url: String,
    pub content_type: ContentType,
    pub bitrate: Option<u32>,
    pub sample_rate: Option<u32>,
    pub expires_at: DateTime<Utc>,
}

/// Paging request represented as offset/limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageRequest {
    pub offset: u32,
    pub limit: u32,
}

impl PageRequest {
    pub fn new(offset: u32, limit: u32) -> Self {
        Self { offset, limit }
    }

    pub fn first_page(limit: u32) -> Self {
        Self { offset: 0, limit }
    }

    pub fn next(&self) -> Self {
        Self {
            offset: self.offset.saturating_add(self.limit),
            limit: self.limit,
        }
    }
}

/// Cursor returned from a paged provider call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCursor(pub String);

/// A single page of items plus an optional cursor for continuation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<PageCursor>,
}

impl<T> Page<T> {
    pub fn single_page(items: Vec<T>) -> Self {
        Self { items, next: None }
    }

    /// Builds a page whose cursor points past `paging` when the remote
    /// reported more items.
    pub fn with_more(items: Vec<T>, paging: PageRequest, more: bool) -> Self {
        let next = more.then(|| PageCursor(paging.next().offset.to_string()));
        Self { items, next }
    }
}
