use crate::models::{
    RawAlbum, RawAlbumRef, RawArtist, RawArtistRef, RawPlaylist, RawPrivilege, RawSong, RawSongUrl,
};
use chrono::{DateTime, Duration, Utc};
use ncloud_core::models::{
    Album, AlbumId, AlbumRef, Artist, ArtistId, ArtistRef, ContentType, Playlist, PlaylistId,
    StreamDetails, StreamRef, Track, TrackId,
};
use std::collections::HashMap;

const ARTWORK_SIZE: &str = "param=300y300";

/// Stream URLs without an `expi` are assumed to live this long.
const DEFAULT_STREAM_TTL_SECS: i64 = 20 * 60;

fn artwork(url: Option<&str>) -> Option<String> {
    let url = url.map(str::trim).filter(|u| !u.is_empty())?;
    let separator = if url.contains('?') { '&' } else { '?' };
    Some(format!("{url}{separator}{ARTWORK_SIZE}"))
}

fn text(value: Option<&String>) -> String {
    value.map(|s| s.trim().to_string()).unwrap_or_default()
}

fn to_u32(value: Option<u64>) -> Option<u32> {
    value.and_then(|v| u32::try_from(v).ok())
}

fn map_artist_ref(raw: &RawArtistRef) -> ArtistRef {
    ArtistRef {
        id: raw.id.clone().map(ArtistId::new),
        name: text(raw.name.as_ref()),
    }
}

fn map_album_ref(raw: &RawAlbumRef) -> Option<AlbumRef> {
    if raw.id.is_none() && raw.name.is_none() {
        return None;
    }
    Some(AlbumRef {
        id: raw
            .id
            .clone()
            .filter(|id| id != "0")
            .map(AlbumId::new),
        name: text(raw.name.as_ref()),
    })
}

/// Tracks are never dropped: a record without an id, or one the remote
/// marks as unavailable, comes back with `unplayable` set.
pub fn map_track(raw: &RawSong, privilege: Option<&RawPrivilege>, provider_id: &str) -> Track {
    let privilege = privilege.or(raw.privilege.as_ref());
    let blocked = privilege.and_then(|p| p.st).is_some_and(|st| st < 0);
    let stream_ref = match (&raw.id, blocked) {
        (Some(id), false) => Some(StreamRef(id.clone())),
        _ => None,
    };

    Track {
        id: TrackId::new(raw.id.clone().unwrap_or_default()),
        provider_id: provider_id.to_string(),
        title: text(raw.name.as_ref()),
        artists: raw.ar.iter().map(map_artist_ref).collect(),
        album: raw.al.as_ref().and_then(map_album_ref),
        duration_ms: raw.dt.filter(|dt| *dt > 0),
        artwork_url: artwork(raw.al.as_ref().and_then(|al| al.pic_url.as_deref())),
        unplayable: stream_ref.is_none(),
        stream_ref,
    }
}

/// Maps songs, pairing each with its entry from a sibling `privileges` list.
pub fn map_tracks(songs: &[RawSong], privileges: &[RawPrivilege], provider_id: &str) -> Vec<Track> {
    let by_id: HashMap<&str, &RawPrivilege> = privileges
        .iter()
        .filter_map(|p| p.id.as_deref().map(|id| (id, p)))
        .collect();
    songs
        .iter()
        .map(|song| {
            let privilege = song.id.as_deref().and_then(|id| by_id.get(id).copied());
            map_track(song, privilege, provider_id)
        })
        .collect()
}

pub fn map_album(raw: &RawAlbum, provider_id: &str) -> Option<Album> {
    let id = raw.id.clone()?;
    let mut artists: Vec<ArtistRef> = raw.artists.iter().map(map_artist_ref).collect();
    if artists.is_empty() {
        artists.extend(raw.artist.as_ref().map(map_artist_ref));
    }
    Some(Album {
        id: AlbumId::new(id),
        provider_id: provider_id.to_string(),
        title: text(raw.name.as_ref()),
        artists,
        artwork_url: artwork(raw.pic_url.as_deref()),
        track_count: to_u32(raw.size),
    })
}

pub fn map_artist(raw: &RawArtist, provider_id: &str) -> Option<Artist> {
    let id = raw.id.clone()?;
    Some(Artist {
        id: ArtistId::new(id),
        provider_id: provider_id.to_string(),
        name: text(raw.name.as_ref()),
        artwork_url: artwork(raw.pic_url.as_deref().or(raw.img1v1_url.as_deref())),
        album_count: to_u32(raw.album_size),
    })
}

pub fn map_playlist(raw: &RawPlaylist, provider_id: &str) -> Option<Playlist> {
    let id = raw.id.clone()?;
    Some(Playlist {
        id: PlaylistId::new(id),
        provider_id: provider_id.to_string(),
        name: text(raw.name.as_ref()),
        description: raw
            .description
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty()),
        owner: raw
            .creator
            .as_ref()
            .and_then(|c| c.nickname.clone())
            .filter(|n| !n.is_empty()),
        artwork_url: artwork(raw.cover_img_url.as_deref()),
        track_count: to_u32(raw.track_count),
    })
}

/// Keeps the items that could be normalized, logging the rest.
pub fn map_all<R, T>(raw: &[R], kind: &str, map: impl Fn(&R) -> Option<T>) -> Vec<T> {
    let mapped: Vec<T> = raw.iter().filter_map(map).collect();
    if mapped.len() < raw.len() {
        tracing::debug!(kind, dropped = raw.len() - mapped.len(), "records without id dropped");
    }
    mapped
}

/// `None` when the remote issued no URL (region lock, paid track, ...).
pub fn map_stream(
    raw: &RawSongUrl,
    track_id: &TrackId,
    now: DateTime<Utc>,
) -> Option<StreamDetails> {
    let url = raw.url.as_deref().map(str::trim).filter(|u| !u.is_empty())?;
    let expires_at = raw
        .expi
        .and_then(|secs| i64::try_from(secs).ok())
        .filter(|secs| *secs > 0)
        .and_then(Duration::try_seconds)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or_else(|| now + Duration::seconds(DEFAULT_STREAM_TTL_SECS));
    Some(StreamDetails {
        track_id: track_id.clone(),
        url: url.to_string(),
        content_type: raw
            .kind
            .as_deref()
            .map(ContentType::from_extension)
            .unwrap_or(ContentType::Unknown),
        bitrate: to_u32(raw.br),
        sample_rate: to_u32(raw.sr),
        expires_at,
    })
}
