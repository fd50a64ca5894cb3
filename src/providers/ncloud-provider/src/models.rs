//! Raw response shapes of the music API.
//!
//! Every field is optional and list elements that fail to parse are dropped,
//! so schema drift degrades individual records instead of whole responses.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Accepts ids sent as numbers or strings; anything else becomes `None`.
pub fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    })
}

/// Accepts integer or float numbers, and numeric strings.
pub fn lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Accepts strings, and numbers rendered as text; other shapes become `None`.
pub fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

pub fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// A nested record that reads as `None` when it does not parse.
pub fn lenient_object<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value
        .filter(|v| !v.is_null())
        .and_then(|v| match serde_json::from_value(v) {
            Ok(item) => Some(item),
            Err(err) => {
                tracing::debug!(error = %err, "ignoring malformed nested record");
                None
            }
        }))
}

/// A list where malformed elements are skipped and `null` reads as empty.
pub fn lenient_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let values = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(values
        .into_iter()
        .filter_map(|value| match serde_json::from_value(value) {
            Ok(item) => Some(item),
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed list element");
                None
            }
        })
        .collect())
}

#[derive(Debug, Default, Deserialize)]
pub struct RawArtistRef {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAlbumRef {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub pic_url: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct RawPrivilege {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<String>,
    /// Negative when the track cannot be played.
    #[serde(default, deserialize_with = "lenient_i64")]
    pub st: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawSong {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub ar: Vec<RawArtistRef>,
    #[serde(default, deserialize_with = "lenient_object")]
    pub al: Option<RawAlbumRef>,
    /// Duration in milliseconds.
    #[serde(default, deserialize_with = "lenient_u64")]
    pub dt: Option<u64>,
    #[serde(default, deserialize_with = "lenient_object")]
    pub privilege: Option<RawPrivilege>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAlbum {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub artists: Vec<RawArtistRef>,
    #[serde(default, deserialize_with = "lenient_object")]
    pub artist: Option<RawArtistRef>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub pic_url: Option<String>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub size: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawArtist {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub pic_url: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub img1v1_url: Option<String>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub album_size: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawCreator {
    #[serde(default, deserialize_with = "lenient_string")]
    pub nickname: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPlaylist {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub cover_img_url: Option<String>,
    #[serde(default, deserialize_with = "lenient_object")]
    pub creator: Option<RawCreator>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub track_count: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawSearchResult {
    #[serde(default, deserialize_with = "lenient_vec")]
    pub songs: Vec<RawSong>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub albums: Vec<RawAlbum>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub artists: Vec<RawArtist>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub playlists: Vec<RawPlaylist>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub result: Option<RawSearchResult>,
}

/// `/song/detail` and `/playlist/track/all`.
#[derive(Debug, Default, Deserialize)]
pub struct SongsResponse {
    #[serde(default, deserialize_with = "lenient_vec")]
    pub songs: Vec<RawSong>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub privileges: Vec<RawPrivilege>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AlbumResponse {
    #[serde(default)]
    pub album: Option<RawAlbum>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub songs: Vec<RawSong>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ArtistResponse {
    #[serde(default)]
    pub artist: Option<RawArtist>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PlaylistDetailResponse {
    #[serde(default)]
    pub playlist: Option<RawPlaylist>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UserPlaylistsResponse {
    #[serde(default, deserialize_with = "lenient_vec")]
    pub playlist: Vec<RawPlaylist>,
    #[serde(default)]
    pub more: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawSongUrl {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub url: Option<String>,
    /// Bitrate in bits per second.
    #[serde(default, deserialize_with = "lenient_u64")]
    pub br: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub sr: Option<u64>,
    #[serde(default, rename = "type", deserialize_with = "lenient_string")]
    pub kind: Option<String>,
    /// Seconds until the URL stops working.
    #[serde(default, deserialize_with = "lenient_u64")]
    pub expi: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SongUrlResponse {
    #[serde(default, deserialize_with = "lenient_vec")]
    pub data: Vec<RawSongUrl>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawAccount {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawProfile {
    #[serde(default, deserialize_with = "lenient_id")]
    pub user_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub nickname: Option<String>,
}

/// `/user/account`, and the `data` object of `/login/status`.
#[derive(Debug, Default, Deserialize)]
pub struct AccountResponse {
    #[serde(default)]
    pub account: Option<RawAccount>,
    #[serde(default)]
    pub profile: Option<RawProfile>,
}

impl AccountResponse {
    pub fn user_id(&self) -> Option<String> {
        self.account
            .as_ref()
            .and_then(|a| a.id.clone())
            .or_else(|| self.profile.as_ref().and_then(|p| p.user_id.clone()))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginStatusResponse {
    #[serde(default)]
    pub data: Option<AccountResponse>,
}

#[derive(Debug, Default, Deserialize)]
pub struct QrKeyData {
    #[serde(default, deserialize_with = "lenient_id")]
    pub unikey: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct QrKeyResponse {
    #[serde(default)]
    pub data: Option<QrKeyData>,
}

#[derive(Debug, Default, Deserialize)]
pub struct QrCreateData {
    #[serde(default, deserialize_with = "lenient_string")]
    pub qrurl: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub qrimg: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct QrCreateResponse {
    #[serde(default)]
    pub data: Option<QrCreateData>,
}

#[derive(Debug, Default, Deserialize)]
pub struct QrCheckResponse {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub cookie: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RefreshResponse {
    #[serde(default, deserialize_with = "lenient_string")]
    pub cookie: Option<String>,
}
