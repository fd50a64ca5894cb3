use crate::models::{PageRequest, PlaylistId, SearchKind, TrackId};
use crate::provider::{Provider, ProviderError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Expectations supplied by a provider implementation to run the shared contract suite.
#[derive(Debug, Clone)]
pub struct ProviderContractExpectations {
    /// The provider id that should be returned by all tracks/playlists.
    pub provider_id: String,
    /// Required search expectation; validates stable ids and metadata.
    pub search: SearchExpectation,
    /// Track id to validate stream URL resolution.
    pub stream_track_id: TrackId,
    /// Playlist expectations (only required if library playlists are advertised).
    pub playlist: Option<PlaylistExpectation>,
}

/// Search expectation used to validate provider search behavior.
#[derive(Debug, Clone)]
pub struct SearchExpectation {
    /// Query text to send to the provider.
    pub query: String,
    /// The first track id expected for the search query (remote ordering).
    pub expected_first_track_id: TrackId,
}

/// Playlist expectation used when the provider advertises playlist support.
#[derive(Debug, Clone)]
pub struct PlaylistExpectation {
    /// A known playlist id that should be returned by playlist listing.
    pub playlist_id: PlaylistId,
    /// First track expected when listing the playlist's tracks.
    pub expected_first_track_id: Option<TrackId>,
}

/// Errors surfaced by the provider contract test harness.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProviderContractError {
    #[error("empty search query was not rejected with InvalidArgument")]
    EmptyQueryAccepted,
    #[error("search returned no tracks for query: {query}")]
    EmptySearch { query: String },
    #[error("search returned wrong first track id: expected {expected:?}, got {actual:?}")]
    SearchWrongFirstTrack { expected: TrackId, actual: TrackId },
    #[error("search returned track from different provider: {actual}")]
    SearchProviderMismatch { actual: String },
    #[error("get_track returned mismatched id: expected {expected:?}, got {actual:?}")]
    TrackLookupMismatch { expected: TrackId, actual: TrackId },
    #[error("stream URL was empty for track {track_id:?}")]
    EmptyStreamUrl { track_id: TrackId },
    #[error("provider advertises playlists capability but no playlist expectation supplied")]
    MissingPlaylistExpectation,
    #[error(
        "provider claims playlists support but did not return expected playlist id {expected:?}"
    )]
    PlaylistMissingExpected { expected: PlaylistId },
    #[error("playlist tracks started with {actual:?}, expected {expected:?}")]
    PlaylistWrongFirstTrack { expected: TrackId, actual: TrackId },
    #[error(
        "provider does not advertise playlists but list_playlists did not return NotSupported"
    )]
    PlaylistsNotSupportedExpected,
    #[error("provider error while running contract: {0}")]
    ProviderFailure(String),
}

fn failure(err: ProviderError) -> ProviderContractError {
    ProviderContractError::ProviderFailure(err.to_string())
}

/// Run the shared provider contract suite against a provider implementation.
///
/// Providers should call this from their crate-level tests with known fixtures that
/// exist in their test setup (for remote providers, a mock server).
pub async fn run_provider_contract<P: Provider + ?Sized>(
    provider: &P,
    expectations: &ProviderContractExpectations,
) -> Result<(), ProviderContractError> {
    let cancel = CancellationToken::new();
    verify_search(provider, expectations, &cancel).await?;
    verify_stream(provider, expectations, &cancel).await?;
    verify_playlists(provider, expectations, &cancel).await?;
    Ok(())
}

async fn verify_search<P: Provider + ?Sized>(
    provider: &P,
    expectations: &ProviderContractExpectations,
    cancel: &CancellationToken,
) -> Result<(), ProviderContractError> {
    match provider
        .search("", &[SearchKind::Track], PageRequest::first_page(10), cancel)
        .await
    {
        Err(ProviderError::InvalidArgument { .. }) => {}
        _ => return Err(ProviderContractError::EmptyQueryAccepted),
    }

    let result = provider
        .search(
            &expectations.search.query,
            &[SearchKind::Track],
            PageRequest::first_page(10),
            cancel,
        )
        .await
        .map_err(failure)?;

    let first = result
        .tracks
        .first()
        .ok_or_else(|| ProviderContractError::EmptySearch {
            query: expectations.search.query.clone(),
        })?;

    if first.id != expectations.search.expected_first_track_id {
        return Err(ProviderContractError::SearchWrongFirstTrack {
            expected: expectations.search.expected_first_track_id.clone(),
            actual: first.id.clone(),
        });
    }

    if first.provider_id != expectations.provider_id {
        return Err(ProviderContractError::SearchProviderMismatch {
            actual: first.provider_id.clone(),
        });
    }

    let track = provider.get_track(&first.id, cancel).await.map_err(failure)?;
    if track.id != first.id {
        return Err(ProviderContractError::TrackLookupMismatch {
            expected: first.id.clone(),
            actual: track.id,
        });
    }
    if track.provider_id != expectations.provider_id {
        return Err(ProviderContractError::SearchProviderMismatch {
            actual: track.provider_id,
        });
    }

    Ok(())
}

async fn verify_stream<P: Provider + ?Sized>(
    provider: &P,
    expectations: &ProviderContractExpectations,
    cancel: &CancellationToken,
) -> Result<(), ProviderContractError> {
    let details = provider
        .get_stream_url(&expectations.stream_track_id, cancel)
        .await
        .map_err(failure)?;
    if details.url.trim().is_empty() {
        return Err(ProviderContractError::EmptyStreamUrl {
            track_id: expectations.stream_track_id.clone(),
        });
    }
    Ok(())
}

async fn verify_playlists<P: Provider + ?Sized>(
    provider: &P,
    expectations: &ProviderContractExpectations,
    cancel: &CancellationToken,
) -> Result<(), ProviderContractError> {
    let caps = provider.capabilities();
    if !caps.supports_library_playlists() {
        return match provider
            .list_playlists(PageRequest::first_page(1), cancel)
            .await
        {
            Err(ProviderError::NotSupported { .. }) => Ok(()),
            _ => Err(ProviderContractError::PlaylistsNotSupportedExpected),
        };
    }

    let expectation = expectations
        .playlist
        .as_ref()
        .ok_or(ProviderContractError::MissingPlaylistExpectation)?;

    let listed = provider
        .list_playlists(PageRequest::first_page(25), cancel)
        .await
        .map_err(failure)?;
    if !listed.items.iter().any(|p| p.id == expectation.playlist_id) {
        return Err(ProviderContractError::PlaylistMissingExpected {
            expected: expectation.playlist_id.clone(),
        });
    }

    let tracks = provider
        .list_playlist_tracks(&expectation.playlist_id, PageRequest::first_page(25), cancel)
        .await
        .map_err(failure)?;
    if let Some(expected) = &expectation.expected_first_track_id {
        match tracks.items.first() {
            Some(first) if &first.id == expected => {}
            Some(first) => {
                return Err(ProviderContractError::PlaylistWrongFirstTrack {
                    expected: expected.clone(),
                    actual: first.id.clone(),
                })
            }
            None => {
                return Err(ProviderContractError::PlaylistMissingExpected {
                    expected: expectation.playlist_id.clone(),
                })
            }
        }
    }
    if let Some(foreign) = tracks
        .items
        .iter()
        .find(|t| t.provider_id != expectations.provider_id)
    {
        return Err(ProviderContractError::SearchProviderMismatch {
            actual: foreign.provider_id.clone(),
        });
    }

    Ok(())
}
