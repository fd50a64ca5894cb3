use anyhow::Result;
use clap::{Parser, Subcommand};
use ncloud_core::{
    init_logging, AlbumId, AppDirs, Config, FileStorage, KeyringStorage, LoginPoll, PageRequest,
    PlaylistId, Provider, SearchKind, SessionStorage, Track, TrackId,
};
use ncloud_provider::NcloudProvider;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
#[command(name = "ncloud", version, about = "Cloud music provider command line")]
struct Cli {
    /// API base URL override (takes precedence over config)
    #[arg(long, global = true)]
    base_url: Option<String>,
    /// Keep the session in the OS keyring instead of the data directory
    #[arg(long, global = true)]
    keyring: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Sign in by scanning a QR code with the mobile app
    Login {
        /// Print the ticket and exit instead of waiting for confirmation
        #[arg(long)]
        no_wait: bool,
    },
    /// Sign out and forget the stored session
    Logout,
    /// Show the session status
    Status {
        /// Ask the remote whether the session is still valid
        #[arg(long)]
        verify: bool,
    },
    /// Search the catalogue
    Search {
        query: String,
        /// Kinds to search (track, album, artist, playlist); defaults to tracks
        #[arg(long = "kind", value_parser = parse_kind)]
        kinds: Vec<SearchKind>,
        #[command(flatten)]
        page: PageArgs,
    },
    /// List playlists in your library
    Playlists {
        #[command(flatten)]
        page: PageArgs,
    },
    /// List the tracks of a playlist
    Playlist {
        id: String,
        #[command(flatten)]
        page: PageArgs,
    },
    /// Show an album and its tracks
    Album { id: String },
    /// Resolve a playable URL for a track
    Stream { id: String },
}

#[derive(Debug, Clone, Copy, clap::Args)]
struct PageArgs {
    #[arg(long, default_value_t = 0)]
    offset: u32,
    #[arg(long, default_value_t = 20)]
    limit: u32,
}

impl From<PageArgs> for PageRequest {
    fn from(args: PageArgs) -> Self {
        PageRequest::new(args.offset, args.limit)
    }
}

#[derive(Debug, Error)]
enum CliError {
    #[error("login did not complete: {0:?}")]
    LoginIncomplete(LoginPoll),
}

fn parse_kind(raw: &str) -> Result<SearchKind, String> {
    raw.parse()
}

fn search_kinds(requested: &[SearchKind]) -> Vec<SearchKind> {
    if requested.is_empty() {
        vec![SearchKind::Track]
    } else {
        requested.to_vec()
    }
}

fn describe_track(track: &Track) -> String {
    let mut line = format!("{}  {}", track.id.0, track.title);
    let artists = track.artist_names();
    if !artists.is_empty() {
        line.push_str(&format!(" - {artists}"));
    }
    if let Some(album) = &track.album {
        if !album.name.is_empty() {
            line.push_str(&format!(" [{}]", album.name));
        }
    }
    if let Some(ms) = track.duration_ms {
        let secs = ms / 1000;
        line.push_str(&format!(" ({}:{:02})", secs / 60, secs % 60));
    }
    if track.unplayable {
        line.push_str(" (unavailable)");
    }
    line
}

fn storage(dirs: &AppDirs, keyring: bool) -> Arc<dyn SessionStorage> {
    if keyring {
        Arc::new(KeyringStorage::new())
    } else {
        Arc::new(FileStorage::new(dirs.session_dir()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let dirs = AppDirs::discover()?;
    let mut config = Config::load_or_default(&dirs)?;
    let _logging = init_logging(&config.logging, &dirs)?;
    if let Some(base_url) = cli.base_url.clone() {
        config.ncloud.api_base_url = base_url;
    }

    let provider = NcloudProvider::new(storage(&dirs, cli.keyring));
    provider.on_load(config.ncloud.clone()).await?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    let outcome = run(&provider, cli.command, &cancel).await;
    provider.on_unload().await;
    outcome
}

async fn run(provider: &NcloudProvider, command: Command, cancel: &CancellationToken) -> Result<()> {
    match command {
        Command::Login { no_wait } => {
            let ticket = provider.get_login_ticket(cancel).await?;
            println!("Scan this code with the mobile app:");
            match &ticket.qr_url {
                Some(url) => println!("  {url}"),
                None => println!("  {}", ticket.qr_image_payload),
            }
            println!("Ticket expires at {}", ticket.expires_at);
            if no_wait {
                return Ok(());
            }
            match provider.wait_for_login(cancel).await? {
                LoginPoll::Confirmed { user_id } => {
                    println!(
                        "Signed in{}",
                        user_id.map(|id| format!(" as user {id}")).unwrap_or_default()
                    );
                }
                other => return Err(CliError::LoginIncomplete(other).into()),
            }
        }
        Command::Logout => {
            provider.logout(cancel).await?;
            println!("Signed out");
        }
        Command::Status { verify } => {
            let status = if verify {
                provider.verify_session(cancel).await?
            } else {
                provider.session_status()
            };
            println!("Session: {status:?}");
        }
        Command::Search { query, kinds, page } => {
            let result = provider
                .search(&query, &search_kinds(&kinds), page.into(), cancel)
                .await?;
            if result.is_empty() {
                println!("No results for \"{query}\"");
            }
            for track in &result.tracks {
                println!("track     {}", describe_track(track));
            }
            for album in &result.albums {
                println!("album     {}  {}", album.id.0, album.title);
            }
            for artist in &result.artists {
                println!("artist    {}  {}", artist.id.0, artist.name);
            }
            for playlist in &result.playlists {
                println!("playlist  {}  {}", playlist.id.0, playlist.name);
            }
        }
        Command::Playlists { page } => {
            let listed = provider.list_playlists(page.into(), cancel).await?;
            for playlist in &listed.items {
                let count = playlist
                    .track_count
                    .map(|n| format!(" ({n} tracks)"))
                    .unwrap_or_default();
                println!("{}  {}{count}", playlist.id.0, playlist.name);
            }
            if let Some(next) = listed.next {
                println!("More available: --offset {}", next.0);
            }
        }
        Command::Playlist { id, page } => {
            let tracks = provider
                .list_playlist_tracks(&PlaylistId::new(id), page.into(), cancel)
                .await?;
            for track in &tracks.items {
                println!("{}", describe_track(track));
            }
            if let Some(next) = tracks.next {
                println!("More available: --offset {}", next.0);
            }
        }
        Command::Album { id } => {
            let album_id = AlbumId::new(id);
            let album = provider.get_album(&album_id, cancel).await?;
            println!("{}  {}", album.id.0, album.title);
            for track in provider.list_album_tracks(&album_id, cancel).await? {
                println!("  {}", describe_track(&track));
            }
        }
        Command::Stream { id } => {
            let details = provider.get_stream_url(&TrackId::new(id), cancel).await?;
            println!("{}", details.url);
            tracing::info!(
                content_type = ?details.content_type,
                bitrate = details.bitrate,
                expires_at = %details.expires_at,
                "stream resolved"
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ncloud_core::{AlbumRef, ArtistRef, StreamRef};

    #[test]
    fn search_defaults_to_tracks() {
        assert_eq!(search_kinds(&[]), vec![SearchKind::Track]);
        assert_eq!(
            search_kinds(&[SearchKind::Album, SearchKind::Artist]),
            vec![SearchKind::Album, SearchKind::Artist]
        );
    }

    #[test]
    fn search_accepts_repeated_kinds() {
        let cli = Cli::try_parse_from([
            "ncloud", "search", "piano", "--kind", "albums", "--kind", "artist", "--limit", "5",
        ])
        .expect("arguments should parse");
        match cli.command {
            Command::Search { query, kinds, page } => {
                assert_eq!(query, "piano");
                assert_eq!(kinds, vec![SearchKind::Album, SearchKind::Artist]);
                assert_eq!(PageRequest::from(page), PageRequest::new(0, 5));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!(Cli::try_parse_from(["ncloud", "search", "x", "--kind", "genre"]).is_err());
    }

    #[test]
    fn global_flags_follow_subcommands() {
        let cli = Cli::try_parse_from(["ncloud", "status", "--verify", "--keyring"])
            .expect("arguments should parse");
        assert!(cli.keyring);
        assert!(matches!(cli.command, Command::Status { verify: true }));
    }

    #[test]
    fn track_lines_include_artist_album_and_duration() {
        let track = Track {
            id: TrackId::new("101"),
            provider_id: "ncloud".into(),
            title: "Nocturne".into(),
            artists: vec![ArtistRef {
                id: None,
                name: "Pianist".into(),
            }],
            album: Some(AlbumRef {
                id: None,
                name: "Nights".into(),
            }),
            duration_ms: Some(245_000),
            artwork_url: None,
            stream_ref: Some(StreamRef("101".into())),
            unplayable: false,
        };
        assert_eq!(
            describe_track(&track),
            "101  Nocturne - Pianist [Nights] (4:05)"
        );
    }
}
