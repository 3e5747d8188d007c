//! Fakes of the pipeline's collaborators, for tests.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    coordinator::DownloadCoordinator,
    error::{Error, Result},
    library::{LocalCopies, Metadata, MemoryLibrary, Scanner},
    provider::{Provider, ResolvedDownload},
    quality::{AudioQuality, Format, FormatSelection},
    track::{Album, Track, TrackKey},
};

/// `deezer.getUserData` results of a logged-in account.
pub const USER_DATA: &str = r#"{"error": [], "results": {
    "USER": {"USER_ID": 42, "OPTIONS": {"license_token": "license"}},
    "checkForm": "api-token"}}"#;

/// `song.getData` results of track `123456`.
pub const SONG_DATA: &str =
    r#"{"error": [], "results": {"SNG_ID": "123456", "TRACK_TOKEN": "track-token"}}"#;

pub fn track(id: &str, number: u32) -> Track {
    Track {
        id: id.to_owned(),
        title: format!("Title {id}"),
        artist: "Artist".to_owned(),
        album: "Album".to_owned(),
        album_id: Some("900".to_owned()),
        track_number: number,
        ..Track::default()
    }
}

/// Catalog served from memory.
#[derive(Default)]
pub struct FakeMetadata {
    pub tracks: HashMap<String, Track>,
    pub albums: HashMap<String, Album>,
    pub track_lookups: AtomicUsize,
}

impl FakeMetadata {
    #[must_use]
    pub fn with_track(mut self, track: Track) -> Self {
        self.tracks.insert(track.id.clone(), track);
        self
    }

    #[must_use]
    pub fn with_album(mut self, album: Album) -> Self {
        for track in &album.tracks {
            self.tracks.insert(track.id.clone(), track.clone());
        }
        self.albums.insert(album.id.clone(), album);
        self
    }
}

#[async_trait]
impl Metadata for FakeMetadata {
    async fn track(&self, _provider: &str, id: &str) -> Result<Option<Track>> {
        self.track_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.tracks.get(id).cloned())
    }

    async fn album(&self, _provider: &str, id: &str) -> Result<Option<Album>> {
        Ok(self.albums.get(id).cloned())
    }
}

/// Provider that resolves every track to `{base}/stream/{id}`.
pub struct FakeProvider {
    pub base: String,
    pub format: Format,
    pub delay: Duration,
    pub resolutions: AtomicUsize,
}

impl FakeProvider {
    pub const NAME: &'static str = "fake";

    #[must_use]
    pub fn new(base: String) -> Self {
        Self {
            base,
            format: Format::FLAC,
            delay: Duration::ZERO,
            resolutions: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn resolutions(&self) -> usize {
        self.resolutions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for FakeProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn target_quality(&self) -> AudioQuality {
        AudioQuality::Lossless
    }

    async fn resolve_download(
        &self,
        track: &Track,
        _ceiling: AudioQuality,
        _cancel: &CancellationToken,
    ) -> Result<ResolvedDownload> {
        self.resolutions.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;

        let url = Url::parse(&format!("{}/stream/{}", self.base, track.id))
            .map_err(|e| Error::internal(e.to_string()))?;
        Ok(ResolvedDownload {
            url,
            selection: FormatSelection::new(self.format),
            key: None,
        })
    }
}

/// Scanner that counts triggers.
#[derive(Default)]
pub struct CountingScanner {
    pub triggers: AtomicUsize,
}

#[async_trait]
impl Scanner for CountingScanner {
    async fn trigger_scan(&self) -> bool {
        self.triggers.fetch_add(1, Ordering::SeqCst);
        true
    }
}

/// Coordinator over fakes, downloading into `root`.
pub fn coordinator(
    root: PathBuf,
    metadata: Arc<FakeMetadata>,
    provider: Arc<dyn Provider>,
    library: Arc<MemoryLibrary>,
    download_albums: bool,
) -> DownloadCoordinator {
    DownloadCoordinator::builder(root, metadata)
        .provider(provider)
        .local_copies(Arc::clone(&library) as Arc<dyn LocalCopies>)
        .registry(library)
        .download_albums(download_albums)
        .build()
        .unwrap()
}

pub fn key(id: &str) -> TrackKey {
    TrackKey::new(FakeProvider::NAME, id)
}
