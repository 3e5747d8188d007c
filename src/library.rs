//! Collaborators of the acquisition pipeline.
//!
//! The pipeline does not own the media library. It asks these traits
//! whether a track is already local, reports finished files, and nudges the
//! media server to rescan. Implementations live elsewhere: the catalog,
//! the media server, or the in-memory [`MemoryLibrary`] below.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::RwLock,
};

use async_trait::async_trait;

use crate::{
    error::{Error, Result},
    track::{Album, Track, TrackKey},
};

/// Track and album lookup at a provider.
#[async_trait]
pub trait Metadata: Send + Sync {
    /// Returns `None` if the provider has no such track.
    async fn track(&self, provider: &str, id: &str) -> Result<Option<Track>>;

    /// Returns `None` if the provider has no such album.
    async fn album(&self, provider: &str, id: &str) -> Result<Option<Album>>;
}

/// Lookup of tracks that were downloaded before.
#[async_trait]
pub trait LocalCopies: Send + Sync {
    async fn local_path(&self, provider: &str, id: &str) -> Option<PathBuf>;
}

/// Bookkeeping of finished downloads, so future lookups short-circuit.
#[async_trait]
pub trait Registry: Send + Sync {
    async fn register(&self, provider: &str, track: &Track, path: &Path) -> Result<()>;
}

/// Library rescan trigger.
#[async_trait]
pub trait Scanner: Send + Sync {
    /// Returns whether a scan was started. Implementations debounce.
    async fn trigger_scan(&self) -> bool;
}

/// Metadata tag writer for finished files.
#[async_trait]
pub trait TagWriter: Send + Sync {
    async fn write_tags(&self, path: &Path, track: &Track) -> Result<()>;
}

/// Process-lifetime record of local copies.
///
/// Serves as both [`LocalCopies`] and [`Registry`] when no persistent store
/// is available.
#[derive(Debug, Default)]
pub struct MemoryLibrary {
    paths: RwLock<HashMap<TrackKey, PathBuf>>,
}

impl MemoryLibrary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `path` for a track without going through a download.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the lock is poisoned.
    pub fn insert(&self, key: TrackKey, path: impl Into<PathBuf>) -> Result<()> {
        self.paths
            .write()
            .map_err(|e| Error::internal(e.to_string()))?
            .insert(key, path.into());
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.paths.read().map_or(0, |paths| paths.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LocalCopies for MemoryLibrary {
    async fn local_path(&self, provider: &str, id: &str) -> Option<PathBuf> {
        let paths = self.paths.read().ok()?;
        paths.get(&TrackKey::new(provider, id)).cloned()
    }
}

#[async_trait]
impl Registry for MemoryLibrary {
    async fn register(&self, provider: &str, track: &Track, path: &Path) -> Result<()> {
        self.insert(TrackKey::new(provider, &track.id), path)
    }
}

/// Scanner for setups without a media server.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoScan;

#[async_trait]
impl Scanner for NoScan {
    async fn trigger_scan(&self) -> bool {
        false
    }
}

/// Tag writer that leaves files as downloaded.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoTags;

#[async_trait]
impl TagWriter for NoTags {
    async fn write_tags(&self, _path: &Path, _track: &Track) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registered_tracks_are_local() {
        let library = MemoryLibrary::new();
        let track = Track {
            id: "42".to_owned(),
            ..Track::default()
        };

        assert!(library.local_path("deezer", "42").await.is_none());
        library
            .register("deezer", &track, Path::new("/music/a.flac"))
            .await
            .unwrap();

        assert_eq!(
            library.local_path("deezer", "42").await,
            Some(PathBuf::from("/music/a.flac"))
        );
        assert!(library.local_path("tidal", "42").await.is_none());
        assert_eq!(library.len(), 1);
    }
}
