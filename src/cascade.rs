//! Background download of the rest of an album.

use tokio_util::sync::CancellationToken;

use crate::{
    coordinator::DownloadCoordinator,
    error::{Error, ErrorKind, Result},
    track::TrackKey,
    util::spawn_supervised,
};

/// Fetches the remaining tracks of an album after one of them was
/// downloaded.
///
/// Tracks are downloaded one after another, without cascading further.
pub struct AlbumCascade {
    coordinator: DownloadCoordinator,
}

impl AlbumCascade {
    #[must_use]
    pub fn new(coordinator: DownloadCoordinator) -> Self {
        Self { coordinator }
    }

    /// Starts the cascade as a supervised background task and returns at
    /// once. Failures are logged, never returned.
    ///
    /// The task stops when the coordinator shuts down.
    pub fn trigger_background(&self, provider: &str, album_id: &str, exclude_id: &str) {
        let coordinator = self.coordinator.clone();
        let cancel = coordinator.shutdown_token().child_token();
        let (provider, album_id, exclude_id) = (
            provider.to_owned(),
            album_id.to_owned(),
            exclude_id.to_owned(),
        );

        spawn_supervised(
            self.coordinator.tracker(),
            format!("album cascade of {provider}:{album_id}"),
            async move {
                AlbumCascade::new(coordinator)
                    .run(&provider, &album_id, &exclude_id, &cancel)
                    .await
                    .map(|_| ())
            },
        );
    }

    /// Downloads every track of the album except `exclude_id` and those
    /// already local.
    ///
    /// Returns the number of tracks downloaded.
    ///
    /// # Errors
    ///
    /// * `NotFound` if the catalog has no such album
    /// * `Cancelled` when `cancel` fires
    ///
    /// Failures of single tracks are logged and skipped.
    pub async fn run(
        &self,
        provider: &str,
        album_id: &str,
        exclude_id: &str,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let album = self
            .coordinator
            .metadata()
            .album(provider, album_id)
            .await?
            .ok_or_else(|| {
                Error::not_found(format!("album {provider}:{album_id} does not exist"))
            })?;

        info!(
            "downloading album \"{}\" ({} tracks) from {provider}",
            album.title,
            album.tracks.len()
        );

        let mut downloaded = 0;
        for track in &album.tracks {
            if cancel.is_cancelled() {
                return Err(Error::cancelled(format!("album cascade of {album_id}")));
            }

            if track.id.is_empty() {
                warn!("album {album_id} lists a track without id: \"{}\"", track.title);
                continue;
            }
            if track.id == exclude_id {
                continue;
            }

            let key = TrackKey::new(provider, &track.id);
            if self.coordinator.existing_copy(&key).await.is_some() {
                debug!("{key} is already local");
                continue;
            }

            match self
                .coordinator
                .acquire_with(provider, &track.id, false, cancel)
                .await
            {
                Ok(_) => downloaded += 1,
                Err(e) if e.kind == ErrorKind::Cancelled => return Err(e),
                Err(e) => warn!("album {album_id}: skipping {track}: {e}"),
            }
        }

        info!("album \"{}\": downloaded {downloaded} tracks", album.title);
        Ok(downloaded)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use mockito::Server;

    use super::*;
    use crate::{
        library::MemoryLibrary,
        provider::Provider,
        testing::{self, FakeMetadata, FakeProvider},
        track::Album,
    };

    fn album() -> Album {
        Album {
            id: "900".to_owned(),
            title: "Album".to_owned(),
            artist: "Artist".to_owned(),
            tracks: vec![
                testing::track("1", 1),
                testing::track("2", 2),
                testing::track("3", 3),
            ],
        }
    }

    #[tokio::test]
    async fn downloads_the_rest_of_the_album() {
        let mut server = Server::new_async().await;
        let mut streams = Vec::new();
        for id in ["1", "2", "3"] {
            streams.push(
                server
                    .mock("GET", format!("/stream/{id}").as_str())
                    .with_body(id)
                    .expect(1)
                    .create_async()
                    .await,
            );
        }

        let root = tempfile::tempdir().unwrap();
        let provider = Arc::new(FakeProvider::new(server.url()));
        let coordinator = testing::coordinator(
            root.path().to_path_buf(),
            Arc::new(FakeMetadata::default().with_album(album())),
            Arc::clone(&provider) as Arc<dyn Provider>,
            Arc::new(MemoryLibrary::new()),
            true,
        );

        // The cascade of track 1 fetches tracks 2 and 3.
        coordinator
            .acquire(FakeProvider::NAME, "1", &CancellationToken::new())
            .await
            .unwrap();
        coordinator.drain().await;

        for stream in streams {
            stream.assert_async().await;
        }
        assert_eq!(provider.resolutions(), 3);
        for (id, number) in [("2", 2), ("3", 3)] {
            let path = root
                .path()
                .join(format!("Artist/Album/{number:02} - Title {id}.flac"));
            assert_eq!(std::fs::read(path).unwrap(), id.as_bytes());
        }
    }

    #[tokio::test]
    async fn skips_excluded_and_local_tracks() {
        let mut server = Server::new_async().await;
        let wanted = server
            .mock("GET", "/stream/3")
            .with_body("3")
            .expect(1)
            .create_async()
            .await;

        let root = tempfile::tempdir().unwrap();
        let local = root.path().join("2.flac");
        std::fs::write(&local, b"2").unwrap();
        let library = Arc::new(MemoryLibrary::new());
        library.insert(testing::key("2"), &local).unwrap();

        let provider = Arc::new(FakeProvider::new(server.url()));
        let coordinator = testing::coordinator(
            root.path().to_path_buf(),
            Arc::new(FakeMetadata::default().with_album(album())),
            Arc::clone(&provider) as Arc<dyn Provider>,
            library,
            true,
        );

        let downloaded = AlbumCascade::new(coordinator.clone())
            .run(FakeProvider::NAME, "900", "1", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(downloaded, 1);
        assert_eq!(provider.resolutions(), 1);
        wanted.assert_async().await;
    }

    #[tokio::test]
    async fn track_failures_do_not_stop_the_album() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/stream/2")
            .with_status(500)
            .create_async()
            .await;
        let last = server
            .mock("GET", "/stream/3")
            .with_body("3")
            .expect(1)
            .create_async()
            .await;

        let root = tempfile::tempdir().unwrap();
        let coordinator = testing::coordinator(
            root.path().to_path_buf(),
            Arc::new(FakeMetadata::default().with_album(album())),
            Arc::new(FakeProvider::new(server.url())),
            Arc::new(MemoryLibrary::new()),
            false,
        );

        let downloaded = AlbumCascade::new(coordinator)
            .run(FakeProvider::NAME, "900", "1", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(downloaded, 1);
        last.assert_async().await;
    }

    #[tokio::test]
    async fn missing_album_is_not_found() {
        let server = Server::new_async().await;
        let root = tempfile::tempdir().unwrap();
        let coordinator = testing::coordinator(
            root.path().to_path_buf(),
            Arc::new(FakeMetadata::default()),
            Arc::new(FakeProvider::new(server.url())),
            Arc::new(MemoryLibrary::new()),
            false,
        );

        let err = AlbumCascade::new(coordinator)
            .run(FakeProvider::NAME, "900", "1", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }
}
