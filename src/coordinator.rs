//! Acquisition of one track at a time, shared by every caller.
//!
//! [`DownloadCoordinator::acquire`] turns a provider name and an external
//! track id into a local file:
//!
//! 1. a known local copy that still exists is returned as is
//! 2. otherwise the first caller becomes the owner of the acquisition, and
//!    later callers for the same track wait for its outcome
//! 3. the owner looks up the track, resolves its media through the
//!    provider, and streams it into `{Artist}/{Album}/{NN} - {Title}.{ext}`,
//!    decrypting when the provider hands out a key
//! 4. tags, registration and a library rescan follow on a best-effort basis
//! 5. with album downloads enabled, the rest of the album is fetched in the
//!    background
//!
//! Each acquisition is tracked by a [`DownloadState`], published over a
//! `watch` channel so that waiters wake up as soon as it is terminal.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};

use futures_util::TryStreamExt;
use time::OffsetDateTime;
use tokio::{
    fs::{self, File, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::watch,
};
use tokio_util::{io::StreamReader, sync::CancellationToken, task::TaskTracker};

use crate::{
    cascade::AlbumCascade,
    config,
    decrypt,
    error::{Error, ErrorKind, Result},
    http,
    library::{
        LocalCopies, MemoryLibrary, Metadata, NoScan, NoTags, Registry, Scanner, TagWriter,
    },
    paths,
    provider::{Provider, ResolvedDownload},
    retry::RetryPolicy,
    track::{Track, TrackKey},
    util::spawn_supervised,
};

/// Collision alternatives tried before giving up on a destination.
const MAX_COLLISIONS: usize = 1_000;

/// Lifecycle of one acquisition.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Status {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl Status {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Snapshot of one acquisition.
///
/// Transitions only move forward: `Pending`, `InProgress`, then either
/// `Completed` or `Failed`.
#[derive(Clone, Debug)]
pub struct DownloadState {
    pub key: TrackKey,
    pub status: Status,

    /// Set once `Completed`
    pub local_path: Option<PathBuf>,

    /// Kind and message of the failure, set once `Failed`
    pub error: Option<(ErrorKind, String)>,

    pub started_at: OffsetDateTime,
    pub completed_at: Option<OffsetDateTime>,
}

impl DownloadState {
    fn new(key: TrackKey) -> Self {
        Self {
            key,
            status: Status::Pending,
            local_path: None,
            error: None,
            started_at: OffsetDateTime::now_utc(),
            completed_at: None,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn start(&mut self) -> bool {
        if self.status != Status::Pending {
            return false;
        }
        self.status = Status::InProgress;
        true
    }

    fn complete(&mut self, path: PathBuf) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = Status::Completed;
        self.local_path = Some(path);
        self.completed_at = Some(OffsetDateTime::now_utc());
        true
    }

    fn fail(&mut self, error: &Error) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = Status::Failed;
        self.error = Some((error.kind, error.error.to_string()));
        self.completed_at = Some(OffsetDateTime::now_utc());
        true
    }

    /// The outcome of a terminal state, as the owner saw it.
    ///
    /// Returns `None` while the acquisition is still running.
    #[must_use]
    pub fn outcome(&self) -> Option<Result<PathBuf>> {
        match self.status {
            Status::Pending | Status::InProgress => None,
            Status::Completed => Some(self.local_path.clone().ok_or_else(|| {
                Error::internal(format!("{} completed without a path", self.key))
            })),
            Status::Failed => Some(Err(match &self.error {
                Some((kind, message)) => Error::new(*kind, message.clone()),
                None => Error::unknown(format!("{} failed", self.key)),
            })),
        }
    }
}

type Entry = Arc<watch::Sender<DownloadState>>;

/// Exclusive right to run one acquisition.
///
/// Dropping it before the acquisition is terminal fails the entry with
/// `Cancelled`, so waiters never hang.
struct Ownership {
    entry: Entry,
}

impl Ownership {
    fn complete(&self, path: PathBuf) {
        self.entry.send_if_modified(|state| state.complete(path));
    }

    fn fail(&self, error: &Error) {
        self.entry.send_if_modified(|state| state.fail(error));
    }
}

impl Drop for Ownership {
    fn drop(&mut self) {
        let key = self.entry.borrow().key.clone();
        let abandoned = Error::cancelled(format!("acquisition of {key} was abandoned"));
        if self.entry.send_if_modified(|state| state.fail(&abandoned)) {
            debug!("{key}: owner went away before finishing");
        }
    }
}

enum Claim {
    Owner(Ownership),
    Waiter(watch::Receiver<DownloadState>),
    /// Finished by another caller in the meantime.
    Done(PathBuf),
}

/// Bytes being written next to their final destination.
///
/// Removed on drop unless persisted.
struct PartialFile {
    path: PathBuf,
    persisted: bool,
}

impl PartialFile {
    async fn persist(mut self, destination: &Path) -> Result<()> {
        fs::rename(&self.path, destination).await?;
        self.persisted = true;
        Ok(())
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.persisted {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("could not remove {}: {e}", self.path.display());
                }
            }
        }
    }
}

struct Inner {
    providers: HashMap<String, Arc<dyn Provider>>,
    metadata: Arc<dyn Metadata>,
    local: Arc<dyn LocalCopies>,
    registry: Arc<dyn Registry>,
    scanner: Arc<dyn Scanner>,
    tags: Arc<dyn TagWriter>,

    http: Arc<http::Client>,
    retry: RetryPolicy,
    download_root: PathBuf,
    download_albums: bool,

    in_flight: Mutex<HashMap<TrackKey, Entry>>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

/// Single-flight acquisition of tracks from any configured provider.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct DownloadCoordinator {
    inner: Arc<Inner>,
}

pub struct Builder {
    providers: Vec<Arc<dyn Provider>>,
    metadata: Arc<dyn Metadata>,
    local: Option<Arc<dyn LocalCopies>>,
    registry: Option<Arc<dyn Registry>>,
    scanner: Arc<dyn Scanner>,
    tags: Arc<dyn TagWriter>,
    http: Option<Arc<http::Client>>,
    retry: RetryPolicy,
    download_root: PathBuf,
    download_albums: bool,
}

impl Builder {
    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.providers.push(provider);
        self
    }

    #[must_use]
    pub fn local_copies(mut self, local: Arc<dyn LocalCopies>) -> Self {
        self.local = Some(local);
        self
    }

    #[must_use]
    pub fn registry(mut self, registry: Arc<dyn Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    #[must_use]
    pub fn scanner(mut self, scanner: Arc<dyn Scanner>) -> Self {
        self.scanner = scanner;
        self
    }

    #[must_use]
    pub fn tags(mut self, tags: Arc<dyn TagWriter>) -> Self {
        self.tags = tags;
        self
    }

    /// Client for media transfers. Defaults to one with the desktop
    /// `User-Agent`.
    #[must_use]
    pub fn http(mut self, http: Arc<http::Client>) -> Self {
        self.http = Some(http);
        self
    }

    #[must_use]
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn download_albums(mut self, enabled: bool) -> Self {
        self.download_albums = enabled;
        self
    }

    /// Builds the coordinator.
    ///
    /// Without explicit local-copy and registry collaborators, one
    /// [`MemoryLibrary`] serves as both.
    ///
    /// # Errors
    ///
    /// * `InvalidArgument` if two providers share a name
    /// * `Internal` if the default HTTP client cannot be built
    pub fn build(self) -> Result<DownloadCoordinator> {
        let mut providers = HashMap::with_capacity(self.providers.len());
        for provider in self.providers {
            let name = provider.name().to_owned();
            if providers.insert(name.clone(), provider).is_some() {
                return Err(Error::invalid_argument(format!(
                    "provider \"{name}\" registered twice"
                )));
            }
        }

        let library = Arc::new(MemoryLibrary::new());
        let local = self
            .local
            .unwrap_or_else(|| Arc::clone(&library) as Arc<dyn LocalCopies>);
        let registry = self
            .registry
            .unwrap_or_else(|| library as Arc<dyn Registry>);

        let http = match self.http {
            Some(http) => http,
            None => Arc::new(http::Client::new(&config::user_agent()?)?),
        };

        Ok(DownloadCoordinator {
            inner: Arc::new(Inner {
                providers,
                metadata: self.metadata,
                local,
                registry,
                scanner: self.scanner,
                tags: self.tags,
                http,
                retry: self.retry,
                download_root: self.download_root,
                download_albums: self.download_albums,
                in_flight: Mutex::new(HashMap::new()),
                tracker: TaskTracker::new(),
                shutdown: CancellationToken::new(),
            }),
        })
    }
}

impl DownloadCoordinator {
    /// Starts building a coordinator that downloads into `download_root`.
    #[must_use]
    pub fn builder(download_root: impl Into<PathBuf>, metadata: Arc<dyn Metadata>) -> Builder {
        Builder {
            providers: Vec::new(),
            metadata,
            local: None,
            registry: None,
            scanner: Arc::new(NoScan),
            tags: Arc::new(NoTags),
            http: None,
            retry: RetryPolicy::default(),
            download_root: download_root.into(),
            download_albums: false,
        }
    }

    /// Returns the local path of a track, downloading it if needed.
    ///
    /// Concurrent calls for the same track share one download and all
    /// observe its outcome.
    ///
    /// # Errors
    ///
    /// * `Unsupported` if no provider is named `provider`
    /// * `NotFound` if the catalog has no such track
    /// * `Exhausted` if no acceptable format could be obtained
    /// * `Decryption` or `Io` if the transfer failed
    /// * `Cancelled` when `cancel` fires, or the owner of a shared download
    ///   went away
    pub async fn acquire(
        &self,
        provider: &str,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        self.acquire_with(provider, id, self.inner.download_albums, cancel)
            .await
    }

    /// Snapshot of the latest acquisition of a track in this process.
    #[must_use]
    pub fn state(&self, provider: &str, id: &str) -> Option<DownloadState> {
        let key = TrackKey::new(provider, id);
        let table = self.table().ok()?;
        table
            .get(&key)
            .map(|entry| DownloadState::clone(&entry.borrow()))
    }

    /// Waits for background work, such as album cascades, to finish.
    pub async fn drain(&self) {
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        self.inner.tracker.reopen();
    }

    /// Cancels background work and waits for it to finish.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }

    pub(crate) async fn acquire_with(
        &self,
        provider_name: &str,
        id: &str,
        cascade: bool,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let provider = self
            .inner
            .providers
            .get(provider_name)
            .cloned()
            .ok_or_else(|| Error::unsupported(format!("no provider \"{provider_name}\"")))?;

        let key = TrackKey::new(provider_name, id);
        if let Some(path) = self.existing_copy(&key).await {
            debug!("{key} is already at {}", path.display());
            return Ok(path);
        }

        match self.claim(&key)? {
            Claim::Done(path) => {
                debug!("{key} was just downloaded to {}", path.display());
                Ok(path)
            }
            Claim::Waiter(mut receiver) => {
                debug!("{key} is already being downloaded; waiting");
                let state = tokio::select! {
                    () = cancel.cancelled() => {
                        return Err(Error::cancelled(format!("waiting for {key}")));
                    }
                    state = receiver.wait_for(DownloadState::is_terminal) => {
                        state.map(|state| DownloadState::clone(&state))
                    }
                };
                let state = state
                    .map_err(|_| Error::internal(format!("{key}: download state went away")))?;
                state.outcome().unwrap_or_else(|| {
                    Err(Error::internal(format!("{key}: woke up before finishing")))
                })
            }
            Claim::Owner(ownership) => {
                info!("downloading {key}");
                let result = tokio::select! {
                    () = cancel.cancelled() => Err(Error::cancelled(format!("downloading {key}"))),
                    result = self.fetch(provider.as_ref(), &key, cancel) => result,
                };

                match result {
                    Ok((track, path)) => {
                        self.finish(&key, &track, &path).await;
                        ownership.complete(path.clone());
                        info!("downloaded {key} to {}", path.display());

                        if cascade {
                            if let Some(album_id) = provider.extract_album_id(&track) {
                                AlbumCascade::new(self.clone()).trigger_background(
                                    provider_name,
                                    &album_id,
                                    id,
                                );
                            }
                        }
                        Ok(path)
                    }
                    Err(e) => {
                        if e.kind == ErrorKind::Cancelled {
                            info!("download of {key} cancelled");
                        } else {
                            warn!("download of {key} failed: {e}");
                        }
                        ownership.fail(&e);
                        Err(e)
                    }
                }
            }
        }
    }

    pub(crate) fn metadata(&self) -> &dyn Metadata {
        self.inner.metadata.as_ref()
    }

    pub(crate) fn tracker(&self) -> &TaskTracker {
        &self.inner.tracker
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.inner.shutdown
    }

    /// A local copy of `key` that still exists on disk.
    pub(crate) async fn existing_copy(&self, key: &TrackKey) -> Option<PathBuf> {
        let mut candidates = Vec::with_capacity(2);
        if let Some(path) = self.inner.local.local_path(&key.provider, &key.id).await {
            candidates.push(path);
        }
        if let Some(path) = self.state(&key.provider, &key.id).and_then(|state| state.local_path) {
            candidates.push(path);
        }

        for path in candidates {
            if fs::try_exists(&path).await.unwrap_or(false) {
                return Some(path);
            }
        }
        None
    }

    fn table(&self) -> Result<MutexGuard<'_, HashMap<TrackKey, Entry>>> {
        self.inner
            .in_flight
            .lock()
            .map_err(|e| Error::internal(format!("download table poisoned: {e}")))
    }

    /// Joins the running acquisition of `key`, or starts a new one.
    fn claim(&self, key: &TrackKey) -> Result<Claim> {
        let mut table = self.table()?;

        if let Some(entry) = table.get(key) {
            if !entry.borrow().is_terminal() {
                return Ok(Claim::Waiter(entry.subscribe()));
            }
            let done = entry.borrow().local_path.clone();
            if let Some(path) = done.filter(|path| path.exists()) {
                return Ok(Claim::Done(path));
            }
        }

        let mut state = DownloadState::new(key.clone());
        state.start();
        let (sender, _) = watch::channel(state);
        let entry = Arc::new(sender);
        table.insert(key.clone(), Arc::clone(&entry));

        Ok(Claim::Owner(Ownership { entry }))
    }

    /// Looks up, resolves and transfers one track.
    async fn fetch(
        &self,
        provider: &dyn Provider,
        key: &TrackKey,
        cancel: &CancellationToken,
    ) -> Result<(Track, PathBuf)> {
        let track = self
            .inner
            .metadata
            .track(&key.provider, &key.id)
            .await?
            .ok_or_else(|| Error::not_found(format!("track {key} does not exist")))?;

        let ceiling = provider.target_quality();
        let resolved = self
            .inner
            .retry
            .run(cancel, || provider.resolve_download(&track, ceiling, cancel))
            .await?;
        debug!("{key}: resolved {}", resolved.selection);

        let destination = paths::destination(
            &self.inner.download_root,
            &track,
            resolved.selection.extension(),
        );
        let (path, partial, file) = reserve(&destination).await?;

        let written = self.transfer(&resolved, file, cancel).await?;
        if written == 0 {
            return Err(Error::unavailable(format!("{key}: media stream is empty")));
        }
        partial.persist(&path).await?;
        debug!("{key}: wrote {written} bytes");

        Ok((track, path))
    }

    /// Streams the media of `resolved` into `file`, decrypting as needed.
    async fn transfer(
        &self,
        resolved: &ResolvedDownload,
        file: File,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let response = self
            .inner
            .http
            .open_media(resolved.url.clone(), cancel)
            .await?;

        let stream = response.bytes_stream().map_err(std::io::Error::other);
        let reader = StreamReader::new(stream);
        tokio::pin!(reader);

        let mut writer = BufWriter::new(file);
        let written = match &resolved.key {
            Some(key) => decrypt::decrypt(reader, &mut writer, key).await?,
            None => {
                let written = tokio::io::copy(&mut reader, &mut writer).await?;
                writer.flush().await?;
                written
            }
        };

        writer.into_inner().sync_all().await?;
        Ok(written)
    }

    /// Best-effort steps after the file is in place.
    async fn finish(&self, key: &TrackKey, track: &Track, path: &Path) {
        if let Err(e) = self.inner.tags.write_tags(path, track).await {
            warn!("{key}: could not write tags: {e}");
        }

        if let Err(e) = self.inner.registry.register(&key.provider, track, path).await {
            warn!("{key}: could not register {}: {e}", path.display());
        }

        let scanner = Arc::clone(&self.inner.scanner);
        spawn_supervised(
            &self.inner.tracker,
            format!("library scan after {key}"),
            async move {
                scanner.trigger_scan().await;
                Ok(())
            },
        );
    }
}

/// Picks the first free collision alternative of `destination` and creates
/// its partial file.
///
/// Creating the partial file with `create_new` reserves the name against
/// concurrent downloads of other tracks.
async fn reserve(destination: &Path) -> Result<(PathBuf, PartialFile, File)> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).await?;
    }

    for n in 0..MAX_COLLISIONS {
        let candidate = paths::numbered(destination, n);
        if fs::try_exists(&candidate).await? {
            continue;
        }

        let partial = paths::partial(&candidate);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&partial)
            .await
        {
            Ok(file) => {
                let partial = PartialFile {
                    path: partial,
                    persisted: false,
                };
                return Ok((candidate, partial, file));
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.into()),
        }
    }

    Err(Error::io(format!(
        "no free name for {} after {MAX_COLLISIONS} attempts",
        destination.display()
    )))
}
