//! # Model loading
//!
//! Fetch and decode run on a worker thread; the frame pump drains results without blocking.
//!
//! - [`AssetSource`] fetches raw bytes for a URI (files on disk, bytes already in memory, or
//!   whatever the host plugs in), reporting byte progress and honoring a [`CancelToken`].
//! - [`AssetLoader`] owns the live request. `load` supersedes any request in flight; `poll`
//!   returns the live request's [`LoadEvent`]s in order and silently drops anything tagged with
//!   an older [`RequestId`].
//!
//! Progress is reported in percent: fetching covers 0..90, decoding the rest. Within one request
//! it never goes down and reaches exactly 100 right before `Ready`.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
use parking_lot::RwLock;

use crate::error::{Result, ViewerError};
use crate::gltf_loader;
use crate::scene::SceneGraph;

/// Share of the progress bar spent fetching bytes.
const FETCH_SHARE: f32 = 90.0;
const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

// ============================================================================
// Request identity & cancellation
// ============================================================================

/// Identity of one `load` call. Later requests have larger ids.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

/// Cooperative cancellation flag shared with a worker.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

// ============================================================================
// Sources
// ============================================================================

/// Where model bytes come from. Called on the loader's worker thread.
pub trait AssetSource: Send + Sync {
    /// Fetch `uri`, calling `progress(loaded, total)` as bytes arrive and checking `cancel`
    /// between chunks. Failures are `ViewerError::Load`.
    fn fetch(
        &self,
        uri: &str,
        progress: &mut dyn FnMut(u64, u64),
        cancel: &CancelToken,
    ) -> Result<Vec<u8>>;
}

fn cancelled(uri: &str) -> ViewerError {
    ViewerError::load(uri, "request cancelled")
}

/// Reads models from a directory in fixed-size chunks.
#[derive(Debug, Clone)]
pub struct FileSource {
    root: PathBuf,
    chunk_size: usize,
}

impl FileSource {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into(), chunk_size: DEFAULT_CHUNK_SIZE }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl AssetSource for FileSource {
    fn fetch(
        &self,
        uri: &str,
        progress: &mut dyn FnMut(u64, u64),
        cancel: &CancelToken,
    ) -> Result<Vec<u8>> {
        let path = self.root.join(uri);
        let mut file = File::open(&path).map_err(|e| ViewerError::load(uri, e))?;
        let total = file.metadata().map_err(|e| ViewerError::load(uri, e))?.len();

        let mut bytes = Vec::with_capacity(total as usize);
        let mut chunk = vec![0u8; self.chunk_size];
        progress(0, total);
        loop {
            if cancel.is_cancelled() {
                return Err(cancelled(uri));
            }
            let n = file.read(&mut chunk).map_err(|e| ViewerError::load(uri, e))?;
            if n == 0 {
                break;
            }
            bytes.extend_from_slice(&chunk[..n]);
            progress(bytes.len() as u64, total.max(bytes.len() as u64));
        }
        Ok(bytes)
    }
}

/// Serves bytes the host already holds. Optionally paces chunks to mimic a slow network.
#[derive(Debug, Default)]
pub struct MemorySource {
    assets: RwLock<HashMap<String, Arc<[u8]>>>,
    chunk_size: usize,
    chunk_delay: Option<Duration>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self { chunk_size: DEFAULT_CHUNK_SIZE, ..Self::default() }
    }

    pub fn with_pacing(mut self, chunk_size: usize, chunk_delay: Duration) -> Self {
        self.chunk_size = chunk_size.max(1);
        self.chunk_delay = Some(chunk_delay);
        self
    }

    pub fn insert<U: Into<String>, B: Into<Arc<[u8]>>>(&self, uri: U, bytes: B) {
        self.assets.write().insert(uri.into(), bytes.into());
    }
}

impl AssetSource for MemorySource {
    fn fetch(
        &self,
        uri: &str,
        progress: &mut dyn FnMut(u64, u64),
        cancel: &CancelToken,
    ) -> Result<Vec<u8>> {
        let bytes = self
            .assets
            .read()
            .get(uri)
            .cloned()
            .ok_or_else(|| ViewerError::load(uri, "not found"))?;
        let total = bytes.len() as u64;
        let chunk_size = self.chunk_size.max(1);

        let mut out = Vec::with_capacity(bytes.len());
        progress(0, total);
        for chunk in bytes.chunks(chunk_size) {
            if cancel.is_cancelled() {
                return Err(cancelled(uri));
            }
            if let Some(delay) = self.chunk_delay {
                std::thread::sleep(delay);
            }
            out.extend_from_slice(chunk);
            progress(out.len() as u64, total);
        }
        Ok(out)
    }
}

// ============================================================================
// Events & state
// ============================================================================

/// What the loader reports for the live request.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadEvent {
    /// Percent in [0, 100].
    Progress(f32),
    Ready(SceneGraph),
    Failed(ViewerError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssetStatus {
    Pending,
    Loading(f32),
    Ready,
    Failed(ViewerError),
}

/// Identity and load state of the current model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelAsset {
    pub uri: String,
    pub status: AssetStatus,
}

impl ModelAsset {
    pub fn is_ready(&self) -> bool {
        self.status == AssetStatus::Ready
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.status, AssetStatus::Pending | AssetStatus::Loading(_))
    }
}

#[derive(Debug)]
struct LoadMessage {
    request: RequestId,
    event: LoadEvent,
}

#[derive(Debug)]
struct LiveRequest {
    id: RequestId,
    cancel: CancelToken,
    last_progress: f32,
}

// ============================================================================
// Loader
// ============================================================================

pub struct AssetLoader {
    source: Arc<dyn AssetSource>,
    tx: Sender<LoadMessage>,
    rx: Receiver<LoadMessage>,
    next_id: u64,
    live: Option<LiveRequest>,
    asset: Option<ModelAsset>,
}

impl AssetLoader {
    pub fn new(source: Arc<dyn AssetSource>) -> Self {
        let (tx, rx) = channel::unbounded();
        Self { source, tx, rx, next_id: 0, live: None, asset: None }
    }

    /// Start loading `uri`, superseding any request in flight.
    pub fn load(&mut self, uri: &str) -> RequestId {
        self.cancel();
        self.next_id += 1;
        let id = RequestId(self.next_id);
        let cancel = CancelToken::new();
        self.live = Some(LiveRequest { id, cancel: cancel.clone(), last_progress: -1.0 });
        self.asset = Some(ModelAsset { uri: uri.to_owned(), status: AssetStatus::Pending });

        let source = Arc::clone(&self.source);
        let tx = self.tx.clone();
        let worker_uri = uri.to_owned();
        let spawned = std::thread::Builder::new()
            .name(format!("model-loader-{}", id.0))
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    run_request(id, &worker_uri, source.as_ref(), &tx, &cancel)
                }));
                if let Err(payload) = outcome {
                    let reason = panic_reason(payload.as_ref());
                    log::error!("loader for `{worker_uri}` panicked: {reason}");
                    if !cancel.is_cancelled() {
                        let _ = tx.send(LoadMessage {
                            request: id,
                            event: LoadEvent::Failed(ViewerError::load(
                                worker_uri.as_str(),
                                format!("loader panicked: {reason}"),
                            )),
                        });
                    }
                }
            });

        if let Err(err) = spawned {
            log::error!("could not start loader thread for `{uri}`: {err}");
            let _ = self.tx.send(LoadMessage {
                request: id,
                event: LoadEvent::Failed(ViewerError::load(uri, format!("loader thread: {err}"))),
            });
        }
        log::debug!("load request {} for `{uri}`", id.0);
        id
    }

    /// Cancel the live request without starting another.
    pub fn cancel(&mut self) {
        if let Some(live) = self.live.take() {
            live.cancel.cancel();
            log::debug!("cancelled load request {}", live.id.0);
        }
    }

    pub fn live_request(&self) -> Option<RequestId> {
        self.live.as_ref().map(|l| l.id)
    }

    pub fn asset(&self) -> Option<&ModelAsset> {
        self.asset.as_ref()
    }

    /// Drain pending events for the live request. Never blocks.
    pub fn poll(&mut self) -> Vec<LoadEvent> {
        let mut out = Vec::new();
        loop {
            let msg = match self.rx.try_recv() {
                Ok(msg) => msg,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            };
            let Some(live) = self.live.as_mut() else { continue };
            if msg.request != live.id {
                log::trace!("dropping stale event from request {}", msg.request.0);
                continue;
            }

            let finished = match &msg.event {
                LoadEvent::Progress(p) => {
                    if *p <= live.last_progress {
                        continue;
                    }
                    live.last_progress = *p;
                    if let Some(asset) = self.asset.as_mut() {
                        asset.status = AssetStatus::Loading(*p);
                    }
                    false
                }
                LoadEvent::Ready(_) => {
                    if let Some(asset) = self.asset.as_mut() {
                        asset.status = AssetStatus::Ready;
                    }
                    true
                }
                LoadEvent::Failed(err) => {
                    if let Some(asset) = self.asset.as_mut() {
                        asset.status = AssetStatus::Failed(err.clone());
                    }
                    true
                }
            };
            out.push(msg.event);
            if finished {
                self.live = None;
            }
        }
        out
    }
}

impl Drop for AssetLoader {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

// Worker body. Nothing is sent once the request is cancelled.
fn run_request(
    id: RequestId,
    uri: &str,
    source: &dyn AssetSource,
    tx: &Sender<LoadMessage>,
    cancel: &CancelToken,
) {
    let send = |event: LoadEvent| {
        if !cancel.is_cancelled() {
            let _ = tx.send(LoadMessage { request: id, event });
        }
    };

    send(LoadEvent::Progress(0.0));
    let mut last_whole = 0u32;
    let mut on_bytes = |loaded: u64, total: u64| {
        if total == 0 {
            return;
        }
        let pct = (loaded as f64 / total as f64).min(1.0) as f32 * FETCH_SHARE;
        // One event per whole percent is plenty for a progress bar.
        if pct.floor() as u32 > last_whole {
            last_whole = pct.floor() as u32;
            send(LoadEvent::Progress(pct.floor()));
        }
    };

    let result = source
        .fetch(uri, &mut on_bytes, cancel)
        .and_then(|bytes| {
            if cancel.is_cancelled() {
                return Err(cancelled(uri));
            }
            send(LoadEvent::Progress(FETCH_SHARE));
            gltf_loader::decode(uri, &bytes)
        });

    if cancel.is_cancelled() {
        log::debug!("load request {} for `{uri}` abandoned", id.0);
        return;
    }
    match result {
        Ok(graph) => {
            send(LoadEvent::Progress(100.0));
            send(LoadEvent::Ready(graph));
        }
        Err(err) => {
            log::error!("loading `{uri}` failed: {err}");
            send(LoadEvent::Failed(err));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gltf_loader::fixtures;
    use std::time::Instant;

    fn drain(loader: &mut AssetLoader) -> Vec<LoadEvent> {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut events = Vec::new();
        while Instant::now() < deadline {
            let batch = loader.poll();
            let done = batch.iter().any(|e| !matches!(e, LoadEvent::Progress(_)));
            events.extend(batch);
            if done {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        events
    }

    #[test]
    fn progress_is_monotonic_and_ends_at_100() {
        let source = MemorySource::new().with_pacing(64, Duration::ZERO);
        source.insert("car.glb", fixtures::car_glb());
        let mut loader = AssetLoader::new(Arc::new(source));
        loader.load("car.glb");

        let events = drain(&mut loader);
        let progress: Vec<f32> = events
            .iter()
            .filter_map(|e| match e {
                LoadEvent::Progress(p) => Some(*p),
                _ => None,
            })
            .collect();
        assert!(progress.windows(2).all(|w| w[0] < w[1]), "{progress:?}");
        assert_eq!(progress.first(), Some(&0.0));
        assert_eq!(progress.last(), Some(&100.0));
        assert!(matches!(events.last(), Some(LoadEvent::Ready(_))));
        assert!(loader.asset().is_some_and(ModelAsset::is_ready));
        assert_eq!(loader.live_request(), None);
    }

    #[test]
    fn missing_asset_fails_with_load_error() {
        let mut loader = AssetLoader::new(Arc::new(MemorySource::new()));
        loader.load("nope.glb");
        let events = drain(&mut loader);
        match events.last() {
            Some(LoadEvent::Failed(err)) => assert!(err.is_retryable()),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    struct PanickingSource;

    impl AssetSource for PanickingSource {
        fn fetch(&self, _: &str, _: &mut dyn FnMut(u64, u64), _: &CancelToken) -> Result<Vec<u8>> {
            panic!("source exploded");
        }
    }

    #[test]
    fn worker_panic_is_reported_as_failure() {
        let mut loader = AssetLoader::new(Arc::new(PanickingSource));
        loader.load("car.glb");
        let events = drain(&mut loader);
        match events.last() {
            Some(LoadEvent::Failed(err)) => {
                assert!(err.is_load());
                assert!(err.to_string().contains("source exploded"), "{err}");
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(loader.live_request(), None);
        assert!(matches!(loader.asset().map(|a| &a.status), Some(AssetStatus::Failed(_))));
    }

    #[test]
    fn new_request_discards_the_old_one() {
        let source = MemorySource::new().with_pacing(16, Duration::from_millis(2));
        source.insert("slow.glb", fixtures::car_glb());
        source.insert("other.glb", fixtures::car_glb());
        let mut loader = AssetLoader::new(Arc::new(source));

        let first = loader.load("slow.glb");
        std::thread::sleep(Duration::from_millis(5));
        let second = loader.load("other.glb");
        assert!(second > first);

        let events = drain(&mut loader);
        let terminal = events.iter().filter(|e| !matches!(e, LoadEvent::Progress(_))).count();
        assert_eq!(terminal, 1);
        assert_eq!(loader.asset().map(|a| a.uri.as_str()), Some("other.glb"));
    }

    #[test]
    fn cancel_silences_the_request() {
        let source = MemorySource::new().with_pacing(16, Duration::from_millis(1));
        source.insert("car.glb", fixtures::car_glb());
        let mut loader = AssetLoader::new(Arc::new(source));
        loader.load("car.glb");
        loader.cancel();
        std::thread::sleep(Duration::from_millis(50));
        assert!(loader.poll().is_empty());
    }

    #[test]
    fn file_source_reads_in_chunks() {
        let dir = std::env::temp_dir().join(format!("showroom-file-source-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("car.glb"), fixtures::car_glb()).unwrap();

        let source = FileSource::new(&dir).with_chunk_size(100);
        let mut calls = Vec::new();
        let bytes = source
            .fetch("car.glb", &mut |loaded, total| calls.push((loaded, total)), &CancelToken::new())
            .unwrap();
        assert_eq!(bytes, fixtures::car_glb());
        assert!(calls.len() > 2);
        assert_eq!(calls.last().map(|c| c.0), Some(bytes.len() as u64));

        let token = CancelToken::new();
        token.cancel();
        assert!(source.fetch("car.glb", &mut |_, _| {}, &token).is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
