//! Image preloading ahead of question presentation.
//!
//! A run fetches every distinct url once and resolves when all fetches have
//! settled, successfully or not. Starting a run cancels the previous one
//! and drops cached images the new run does not reference. A cancelled run
//! never touches progress or the cache again.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use exam_core::model::ImageUrl;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::FetchError;

/// Fetches image bytes.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// # Errors
    ///
    /// Returns `FetchError` when the image cannot be retrieved.
    async fn fetch(&self, url: &ImageUrl) -> Result<Vec<u8>, FetchError>;
}

/// `ImageFetcher` over HTTP(S).
#[derive(Clone, Default)]
pub struct HttpImageFetcher {
    client: reqwest::Client,
}

impl HttpImageFetcher {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &ImageUrl) -> Result<Vec<u8>, FetchError> {
        let parsed = url
            .parsed()
            .ok_or_else(|| FetchError::InvalidUrl(url.as_str().to_owned()))?;
        let response = self.client.get(parsed).send().await?;
        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status()));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// Render state of an image reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageState {
    Ready,
    /// The fetch failed; show a placeholder.
    Broken,
    /// Not fetched (yet).
    Missing,
}

#[derive(Debug, Clone)]
enum CachedImage {
    Ready(Arc<[u8]>),
    Broken,
}

/// Settled fetches, keyed by url.
#[derive(Debug, Clone, Default)]
pub struct ImageCache {
    entries: Arc<Mutex<HashMap<String, CachedImage>>>,
}

impl ImageCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn image_state(&self, url: &str) -> ImageState {
        match self.lock().get(url) {
            Some(CachedImage::Ready(_)) => ImageState::Ready,
            Some(CachedImage::Broken) => ImageState::Broken,
            None => ImageState::Missing,
        }
    }

    #[must_use]
    pub fn bytes(&self, url: &str) -> Option<Arc<[u8]>> {
        match self.lock().get(url) {
            Some(CachedImage::Ready(bytes)) => Some(Arc::clone(bytes)),
            _ => None,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn retain(&self, keep: &HashSet<&str>) {
        self.lock().retain(|url, _| keep.contains(url.as_str()));
    }

    fn store(&self, url: &ImageUrl, image: CachedImage) {
        self.lock().insert(url.as_str().to_owned(), image);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CachedImage>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Progress of the latest preload run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PreloadProgress {
    /// Run counter; bumps on every `preload` call.
    pub generation: u64,
    pub loaded: usize,
    pub total: usize,
}

impl PreloadProgress {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.loaded >= self.total
    }
}

/// How a preload run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreloadOutcome {
    Completed { loaded: usize, broken: usize },
    Cancelled,
}

struct PreloaderInner {
    fetcher: Arc<dyn ImageFetcher>,
    cache: ImageCache,
    generation: AtomicU64,
    current: Mutex<CancellationToken>,
    progress: watch::Sender<PreloadProgress>,
}

/// Runs preloads and owns the image cache.
#[derive(Clone)]
pub struct AssetPreloader {
    inner: Arc<PreloaderInner>,
}

impl AssetPreloader {
    #[must_use]
    pub fn new(fetcher: Arc<dyn ImageFetcher>) -> Self {
        let (progress, _) = watch::channel(PreloadProgress::default());
        Self {
            inner: Arc::new(PreloaderInner {
                fetcher,
                cache: ImageCache::new(),
                generation: AtomicU64::new(0),
                current: Mutex::new(CancellationToken::new()),
                progress,
            }),
        }
    }

    #[must_use]
    pub fn cache(&self) -> &ImageCache {
        &self.inner.cache
    }

    #[must_use]
    pub fn progress(&self) -> PreloadProgress {
        *self.inner.progress.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<PreloadProgress> {
        self.inner.progress.subscribe()
    }

    /// Cancel the run in flight, if any.
    pub fn cancel_current(&self) {
        self.current_token().cancel();
    }

    fn current_token(&self) -> CancellationToken {
        self.inner
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Fetch every url, resolving once all have settled.
    ///
    /// The run is tied to `parent`: cancelling it (or starting another run)
    /// ends this one with `PreloadOutcome::Cancelled`. Must be called inside a
    /// Tokio runtime.
    pub async fn preload(&self, urls: Vec<ImageUrl>, parent: &CancellationToken) -> PreloadOutcome {
        let token = parent.child_token();
        let generation = {
            let mut current = self
                .inner
                .current
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            // An already superseded caller must not displace the run in flight.
            if parent.is_cancelled() {
                tracing::debug!("image preload skipped, caller superseded");
                return PreloadOutcome::Cancelled;
            }
            std::mem::replace(&mut *current, token.clone()).cancel();
            self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1
        };
        let keep: HashSet<&str> = urls.iter().map(ImageUrl::as_str).collect();
        self.inner.cache.retain(&keep);

        let total = urls.len();
        self.publish(generation, 0, total);
        tracing::debug!(generation, total, "image preload started");

        let mut tasks = JoinSet::new();
        for url in urls {
            let fetcher = Arc::clone(&self.inner.fetcher);
            let token = token.clone();
            tasks.spawn(async move {
                let result = tokio::select! {
                    biased;
                    () = token.cancelled() => None,
                    result = fetcher.fetch(&url) => Some(result),
                };
                (url, result)
            });
        }

        let mut loaded = 0;
        let mut broken = 0;
        while let Some(joined) = tasks.join_next().await {
            if token.is_cancelled() {
                tasks.abort_all();
                tracing::debug!(generation, "image preload cancelled");
                return PreloadOutcome::Cancelled;
            }
            match joined {
                Ok((url, Some(Ok(bytes)))) => {
                    self.inner.cache.store(&url, CachedImage::Ready(bytes.into()));
                }
                Ok((url, Some(Err(err)))) => {
                    tracing::warn!(url = url.as_str(), error = %err, "image failed to load");
                    self.inner.cache.store(&url, CachedImage::Broken);
                    broken += 1;
                }
                Ok((_, None)) => continue,
                Err(err) => {
                    tracing::warn!(error = %err, "image fetch task failed");
                    broken += 1;
                }
            }
            loaded += 1;
            self.publish(generation, loaded, total);
        }

        if token.is_cancelled() {
            return PreloadOutcome::Cancelled;
        }
        tracing::debug!(generation, loaded, broken, "image preload settled");
        PreloadOutcome::Completed { loaded, broken }
    }

    fn publish(&self, generation: u64, loaded: usize, total: usize) {
        self.inner.progress.send_if_modified(|progress| {
            if generation < progress.generation {
                return false;
            }
            *progress = PreloadProgress {
                generation,
                loaded,
                total,
            };
            true
        });
    }
}
