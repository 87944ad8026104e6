use std::sync::Arc;

use storage::auth::AuthSessions;
use storage::repository::Storage;

use crate::Clock;
use crate::access::AccessGate;
use crate::config::ExamConfig;
use crate::error::AppServicesError;
use crate::preload::{AssetPreloader, HttpImageFetcher, ImageFetcher};
use crate::sessions::{ExamFlow, QuestionBankLoader};

/// Assembles the gate, loader and preloader over one storage backend.
#[derive(Clone)]
pub struct AppServices {
    config: ExamConfig,
    gate: AccessGate,
    loader: QuestionBankLoader,
    preloader: AssetPreloader,
}

impl AppServices {
    #[must_use]
    pub fn new(
        storage: &Storage,
        auth: Arc<dyn AuthSessions>,
        fetcher: Arc<dyn ImageFetcher>,
        clock: Clock,
        config: ExamConfig,
    ) -> Self {
        Self {
            config,
            gate: AccessGate::new(auth, Arc::clone(&storage.entitlements), clock),
            loader: QuestionBankLoader::new(Arc::clone(&storage.bank)),
            preloader: AssetPreloader::new(fetcher),
        }
    }

    /// Build services backed by `SQLite` storage and HTTP image fetching.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if storage initialization fails.
    pub async fn new_sqlite(
        db_url: &str,
        auth: Arc<dyn AuthSessions>,
        clock: Clock,
        config: ExamConfig,
    ) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(db_url).await?;
        Ok(Self::new(
            &storage,
            auth,
            Arc::new(HttpImageFetcher::default()),
            clock,
            config,
        ))
    }

    #[must_use]
    pub fn gate(&self) -> &AccessGate {
        &self.gate
    }

    #[must_use]
    pub fn loader(&self) -> &QuestionBankLoader {
        &self.loader
    }

    #[must_use]
    pub fn preloader(&self) -> &AssetPreloader {
        &self.preloader
    }

    #[must_use]
    pub fn config(&self) -> ExamConfig {
        self.config
    }

    /// A fresh session flow sharing this gate, loader and preloader.
    #[must_use]
    pub fn flow(&self) -> ExamFlow {
        ExamFlow::new(
            self.gate.clone(),
            self.loader.clone(),
            self.preloader.clone(),
            self.config,
        )
    }
}
