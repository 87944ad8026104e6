#![forbid(unsafe_code)]

pub mod access;
pub mod app_services;
pub mod config;
pub mod error;
pub mod preload;
pub mod sessions;

pub use exam_core::Clock;

pub use access::{AccessGate, AccessStatus, GateSubscription, StatusWatch};
pub use app_services::AppServices;
pub use config::ExamConfig;
pub use error::{AppServicesError, BankError, FetchError, FlowError, SessionError};
pub use preload::{
    AssetPreloader, HttpImageFetcher, ImageCache, ImageFetcher, ImageState, PreloadOutcome,
    PreloadProgress,
};
pub use sessions::{
    Advance, ExamFlow, ExamSession, ExamView, QuestionBank, QuestionBankLoader, RestartMode,
    SampleMode, SessionPhase, SessionProgress,
};
