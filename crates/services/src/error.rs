//! Shared error types for the services crate.

use thiserror::Error;

use exam_core::model::{ChoiceId, QuestionId, TopicError, TopicSlug};
use storage::repository::StorageError;

use crate::access::AccessStatus;

/// Errors emitted by `QuestionBankLoader`.
///
/// All variants are terminal for the attempt; callers show the message as-is.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BankError {
    #[error("missing topic slug")]
    InvalidSlug(#[source] TopicError),
    #[error("topic not found for slug: {0}")]
    TopicNotFound(TopicSlug),
    #[error("loading cancelled")]
    Cancelled,
    #[error(transparent)]
    Fetch(#[from] StorageError),
}

/// Failure to fetch a single image. Never fails a session.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FetchError {
    #[error("not an absolute url: {0}")]
    InvalidUrl(String),
    #[error("image request failed with status {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Errors emitted by `ExamSession`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionError {
    #[error("no questions in this session")]
    Empty,
    #[error("session already finished")]
    Finished,
    #[error("select an answer before moving on")]
    NoSelection,
    #[error("choice {choice} does not belong to question {question}")]
    UnknownChoice {
        question: QuestionId,
        choice: ChoiceId,
    },
}

/// Errors emitted by `ExamFlow`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FlowError {
    #[error("access denied: {0}")]
    AccessDenied(AccessStatus),
    #[error("no topic loaded")]
    NoTopic,
    #[error("choose between a capped sample and all questions first")]
    SampleChoiceRequired,
    #[error("no session in progress")]
    NoSession,
    #[error("image preload was superseded")]
    Superseded,
    #[error(transparent)]
    Bank(#[from] BankError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] storage::sqlite::SqliteInitError),
}
