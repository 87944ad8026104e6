use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio_util::sync::CancellationToken;

use exam_core::model::{ChoiceId, ScoreReport, TopicSummary};

use super::bank::{QuestionBank, QuestionBankLoader, image_urls};
use super::plan::{SampleMode, build_working_set, needs_choice};
use super::session::{Advance, ExamSession};
use super::view::{ExamView, QuestionView};
use crate::access::AccessGate;
use crate::config::ExamConfig;
use crate::error::{BankError, FlowError};
use crate::preload::{AssetPreloader, PreloadOutcome};

//
// ─── PHASES ────────────────────────────────────────────────────────────────────
//

/// Where the flow is between loading a topic and showing results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Idle,
    SamplingChoicePending,
    Preloading,
    Active,
    Finished,
}

/// Inputs that move the flow between phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    BankLoaded { needs_choice: bool },
    SampleChosen,
    PreloadSettled,
    /// The preload was cancelled before the session started.
    PreloadCancelled { choice_pending: bool },
    Graded,
    Restarted,
    Reset,
}

impl SessionPhase {
    /// Next phase, or `None` when `event` is not valid here.
    #[must_use]
    pub fn on_event(self, event: PhaseEvent) -> Option<Self> {
        use PhaseEvent as E;
        use SessionPhase as P;

        match (self, event) {
            (_, E::Reset) => Some(P::Idle),
            (P::Idle, E::BankLoaded { needs_choice: true }) => Some(P::SamplingChoicePending),
            (P::Idle, E::BankLoaded { needs_choice: false })
            | (P::SamplingChoicePending, E::SampleChosen)
            | (P::SamplingChoicePending | P::Preloading | P::Active | P::Finished, E::Restarted) => {
                Some(P::Preloading)
            }
            (P::Preloading, E::PreloadSettled) => Some(P::Active),
            (P::Preloading, E::PreloadCancelled { choice_pending: true }) => {
                Some(P::SamplingChoicePending)
            }
            (P::Preloading, E::PreloadCancelled { choice_pending: false }) => Some(P::Idle),
            (P::Active, E::Graded) => Some(P::Finished),
            _ => None,
        }
    }
}

/// Which sample a restart draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartMode {
    /// Same mode as the session being replaced.
    Same,
    Capped,
    All,
}

//
// ─── FLOW ──────────────────────────────────────────────────────────────────────
//

/// Drives one learner through topic load, sampling, preload, answering and grading.
pub struct ExamFlow {
    gate: AccessGate,
    loader: QuestionBankLoader,
    preloader: AssetPreloader,
    config: ExamConfig,
    rng: StdRng,
    phase: SessionPhase,
    bank: Option<QuestionBank>,
    session: Option<ExamSession>,
    mode: Option<SampleMode>,
    topic_token: CancellationToken,
}

impl ExamFlow {
    #[must_use]
    pub fn new(
        gate: AccessGate,
        loader: QuestionBankLoader,
        preloader: AssetPreloader,
        config: ExamConfig,
    ) -> Self {
        Self {
            gate,
            loader,
            preloader,
            config,
            rng: StdRng::from_rng(&mut rand::rng()),
            phase: SessionPhase::Idle,
            bank: None,
            session: None,
            mode: None,
            topic_token: CancellationToken::new(),
        }
    }

    /// Use a specific random source, e.g. a seeded one in tests.
    #[must_use]
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    #[must_use]
    pub fn bank(&self) -> Option<&QuestionBank> {
        self.bank.as_ref()
    }

    #[must_use]
    pub fn session(&self) -> Option<&ExamSession> {
        self.session.as_ref()
    }

    #[must_use]
    pub fn sample_mode(&self) -> Option<SampleMode> {
        self.mode
    }

    #[must_use]
    pub fn report(&self) -> Option<&ScoreReport> {
        self.session.as_ref().and_then(ExamSession::report)
    }

    /// Topic catalog for a picker.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::Bank` when the store fails.
    pub async fn topics(&self) -> Result<Vec<TopicSummary>, FlowError> {
        Ok(self.loader.catalog().await?)
    }

    fn ensure_allowed(&self) -> Result<(), FlowError> {
        let status = self.gate.status();
        if status.is_allowed() {
            Ok(())
        } else {
            Err(FlowError::AccessDenied(status))
        }
    }

    fn transition(&mut self, event: PhaseEvent) {
        match self.phase.on_event(event) {
            Some(next) => {
                tracing::debug!(from = ?self.phase, to = ?next, ?event, "session phase");
                self.phase = next;
            }
            None => tracing::debug!(phase = ?self.phase, ?event, "ignored phase event"),
        }
    }

    /// Load a topic, resetting everything from the previous one.
    ///
    /// Banks within the sampling threshold start immediately with every
    /// question; larger banks wait in `SamplingChoicePending`.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::AccessDenied` unless the gate allows access,
    /// `FlowError::Bank` when loading fails, and `FlowError::Superseded` when
    /// a newer topic started first or the preload was cancelled.
    pub async fn load_topic(&mut self, slug: &str) -> Result<SessionPhase, FlowError> {
        self.ensure_allowed()?;

        self.topic_token = self.loader.start_topic();
        self.bank = None;
        self.session = None;
        self.mode = None;
        self.transition(PhaseEvent::Reset);

        let bank = match self.loader.load(slug, &self.topic_token).await {
            Ok(bank) => bank,
            Err(BankError::Cancelled) => return Err(FlowError::Superseded),
            Err(err) => return Err(err.into()),
        };
        // The load may have finished just as a newer topic started.
        if self.topic_token.is_cancelled() {
            tracing::debug!(topic = slug, "bank load superseded by a newer topic");
            return Err(FlowError::Superseded);
        }
        let needs_choice = needs_choice(bank.len(), &self.config);
        self.bank = Some(bank);
        self.transition(PhaseEvent::BankLoaded { needs_choice });

        if !needs_choice {
            self.begin(SampleMode::All).await?;
        }
        Ok(self.phase)
    }

    /// Start the session once the learner has picked a sample mode.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::AccessDenied` unless allowed, `NoTopic` without a
    /// loaded bank, `SampleChoiceRequired` if no choice is pending, and
    /// `Superseded` when the preload was cancelled.
    pub async fn start_session(&mut self, mode: SampleMode) -> Result<SessionPhase, FlowError> {
        self.ensure_allowed()?;
        if self.bank.is_none() {
            return Err(FlowError::NoTopic);
        }
        if self.phase != SessionPhase::SamplingChoicePending {
            return Err(FlowError::SampleChoiceRequired);
        }
        self.transition(PhaseEvent::SampleChosen);
        self.begin(mode).await?;
        Ok(self.phase)
    }

    /// Throw away the current session and draw a new one from the same bank.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::AccessDenied` unless allowed, `NoTopic` without a
    /// loaded bank, and `Superseded` when the preload was cancelled.
    pub async fn restart(&mut self, mode: RestartMode) -> Result<SessionPhase, FlowError> {
        self.ensure_allowed()?;
        if self.bank.is_none() {
            return Err(FlowError::NoTopic);
        }
        let mode = match mode {
            RestartMode::Same => self.mode.unwrap_or(SampleMode::All),
            RestartMode::Capped => SampleMode::Capped,
            RestartMode::All => SampleMode::All,
        };
        self.transition(PhaseEvent::Restarted);
        self.begin(mode).await?;
        Ok(self.phase)
    }

    async fn begin(&mut self, mode: SampleMode) -> Result<(), FlowError> {
        self.session = None;
        self.mode = Some(mode);
        let bank = self.bank.as_ref().ok_or(FlowError::NoTopic)?;
        let questions = build_working_set(bank.questions(), mode, &self.config, &mut self.rng);
        let topic = bank.topic().slug().to_string();

        let urls = image_urls(&questions);
        if let PreloadOutcome::Cancelled = self.preloader.preload(urls, &self.topic_token).await {
            tracing::debug!(%topic, "preload cancelled before the session started");
            self.abandon_preload();
            return Err(FlowError::Superseded);
        }

        tracing::info!(%topic, ?mode, questions = questions.len(), "session started");
        self.session = Some(ExamSession::new(questions));
        self.transition(PhaseEvent::PreloadSettled);
        Ok(())
    }

    /// Leave `Preloading` after a cancelled preload.
    ///
    /// A superseded topic drops its bank. Otherwise a bank that needs a sample
    /// choice offers it again and a smaller one must be reloaded.
    fn abandon_preload(&mut self) {
        let superseded = self.topic_token.is_cancelled();
        let choice_pending = !superseded
            && self
                .bank
                .as_ref()
                .is_some_and(|bank| needs_choice(bank.len(), &self.config));
        if !choice_pending {
            self.bank = None;
            self.mode = None;
        }
        self.transition(PhaseEvent::PreloadCancelled { choice_pending });
    }

    fn session_mut(&mut self) -> Result<&mut ExamSession, FlowError> {
        if self.phase != SessionPhase::Active && self.phase != SessionPhase::Finished {
            return Err(FlowError::NoSession);
        }
        self.session.as_mut().ok_or(FlowError::NoSession)
    }

    /// # Errors
    ///
    /// Returns `FlowError::NoSession` outside a session, or the session's own error.
    pub fn select(&mut self, choice: ChoiceId) -> Result<(), FlowError> {
        Ok(self.session_mut()?.select(choice)?)
    }

    /// # Errors
    ///
    /// Returns `FlowError::NoSession` outside a session, or the session's own error.
    pub fn next(&mut self) -> Result<Advance, FlowError> {
        let advance = self.session_mut()?.next()?;
        if advance == Advance::Finished {
            self.transition(PhaseEvent::Graded);
        }
        Ok(advance)
    }

    /// # Errors
    ///
    /// Returns `FlowError::NoSession` outside a session.
    pub fn back(&mut self) -> Result<(), FlowError> {
        self.session_mut()?.back();
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `FlowError::NoSession` outside a session.
    pub fn stop_and_grade(&mut self) -> Result<&ScoreReport, FlowError> {
        self.session_mut()?.stop_and_grade();
        self.transition(PhaseEvent::Graded);
        self.report().ok_or(FlowError::NoSession)
    }

    /// Snapshot for rendering.
    #[must_use]
    pub fn view(&self) -> ExamView {
        let topic = || {
            self.bank
                .as_ref()
                .map(|b| b.topic().title().to_owned())
                .unwrap_or_default()
        };
        let bank_size = self.bank.as_ref().map_or(0, QuestionBank::len);

        match (self.phase, self.session.as_ref()) {
            (SessionPhase::Idle, _) => ExamView::Idle,
            (SessionPhase::SamplingChoicePending, _) => ExamView::ChooseSample {
                topic: topic(),
                bank_size,
            },
            (SessionPhase::Preloading, _) if !self.topic_token.is_cancelled() => {
                let progress = self.preloader.progress();
                ExamView::Preloading {
                    loaded: progress.loaded,
                    total: progress.total,
                }
            }
            (SessionPhase::Preloading, _) | (SessionPhase::Active | SessionPhase::Finished, None) => {
                ExamView::Idle
            }
            (SessionPhase::Finished, Some(session)) => match session.report() {
                Some(report) => ExamView::Report {
                    topic: topic(),
                    report: report.clone(),
                },
                None => ExamView::Empty { topic: topic() },
            },
            (SessionPhase::Active, Some(session)) => match session.current_question() {
                None => ExamView::Empty { topic: topic() },
                Some(question) => {
                    let selected = session.selection(question.id());
                    let cache = self.preloader.cache();
                    ExamView::Question {
                        topic: topic(),
                        bank_size,
                        question: QuestionView::build(
                            question,
                            |id| selected.is_some_and(|s| s.contains(&id)),
                            |url| cache.image_state(url),
                        ),
                        progress: session.progress(),
                    }
                }
            },
        }
    }
}
