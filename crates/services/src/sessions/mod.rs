mod bank;
mod plan;
mod scoring;
mod session;
mod view;
mod workflow;

// Public API of the session subsystem.
pub use crate::error::SessionError;
pub use bank::{QuestionBank, QuestionBankLoader, image_urls};
pub use plan::{SampleMode, automatic_mode, build_working_set, needs_choice};
pub use scoring::grade;
pub use session::{Advance, ExamSession};
pub use view::{ChoiceView, ExamView, ImageView, QuestionView, SessionProgress};
pub use workflow::{ExamFlow, PhaseEvent, RestartMode, SessionPhase};
