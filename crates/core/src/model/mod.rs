pub mod entitlement;
mod ids;
mod question;
mod report;
mod topic;

pub use entitlement::{DenyReason, EntitlementRecord};
pub use ids::{ChoiceId, ParseIdError, QuestionId, TopicId, UserId};
pub use question::{
    Choice, ChoiceDraft, ImageUrl, Question, QuestionDraft, QuestionError, QuestionImage,
};
pub use report::{ChoiceSummary, QuestionOutcome, ScoreReport};
pub use topic::{Topic, TopicError, TopicSlug, TopicSummary};
