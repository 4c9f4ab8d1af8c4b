pub mod loaders;
pub mod profile;
pub mod question;
pub mod result;
pub mod verdict;

pub use loaders::{load_assessment, AssessmentFile};
pub use profile::{clamp_summary, compress_profile, CompressedProfile, UserProfile};
pub use question::{Answer, NumericRange, Question, QuestionId, QuestionType};
pub use result::{
    EvaluationReport, EvaluationSummary, FeedbackItem, FinalResult, GradedBy, GradingStats,
    RuleStats,
};
pub use verdict::{GradeStatus, LlmQuestion, ModelVerdict, RuleStatus, RuleVerdict};
