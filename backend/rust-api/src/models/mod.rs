pub mod attempt;
pub mod paper;

pub use attempt::{
    AttemptStatus, AttemptView, Progress, QuestionResponse, SectionAttempt, SubmitRequest,
    Summary, TestAttempt, Timing, UpdateProgressRequest,
};
pub use paper::{AnswerValue, CorrectAnswer, PaperSection, Question, QuestionPaper, QuestionType};
