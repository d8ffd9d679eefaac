use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionType {
    Mcq,
    Numerical,
    Descriptive,
}

/// Raw answer value as it appears on the wire or in a stored response:
/// an option index, a number, or free text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Integer(i64),
    Number(f64),
    Text(String),
}

/// Answer key for a question. The variant is fixed by the question type, so
/// the marking comparison in the scoring pass is exhaustive.
#[derive(Debug, Clone, PartialEq)]
pub enum CorrectAnswer {
    Mcq(u32),
    Numerical(f64),
    Descriptive(String),
}

impl CorrectAnswer {
    /// Exact-equality marking. No tolerance band for numerical answers,
    /// no normalization for descriptive ones.
    pub fn matches(&self, selected: &AnswerValue) -> bool {
        match (self, selected) {
            (CorrectAnswer::Mcq(index), AnswerValue::Integer(value)) => i64::from(*index) == *value,
            (CorrectAnswer::Numerical(expected), AnswerValue::Integer(value)) => {
                *value as f64 == *expected
            }
            (CorrectAnswer::Numerical(expected), AnswerValue::Number(value)) => value == expected,
            (CorrectAnswer::Descriptive(expected), AnswerValue::Text(value)) => value == expected,
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Question {
    pub question_type: QuestionType,
    pub pos_marks: f64,
    pub neg_marks: f64,
    pub skip_marks: f64,
    pub correct_answer: CorrectAnswer,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawQuestion {
    #[serde(rename = "type")]
    question_type: QuestionType,
    #[serde(default = "default_pos_marks")]
    pos_marks: f64,
    #[serde(default)]
    neg_marks: f64,
    #[serde(default)]
    skip_marks: f64,
    correct_answer: AnswerValue,
}

fn default_pos_marks() -> f64 {
    1.0
}

impl<'de> Deserialize<'de> for Question {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = RawQuestion::deserialize(deserializer)?;
        let correct_answer = match (raw.question_type, raw.correct_answer) {
            (QuestionType::Mcq, AnswerValue::Integer(value)) if value >= 0 => {
                CorrectAnswer::Mcq(value as u32)
            }
            (QuestionType::Numerical, AnswerValue::Integer(value)) => {
                CorrectAnswer::Numerical(value as f64)
            }
            (QuestionType::Numerical, AnswerValue::Number(value)) if value.is_finite() => {
                CorrectAnswer::Numerical(value)
            }
            (QuestionType::Descriptive, AnswerValue::Text(value)) if !value.trim().is_empty() => {
                CorrectAnswer::Descriptive(value)
            }
            (question_type, value) => {
                return Err(serde::de::Error::custom(format!(
                    "correctAnswer {:?} does not match question type {:?}",
                    value, question_type
                )))
            }
        };

        Ok(Question {
            question_type: raw.question_type,
            pos_marks: raw.pos_marks,
            neg_marks: raw.neg_marks,
            skip_marks: raw.skip_marks,
            correct_answer,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaperSection {
    pub title: String,
    // Older paper documents stored the per-section minutes as `time`.
    #[serde(default, alias = "time")]
    pub duration: f64,
    #[serde(default, rename = "maxMarks", alias = "maxM")]
    pub max_marks: f64,
    #[serde(default)]
    pub questions: Vec<Question>,
}

impl PaperSection {
    /// Max achievable score, derived from the question bank rather than the
    /// paper-level maxMarks field.
    pub fn max_score(&self) -> f64 {
        self.questions.iter().map(|q| q.pos_marks).sum()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuestionPaper {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub sections: Vec<PaperSection>,
}

impl QuestionPaper {
    pub fn total_duration_minutes(&self) -> f64 {
        self.sections.iter().map(|s| s.duration).sum()
    }
}
