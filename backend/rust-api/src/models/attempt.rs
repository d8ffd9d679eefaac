use std::collections::HashMap;
use std::str::FromStr;

use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};

use crate::models::paper::{AnswerValue, QuestionPaper};
use crate::utils::time::bson_to_iso;

/// Fallback budget when a paper carries no usable section durations, so a
/// malformed paper never blocks attempt creation.
pub const DEFAULT_TIME_BUDGET_SECONDS: f64 = 3600.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttemptStatus {
    InProgress,
    // Reserved: readable through the current-attempt lookup and writable by
    // external tooling, but no operation here transitions into it.
    Paused,
    Completed,
    Abandoned,
    TimedOut,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::InProgress => "in-progress",
            AttemptStatus::Paused => "paused",
            AttemptStatus::Completed => "completed",
            AttemptStatus::Abandoned => "abandoned",
            AttemptStatus::TimedOut => "timed-out",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AttemptStatus::Completed | AttemptStatus::Abandoned | AttemptStatus::TimedOut
        )
    }
}

impl FromStr for AttemptStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "in-progress" => Ok(AttemptStatus::InProgress),
            "paused" => Ok(AttemptStatus::Paused),
            "completed" => Ok(AttemptStatus::Completed),
            "abandoned" => Ok(AttemptStatus::Abandoned),
            "timed-out" => Ok(AttemptStatus::TimedOut),
            _ => Err(format!("Invalid attempt status: {}", value)),
        }
    }
}

/// Per-question record inside a section attempt. `is_correct` and
/// `marks_awarded` are only ever written by the scoring pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionResponse {
    pub question_index: u32,
    #[serde(default)]
    pub selected_option: Option<AnswerValue>,
    #[serde(default)]
    pub is_marked_for_review: bool,
    #[serde(default)]
    pub time_spent: f64,
    #[serde(default)]
    pub is_correct: bool,
    #[serde(default)]
    pub marks_awarded: f64,
}

impl QuestionResponse {
    fn unanswered(question_index: u32) -> Self {
        Self {
            question_index,
            selected_option: None,
            is_marked_for_review: false,
            time_spent: 0.0,
            is_correct: false,
            marks_awarded: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionAttempt {
    // Paper sections are embedded subdocuments without ids of their own, so
    // the snapshot keys them by position.
    pub section_index: u32,
    pub section_title: String,
    pub responses: Vec<QuestionResponse>,
    #[serde(default)]
    pub time_spent: f64,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub max_score: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    #[serde(default)]
    pub current_section: u32,
    #[serde(default)]
    pub current_question: u32,
    /// Keyed `"sectionIndex-questionIndex"`. Grows monotonically; updates
    /// merge into it and never remove keys.
    #[serde(default)]
    pub visited_questions: HashMap<String, bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timing {
    pub started_at: DateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime>,
    pub last_active_at: DateTime,
    #[serde(default)]
    pub total_time_spent: f64,
    #[serde(default)]
    pub remaining_time: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    #[serde(default)]
    pub total_score: f64,
    #[serde(default)]
    pub max_score: f64,
    #[serde(default)]
    pub accuracy: f64,
    #[serde(default)]
    pub questions_attempted: u32,
    #[serde(default)]
    pub questions_correct: u32,
    #[serde(default)]
    pub questions_incorrect: u32,
    #[serde(default)]
    pub questions_skipped: u32,
}

impl Summary {
    pub fn percentage(&self) -> f64 {
        if self.max_score > 0.0 {
            round2(self.total_score / self.max_score * 100.0)
        } else {
            0.0
        }
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestAttempt {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub user_id: ObjectId,
    pub test_series_id: ObjectId,
    pub paper_id: ObjectId,
    pub status: AttemptStatus,
    pub progress: Progress,
    pub timing: Timing,
    pub sections: Vec<SectionAttempt>,
    #[serde(default)]
    pub summary: Summary,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl TestAttempt {
    /// Snapshots the paper's section/question structure into a fresh
    /// in-progress attempt. The attempt owns the structure from here on;
    /// later edits to the paper do not reach it.
    pub fn from_paper(
        user_id: ObjectId,
        test_series_id: ObjectId,
        paper: &QuestionPaper,
        now: DateTime,
    ) -> Self {
        let sections = paper
            .sections
            .iter()
            .enumerate()
            .map(|(index, section)| SectionAttempt {
                section_index: index as u32,
                section_title: section.title.clone(),
                responses: (0..section.questions.len())
                    .map(|i| QuestionResponse::unanswered(i as u32))
                    .collect(),
                time_spent: 0.0,
                score: 0.0,
                max_score: section.max_score(),
            })
            .collect();

        let total_minutes = paper.total_duration_minutes();
        let remaining_time = if total_minutes > 0.0 {
            total_minutes * 60.0
        } else {
            DEFAULT_TIME_BUDGET_SECONDS
        };

        Self {
            id: ObjectId::new(),
            user_id,
            test_series_id,
            paper_id: paper.id,
            status: AttemptStatus::InProgress,
            progress: Progress::default(),
            timing: Timing {
                started_at: now,
                submitted_at: None,
                last_active_at: now,
                total_time_spent: 0.0,
                remaining_time,
            },
            sections,
            summary: Summary::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies a progress patch. Ill-typed fields arrive as `None` (see the
    /// lenient request deserializer) and are skipped; out-of-range response
    /// keys are skipped; the last-active heartbeat always advances.
    pub fn apply_patch(&mut self, patch: &UpdateProgressRequest, now: DateTime) {
        if let Some(section) = patch.current_section {
            self.progress.current_section = section;
        }
        if let Some(question) = patch.current_question {
            self.progress.current_question = question;
        }
        if let Some(visited) = &patch.visited_questions {
            for (key, value) in visited {
                self.progress.visited_questions.insert(key.clone(), *value);
            }
        }

        self.apply_timing(patch.time_spent, patch.remaining_time);

        if let Some(options) = &patch.selected_options {
            self.apply_answer_updates(options);
        }
        if let Some(flags) = &patch.marked_for_review {
            self.apply_review_flags(flags);
        }

        self.timing.last_active_at = now;
    }

    pub fn apply_answer_updates(&mut self, selected_options: &HashMap<String, AnswerValue>) {
        for (key, value) in selected_options {
            let Some((section_index, question_index)) = parse_response_key(key) else {
                continue;
            };
            if let Some(response) = self
                .sections
                .get_mut(section_index)
                .and_then(|section| section.responses.get_mut(question_index))
            {
                response.selected_option = Some(value.clone());
            }
        }
    }

    pub fn apply_review_flags(&mut self, flags: &HashMap<String, bool>) {
        for (key, value) in flags {
            let Some((section_index, question_index)) = parse_response_key(key) else {
                continue;
            };
            if let Some(response) = self
                .sections
                .get_mut(section_index)
                .and_then(|section| section.responses.get_mut(question_index))
            {
                response.is_marked_for_review = *value;
            }
        }
    }

    /// Time figures are client-supplied display hints: the cumulative total
    /// must be positive, the remaining budget non-negative.
    pub fn apply_timing(&mut self, time_spent: Option<f64>, remaining_time: Option<f64>) {
        if let Some(spent) = time_spent {
            if spent > 0.0 {
                self.timing.total_time_spent = spent;
            }
        }
        if let Some(remaining) = remaining_time {
            if remaining >= 0.0 {
                self.timing.remaining_time = remaining;
            }
        }
    }
}

fn parse_response_key(key: &str) -> Option<(usize, usize)> {
    let (section, question) = key.split_once('-')?;
    Some((section.parse().ok()?, question.parse().ok()?))
}

/// Deserializes a field to `None` instead of erroring when the client sends
/// a value of the wrong type, mirroring the save-what-you-can contract of
/// the progress endpoint.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProgressRequest {
    #[serde(default, deserialize_with = "lenient")]
    pub current_section: Option<u32>,
    #[serde(default, deserialize_with = "lenient")]
    pub current_question: Option<u32>,
    #[serde(default, deserialize_with = "lenient")]
    pub visited_questions: Option<HashMap<String, bool>>,
    #[serde(default, deserialize_with = "lenient")]
    pub time_spent: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub remaining_time: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub selected_options: Option<HashMap<String, AnswerValue>>,
    #[serde(default, deserialize_with = "lenient")]
    pub marked_for_review: Option<HashMap<String, bool>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    #[serde(default, deserialize_with = "lenient")]
    pub selected_options: Option<HashMap<String, AnswerValue>>,
    #[serde(default, deserialize_with = "lenient")]
    pub time_spent: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub remaining_time: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingView {
    pub started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<String>,
    pub last_active_at: String,
    pub total_time_spent: f64,
    pub remaining_time: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryView {
    #[serde(flatten)]
    pub summary: Summary,
    pub percentage: f64,
}

/// API shape of an attempt: hex ids and RFC3339 timestamps instead of the
/// raw BSON representations.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptView {
    pub id: String,
    pub user_id: String,
    pub test_series_id: String,
    pub paper_id: String,
    pub status: AttemptStatus,
    pub progress: Progress,
    pub timing: TimingView,
    pub sections: Vec<SectionAttempt>,
    pub summary: SummaryView,
    pub created_at: String,
    pub updated_at: String,
}

impl AttemptView {
    pub fn from_record(attempt: &TestAttempt) -> Self {
        Self {
            id: attempt.id.to_hex(),
            user_id: attempt.user_id.to_hex(),
            test_series_id: attempt.test_series_id.to_hex(),
            paper_id: attempt.paper_id.to_hex(),
            status: attempt.status,
            progress: attempt.progress.clone(),
            timing: TimingView {
                started_at: bson_to_iso(&attempt.timing.started_at),
                submitted_at: attempt.timing.submitted_at.as_ref().map(bson_to_iso),
                last_active_at: bson_to_iso(&attempt.timing.last_active_at),
                total_time_spent: attempt.timing.total_time_spent,
                remaining_time: attempt.timing.remaining_time,
            },
            sections: attempt.sections.clone(),
            summary: SummaryView {
                summary: attempt.summary.clone(),
                percentage: attempt.summary.percentage(),
            },
            created_at: bson_to_iso(&attempt.created_at),
            updated_at: bson_to_iso(&attempt.updated_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;
    use serde_json::json;

    fn sample_paper(question_counts: &[usize]) -> QuestionPaper {
        let sections: Vec<mongodb::bson::Document> = question_counts
            .iter()
            .enumerate()
            .map(|(i, count)| {
                let questions: Vec<mongodb::bson::Document> = (0..*count)
                    .map(|_| doc! { "type": "mcq", "posMarks": 2, "negMarks": 0.5, "correctAnswer": 0 })
                    .collect();
                doc! {
                    "title": format!("Section {}", i + 1),
                    "duration": 20,
                    "maxMarks": (*count as i32) * 2,
                    "questions": questions,
                }
            })
            .collect();

        mongodb::bson::from_document(doc! {
            "_id": ObjectId::new(),
            "title": "Mock",
            "sections": sections,
        })
        .unwrap()
    }

    #[test]
    fn snapshot_preallocates_one_response_per_question() {
        let paper = sample_paper(&[3, 5]);
        let attempt =
            TestAttempt::from_paper(ObjectId::new(), ObjectId::new(), &paper, DateTime::now());

        assert_eq!(attempt.status, AttemptStatus::InProgress);
        assert_eq!(attempt.sections.len(), 2);
        assert_eq!(attempt.sections[0].responses.len(), 3);
        assert_eq!(attempt.sections[1].responses.len(), 5);
        assert_eq!(attempt.sections[0].max_score, 6.0);
        assert_eq!(attempt.sections[1].max_score, 10.0);
        assert!(attempt
            .sections
            .iter()
            .flat_map(|s| &s.responses)
            .all(|r| r.selected_option.is_none()
                && !r.is_marked_for_review
                && !r.is_correct
                && r.marks_awarded == 0.0));
        // Two sections of 20 minutes each.
        assert_eq!(attempt.timing.remaining_time, 2400.0);
    }

    #[test]
    fn snapshot_survives_paper_edits() {
        let mut paper = sample_paper(&[3, 5]);
        let attempt =
            TestAttempt::from_paper(ObjectId::new(), ObjectId::new(), &paper, DateTime::now());

        paper.sections.remove(1);
        paper.sections[0].questions.truncate(1);

        assert_eq!(attempt.sections.len(), 2);
        assert_eq!(attempt.sections[0].responses.len(), 3);
        assert_eq!(attempt.sections[1].responses.len(), 5);
    }

    #[test]
    fn time_budget_falls_back_to_one_hour() {
        let paper: QuestionPaper = mongodb::bson::from_document(doc! {
            "_id": ObjectId::new(),
            "title": "No durations",
            "sections": [
                { "title": "A", "maxMarks": 4, "questions": [
                    { "type": "mcq", "correctAnswer": 1 },
                ] },
            ],
        })
        .unwrap();

        let attempt =
            TestAttempt::from_paper(ObjectId::new(), ObjectId::new(), &paper, DateTime::now());
        assert_eq!(attempt.timing.remaining_time, DEFAULT_TIME_BUDGET_SECONDS);
    }

    #[test]
    fn patch_merges_visited_questions_and_heartbeats() {
        let paper = sample_paper(&[2]);
        let mut attempt =
            TestAttempt::from_paper(ObjectId::new(), ObjectId::new(), &paper, DateTime::now());
        attempt
            .progress
            .visited_questions
            .insert("0-0".to_string(), true);
        let before = attempt.timing.last_active_at;

        let patch: UpdateProgressRequest = serde_json::from_value(json!({
            "visitedQuestions": { "0-1": true },
        }))
        .unwrap();

        let later = DateTime::from_millis(before.timestamp_millis() + 5_000);
        attempt.apply_patch(&patch, later);

        assert_eq!(attempt.progress.visited_questions.len(), 2);
        assert_eq!(attempt.progress.visited_questions.get("0-0"), Some(&true));
        assert_eq!(attempt.timing.last_active_at, later);
    }

    #[test]
    fn patch_ignores_ill_typed_fields() {
        let patch: UpdateProgressRequest = serde_json::from_value(json!({
            "currentSection": "two",
            "currentQuestion": 4,
            "timeSpent": "ninety",
            "remainingTime": -5,
        }))
        .unwrap();

        assert_eq!(patch.current_section, None);
        assert_eq!(patch.current_question, Some(4));
        assert_eq!(patch.time_spent, None);

        let paper = sample_paper(&[2]);
        let mut attempt =
            TestAttempt::from_paper(ObjectId::new(), ObjectId::new(), &paper, DateTime::now());
        let budget = attempt.timing.remaining_time;
        attempt.apply_patch(&patch, DateTime::now());

        assert_eq!(attempt.progress.current_section, 0);
        assert_eq!(attempt.progress.current_question, 4);
        // Negative remaining time is rejected.
        assert_eq!(attempt.timing.remaining_time, budget);
    }

    #[test]
    fn answer_updates_skip_out_of_range_keys() {
        let paper = sample_paper(&[2]);
        let mut attempt =
            TestAttempt::from_paper(ObjectId::new(), ObjectId::new(), &paper, DateTime::now());

        let mut options = HashMap::new();
        options.insert("0-1".to_string(), AnswerValue::Integer(3));
        options.insert("0-9".to_string(), AnswerValue::Integer(1));
        options.insert("7-0".to_string(), AnswerValue::Integer(1));
        options.insert("not-a-key".to_string(), AnswerValue::Integer(1));
        attempt.apply_answer_updates(&options);

        assert_eq!(
            attempt.sections[0].responses[1].selected_option,
            Some(AnswerValue::Integer(3))
        );
        assert!(attempt.sections[0].responses[0].selected_option.is_none());
    }

    #[test]
    fn timing_rules_only_accept_sane_values() {
        let paper = sample_paper(&[1]);
        let mut attempt =
            TestAttempt::from_paper(ObjectId::new(), ObjectId::new(), &paper, DateTime::now());

        attempt.apply_timing(Some(90.0), Some(300.0));
        assert_eq!(attempt.timing.total_time_spent, 90.0);
        assert_eq!(attempt.timing.remaining_time, 300.0);

        attempt.apply_timing(Some(0.0), Some(-1.0));
        assert_eq!(attempt.timing.total_time_spent, 90.0);
        assert_eq!(attempt.timing.remaining_time, 300.0);

        attempt.apply_timing(None, Some(0.0));
        assert_eq!(attempt.timing.remaining_time, 0.0);
    }

    #[test]
    fn status_serializes_with_kebab_case_wire_names() {
        for status in [
            AttemptStatus::InProgress,
            AttemptStatus::Paused,
            AttemptStatus::Completed,
            AttemptStatus::Abandoned,
            AttemptStatus::TimedOut,
        ] {
            let as_json = serde_json::to_value(status).unwrap();
            assert_eq!(as_json, json!(status.as_str()));
            assert_eq!(status.as_str().parse::<AttemptStatus>().unwrap(), status);
        }
        assert!("running".parse::<AttemptStatus>().is_err());
    }

    #[test]
    fn terminal_states_are_exactly_the_three_final_ones() {
        assert!(!AttemptStatus::InProgress.is_terminal());
        assert!(!AttemptStatus::Paused.is_terminal());
        assert!(AttemptStatus::Completed.is_terminal());
        assert!(AttemptStatus::Abandoned.is_terminal());
        assert!(AttemptStatus::TimedOut.is_terminal());
    }

    #[test]
    fn attempt_round_trips_through_bson() {
        let paper = sample_paper(&[2]);
        let mut attempt =
            TestAttempt::from_paper(ObjectId::new(), ObjectId::new(), &paper, DateTime::now());
        attempt.sections[0].responses[0].selected_option = Some(AnswerValue::Integer(1));
        attempt
            .progress
            .visited_questions
            .insert("0-0".to_string(), true);

        let doc = mongodb::bson::to_document(&attempt).unwrap();
        let parsed: TestAttempt = mongodb::bson::from_document(doc).unwrap();

        assert_eq!(parsed.id, attempt.id);
        assert_eq!(parsed.status, AttemptStatus::InProgress);
        assert_eq!(
            parsed.sections[0].responses[0].selected_option,
            Some(AnswerValue::Integer(1))
        );
        assert_eq!(parsed.progress.visited_questions.get("0-0"), Some(&true));
    }

    #[test]
    fn summary_percentage_handles_zero_max_score() {
        let summary = Summary::default();
        assert_eq!(summary.percentage(), 0.0);

        let scored = Summary {
            total_score: 1.0,
            max_score: 3.0,
            ..Summary::default()
        };
        assert_eq!(scored.percentage(), 33.33);
    }

    #[test]
    fn view_exposes_hex_ids_and_iso_timestamps() {
        let paper = sample_paper(&[1]);
        let attempt =
            TestAttempt::from_paper(ObjectId::new(), ObjectId::new(), &paper, DateTime::now());

        let view = AttemptView::from_record(&attempt);
        assert_eq!(view.id, attempt.id.to_hex());
        assert!(view.timing.submitted_at.is_none());

        let as_json = serde_json::to_value(&view).unwrap();
        assert_eq!(as_json["status"], "in-progress");
        assert!(as_json["timing"]["startedAt"].is_string());
        assert_eq!(as_json["summary"]["percentage"], 0.0);
    }
}
