//! Pure scoring pass over a submitted attempt and its question paper.
//! No I/O: given the same inputs this produces identical marks, so a
//! completed attempt can be re-scored and audited.

use crate::models::attempt::{round2, Summary, TestAttempt};
use crate::models::paper::QuestionPaper;

/// Marks every answered response against the paper's answer key and totals
/// each section. Sections are paired by index; a paper section without a
/// matching attempt section is skipped — the attempt is a structural
/// snapshot, and a mismatch means the paper drifted after creation, not that
/// the attempt is corrupt.
pub fn score_attempt(attempt: &mut TestAttempt, paper: &QuestionPaper) {
    for (section_index, paper_section) in paper.sections.iter().enumerate() {
        let Some(attempt_section) = attempt.sections.get_mut(section_index) else {
            continue;
        };

        let mut section_score = 0.0;
        for (question_index, question) in paper_section.questions.iter().enumerate() {
            let Some(response) = attempt_section.responses.get_mut(question_index) else {
                continue;
            };

            match &response.selected_option {
                Some(selected) => {
                    let correct = question.correct_answer.matches(selected);
                    response.is_correct = correct;
                    response.marks_awarded = if correct {
                        question.pos_marks
                    } else {
                        -question.neg_marks
                    };
                }
                // Unanswered questions keep their pre-allocated defaults;
                // skip marks are counted in the summary, never scored.
                None => {
                    response.is_correct = false;
                    response.marks_awarded = 0.0;
                }
            }
            section_score += response.marks_awarded;
        }

        attempt_section.score = section_score;
    }
}

/// Recomputes the derived summary from the sections. Runs whenever an
/// attempt leaves the in-progress state; client-supplied summaries are
/// never trusted.
pub fn recompute_summary(attempt: &mut TestAttempt) {
    let mut summary = Summary::default();

    for section in &attempt.sections {
        summary.total_score += section.score;
        summary.max_score += section.max_score;

        for response in &section.responses {
            if response.selected_option.is_some() {
                summary.questions_attempted += 1;
                if response.is_correct {
                    summary.questions_correct += 1;
                } else {
                    summary.questions_incorrect += 1;
                }
            } else {
                summary.questions_skipped += 1;
            }
        }
    }

    summary.accuracy = if summary.questions_attempted > 0 {
        round2(f64::from(summary.questions_correct) / f64::from(summary.questions_attempted) * 100.0)
    } else {
        0.0
    };

    attempt.summary = summary;
}
