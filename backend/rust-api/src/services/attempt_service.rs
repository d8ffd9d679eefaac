use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::{FindOneOptions, FindOptions, IndexOptions};
use mongodb::{Collection, Database, IndexModel};

use crate::errors::ApiError;
use crate::metrics::{ATTEMPTS_STARTED_TOTAL, ATTEMPTS_SUBMITTED_TOTAL, PROGRESS_UPDATES_TOTAL};
use crate::models::attempt::{AttemptStatus, SubmitRequest, TestAttempt, UpdateProgressRequest};
use crate::services::paper_service::PaperService;
use crate::services::scoring;

pub const ATTEMPTS_COLLECTION: &str = "test_attempts";

/// Orchestrates the attempt lifecycle: start/resume, progress saves,
/// submission with scoring, and result retrieval. All persistence is
/// whole-document, scoped to the attempt id, so concurrent saves of the
/// same attempt cannot interleave partial section writes.
pub struct AttemptService {
    mongo: Database,
    papers: PaperService,
}

impl AttemptService {
    pub fn new(mongo: Database) -> Self {
        Self {
            papers: PaperService::new(mongo.clone()),
            mongo,
        }
    }

    fn attempts(&self) -> Collection<TestAttempt> {
        self.mongo.collection(ATTEMPTS_COLLECTION)
    }

    /// Creates the indexes the lifecycle depends on. The partial unique
    /// index is what guarantees a single in-progress attempt per
    /// (user, series, paper) under concurrent start calls.
    pub async fn ensure_indexes(&self) -> Result<(), ApiError> {
        let unique_in_progress = IndexModel::builder()
            .keys(doc! { "userId": 1, "testSeriesId": 1, "paperId": 1 })
            .options(
                IndexOptions::builder()
                    .unique(true)
                    .partial_filter_expression(
                        doc! { "status": AttemptStatus::InProgress.as_str() },
                    )
                    .build(),
            )
            .build();
        let last_active = IndexModel::builder()
            .keys(doc! { "timing.lastActiveAt": -1 })
            .build();
        let started = IndexModel::builder()
            .keys(doc! { "userId": 1, "testSeriesId": 1, "timing.startedAt": -1 })
            .build();

        self.attempts()
            .create_indexes(vec![unique_in_progress, last_active, started])
            .await?;
        Ok(())
    }

    pub async fn start_or_resume(
        &self,
        user_id: ObjectId,
        test_series_id: ObjectId,
        paper_id: ObjectId,
    ) -> Result<(TestAttempt, bool), ApiError> {
        let filter = doc! {
            "userId": user_id,
            "testSeriesId": test_series_id,
            "paperId": paper_id,
            "status": AttemptStatus::InProgress.as_str(),
        };

        if let Some(existing) = self.attempts().find_one(filter.clone()).await? {
            let attempt = self.touch(existing).await?;
            ATTEMPTS_STARTED_TOTAL.with_label_values(&["resumed"]).inc();
            tracing::info!("Resumed test attempt {} for user {}", attempt.id, user_id);
            return Ok((attempt, true));
        }

        let paper = self
            .papers
            .find_by_id(&paper_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Question paper not found".to_string()))?;
        if paper.sections.is_empty() {
            return Err(ApiError::NotFound(
                "Question paper has no sections".to_string(),
            ));
        }

        let attempt = TestAttempt::from_paper(user_id, test_series_id, &paper, DateTime::now());
        match self.attempts().insert_one(&attempt).await {
            Ok(_) => {}
            Err(err) if is_duplicate_key_error(&err) => {
                // Lost the create race to a concurrent start; resume the
                // winner's attempt instead of failing the caller.
                let existing = self.attempts().find_one(filter).await?.ok_or_else(|| {
                    ApiError::Conflict(
                        "Another attempt is being started for this paper".to_string(),
                    )
                })?;
                let attempt = self.touch(existing).await?;
                ATTEMPTS_STARTED_TOTAL.with_label_values(&["resumed"]).inc();
                return Ok((attempt, true));
            }
            Err(err) => return Err(err.into()),
        }

        self.papers.increment_attempt_count(paper_id);
        ATTEMPTS_STARTED_TOTAL.with_label_values(&["started"]).inc();
        tracing::info!("Started test attempt {} for user {}", attempt.id, user_id);
        Ok((attempt, false))
    }

    pub async fn get_current(
        &self,
        user_id: ObjectId,
        test_series_id: ObjectId,
        paper_id: ObjectId,
        include_all: bool,
    ) -> Result<Option<TestAttempt>, ApiError> {
        let mut filter = doc! {
            "userId": user_id,
            "testSeriesId": test_series_id,
            "paperId": paper_id,
        };
        if include_all {
            filter.insert(
                "status",
                doc! { "$in": [
                    AttemptStatus::InProgress.as_str(),
                    AttemptStatus::Paused.as_str(),
                ] },
            );
        } else {
            filter.insert("status", AttemptStatus::InProgress.as_str());
        }

        // Most recently active first; id as a deterministic tie-break.
        let options = FindOneOptions::builder()
            .sort(doc! { "timing.lastActiveAt": -1, "_id": -1 })
            .build();

        Ok(self.attempts().find_one(filter).with_options(options).await?)
    }

    pub async fn update_progress(
        &self,
        attempt_id: ObjectId,
        user_id: ObjectId,
        test_series_id: ObjectId,
        paper_id: ObjectId,
        patch: &UpdateProgressRequest,
    ) -> Result<TestAttempt, ApiError> {
        let filter = in_progress_filter(attempt_id, user_id, test_series_id, paper_id);
        let mut attempt = self.attempts().find_one(filter.clone()).await?.ok_or_else(|| {
            ApiError::NotFound("Test attempt not found or not in progress".to_string())
        })?;

        let now = DateTime::now();
        attempt.apply_patch(patch, now);
        attempt.updated_at = now;

        let result = self.attempts().replace_one(filter, &attempt).await?;
        if result.matched_count == 0 {
            return Err(ApiError::Conflict(
                "Test attempt was submitted concurrently".to_string(),
            ));
        }

        PROGRESS_UPDATES_TOTAL.inc();
        Ok(attempt)
    }

    pub async fn submit(
        &self,
        attempt_id: ObjectId,
        user_id: ObjectId,
        test_series_id: ObjectId,
        paper_id: ObjectId,
        req: &SubmitRequest,
    ) -> Result<TestAttempt, ApiError> {
        let filter = in_progress_filter(attempt_id, user_id, test_series_id, paper_id);
        let mut attempt = self.attempts().find_one(filter.clone()).await?.ok_or_else(|| {
            ApiError::NotFound("Test attempt not found or not in progress".to_string())
        })?;

        // The paper should never disappear under a live attempt, but scoring
        // needs the answer key, so defend against it anyway.
        let paper = self
            .papers
            .find_by_id(&paper_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Question paper not found".to_string()))?;

        if let Some(options) = &req.selected_options {
            attempt.apply_answer_updates(options);
        }

        scoring::score_attempt(&mut attempt, &paper);

        let now = DateTime::now();
        attempt.apply_timing(req.time_spent, req.remaining_time);
        attempt.timing.submitted_at = Some(now);
        attempt.timing.last_active_at = now;
        attempt.status = AttemptStatus::Completed;
        scoring::recompute_summary(&mut attempt);
        attempt.updated_at = now;

        // The filter still requires in-progress status: either the fully
        // scored document lands, or a concurrent submit already won and
        // nothing is written.
        let result = self.attempts().replace_one(filter, &attempt).await?;
        if result.matched_count == 0 {
            return Err(ApiError::Conflict(
                "Test attempt was already submitted".to_string(),
            ));
        }

        ATTEMPTS_SUBMITTED_TOTAL.inc();
        tracing::info!(
            "Scored test attempt {}: {}/{} ({} attempted)",
            attempt.id,
            attempt.summary.total_score,
            attempt.summary.max_score,
            attempt.summary.questions_attempted,
        );
        Ok(attempt)
    }

    /// Completed results, either for a specific attempt or the most recently
    /// submitted one for the (user, series, paper) triple.
    pub async fn get_results(
        &self,
        attempt_id: Option<ObjectId>,
        user_id: ObjectId,
        test_series_id: ObjectId,
        paper_id: ObjectId,
    ) -> Result<TestAttempt, ApiError> {
        let mut filter = doc! {
            "userId": user_id,
            "testSeriesId": test_series_id,
            "paperId": paper_id,
            "status": AttemptStatus::Completed.as_str(),
        };
        if let Some(id) = attempt_id {
            filter.insert("_id", id);
        }

        let options = FindOneOptions::builder()
            .sort(doc! { "timing.submittedAt": -1 })
            .build();

        self.attempts()
            .find_one(filter)
            .with_options(options)
            .await?
            .ok_or_else(|| ApiError::NotFound("No completed test attempt found".to_string()))
    }

    pub async fn list_attempts(
        &self,
        user_id: ObjectId,
        test_series_id: ObjectId,
        status: Option<AttemptStatus>,
    ) -> Result<Vec<TestAttempt>, ApiError> {
        let mut filter = doc! { "userId": user_id, "testSeriesId": test_series_id };
        if let Some(status) = status {
            filter.insert("status", status.as_str());
        }

        let options = FindOptions::builder()
            .sort(doc! { "timing.startedAt": -1 })
            .build();

        let attempts = self
            .attempts()
            .find(filter)
            .with_options(options)
            .await?
            .try_collect()
            .await?;
        Ok(attempts)
    }

    async fn touch(&self, mut attempt: TestAttempt) -> Result<TestAttempt, ApiError> {
        let now = DateTime::now();
        self.attempts()
            .update_one(
                doc! { "_id": attempt.id },
                doc! { "$set": { "timing.lastActiveAt": now, "updatedAt": now } },
            )
            .await?;
        attempt.timing.last_active_at = now;
        attempt.updated_at = now;
        Ok(attempt)
    }
}

fn in_progress_filter(
    attempt_id: ObjectId,
    user_id: ObjectId,
    test_series_id: ObjectId,
    paper_id: ObjectId,
) -> Document {
    doc! {
        "_id": attempt_id,
        "userId": user_id,
        "testSeriesId": test_series_id,
        "paperId": paper_id,
        "status": AttemptStatus::InProgress.as_str(),
    }
}

fn is_duplicate_key_error(err: &mongodb::error::Error) -> bool {
    if let mongodb::error::ErrorKind::Write(mongodb::error::WriteFailure::WriteError(
        ref write_error,
    )) = *err.kind
    {
        return write_error.code == 11000;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::in_progress_filter;
    use mongodb::bson::oid::ObjectId;

    #[test]
    fn in_progress_filter_pins_all_four_identifiers() {
        let attempt_id = ObjectId::new();
        let user_id = ObjectId::new();
        let series_id = ObjectId::new();
        let paper_id = ObjectId::new();

        let filter = in_progress_filter(attempt_id, user_id, series_id, paper_id);
        assert_eq!(filter.get_object_id("_id").unwrap(), attempt_id);
        assert_eq!(filter.get_object_id("userId").unwrap(), user_id);
        assert_eq!(filter.get_object_id("testSeriesId").unwrap(), series_id);
        assert_eq!(filter.get_object_id("paperId").unwrap(), paper_id);
        assert_eq!(filter.get_str("status").unwrap(), "in-progress");
    }
}
