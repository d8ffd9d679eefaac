use mongodb::bson::{doc, oid::ObjectId};
use mongodb::{Collection, Database};

use crate::errors::ApiError;
use crate::models::paper::QuestionPaper;
use crate::utils::retry::{with_retry, RetryConfig};

pub const PAPERS_COLLECTION: &str = "question_papers";

/// Read-side collaborator for the externally-managed question paper content.
/// The attempt core never mutates paper structure; the only write is the
/// best-effort attempt counter.
pub struct PaperService {
    mongo: Database,
}

impl PaperService {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    fn papers(&self) -> Collection<QuestionPaper> {
        self.mongo.collection(PAPERS_COLLECTION)
    }

    pub async fn find_by_id(&self, paper_id: &ObjectId) -> Result<Option<QuestionPaper>, ApiError> {
        Ok(self.papers().find_one(doc! { "_id": paper_id }).await?)
    }

    /// Bumps the paper's attempt counter in the background. Failures are
    /// logged and retried but never surfaced to the caller: starting an
    /// attempt must not depend on a bookkeeping write.
    pub fn increment_attempt_count(&self, paper_id: ObjectId) {
        let mongo = self.mongo.clone();

        tokio::spawn(async move {
            let collection: Collection<QuestionPaper> = mongo.collection(PAPERS_COLLECTION);
            let result = with_retry(RetryConfig::default(), || async {
                collection
                    .update_one(doc! { "_id": paper_id }, doc! { "$inc": { "attempts": 1 } })
                    .await
                    .map(|_| ())
            })
            .await;

            match result {
                Ok(()) => tracing::debug!("Bumped attempt counter for paper {}", paper_id),
                Err(e) => tracing::warn!(
                    "Failed to bump attempt counter for paper {}: {}",
                    paper_id,
                    e
                ),
            }
        });
    }
}
