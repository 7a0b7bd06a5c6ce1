//! At-most-once execution of periodic jobs across replicas.
//!
//! Every replica may try to run a job for a given date; the claim row decides
//! which one does. The loser skips the run.

use std::future::Future;

use chrono::NaiveDate;
use habitgraph_common::AppResult;
use habitgraph_db::entities::job_claim::{self, JobStatus};
use habitgraph_db::repositories::JobClaimRepository;
use tracing::{info, warn};

/// What happened to a `run_once` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// This replica ran the job.
    Completed { items_processed: u64 },
    /// Another replica (or an earlier run) holds the claim.
    AlreadyClaimed { owner_id: String, status: JobStatus },
}

#[derive(Clone)]
pub struct JobClaimArbiter {
    claim_repo: JobClaimRepository,
}

impl JobClaimArbiter {
    #[must_use]
    pub const fn new(claim_repo: JobClaimRepository) -> Self {
        Self { claim_repo }
    }

    /// Claim `(job_name, job_date)` for `owner_id`.
    ///
    /// Returns the stored claim and whether this call won it.
    pub async fn try_claim(
        &self,
        job_name: &str,
        job_date: NaiveDate,
        owner_id: &str,
    ) -> AppResult<(job_claim::Model, bool)> {
        self.claim_repo.try_claim(job_name, job_date, owner_id).await
    }

    /// Record the end of a run this replica owns.
    pub async fn complete(
        &self,
        claim: &job_claim::Model,
        status: JobStatus,
        items_processed: u64,
        error: Option<String>,
    ) -> AppResult<bool> {
        self.claim_repo
            .complete(claim, status, items_processed as i64, error)
            .await
    }

    /// Run `job` if this replica wins the claim, and record the result.
    ///
    /// A failing job marks the claim failed and returns the job's error. The
    /// claim is not released, so a failed date is not retried automatically.
    pub async fn run_once<F, Fut>(
        &self,
        job_name: &str,
        job_date: NaiveDate,
        owner_id: &str,
        job: F,
    ) -> AppResult<JobOutcome>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = AppResult<u64>> + Send,
    {
        let (claim, won) = self.try_claim(job_name, job_date, owner_id).await?;
        if !won {
            info!(
                job = %job_name,
                date = %job_date,
                owner = %claim.owner_id,
                "Job already claimed, skipping"
            );
            return Ok(JobOutcome::AlreadyClaimed {
                owner_id: claim.owner_id,
                status: claim.status,
            });
        }

        info!(job = %job_name, date = %job_date, "Running job");

        match job().await {
            Ok(items_processed) => {
                if !self
                    .complete(&claim, JobStatus::Succeeded, items_processed, None)
                    .await?
                {
                    warn!(job = %job_name, date = %job_date, "Job claim was no longer running at completion");
                }
                info!(job = %job_name, date = %job_date, items_processed, "Job completed");
                Ok(JobOutcome::Completed { items_processed })
            }
            Err(e) => {
                warn!(job = %job_name, date = %job_date, error = %e, "Job failed");
                self.complete(&claim, JobStatus::Failed, 0, Some(e.to_string()))
                    .await?;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use habitgraph_common::AppError;
    use habitgraph_db::test_utils::TestDatabase;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 2).unwrap()
    }

    #[tokio::test]
    async fn test_second_replica_skips() {
        let db = TestDatabase::new().await.unwrap();
        let arbiter = JobClaimArbiter::new(JobClaimRepository::new(db.connection()));

        let first = arbiter
            .run_once("purge", date(), "replica-a", || async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(first, JobOutcome::Completed { items_processed: 7 });

        let second = arbiter
            .run_once("purge", date(), "replica-b", || async {
                Err(AppError::Internal("must not run".to_string()))
            })
            .await
            .unwrap();
        assert_eq!(
            second,
            JobOutcome::AlreadyClaimed {
                owner_id: "replica-a".to_string(),
                status: JobStatus::Succeeded,
            }
        );
    }

    #[tokio::test]
    async fn test_failed_job_is_recorded() {
        let db = TestDatabase::new().await.unwrap();
        let repo = JobClaimRepository::new(db.connection());
        let arbiter = JobClaimArbiter::new(repo.clone());

        let result = arbiter
            .run_once("cleanup", date(), "replica-a", || async {
                Err(AppError::Internal("boom".to_string()))
            })
            .await;
        assert!(result.is_err());

        let claim = repo.find("cleanup", date()).await.unwrap().unwrap();
        assert_eq!(claim.status, JobStatus::Failed);
        assert!(claim.error.unwrap().contains("boom"));
    }
}
