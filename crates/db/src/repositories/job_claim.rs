//! Job claim repository.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use habitgraph_common::{AppError, AppResult};
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};

use crate::entities::job_claim::{self, JobStatus};
use crate::entities::JobClaim;

/// Job claim repository.
#[derive(Clone)]
pub struct JobClaimRepository {
    db: Arc<DatabaseConnection>,
}

impl JobClaimRepository {
    /// Create a new job claim repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find the claim of a job for a date.
    pub async fn find(&self, job_name: &str, job_date: NaiveDate) -> AppResult<Option<job_claim::Model>> {
        JobClaim::find_by_id((job_name.to_string(), job_date))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Insert a running claim unless one exists for `(job_name, job_date)`.
    ///
    /// Returns the claim row that is stored afterwards and whether this call
    /// created it.
    pub async fn try_claim(
        &self,
        job_name: &str,
        job_date: NaiveDate,
        owner_id: &str,
    ) -> AppResult<(job_claim::Model, bool)> {
        let model = job_claim::ActiveModel {
            job_name: Set(job_name.to_string()),
            job_date: Set(job_date),
            started_at: Set(Utc::now().into()),
            completed_at: Set(None),
            status: Set(JobStatus::Running),
            owner_id: Set(owner_id.to_string()),
            items_processed: Set(0),
            error: Set(None),
        };

        let inserted = JobClaim::insert(model)
            .on_conflict(
                OnConflict::columns([job_claim::Column::JobName, job_claim::Column::JobDate])
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let claim = self.find(job_name, job_date).await?.ok_or_else(|| {
            AppError::Internal(format!("Job claim {job_name}@{job_date} vanished after insert"))
        })?;

        Ok((claim, inserted == 1))
    }

    /// Record the terminal state of a running claim.
    ///
    /// Only the owner of a still-running claim can complete it; returns
    /// `false` otherwise.
    pub async fn complete(
        &self,
        claim: &job_claim::Model,
        status: JobStatus,
        items_processed: i64,
        error: Option<String>,
    ) -> AppResult<bool> {
        let update = job_claim::ActiveModel {
            completed_at: Set(Some(Utc::now().into())),
            status: Set(status),
            items_processed: Set(items_processed),
            error: Set(error),
            ..Default::default()
        };

        let result = JobClaim::update_many()
            .set(update)
            .filter(job_claim::Column::JobName.eq(claim.job_name.as_str()))
            .filter(job_claim::Column::JobDate.eq(claim.job_date))
            .filter(job_claim::Column::OwnerId.eq(claim.owner_id.as_str()))
            .filter(job_claim::Column::Status.eq(JobStatus::Running))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected == 1)
    }
}
