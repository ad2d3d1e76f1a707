//! The job ledger: record of every render job and enforcer of the state
//! machine.
//!
//! Two indexes: jobs by id, and per-key job history (newest last). The per-key
//! entry is the only mutable shared slot in the system; `create` holds its
//! shard lock across the lookup-then-insert so two concurrent submissions can
//! never both create a live job for the same key, even if a caller bypasses
//! the scheduler's own submit lock.

use dashmap::DashMap;
use uuid::Uuid;

use crate::domain::{
    error::DomainError,
    jobs::{JobKey, JobRecord, JobTransition},
};

#[derive(Debug, Default)]
pub struct JobLedger {
    by_id: DashMap<Uuid, JobRecord>,
    by_key: DashMap<JobKey, Vec<Uuid>>,
}

impl JobLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a freshly queued job.
    ///
    /// Fails with `Conflict` if a non-terminal job already exists for the
    /// job's key. Terminal predecessors stay in the history.
    pub fn create(&self, job: JobRecord) -> Result<(), DomainError> {
        let mut history = self.by_key.entry(job.key.clone()).or_default();

        for id in history.iter() {
            if let Some(existing) = self.by_id.get(id)
                && !existing.state.is_terminal()
            {
                return Err(DomainError::conflict(format!(
                    "job {} is still {} for key {}",
                    existing.id,
                    existing.state.as_str(),
                    job.key
                )));
            }
        }

        history.push(job.id);
        self.by_id.insert(job.id, job);
        Ok(())
    }

    /// Apply a state transition, returning the updated record.
    ///
    /// The entry lock makes the claim exclusive: of two workers racing on the
    /// same job, exactly one sees `Queued` and wins the transition.
    pub fn update_state(
        &self,
        job_id: Uuid,
        transition: JobTransition,
    ) -> Result<JobRecord, DomainError> {
        let mut entry = self
            .by_id
            .get_mut(&job_id)
            .ok_or_else(|| DomainError::not_found("job"))?;
        transition.apply(entry.value_mut())?;
        Ok(entry.clone())
    }

    pub fn get(&self, job_id: Uuid) -> Result<JobRecord, DomainError> {
        self.by_id
            .get(&job_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| DomainError::not_found("job"))
    }

    /// Most recent job for a key.
    pub fn find_by_key(&self, key: &JobKey) -> Result<JobRecord, DomainError> {
        let history = self
            .by_key
            .get(key)
            .ok_or_else(|| DomainError::not_found("job"))?;
        history
            .iter()
            .rev()
            .find_map(|id| self.by_id.get(id).map(|entry| entry.clone()))
            .ok_or_else(|| DomainError::not_found("job"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        jobs::ArtifactRef,
        types::{JobState, OutputFormat},
    };
    use time::OffsetDateTime;

    fn artifact(job: &JobRecord) -> ArtifactRef {
        ArtifactRef {
            map_id: job.map_id.clone(),
            format: job.format,
            version: job.version,
            stored_path: format!("x/{}.svg", job.version),
            checksum: "ab".repeat(32),
            size_bytes: 1,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn create_rejects_second_live_job_for_same_key() {
        let ledger = JobLedger::new();
        let first = JobRecord::queued("m1", OutputFormat::Svg, 3);
        let second = JobRecord::queued("m1", OutputFormat::Svg, 3);
        assert_eq!(first.key, second.key);

        ledger.create(first).unwrap();
        let err = ledger.create(second).unwrap_err();
        assert!(matches!(err, DomainError::Conflict { .. }));
    }

    #[test]
    fn create_allows_new_job_after_terminal_predecessor() {
        let ledger = JobLedger::new();
        let first = JobRecord::queued("m1", OutputFormat::Svg, 3);
        let first_id = first.id;
        ledger.create(first).unwrap();
        ledger.update_state(first_id, JobTransition::Claim).unwrap();
        ledger
            .update_state(
                first_id,
                JobTransition::Fail {
                    error: "engine crashed".into(),
                },
            )
            .unwrap();

        let second = JobRecord::queued("m1", OutputFormat::Svg, 3);
        let second_id = second.id;
        ledger.create(second).unwrap();

        // The history keeps both; the key now resolves to the newest.
        let latest = ledger.find_by_key(&ledger.get(second_id).unwrap().key).unwrap();
        assert_eq!(latest.id, second_id);
        assert_eq!(
            ledger.get(first_id).unwrap().error.as_deref(),
            Some("engine crashed")
        );
    }

    #[test]
    fn update_state_enforces_the_machine() {
        let ledger = JobLedger::new();
        let job = JobRecord::queued("m1", OutputFormat::Png, 1);
        let job_id = job.id;
        let result = artifact(&job);
        ledger.create(job).unwrap();

        let err = ledger
            .update_state(job_id, JobTransition::Succeed { result })
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
        assert_eq!(ledger.get(job_id).unwrap().state, JobState::Queued);
    }

    #[test]
    fn exactly_one_claim_wins() {
        let ledger = JobLedger::new();
        let job = JobRecord::queued("m1", OutputFormat::Pdf, 2);
        let job_id = job.id;
        ledger.create(job).unwrap();

        let first = ledger.update_state(job_id, JobTransition::Claim);
        let second = ledger.update_state(job_id, JobTransition::Claim);
        assert!(first.is_ok());
        assert!(matches!(
            second.unwrap_err(),
            DomainError::InvalidTransition { .. }
        ));
    }

    #[test]
    fn lookups_fail_with_not_found() {
        let ledger = JobLedger::new();
        assert!(matches!(
            ledger.get(Uuid::new_v4()).unwrap_err(),
            DomainError::NotFound { .. }
        ));
        let key = JobRecord::queued("m9", OutputFormat::Svg, 1).key;
        assert!(matches!(
            ledger.find_by_key(&key).unwrap_err(),
            DomainError::NotFound { .. }
        ));
    }
}
