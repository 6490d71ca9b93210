//! Process-wide job store.
//!
//! Maps repository identifiers to their [`Job`]. Each operation takes the
//! lock for exactly one read or one write, so pollers never wait for a job
//! to finish and always observe a consistent snapshot of the fields written
//! so far.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::StoreError;
use crate::models::{AnalysisField, Job, JobStatus};

/// Identifies one run of a job. Registering a repository again issues a
/// new generation; writes carrying an older one are rejected with
/// [`StoreError::Superseded`] and leave the record untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation(u64);

struct Slot {
    generation: Generation,
    job: Job,
}

#[derive(Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<String, Slot>>,
    next_generation: AtomicU64,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job in `pending`, replacing any previous job for `id`.
    /// Returns the generation that owns the new record.
    pub fn register(&self, id: &str) -> Generation {
        let generation = Generation(self.next_generation.fetch_add(1, Ordering::Relaxed) + 1);
        self.jobs.write().insert(
            id.to_string(),
            Slot {
                generation,
                job: Job::new(JobStatus::Pending),
            },
        );
        generation
    }

    /// Move a job to `processing` with every result field cleared.
    pub fn begin(&self, id: &str, generation: Generation) -> Result<(), StoreError> {
        self.update(id, generation, |job| {
            *job = Job::new(JobStatus::Processing);
        })
    }

    /// Replace the job verbatim (used for cache hits).
    pub fn restore(&self, id: &str, generation: Generation, job: Job) -> Result<(), StoreError> {
        self.update(id, generation, |slot| *slot = job)
    }

    /// Write a single result field.
    pub fn set_field(
        &self,
        id: &str,
        generation: Generation,
        field: AnalysisField,
        value: Value,
    ) -> Result<(), StoreError> {
        self.update(id, generation, |job| job.set(field, value))
    }

    /// Transition to `completed` once every field has been written.
    ///
    /// Returns the completed snapshot, ready to be cached.
    pub fn mark_completed(&self, id: &str, generation: Generation) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.write();
        let job = owned_job(&mut jobs, id, generation)?;

        let unresolved = job.unresolved();
        if !unresolved.is_empty() {
            return Err(StoreError::Unresolved {
                id: id.to_string(),
                fields: unresolved,
            });
        }

        job.status = JobStatus::Completed;
        job.error = None;
        Ok(job.clone())
    }

    /// Replace the job with a `failed` record carrying `error`.
    pub fn mark_failed(
        &self,
        id: &str,
        generation: Generation,
        error: impl Into<String>,
    ) -> Result<(), StoreError> {
        let error = error.into();
        self.update(id, generation, |job| *job = Job::failed(error))
    }

    /// Snapshot of the job, if one has been registered.
    pub fn get(&self, id: &str) -> Option<Job> {
        self.jobs.read().get(id).map(|slot| slot.job.clone())
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }

    fn update(
        &self,
        id: &str,
        generation: Generation,
        apply: impl FnOnce(&mut Job),
    ) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write();
        apply(owned_job(&mut jobs, id, generation)?);
        Ok(())
    }
}

fn owned_job<'a>(
    jobs: &'a mut HashMap<String, Slot>,
    id: &str,
    generation: Generation,
) -> Result<&'a mut Job, StoreError> {
    let slot = jobs
        .get_mut(id)
        .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
    if slot.generation != generation {
        return Err(StoreError::Superseded(id.to_string()));
    }
    Ok(&mut slot.job)
}
