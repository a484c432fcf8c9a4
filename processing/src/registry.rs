use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use log::warn;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::TransformError;

/// Lifecycle state of a transformation job.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    /// Submitted, but not yet picked up by a worker.
    ///
    Queued,

    /// Being executed by a worker.
    ///
    Running,

    /// Completed with a result.
    ///
    Succeeded,

    /// Completed with an error.
    ///
    Failed,
}

impl JobState {
    /// Whether no further transition can happen.
    ///
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

impl Display for JobState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The set of requests that are scheduled or executing.
///
/// All access goes through a single reader/writer lock. Every critical section is a constant-time map operation,
/// so neither readers nor writers ever wait on extraction work.
///
#[derive(Debug, Default)]
pub struct ActiveRequests {
    requests: RwLock<HashMap<String, JobState>>,
}

impl ActiveRequests {
    /// Creates an empty registry.
    ///
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `id` as queued.
    ///
    /// Fails with [`TransformError::DuplicateRequest`] if `id` is already active.
    ///
    pub fn register(&self, id: &str) -> Result<(), TransformError> {
        self.register_with(id, || Ok(()))
    }

    /// Runs `schedule` while holding the write lock, and registers `id` as queued only if it succeeds.
    ///
    /// Holding the lock across `schedule` means a job that starts (or even finishes) immediately can't observe its
    /// own request as missing: its `mark_running` and `unregister` calls wait until the registration is in place.
    ///
    pub fn register_with<T>(
        &self,
        id: &str,
        schedule: impl FnOnce() -> Result<T, TransformError>,
    ) -> Result<T, TransformError> {
        let mut requests = self.requests.write();
        if requests.contains_key(id) {
            return Err(TransformError::DuplicateRequest(id.to_string()));
        }
        let scheduled = schedule()?;
        requests.insert(id.to_string(), JobState::Queued);
        Ok(scheduled)
    }

    /// Marks `id` as picked up by a worker.
    ///
    pub fn mark_running(&self, id: &str) {
        match self.requests.write().get_mut(id) {
            Some(state) => *state = JobState::Running,
            None => warn!("Request {} started without being registered", id),
        }
    }

    /// Removes `id`.
    ///
    /// Returns whether `id` was active.
    ///
    pub fn unregister(&self, id: &str) -> bool {
        self.requests.write().remove(id).is_some()
    }

    /// Whether `id` is scheduled or executing.
    ///
    pub fn is_active(&self, id: &str) -> bool {
        self.requests.read().contains_key(id)
    }

    /// Returns the state of `id`, or `None` if it isn't active.
    ///
    pub fn state(&self, id: &str) -> Option<JobState> {
        self.requests.read().get(id).copied()
    }

    /// Number of active requests.
    ///
    pub fn len(&self) -> usize {
        self.requests.read().len()
    }

    /// Whether no request is active.
    ///
    pub fn is_empty(&self) -> bool {
        self.requests.read().is_empty()
    }
}
