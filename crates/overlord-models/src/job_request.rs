//! Job request state machine
//!
//! Job request states: PENDING → RUNNING → {COMPLETED | FAILED}
//! with RUNNING → PENDING as the retry path. COMPLETED and FAILED are
//! absorbing.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::TerminalState;

/// Job parameters: a flat string map keyed by parameter name.
pub type JobParams = BTreeMap<String, String>;

/// Job request state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobRequestState {
    /// Waiting for a worker to pick it up (initial and retry state)
    Pending,
    /// A worker is executing it
    Running,
    /// Finished successfully
    Completed,
    /// Gave up after exhausting the retry budget
    Failed,
}

impl TerminalState for JobRequestState {
    fn is_terminal(&self) -> bool {
        matches!(self, JobRequestState::Completed | JobRequestState::Failed)
    }
}

impl JobRequestState {
    /// Check if transition from this state to target is valid
    pub fn can_transition_to(&self, target: JobRequestState) -> bool {
        match (self, target) {
            (JobRequestState::Pending, JobRequestState::Running) => true,
            // A request whose job type cannot be resolved never runs
            (JobRequestState::Pending, JobRequestState::Failed) => true,

            (JobRequestState::Running, JobRequestState::Completed) => true,
            (JobRequestState::Running, JobRequestState::Failed) => true,
            // Retry path
            (JobRequestState::Running, JobRequestState::Pending) => true,

            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobRequestState::Pending => "PENDING",
            JobRequestState::Running => "RUNNING",
            JobRequestState::Completed => "COMPLETED",
            JobRequestState::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for JobRequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors for job request state operations
#[derive(Debug, thiserror::Error)]
pub enum JobRequestError {
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition {
        from: JobRequestState,
        to: JobRequestState,
    },

    #[error("Missing job parameter '{0}'")]
    MissingParam(String),
}

/// The persisted record of one unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Opaque identifier
    pub id: String,

    /// Key into the job type registry (e.g. `instances.create`)
    pub job_type: String,

    /// Type-specific parameters
    #[serde(default)]
    pub params: JobParams,

    /// Current state
    pub state: JobRequestState,

    /// Number of failed attempts so far; never decreases
    #[serde(default)]
    pub failed_attempts: u32,

    /// Earliest time a retry may run; set by the retry policy on each failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl JobRequest {
    /// Create a new request in PENDING state
    pub fn new(job_type: impl Into<String>, params: JobParams) -> Self {
        let now = Utc::now();
        Self {
            id: crate::new_id(),
            job_type: job_type.into(),
            params,
            state: JobRequestState::Pending,
            failed_attempts: 0,
            next_attempt_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Transition to a new state
    pub fn transition(&mut self, new_state: JobRequestState) -> Result<(), JobRequestError> {
        if !self.state.can_transition_to(new_state) {
            return Err(JobRequestError::InvalidTransition {
                from: self.state,
                to: new_state,
            });
        }

        self.state = new_state;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// PENDING → RUNNING
    pub fn start(&mut self) -> Result<(), JobRequestError> {
        self.next_attempt_at = None;
        self.transition(JobRequestState::Running)
    }

    /// RUNNING → COMPLETED
    pub fn complete(&mut self) -> Result<(), JobRequestError> {
        self.transition(JobRequestState::Completed)
    }

    /// Mark as permanently failed
    pub fn fail(&mut self) -> Result<(), JobRequestError> {
        self.transition(JobRequestState::Failed)
    }

    /// Count one failed attempt and decide the outcome.
    ///
    /// Returns the new state: FAILED once `failed_attempts` reaches
    /// `max_retries`, PENDING (retryable, eligible again at `next_attempt_at`)
    /// otherwise.
    pub fn record_failure(
        &mut self,
        max_retries: u32,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<JobRequestState, JobRequestError> {
        let target = if self.failed_attempts.saturating_add(1) >= max_retries {
            JobRequestState::Failed
        } else {
            JobRequestState::Pending
        };
        self.transition(target)?;
        self.failed_attempts = self.failed_attempts.saturating_add(1);
        self.next_attempt_at = match target {
            JobRequestState::Pending => Some(next_attempt_at),
            _ => None,
        };
        Ok(target)
    }

    /// Check if the request has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Look up a required parameter
    pub fn param(&self, name: &str) -> Result<&str, JobRequestError> {
        self.params
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| JobRequestError::MissingParam(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> JobRequest {
        let mut params = JobParams::new();
        params.insert("instance_id".to_string(), "inst-1".to_string());
        JobRequest::new("instances.create", params)
    }

    #[test]
    fn test_new_request_is_pending() {
        let req = request();
        assert_eq!(req.state, JobRequestState::Pending);
        assert_eq!(req.failed_attempts, 0);
        assert!(req.next_attempt_at.is_none());
        assert!(!req.id.is_empty());
    }

    #[test]
    fn test_happy_path() {
        let mut req = request();
        req.start().unwrap();
        assert_eq!(req.state, JobRequestState::Running);
        req.complete().unwrap();
        assert!(req.is_terminal());
    }

    #[test]
    fn test_cannot_complete_from_pending() {
        let mut req = request();
        assert!(req.complete().is_err());
        assert_eq!(req.state, JobRequestState::Pending);
    }

    #[test]
    fn test_terminal_states_absorb() {
        let mut req = request();
        req.start().unwrap();
        req.complete().unwrap();
        assert!(req.transition(JobRequestState::Running).is_err());
        assert!(req.transition(JobRequestState::Pending).is_err());
        assert!(req.fail().is_err());

        let mut req = request();
        req.fail().unwrap();
        assert!(req.start().is_err());
    }

    #[test]
    fn test_record_failure_retries_until_budget() {
        let mut req = request();
        let at = Utc::now();

        req.start().unwrap();
        assert_eq!(req.record_failure(3, at).unwrap(), JobRequestState::Pending);
        assert_eq!(req.failed_attempts, 1);
        assert_eq!(req.next_attempt_at, Some(at));

        req.start().unwrap();
        assert!(req.next_attempt_at.is_none());
        assert_eq!(req.record_failure(3, at).unwrap(), JobRequestState::Pending);

        req.start().unwrap();
        assert_eq!(req.record_failure(3, at).unwrap(), JobRequestState::Failed);
        assert_eq!(req.failed_attempts, 3);
        assert!(req.next_attempt_at.is_none());
    }

    #[test]
    fn test_record_failure_requires_running() {
        let mut req = request();
        assert!(req.record_failure(10, Utc::now()).is_err());
        assert_eq!(req.failed_attempts, 0);
    }

    #[test]
    fn test_param_lookup() {
        let req = request();
        assert_eq!(req.param("instance_id").unwrap(), "inst-1");
        assert!(matches!(
            req.param("chassis_id"),
            Err(JobRequestError::MissingParam(name)) if name == "chassis_id"
        ));
    }

    #[test]
    fn test_serialization() {
        let req = request();
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"state\":\"PENDING\""));
        assert!(json.contains("\"job_type\":\"instances.create\""));
        assert!(!json.contains("next_attempt_at"));
    }
}
