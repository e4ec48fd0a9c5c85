//! Flash job records
//!
//! A [`FlashJob`] is the snapshot pollers see. The job's state only moves
//! along the edges [`JobState::can_transition_to`] allows.

use crate::error::{Error, ErrorKind};
use crate::firmware::FirmwareDescriptor;
use core::fmt;
use uuid::Uuid;

/// Unique identifier of a flash job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(Uuid);

impl JobId {
    /// Generate a fresh random job id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a job id from its string form
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s.trim()).ok().map(Self)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a flash job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    /// Created, waiting for its transport
    Queued,
    /// Transport acquired, handshaking with the bootloader
    Connecting,
    /// Erasing the target range
    Erasing,
    /// Sending image chunks
    Writing,
    /// Reading back and comparing
    Verifying,
    /// Image written and verified
    Done,
    /// Stopped on an error
    Failed,
    /// Stopped on request
    Cancelled,
}

impl JobState {
    /// Whether the job can no longer change
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }

    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;

        if self.is_terminal() {
            return false;
        }
        match next {
            Cancelled | Failed => true,
            Connecting => self == Queued,
            Erasing => self == Connecting,
            Writing => self == Erasing,
            Verifying => self == Writing,
            Done => self == Verifying,
            Queued => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Queued => "queued",
            Self::Connecting => "connecting",
            Self::Erasing => "erasing",
            Self::Writing => "writing",
            Self::Verifying => "verifying",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Failure recorded on a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobError {
    /// Error category
    pub kind: ErrorKind,
    /// Full message including the underlying detail
    pub message: String,
}

impl From<&Error> for JobError {
    fn from(e: &Error) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Snapshot of one flash job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashJob {
    /// Job identifier
    pub id: JobId,
    /// Firmware being flashed
    pub descriptor: FirmwareDescriptor,
    /// Device the job targets
    pub device_id: String,
    /// Current lifecycle state
    pub state: JobState,
    /// Percentage in `0..=100`, never decreasing
    pub progress: u8,
    /// Set when `state` is [`JobState::Failed`]
    pub error: Option<JobError>,
}

impl FlashJob {
    /// Create a queued job
    pub fn new(id: JobId, descriptor: FirmwareDescriptor, device_id: impl Into<String>) -> Self {
        Self {
            id,
            descriptor,
            device_id: device_id.into(),
            state: JobState::Queued,
            progress: 0,
            error: None,
        }
    }

    /// Whether the job can no longer change
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Move to `next` if the transition is legal
    ///
    /// Returns `false` and leaves the job untouched otherwise.
    pub fn transition(&mut self, next: JobState) -> bool {
        if !self.state.can_transition_to(next) {
            log::warn!("job {}: ignoring transition {} -> {}", self.id, self.state, next);
            return false;
        }
        self.state = next;
        if next == JobState::Done {
            self.progress = 100;
        }
        true
    }

    /// Raise progress to `percent`, never lowering it
    pub fn advance(&mut self, percent: u8) {
        if !self.is_terminal() {
            self.progress = self.progress.max(percent.min(100));
        }
    }

    /// Record a failure and move to [`JobState::Failed`]
    pub fn fail(&mut self, error: &Error) -> bool {
        if self.transition(JobState::Failed) {
            self.error = Some(JobError::from(error));
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firmware::FirmwareDescriptor;

    fn job() -> FlashJob {
        let desc = FirmwareDescriptor::from_parts(Some("x9d"), Some("v2.9.0")).unwrap();
        FlashJob::new(JobId::new(), desc, "dev1")
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut job = job();
        for next in [
            JobState::Connecting,
            JobState::Erasing,
            JobState::Writing,
            JobState::Verifying,
            JobState::Done,
        ] {
            assert!(job.transition(next), "{:?} -> {:?}", job.state, next);
        }
        assert_eq!(job.progress, 100);
        assert!(job.is_terminal());
    }

    #[test]
    fn test_skipping_a_step_is_rejected() {
        let mut job = job();
        assert!(!job.transition(JobState::Writing));
        assert_eq!(job.state, JobState::Queued);
        assert!(job.transition(JobState::Connecting));
        assert!(!job.transition(JobState::Verifying));
    }

    #[test]
    fn test_any_non_terminal_state_can_be_cancelled() {
        for state in [
            JobState::Queued,
            JobState::Connecting,
            JobState::Erasing,
            JobState::Writing,
            JobState::Verifying,
        ] {
            assert!(state.can_transition_to(JobState::Cancelled));
        }
        for state in [JobState::Done, JobState::Failed, JobState::Cancelled] {
            assert!(!state.can_transition_to(JobState::Cancelled));
        }
    }

    #[test]
    fn test_progress_never_decreases() {
        let mut job = job();
        job.advance(40);
        job.advance(10);
        assert_eq!(job.progress, 40);
        job.advance(250);
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn test_fail_records_error() {
        let mut job = job();
        job.transition(JobState::Connecting);
        assert!(job.fail(&Error::ProtocolError("bad frame".into())));
        assert_eq!(job.state, JobState::Failed);
        let err = job.error.unwrap();
        assert_eq!(err.kind, ErrorKind::ProtocolError);
        assert!(err.message.contains("bad frame"));
    }

    #[test]
    fn test_job_id_round_trip() {
        let id = JobId::new();
        assert_eq!(JobId::parse(&id.to_string()), Some(id));
        assert_eq!(JobId::parse("not-a-job"), None);
    }
}
