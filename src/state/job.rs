//! Transform jobs and their lifecycle.
//!
//! A job moves `Pending -> Running` while it is being submitted, then
//! `Running -> Succeeded | Failed` exactly once when the engine call and the
//! history update are done. The status is published on a watch channel so any
//! number of [`JobHandle`]s can observe it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

use super::data::{ImageState, Transform};
use crate::error::{EditorError, EditorResult};

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(u64);

impl JobId {
    fn next() -> Self {
        Self(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded(ImageState),
    Failed(EditorError),
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded(_) | Self::Failed(_))
    }

    pub fn is_in_flight(&self) -> bool {
        !self.is_terminal()
    }
}

/// One transform request, exclusively owned by the orchestrator.
#[derive(Debug)]
pub struct Job {
    id: JobId,
    input_state: ImageState,
    transform: Transform,
    staged_input: PathBuf,
    staged_output: PathBuf,
    status: watch::Sender<JobStatus>,
}

impl Job {
    pub fn new(
        input_state: ImageState,
        transform: Transform,
        staged_input: PathBuf,
        staged_output: PathBuf,
    ) -> Self {
        let (status, _rx) = watch::channel(JobStatus::Pending);
        Self {
            id: JobId::next(),
            input_state,
            transform,
            staged_input,
            staged_output,
            status,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn input_state(&self) -> &ImageState {
        &self.input_state
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn staged_input(&self) -> &Path {
        &self.staged_input
    }

    pub fn staged_output(&self) -> &Path {
        &self.staged_output
    }

    pub fn status(&self) -> JobStatus {
        self.status.borrow().clone()
    }

    /// A handle observing this job's status.
    pub fn handle(&self) -> JobHandle {
        JobHandle {
            id: self.id,
            transform: self.transform.clone(),
            input_state: self.input_state.clone(),
            status: self.status.subscribe(),
        }
    }

    /// Pending -> Running. No-op from any other state.
    pub fn start(&self) -> bool {
        self.status.send_if_modified(|status| {
            if *status != JobStatus::Pending {
                return false;
            }
            *status = JobStatus::Running;
            true
        })
    }

    /// Move to a terminal state. Returns false if the job already finished.
    pub fn finish(&self, outcome: EditorResult<ImageState>) -> bool {
        let finished = self.status.send_if_modified(|status| {
            if status.is_terminal() {
                return false;
            }
            *status = match outcome {
                Ok(state) => JobStatus::Succeeded(state),
                Err(err) => JobStatus::Failed(err),
            };
            true
        });
        if !finished {
            tracing::warn!(job = %self.id, "Ignoring second completion of a finished job");
        }
        finished
    }
}

/// What callers get back from a submission.
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: JobId,
    transform: Transform,
    input_state: ImageState,
    status: watch::Receiver<JobStatus>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn input_state(&self) -> &ImageState {
        &self.input_state
    }

    pub fn status(&self) -> JobStatus {
        self.status.borrow().clone()
    }

    /// True until the job publishes a terminal status.
    ///
    /// A job dropped without finishing no longer counts as in flight.
    pub fn is_in_flight(&self) -> bool {
        self.status.has_changed().is_ok() && self.status.borrow().is_in_flight()
    }

    /// Wait for the job to reach a terminal state.
    pub async fn wait(mut self) -> EditorResult<ImageState> {
        let status = match self.status.wait_for(JobStatus::is_terminal).await {
            Ok(status) => status.clone(),
            // The job was dropped without finishing; only the runtime shutting
            // down does that.
            Err(_) => {
                return Err(EditorError::EngineUnavailable(
                    "job was dropped before it finished".to_string(),
                ))
            }
        };
        match status {
            JobStatus::Succeeded(state) => Ok(state),
            JobStatus::Failed(err) => Err(err),
            JobStatus::Pending | JobStatus::Running => Err(EditorError::EngineUnavailable(
                "job finished without an outcome".to_string(),
            )),
        }
    }
}
