//! Runs transform jobs against the head of history, one at a time.
//!
//! ```text
//! submit(T)
//! +-- peek head                       (EmptyHistory)
//! +-- claim the job slot              (JobAlreadyInFlight)
//! +-- stage a private copy of head    (IoFailure)
//! +-- spawn:
//!     +-- engine.apply(T, input, output) on the blocking pool
//!     +-- push derived state if head is still the job's input (StaleJob)
//!     +-- reclaim whatever was not adopted by history
//!     +-- publish terminal status, which frees the slot
//! ```
//!
//! The slot holds the running job's handle and counts as taken while that job
//! is Pending or Running. History is updated before the terminal status goes
//! out, so a new submission can never interleave with the previous completion.

use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use crate::engine::EngineAdapter;
use crate::error::{EditorError, EditorResult};
use crate::state::data::{ImageState, Transform};
use crate::state::history::HistoryStack;
use crate::state::job::{Job, JobHandle};
use crate::storage::temp::{StageKind, TempFileStore};

#[derive(Debug)]
pub struct JobOrchestrator {
    history: Arc<HistoryStack>,
    store: Arc<TempFileStore>,
    engine: EngineAdapter,
    slot: Mutex<Option<JobHandle>>,
}

impl JobOrchestrator {
    pub fn new(history: Arc<HistoryStack>, store: Arc<TempFileStore>, engine: EngineAdapter) -> Self {
        Self {
            history,
            store,
            engine,
            slot: Mutex::new(None),
        }
    }

    /// True while a job is pending or running.
    ///
    /// Only a hint for enabling controls; `submit` does its own check.
    pub fn is_busy(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(JobHandle::is_in_flight)
    }

    /// Start applying `transform` to the current head.
    ///
    /// Must be called from within a Tokio runtime. The returned handle resolves
    /// once the job has either been pushed onto history or given up.
    pub fn submit(&self, transform: Transform) -> EditorResult<JobHandle> {
        let head = self.history.peek_head()?;
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(JobHandle::is_in_flight) {
            return Err(EditorError::JobAlreadyInFlight);
        }

        let staged_input = self.stage_input(&head)?;
        let staged_output = match self.store.allocate(StageKind::Output) {
            Ok(path) => path,
            Err(err) => {
                self.store.reclaim(&staged_input);
                return Err(EditorError::io("allocating output", &err));
            }
        };

        let job = Job::new(head, transform, staged_input, staged_output);
        let handle = job.handle();
        job.start();
        *slot = Some(handle.clone());
        drop(slot);
        tracing::info!(
            job = %job.id(),
            transform = %job.transform(),
            input = %job.input_state().id(),
            "Job dispatched"
        );

        tokio::spawn(run_job(
            job,
            Arc::clone(&self.history),
            Arc::clone(&self.store),
            self.engine.clone(),
        ));
        Ok(handle)
    }

    /// Copy the head's bytes into a fresh scratch file so the engine never
    /// sees the file history refers to.
    fn stage_input(&self, head: &ImageState) -> EditorResult<std::path::PathBuf> {
        let path = self
            .store
            .allocate(StageKind::Input)
            .map_err(|e| EditorError::io("allocating input", &e))?;

        if let Err(err) = copy_state(head, &path) {
            self.store.reclaim(&path);
            return Err(EditorError::io("staging input", &err));
        }
        Ok(path)
    }
}

fn copy_state(state: &ImageState, dest: &Path) -> io::Result<u64> {
    let mut reader = state.open()?;
    let mut file = File::create(dest)?;
    let copied = io::copy(&mut reader, &mut file)?;
    file.sync_all()?;
    Ok(copied)
}

/// Completion side of a job; owns the job until it is terminal.
async fn run_job(
    job: Job,
    history: Arc<HistoryStack>,
    store: Arc<TempFileStore>,
    engine: EngineAdapter,
) {
    let output = job.staged_output().to_path_buf();
    let result = engine
        .run(
            &job.transform().name,
            job.staged_input().to_path_buf(),
            output.clone(),
        )
        .await;

    let outcome = match result {
        Ok(()) => {
            let produced = ImageState::derived(output.clone(), job.transform().clone());
            match history.push(job.input_state().id(), produced.clone()) {
                Ok(()) => {
                    tracing::info!(job = %job.id(), state = %produced.id(), "Job succeeded");
                    Ok(produced)
                }
                Err(err) => {
                    tracing::warn!(job = %job.id(), "Dropping stale job result");
                    store.reclaim(&output);
                    Err(err)
                }
            }
        }
        Err(err) => {
            tracing::warn!(job = %job.id(), error = %err, "Job failed");
            store.reclaim(&output);
            if matches!(err, EditorError::EngineUnavailable(_)) {
                // The engine thread may still be running and write it later.
                store.defer(&output);
            }
            Err(err)
        }
    };

    store.reclaim(job.staged_input());
    job.finish(outcome);
}
