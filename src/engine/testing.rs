//! Scriptable engine double for tests.
//!
//! By default every call copies the input to the output. Steps queued with
//! the helper methods change what the next calls do.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex};

use super::{EngineFailure, TransformEngine};

#[derive(Clone, Default)]
pub(crate) struct Gate {
    state: Arc<(Mutex<bool>, Condvar)>,
}

impl Gate {
    pub(crate) fn release(&self) {
        let (open, cvar) = &*self.state;
        *open.lock().unwrap() = true;
        cvar.notify_all();
    }

    fn wait(&self) {
        let (open, cvar) = &*self.state;
        let mut released = open.lock().unwrap();
        while !*released {
            released = cvar.wait(released).unwrap();
        }
    }
}

enum Step {
    Reject(String),
    Unavailable(String),
    Hold(Gate),
    Scribble,
}

#[derive(Clone, Default)]
pub(crate) struct ScriptedEngine {
    steps: Arc<Mutex<VecDeque<Step>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedEngine {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// The next call fails with `Rejected(reason)`.
    pub(crate) fn reject_next(&self, reason: &str) {
        self.push(Step::Reject(reason.to_string()));
    }

    /// The next call fails with `Unavailable`.
    pub(crate) fn unavailable_next(&self, detail: &str) {
        self.push(Step::Unavailable(detail.to_string()));
    }

    /// The next call blocks until the returned gate is released, then copies.
    pub(crate) fn gate(&self) -> Gate {
        let gate = Gate::default();
        self.push(Step::Hold(gate.clone()));
        gate
    }

    /// The next call overwrites its input before copying it.
    pub(crate) fn scribble_next(&self) {
        self.push(Step::Scribble);
    }

    /// Transform names seen so far
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn push(&self, step: Step) {
        self.steps.lock().unwrap().push_back(step);
    }
}

impl TransformEngine for ScriptedEngine {
    fn apply(&self, transform: &str, input: &Path, output: &Path) -> Result<(), EngineFailure> {
        self.calls.lock().unwrap().push(transform.to_string());
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Reject(reason)) => return Err(EngineFailure::Rejected(reason)),
            Some(Step::Unavailable(detail)) => return Err(EngineFailure::Unavailable(detail)),
            Some(Step::Hold(gate)) => gate.wait(),
            Some(Step::Scribble) => fs::write(input, b"scribbled")?,
            None => {}
        }
        fs::copy(input, output)?;
        Ok(())
    }
}
