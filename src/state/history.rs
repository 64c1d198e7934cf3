//! LIFO edit history.
//!
//! The history is an immutable, versioned snapshot published through a
//! `tokio::sync::watch` channel. Every transition builds a new sequence and
//! swaps it in under the channel's lock, so observers holding a snapshot never
//! see a partial update and never get a live handle into the stack.

use std::sync::Arc;
use tokio::sync::watch;

use super::data::{ImageState, StateId};
use crate::error::{EditorError, EditorResult};

/// One published version of the history.
#[derive(Debug, Clone)]
pub struct HistorySnapshot {
    version: u64,
    entries: Arc<[ImageState]>,
}

impl Default for HistorySnapshot {
    fn default() -> Self {
        Self {
            version: 0,
            entries: Arc::from(Vec::new()),
        }
    }
}

impl HistorySnapshot {
    /// Monotonic counter bumped by every transition.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn entries(&self) -> &[ImageState] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The current image, if any.
    pub fn head(&self) -> Option<&ImageState> {
        self.entries.last()
    }

    pub fn can_undo(&self) -> bool {
        self.entries.len() > 1
    }

    fn with_entries(&self, entries: Vec<ImageState>) -> Self {
        Self {
            version: self.version + 1,
            entries: entries.into(),
        }
    }
}

/// The stack of image states, with single-step undo.
///
/// Writers are the foreground command flow and the completion handler of the
/// single in-flight job; readers subscribe and get snapshots.
#[derive(Debug)]
pub struct HistoryStack {
    tx: watch::Sender<HistorySnapshot>,
}

impl Default for HistoryStack {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryStack {
    /// An empty history (no image selected yet).
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(HistorySnapshot::default());
        Self { tx }
    }

    /// Receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<HistorySnapshot> {
        self.tx.subscribe()
    }

    /// The snapshot current right now.
    pub fn snapshot(&self) -> HistorySnapshot {
        self.tx.borrow().clone()
    }

    /// Replace the whole history with `initial`.
    ///
    /// Returns the entries that were discarded so their files can be reclaimed.
    pub fn reset(&self, initial: ImageState) -> Vec<ImageState> {
        let mut discarded = Vec::new();
        self.tx.send_modify(|snapshot| {
            discarded = snapshot.entries.to_vec();
            *snapshot = snapshot.with_entries(vec![initial]);
        });
        tracing::debug!(discarded = discarded.len(), "History reset");
        discarded
    }

    /// Append `state` on top of `expected_head`.
    ///
    /// Fails with [`EditorError::StaleJob`] without touching the history when the
    /// current head is not `expected_head` anymore.
    pub fn push(&self, expected_head: StateId, state: ImageState) -> EditorResult<()> {
        let mut result = Err(EditorError::StaleJob);
        self.tx.send_if_modified(|snapshot| {
            match snapshot.head() {
                Some(head) if head.id() == expected_head => {}
                _ => return false,
            }
            let mut entries = snapshot.entries.to_vec();
            entries.push(state.clone());
            *snapshot = snapshot.with_entries(entries);
            result = Ok(());
            true
        });

        match &result {
            Ok(()) => tracing::debug!(state = %state.id(), "History entry pushed"),
            Err(_) => tracing::debug!(
                expected = %expected_head,
                "Push rejected: head moved on"
            ),
        }
        result
    }

    /// Remove and return the head, keeping the original selection.
    pub fn pop(&self) -> EditorResult<ImageState> {
        let mut result = Err(EditorError::NothingToUndo);
        self.tx.send_if_modified(|snapshot| {
            if !snapshot.can_undo() {
                return false;
            }
            let mut entries = snapshot.entries.to_vec();
            if let Some(popped) = entries.pop() {
                result = Ok(popped);
            }
            *snapshot = snapshot.with_entries(entries);
            true
        });

        if let Ok(popped) = &result {
            tracing::debug!(state = %popped.id(), "Undo");
        }
        result
    }

    /// The current image without mutating anything.
    pub fn peek_head(&self) -> EditorResult<ImageState> {
        self.tx.borrow().head().cloned().ok_or(EditorError::EmptyHistory)
    }

    pub fn len(&self) -> usize {
        self.tx.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.borrow().is_empty()
    }

    pub fn can_undo(&self) -> bool {
        self.tx.borrow().can_undo()
    }
}
