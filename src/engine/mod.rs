//! Transform engine boundary.
//!
//! The core only knows engines through [`TransformEngine::apply`]: a name, an
//! input file and an output file. [`EngineAdapter`] runs that call on the
//! blocking pool, optionally bounded by a timeout, and maps whatever went wrong
//! into [`EditorError`].

pub mod image_ops;
#[cfg(test)]
pub(crate) mod testing;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::error::EditorError;

pub use image_ops::ImageOpsEngine;

/// Ways an engine call can fail.
#[derive(Error, Debug)]
pub enum EngineFailure {
    /// The engine is missing, crashed or did not answer in time.
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    /// The engine refused the input or the transform.
    #[error("{0}")]
    Rejected(String),

    /// Reading the input or writing the output failed.
    #[error("engine I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<EngineFailure> for EditorError {
    fn from(failure: EngineFailure) -> Self {
        match failure {
            EngineFailure::Unavailable(detail) => Self::EngineUnavailable(detail),
            EngineFailure::Rejected(reason) => Self::EngineRejected(reason),
            EngineFailure::Io(err) => Self::IoFailure(err.to_string()),
        }
    }
}

/// Something that can run a named transform from one file into another.
///
/// Implementations are called from a worker thread and may take seconds. They
/// must not touch anything but `output` (they may scribble over `input`, which
/// is always a private copy).
pub trait TransformEngine: Send + Sync + 'static {
    fn apply(&self, transform: &str, input: &Path, output: &Path) -> Result<(), EngineFailure>;
}

/// Runs engine calls off the caller's task.
#[derive(Clone)]
pub struct EngineAdapter {
    engine: Arc<dyn TransformEngine>,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for EngineAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineAdapter")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl EngineAdapter {
    pub fn new(engine: Arc<dyn TransformEngine>, timeout: Option<Duration>) -> Self {
        Self { engine, timeout }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Apply `transform` on the blocking pool.
    ///
    /// A call that outlives the timeout is reported as unavailable. The engine
    /// thread itself cannot be stopped and may still write `output` later.
    pub async fn run(
        &self,
        transform: &str,
        input: PathBuf,
        output: PathBuf,
    ) -> Result<(), EditorError> {
        let engine = Arc::clone(&self.engine);
        let name = transform.to_string();
        let call = tokio::task::spawn_blocking(move || engine.apply(&name, &input, &output));

        let joined = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(joined) => joined,
                Err(_) => {
                    return Err(EditorError::EngineUnavailable(format!(
                        "no answer after {}s",
                        limit.as_secs_f32()
                    )))
                }
            },
            None => call.await,
        };

        match joined {
            Ok(result) => result.map_err(EditorError::from),
            Err(join_err) => Err(EditorError::EngineUnavailable(format!(
                "engine task failed: {join_err}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedEngine;
    use super::*;

    #[test]
    fn test_failures_map_into_taxonomy() {
        assert_eq!(
            EditorError::from(EngineFailure::Unavailable("gone".into())),
            EditorError::EngineUnavailable("gone".into())
        );
        assert_eq!(
            EditorError::from(EngineFailure::Rejected("bad input".into())),
            EditorError::EngineRejected("bad input".into())
        );
        assert!(matches!(
            EditorError::from(EngineFailure::Io(io::Error::other("disk"))),
            EditorError::IoFailure(_)
        ));
    }

    #[tokio::test]
    async fn test_success_and_rejection_pass_through() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.jpg");
        let output = dir.path().join("out.jpg");
        std::fs::write(&input, b"abc").unwrap();

        let engine = ScriptedEngine::new();
        let adapter = EngineAdapter::new(Arc::new(engine.clone()), None);
        adapter.run("copy", input.clone(), output.clone()).await.unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), b"abc");

        engine.reject_next("unsupported");
        let err = adapter.run("copy", input, output).await.unwrap_err();
        assert_eq!(err, EditorError::EngineRejected("unsupported".into()));
    }

    #[tokio::test]
    async fn test_panicking_engine_is_unavailable() {
        struct Panics;
        impl TransformEngine for Panics {
            fn apply(&self, _: &str, _: &Path, _: &Path) -> Result<(), EngineFailure> {
                panic!("engine crashed");
            }
        }

        let adapter = EngineAdapter::new(Arc::new(Panics), None);
        let err = adapter
            .run("x", PathBuf::from("a"), PathBuf::from("b"))
            .await
            .unwrap_err();
        assert!(matches!(err, EditorError::EngineUnavailable(_)));
    }

    #[tokio::test]
    async fn test_hung_engine_times_out() {
        let engine = ScriptedEngine::new();
        let gate = engine.gate();
        let adapter = EngineAdapter::new(Arc::new(engine), Some(Duration::from_millis(50)));

        let err = adapter
            .run("copy", PathBuf::from("a"), PathBuf::from("b"))
            .await
            .unwrap_err();
        assert!(matches!(err, EditorError::EngineUnavailable(_)));
        gate.release();
    }
}
