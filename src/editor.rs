//! User-facing command surface.
//!
//! Each command returns a [`CommandOutcome`]: the result plus at most one
//! message meant for the user. Errors never escape as panics; absorbed
//! conditions (a stale job) produce no message at all.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

use crate::config::EditorConfig;
use crate::engine::{EngineAdapter, TransformEngine};
use crate::error::{EditorError, EditorResult};
use crate::orchestrator::JobOrchestrator;
use crate::state::data::{ImageSource, ImageState, TransformCatalog};
use crate::state::history::{HistorySnapshot, HistoryStack};
use crate::state::job::JobHandle;
use crate::storage::export::{Destination, DirectoryDestination, Exporter, Location};
use crate::storage::temp::TempFileStore;

/// Result of one user command
#[derive(Debug)]
pub struct CommandOutcome<T> {
    pub result: EditorResult<T>,
    pub message: Option<String>,
}

impl<T> CommandOutcome<T> {
    fn success(value: T, message: Option<String>) -> Self {
        Self {
            result: Ok(value),
            message,
        }
    }

    fn failure(err: EditorError) -> Self {
        let message = if err.is_user_visible() {
            Some(err.user_message())
        } else {
            tracing::warn!(error = %err, "Absorbed error");
            None
        };
        Self {
            result: Err(err),
            message,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// The editing session: one history, one job slot, one export destination.
#[derive(Debug)]
pub struct Editor {
    catalog: TransformCatalog,
    history: Arc<HistoryStack>,
    store: Arc<TempFileStore>,
    orchestrator: JobOrchestrator,
    exporter: Exporter,
}

impl Editor {
    pub fn new(
        catalog: TransformCatalog,
        store: Arc<TempFileStore>,
        engine: EngineAdapter,
        destination: Arc<dyn Destination>,
    ) -> Self {
        let history = Arc::new(HistoryStack::new());
        let orchestrator = JobOrchestrator::new(Arc::clone(&history), Arc::clone(&store), engine);
        Self {
            catalog,
            history,
            store,
            orchestrator,
            exporter: Exporter::new(destination),
        }
    }

    /// Build an editor from configuration, exporting into a directory.
    pub fn from_config(config: &EditorConfig, engine: Arc<dyn TransformEngine>) -> EditorResult<Self> {
        let cache_dir = config.resolve_cache_dir()?;
        let store = TempFileStore::open(&cache_dir, &config.staging_extension)
            .map_err(|e| EditorError::io("opening scratch directory", &e))?;
        let export_dir = config.resolve_export_dir()?;
        tracing::info!(
            scratch = %cache_dir.display(),
            exports = %export_dir.display(),
            "Editor ready"
        );

        Ok(Self::new(
            config.catalog()?,
            Arc::new(store),
            EngineAdapter::new(engine, config.engine_timeout()),
            Arc::new(DirectoryDestination::new(export_dir)),
        ))
    }

    pub fn catalog(&self) -> &TransformCatalog {
        &self.catalog
    }

    /// The history as it is right now.
    pub fn history(&self) -> HistorySnapshot {
        self.history.snapshot()
    }

    /// Observe every history change.
    pub fn subscribe(&self) -> watch::Receiver<HistorySnapshot> {
        self.history.subscribe()
    }

    pub fn is_busy(&self) -> bool {
        self.orchestrator.is_busy()
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    /// Start over from a new image.
    ///
    /// Allowed while a job runs; that job's result will be dropped as stale.
    /// Must be called within a Tokio runtime.
    pub fn select_image(&self, source: Arc<dyn ImageSource>) -> CommandOutcome<ImageState> {
        tracing::info!(source = %source.describe(), "Image selected");
        let state = ImageState::original(source);
        let discarded = self.history.reset(state.clone());
        self.release(&discarded);
        CommandOutcome::success(state, None)
    }

    /// Queue `name` against the current image and return right away.
    pub fn apply_transform(&self, name: &str) -> CommandOutcome<JobHandle> {
        let Some(transform) = self.catalog.get(name) else {
            return CommandOutcome::failure(EditorError::UnknownTransform(name.to_string()));
        };
        match self.orchestrator.submit(transform.clone()) {
            Ok(handle) => CommandOutcome::success(handle, None),
            Err(err) => CommandOutcome::failure(err),
        }
    }

    /// Wait for a submitted job and turn its end into a user message.
    pub async fn finish(&self, handle: JobHandle) -> CommandOutcome<ImageState> {
        let label = handle.transform().label.clone();
        match handle.wait().await {
            Ok(state) => CommandOutcome::success(state, Some(format!("Applied '{label}'."))),
            Err(err) => CommandOutcome::failure(err),
        }
    }

    /// [`Editor::apply_transform`] followed by [`Editor::finish`].
    pub async fn apply_transform_and_wait(&self, name: &str) -> CommandOutcome<ImageState> {
        let submitted = self.apply_transform(name);
        match submitted.result {
            Ok(handle) => self.finish(handle).await,
            Err(err) => CommandOutcome {
                result: Err(err),
                message: submitted.message,
            },
        }
    }

    /// Drop the last transform. Returns the new current image.
    ///
    /// Must be called within a Tokio runtime.
    pub fn undo(&self) -> CommandOutcome<ImageState> {
        let popped = match self.history.pop() {
            Ok(popped) => popped,
            Err(err) => return CommandOutcome::failure(err),
        };
        self.release(std::slice::from_ref(&popped));

        match self.history.peek_head() {
            Ok(head) => CommandOutcome::success(
                head,
                Some(format!("Undid '{}'.", popped.display_name())),
            ),
            Err(err) => CommandOutcome::failure(err),
        }
    }

    /// Save the current image; `name` defaults to a timestamped one.
    pub async fn export(&self, name: Option<String>) -> CommandOutcome<Location> {
        let head = match self.history.peek_head() {
            Ok(head) => head,
            Err(err) => return CommandOutcome::failure(err),
        };
        let name = name.unwrap_or_else(|| Exporter::default_name(&head));

        match self.exporter.export_async(head, name).await {
            Ok(location) => {
                let message = format!("Image saved to {location}.");
                CommandOutcome::success(location, Some(message))
            }
            Err(err) => CommandOutcome::failure(err),
        }
    }

    /// History no longer owns these states; free their files and retry
    /// earlier failed deletes on the blocking pool.
    fn release(&self, states: &[ImageState]) {
        let paths: Vec<PathBuf> = states
            .iter()
            .filter_map(|state| state.materialized_path().map(Path::to_path_buf))
            .collect();
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || {
            for path in &paths {
                store.reclaim(path);
            }
            store.sweep();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::ScriptedEngine;
    use crate::state::data::{BytesSource, FileSource};
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Session {
        dir: TempDir,
        engine: ScriptedEngine,
        editor: Editor,
    }

    impl Session {
        fn photo(&self, name: &str, bytes: &[u8]) -> Arc<dyn ImageSource> {
            let path = self.dir.path().join(name);
            fs::write(&path, bytes).unwrap();
            Arc::new(FileSource::new(path))
        }

        fn gallery(&self) -> PathBuf {
            self.dir.path().join("gallery")
        }
    }

    fn session() -> Session {
        let dir = tempfile::tempdir().unwrap();
        let config = EditorConfig {
            cache_dir: Some(dir.path().join("scratch")),
            export_dir: Some(dir.path().join("gallery")),
            engine_timeout_secs: None,
            ..EditorConfig::default()
        };
        let engine = ScriptedEngine::new();
        let editor = Editor::from_config(&config, Arc::new(engine.clone())).unwrap();
        Session { dir, engine, editor }
    }

    /// Background cleanup has no completion signal; poll for it.
    async fn eventually(what: &str, check: impl Fn() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {what}");
    }

    fn scratch_count(editor: &Editor) -> usize {
        ["input", "output"]
            .iter()
            .map(|kind| fs::read_dir(editor.store.session_dir().join(kind)).unwrap().count())
            .sum()
    }

    fn names(editor: &Editor) -> Vec<String> {
        editor
            .history()
            .entries()
            .iter()
            .map(|s| s.display_name().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_scenario_apply_then_fail_then_undo() {
        let s = session();
        s.editor.select_image(s.photo("i0.jpg", b"I0"));

        let applied = s.editor.apply_transform_and_wait("grayscale").await;
        assert!(applied.is_ok());
        assert_eq!(applied.message.as_deref(), Some("Applied 'Black & White'."));
        assert_eq!(names(&s.editor), ["Original", "Black & White"]);

        s.engine.reject_next("cannot tone");
        let failed = s.editor.apply_transform_and_wait("sepia").await;
        assert_eq!(
            failed.result.unwrap_err(),
            EditorError::EngineRejected("cannot tone".into())
        );
        assert!(failed.message.unwrap().contains("cannot tone"));
        assert_eq!(names(&s.editor), ["Original", "Black & White"]);

        let undone = s.editor.undo();
        assert!(undone.result.unwrap().is_original());
        assert_eq!(undone.message.as_deref(), Some("Undid 'Black & White'."));

        let again = s.editor.undo();
        assert_eq!(again.result.unwrap_err(), EditorError::NothingToUndo);
        assert!(again.message.is_some());
        assert_eq!(s.editor.history().len(), 1);
    }

    #[tokio::test]
    async fn test_undo_pops_back_to_previous_transform() {
        let s = session();
        s.editor.select_image(s.photo("i0.jpg", b"I0"));
        let first = s.editor.apply_transform_and_wait("invert").await.result.unwrap();
        let second = s.editor.apply_transform_and_wait("mirror").await.result.unwrap();
        assert_eq!(s.editor.history().len(), 3);

        let head = s.editor.undo().result.unwrap();
        assert_eq!(head.id(), first.id());
        assert_eq!(s.editor.history().len(), 2);
        // The undone state's file is no longer owned by anyone.
        let undone = second.materialized_path().unwrap().to_path_buf();
        eventually("undone output removal", || !undone.exists()).await;
        assert!(first.materialized_path().unwrap().exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_new_selection_drops_running_job() {
        let s = session();
        s.editor.select_image(s.photo("i0.jpg", b"I0"));
        let gate = s.engine.gate();

        let handle = s.editor.apply_transform("grayscale").result.unwrap();
        assert!(s.editor.is_busy());
        let busy = s.editor.apply_transform("invert");
        assert_eq!(busy.result.unwrap_err(), EditorError::JobAlreadyInFlight);

        let i2 = s.editor.select_image(s.photo("i2.jpg", b"I2")).result.unwrap();
        gate.release();

        let outcome = s.editor.finish(handle).await;
        assert_eq!(outcome.result.unwrap_err(), EditorError::StaleJob);
        assert!(outcome.message.is_none());

        let history = s.editor.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history.head().unwrap().id(), i2.id());
        assert_eq!(scratch_count(&s.editor), 0);
        assert!(!s.editor.is_busy());
    }

    #[tokio::test]
    async fn test_new_selection_reclaims_old_outputs_but_not_the_original() {
        let s = session();
        let source = s.photo("i0.jpg", b"I0");
        s.editor.select_image(Arc::clone(&source));
        let produced = s.editor.apply_transform_and_wait("blur").await.result.unwrap();

        s.editor.select_image(s.photo("i1.jpg", b"I1"));
        let old = produced.materialized_path().unwrap().to_path_buf();
        eventually("old output removal", || !old.exists()).await;
        assert_eq!(scratch_count(&s.editor), 0);
        assert!(s.dir.path().join("i0.jpg").exists());
    }

    #[tokio::test]
    async fn test_new_selection_retries_deferred_deletes() {
        let s = session();
        let stuck = s.editor.store.session_dir().join("output").join("stuck.jpg");
        fs::write(&stuck, b"late engine write").unwrap();
        s.editor.store.defer(&stuck);

        s.editor.select_image(s.photo("i0.jpg", b"I0"));
        eventually("deferred delete", || s.editor.store.deferred_count() == 0).await;
        assert!(!stuck.exists());
    }

    #[tokio::test]
    async fn test_export_round_trip() {
        let s = session();
        s.editor.select_image(s.photo("i0.png", b"untouched original"));

        let exported = s.editor.export(Some("first.png".into())).await;
        assert_eq!(
            exported.result.unwrap(),
            Location::File(s.gallery().join("first.png"))
        );
        assert!(exported.message.unwrap().starts_with("Image saved to"));
        assert_eq!(
            fs::read(s.gallery().join("first.png")).unwrap(),
            b"untouched original"
        );

        let head = s.editor.apply_transform_and_wait("sharpen").await.result.unwrap();
        let Location::File(path) = s.editor.export(None).await.result.unwrap() else {
            panic!("directory export should produce a file location");
        };
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("Edited_"));
        assert_eq!(
            fs::read(&path).unwrap(),
            fs::read(head.materialized_path().unwrap()).unwrap()
        );
        assert_eq!(s.editor.history().len(), 2);
    }

    #[tokio::test]
    async fn test_commands_without_selection() {
        let s = session();
        let apply = s.editor.apply_transform("grayscale");
        assert_eq!(apply.result.unwrap_err(), EditorError::EmptyHistory);
        assert!(s.editor.undo().message.is_some());

        let export = s.editor.export(None).await;
        assert_eq!(export.result.unwrap_err(), EditorError::EmptyHistory);
        assert!(!s.gallery().exists() || fs::read_dir(s.gallery()).unwrap().count() == 0);
    }

    #[tokio::test]
    async fn test_unknown_transform_is_rejected_before_submission() {
        let s = session();
        s.editor.select_image(Arc::new(BytesSource::new("pasted.png", vec![1u8, 2, 3])));

        let outcome = s.editor.apply_transform("swirl");
        assert_eq!(
            outcome.result.unwrap_err(),
            EditorError::UnknownTransform("swirl".into())
        );
        assert!(s.engine.calls().is_empty());
        assert!(!s.editor.is_busy());
    }

    #[tokio::test]
    async fn test_history_length_tracks_successes() {
        let s = session();
        s.editor.select_image(s.photo("i0.jpg", b"I0"));
        assert!(!s.editor.can_undo());

        for name in ["invert", "mirror", "rotate90"] {
            s.editor.apply_transform_and_wait(name).await.result.unwrap();
        }
        assert_eq!(s.editor.history().len(), 4);
        assert!(s.editor.can_undo());
    }

    #[tokio::test]
    async fn test_subscribers_get_snapshots() {
        let s = session();
        let mut rx = s.editor.subscribe();
        s.editor.select_image(s.photo("i0.jpg", b"I0"));
        rx.changed().await.unwrap();
        let held = rx.borrow_and_update().clone();

        s.editor.apply_transform_and_wait("invert").await.result.unwrap();
        assert_eq!(held.len(), 1);
        assert_eq!(rx.borrow().len(), 2);
    }

    #[test]
    fn test_failure_messages() {
        let stale: CommandOutcome<()> = CommandOutcome::failure(EditorError::StaleJob);
        assert!(stale.message.is_none());

        let busy: CommandOutcome<()> = CommandOutcome::failure(EditorError::JobAlreadyInFlight);
        assert!(busy.message.is_some());
        assert!(!busy.is_ok());
    }
}
