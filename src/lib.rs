//! Non-destructive image editing core.
//!
//! An [`Editor`] keeps a stack of image states. Transforms run one at a time
//! on a background task against the current head; a result only lands if
//! the head has not moved in the meantime.

pub mod config;
pub mod editor;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod state;
pub mod storage;

pub use config::EditorConfig;
pub use editor::{CommandOutcome, Editor};
pub use engine::{EngineAdapter, EngineFailure, ImageOpsEngine, TransformEngine};
pub use error::{EditorError, EditorResult};
pub use state::data::{BytesSource, FileSource, ImageSource, ImageState, Transform, TransformCatalog};
