//! Shared data structures for the editing state
//!
//! These structs represent the data model that flows between
//! the history, the job orchestrator and the exporter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_STATE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one history entry.
///
/// Two states built from the same file still get different ids, which is what
/// the staleness check compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(u64);

impl StateId {
    fn next() -> Self {
        Self(NEXT_STATE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Something that can hand out the bytes of an image.
pub trait ImageSource: fmt::Debug + Send + Sync {
    /// Open a fresh reader over the content.
    fn open(&self) -> io::Result<Box<dyn Read + Send>>;

    /// A human-readable reference (path or URI) used in logs and names.
    fn describe(&self) -> String;

    /// File extension hint, lowercase without the dot.
    fn extension(&self) -> Option<String> {
        None
    }
}

/// Image content backed by a file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ImageSource for FileSource {
    fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(&self.path)?))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn extension(&self) -> Option<String> {
        extension_of(&self.path)
    }
}

/// Image content held in memory (pasted images, tests).
#[derive(Clone)]
pub struct BytesSource {
    name: String,
    bytes: Arc<[u8]>,
}

impl BytesSource {
    pub fn new(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

impl fmt::Debug for BytesSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BytesSource")
            .field("name", &self.name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl ImageSource for BytesSource {
    fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(Arc::clone(&self.bytes))))
    }

    fn describe(&self) -> String {
        format!("memory:{}", self.name)
    }

    fn extension(&self) -> Option<String> {
        extension_of(Path::new(&self.name))
    }
}

pub(crate) fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .filter(|ext| !ext.is_empty())
}

/// One named operation from the catalog.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Transform {
    /// Identifier passed to the engine (e.g., "grayscale")
    pub name: String,
    /// Label shown on the button (e.g., "Black & White")
    pub label: String,
    /// Optional one-line description
    #[serde(default)]
    pub description: String,
}

impl Transform {
    pub fn new(name: &str, label: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            description: description.to_string(),
        }
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// The fixed, ordered list of transforms offered for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformCatalog {
    transforms: Vec<Transform>,
}

impl TransformCatalog {
    pub fn new(transforms: Vec<Transform>) -> Self {
        Self { transforms }
    }

    /// Look a transform up by name, ignoring case.
    pub fn get(&self, name: &str) -> Option<&Transform> {
        self.transforms
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name.trim()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transform> {
        self.transforms.iter()
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }
}

impl Default for TransformCatalog {
    /// The filters the built-in engine knows how to run
    fn default() -> Self {
        Self::new(vec![
            Transform::new("grayscale", "Black & White", "Converts the image to grayscale."),
            Transform::new("invert", "Invert", "Inverts the colors of the image."),
            Transform::new("sepia", "Sepia", "Gives the image a warm brown tone."),
            Transform::new("posterize", "Posterize", "Reduces each channel to 16 levels."),
            Transform::new("solarize", "Solarize", "Inverts every tone above mid-gray."),
            Transform::new("autocontrast", "Auto Contrast", "Stretches tones to the full range."),
            Transform::new("blur", "Blur", "Softens the image."),
            Transform::new("sharpen", "Sharpen", "Enhances fine detail."),
            Transform::new("find_edges", "Find Edges", "Keeps only the edges."),
            Transform::new("contour", "Contour", "Draws the outlines on white."),
            Transform::new("emboss", "Emboss", "Makes the image look raised."),
            Transform::new("mirror", "Mirror", "Flips the image horizontally."),
            Transform::new("rotate90", "Rotate 90°", "Rotates the image a quarter turn clockwise."),
        ])
    }
}

/// One point in the edit history
///
/// Cloning is cheap: the content handle is shared.
#[derive(Debug, Clone)]
pub struct ImageState {
    id: StateId,
    identity: Arc<dyn ImageSource>,
    materialized_path: Option<PathBuf>,
    applied_transform: Option<Transform>,
    created_at: DateTime<Utc>,
}

// Two states are the same entry only if they share an id.
impl PartialEq for ImageState {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl ImageState {
    /// The user-supplied image a history starts from.
    pub fn original(source: Arc<dyn ImageSource>) -> Self {
        Self {
            id: StateId::next(),
            identity: source,
            materialized_path: None,
            applied_transform: None,
            created_at: Utc::now(),
        }
    }

    /// A state produced by a completed job whose output lives at `path`.
    pub fn derived(path: PathBuf, transform: Transform) -> Self {
        Self {
            id: StateId::next(),
            identity: Arc::new(FileSource::new(path.clone())),
            materialized_path: Some(path),
            applied_transform: Some(transform),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> StateId {
        self.id
    }

    pub fn identity(&self) -> &Arc<dyn ImageSource> {
        &self.identity
    }

    pub fn materialized_path(&self) -> Option<&Path> {
        self.materialized_path.as_deref()
    }

    pub fn applied_transform(&self) -> Option<&Transform> {
        self.applied_transform.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// True for the image the user picked, before any filter ran
    pub fn is_original(&self) -> bool {
        self.applied_transform.is_none()
    }

    /// Open the bytes of this state, preferring the local file.
    pub fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        match &self.materialized_path {
            Some(path) => Ok(Box::new(File::open(path)?)),
            None => self.identity.open(),
        }
    }

    /// Lowercase extension of the underlying content, if known.
    pub fn extension(&self) -> Option<String> {
        match &self.materialized_path {
            Some(path) => extension_of(path),
            None => self.identity.extension(),
        }
    }

    /// Friendly name for lists: "Original" or the filter's label.
    pub fn display_name(&self) -> &str {
        match &self.applied_transform {
            None => "Original",
            Some(transform) => &transform.label,
        }
    }
}
