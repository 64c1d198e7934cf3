//! Saving the current image somewhere durable.
//!
//! The exporter only reads an [`ImageState`]; it never touches history or jobs.
//! Where the bytes end up is the [`Destination`]'s business: the bundled
//! [`DirectoryDestination`] writes into a pictures folder, first under a hidden
//! pending name and then renamed so a half-written file is never visible.

use chrono::Utc;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{EditorError, EditorResult};
use crate::state::data::ImageState;

const COPY_BUFFER: usize = 64 * 1024;

/// Keeps pending names unique across concurrent exports of the same name.
static PENDING_SEQ: AtomicU64 = AtomicU64::new(0);

/// Where an exported image ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    File(PathBuf),
    Uri(String),
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Uri(uri) => f.write_str(uri),
        }
    }
}

/// An item being written into a destination.
pub trait PendingItem: Write + Send {
    /// Make the item visible and return where it lives.
    ///
    /// On failure the partial item is gone as if [`PendingItem::abort`] ran.
    fn commit(self: Box<Self>) -> io::Result<Location>;

    /// Throw the partial item away.
    fn abort(self: Box<Self>);
}

/// A durable, user-visible place for exported images (gallery, folder, ...).
pub trait Destination: Send + Sync {
    /// Start a new item called `display_name` holding content of type `mime`.
    fn create(&self, display_name: &str, mime: &str) -> io::Result<Box<dyn PendingItem>>;
}

/// Exports into a plain directory.
#[derive(Debug, Clone)]
pub struct DirectoryDestination {
    root: PathBuf,
}

impl DirectoryDestination {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Destination for DirectoryDestination {
    fn create(&self, display_name: &str, mime: &str) -> io::Result<Box<dyn PendingItem>> {
        let file_name = Path::new(display_name)
            .file_name()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("invalid file name '{display_name}'"),
                )
            })?
            .to_owned();

        fs::create_dir_all(&self.root)?;
        let pending_path = self.root.join(format!(
            ".pending-{}-{}-{}",
            std::process::id(),
            PENDING_SEQ.fetch_add(1, Ordering::Relaxed),
            file_name.to_string_lossy()
        ));
        let file = File::options()
            .write(true)
            .create_new(true)
            .open(&pending_path)?;

        tracing::debug!(path = %pending_path.display(), mime, "Export item created");
        Ok(Box::new(PendingFile {
            writer: BufWriter::new(file),
            pending_path,
            final_path: self.root.join(file_name),
        }))
    }
}

struct PendingFile {
    writer: BufWriter<File>,
    pending_path: PathBuf,
    final_path: PathBuf,
}

impl Write for PendingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl PendingItem for PendingFile {
    fn commit(self: Box<Self>) -> io::Result<Location> {
        let PendingFile {
            writer,
            pending_path,
            final_path,
        } = *self;

        let published = writer
            .into_inner()
            .map_err(|e| e.into_error())
            .and_then(|file| file.sync_all())
            .and_then(|()| {
                let target = non_clobbering(&final_path);
                fs::rename(&pending_path, &target)?;
                Ok(target)
            });

        match published {
            Ok(target) => Ok(Location::File(target)),
            Err(err) => {
                discard(&pending_path);
                Err(err)
            }
        }
    }

    fn abort(self: Box<Self>) {
        drop(self.writer);
        discard(&self.pending_path);
    }
}

fn discard(pending_path: &Path) {
    match fs::remove_file(pending_path) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            tracing::warn!(path = %pending_path.display(), error = %err, "Failed to remove partial export")
        }
    }
}

/// `name.jpg`, or `name (1).jpg`, `name (2).jpg`, ... if taken.
fn non_clobbering(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());
    let parent = path.parent().unwrap_or_else(|| Path::new(""));

    (1..)
        .map(|n| match &ext {
            Some(ext) => parent.join(format!("{stem} ({n}).{ext}")),
            None => parent.join(format!("{stem} ({n})")),
        })
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| path.to_path_buf())
}

/// Copies image states into a destination.
#[derive(Clone)]
pub struct Exporter {
    destination: Arc<dyn Destination>,
}

impl fmt::Debug for Exporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exporter").finish_non_exhaustive()
    }
}

impl Exporter {
    pub fn new(destination: Arc<dyn Destination>) -> Self {
        Self { destination }
    }

    /// Default display name: `Edited_<timestamp>.<ext>`
    pub fn default_name(state: &ImageState) -> String {
        let ext = state.extension().unwrap_or_else(|| "jpg".to_string());
        format!("Edited_{}.{ext}", Utc::now().format("%Y%m%d_%H%M%S_%3f"))
    }

    /// Copy the bytes of `state` into a new item called `destination_name`.
    pub fn export(&self, state: &ImageState, destination_name: &str) -> EditorResult<Location> {
        let mut reader = state
            .open()
            .map_err(|e| EditorError::ReadFailed(e.to_string()))?;

        let mime = mime_for(state);
        let mut item = self
            .destination
            .create(destination_name, mime)
            .map_err(|e| EditorError::DestinationCreateFailed(e.to_string()))?;

        if let Err(err) = copy_into(&mut reader, &mut item) {
            item.abort();
            return Err(err);
        }

        let location = item
            .commit()
            .map_err(|e| EditorError::WriteFailed(e.to_string()))?;
        tracing::info!(state = %state.id(), %location, "Image exported");
        Ok(location)
    }

    /// [`Exporter::export`] on the blocking pool.
    pub async fn export_async(
        &self,
        state: ImageState,
        destination_name: String,
    ) -> EditorResult<Location> {
        let exporter = self.clone();
        tokio::task::spawn_blocking(move || exporter.export(&state, &destination_name))
            .await
            .map_err(|e| EditorError::WriteFailed(format!("export task failed: {e}")))?
    }
}

/// Copy keeping read and write failures apart.
fn copy_into(reader: &mut dyn Read, writer: &mut dyn Write) -> EditorResult<u64> {
    let mut buf = vec![0u8; COPY_BUFFER];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(EditorError::ReadFailed(e.to_string())),
        };
        writer
            .write_all(&buf[..n])
            .map_err(|e| EditorError::WriteFailed(e.to_string()))?;
        total += n as u64;
    }
    writer
        .flush()
        .map_err(|e| EditorError::WriteFailed(e.to_string()))?;
    Ok(total)
}

fn mime_for(state: &ImageState) -> &'static str {
    state
        .extension()
        .and_then(|ext| image::ImageFormat::from_extension(ext))
        .map(|format| format.to_mime_type())
        .unwrap_or("application/octet-stream")
}
