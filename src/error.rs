//! Error taxonomy for the editing core.
//!
//! Every failure a command can hit is one of these variants. They are all
//! recovered at the orchestrator/history boundary and turned into a result
//! value plus a user-visible message; none of them abort the process.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type EditorResult<T> = Result<T, EditorError>;

/// Everything that can go wrong while editing, exporting or configuring.
///
/// The type is `Clone` because a failed job carries its error inside
/// [`JobStatus::Failed`](crate::state::job::JobStatus::Failed) and several
/// observers may read it. I/O causes are kept as rendered strings for that reason.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EditorError {
    /// No image has been selected yet.
    #[error("history is empty")]
    EmptyHistory,

    /// Only the original selection is left.
    #[error("nothing to undo")]
    NothingToUndo,

    /// Another transform job is still pending or running.
    #[error("a transform job is already in flight")]
    JobAlreadyInFlight,

    /// A job finished against a head that is no longer current.
    #[error("job result is stale")]
    StaleJob,

    /// The engine could not be reached, crashed or timed out.
    #[error("transform engine unavailable: {0}")]
    EngineUnavailable(String),

    /// The engine ran and refused the request.
    #[error("transform engine rejected the request: {0}")]
    EngineRejected(String),

    /// Staging, reclaiming, reading or writing scratch files failed.
    #[error("scratch file I/O failed: {0}")]
    IoFailure(String),

    /// The requested transform is not in the catalog.
    #[error("unknown transform '{0}'")]
    UnknownTransform(String),

    /// The export destination could not create the target item.
    #[error("could not create export destination: {0}")]
    DestinationCreateFailed(String),

    /// The image bytes could not be read for export.
    #[error("could not read image for export: {0}")]
    ReadFailed(String),

    /// The image bytes could not be written to the destination.
    #[error("could not write exported image: {0}")]
    WriteFailed(String),

    /// The configuration file is unreadable or malformed.
    #[error("configuration error: {0}")]
    Config(String),
}

impl EditorError {
    pub fn io(context: &str, err: &std::io::Error) -> Self {
        Self::IoFailure(format!("{context}: {err}"))
    }

    /// Whether this error should reach the user.
    ///
    /// A stale job is not something the user did wrong, so it is only logged.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, Self::StaleJob)
    }

    /// The single message shown to the user for a failed command.
    pub fn user_message(&self) -> String {
        match self {
            Self::EmptyHistory => "No image selected. Open an image first.".to_string(),
            Self::NothingToUndo => "Nothing to undo: this is the original image.".to_string(),
            Self::JobAlreadyInFlight => {
                "A filter is still being applied. Wait for it to finish.".to_string()
            }
            Self::StaleJob => "The image changed before the filter finished.".to_string(),
            Self::EngineUnavailable(detail) => {
                format!("The filter engine is not available ({detail}).")
            }
            Self::EngineRejected(reason) => format!("Could not apply the filter: {reason}"),
            Self::IoFailure(detail) => format!("Could not prepare the image: {detail}"),
            Self::UnknownTransform(name) => format!("There is no filter called '{name}'."),
            Self::DestinationCreateFailed(detail) => {
                format!("Could not create the file in the gallery: {detail}")
            }
            Self::ReadFailed(detail) => format!("Could not read the current image: {detail}"),
            Self::WriteFailed(detail) => format!("Error while saving: {detail}"),
            Self::Config(detail) => format!("Invalid configuration: {detail}"),
        }
    }
}
