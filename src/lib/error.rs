//! Error types for the Singularity client
//!
//! A non-zero exit of the command run inside a container is *not* an error
//! of the executor: `execute` hands it back as a regular exit code. Only the
//! lifecycle calls (start, stop, pull) turn a failing runtime into
//! [`Error::NonZeroExit`].

use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving the container runtime.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested runtime verb is not one the builder knows about.
    #[error("unknown runtime verb: {0}")]
    InvalidVerb(String),

    /// The program could not be found or spawned.
    #[error("failed to launch '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The program was spawned but could not be waited on to completion.
    #[error("failed to wait on '{program}': {reason}")]
    Wait { program: String, reason: String },

    /// The program outlived the configured timeout and was killed.
    #[error("'{program}' timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    /// The external tool ran and reported failure.
    #[error("'{command}' exited with code {code}: {stderr}")]
    NonZeroExit {
        command: String,
        code: i32,
        stderr: String,
    },

    /// No instance with this name is loaded in the client.
    #[error("{0} is not a loaded instance")]
    UnknownInstance(String),

    /// The name cannot be used as a single path component.
    #[error("invalid instance name '{0}': must be a single path component")]
    InvalidInstanceName(String),

    /// An instance with this name is already loaded in the client.
    #[error("instance {0} is already loaded")]
    DuplicateName(String),

    /// Pull was given a reference outside the accepted schemes.
    #[error("unsupported image reference '{0}': pull only accepts shub:// and docker://")]
    UnsupportedScheme(String),

    /// The archive could not be produced inside the container.
    #[error("failed to create archive of '{source_path}': {reason}")]
    ArchiveCreation { source_path: String, reason: String },

    /// The produced archive could not be reopened or decompressed.
    #[error("failed to read archive {path}: {reason}")]
    ArchiveRead { path: PathBuf, reason: String },

    /// Pull reported success but the image is not where it should be.
    #[error("pull of '{image}' finished but {path} does not exist")]
    PullResultMissing { image: String, path: PathBuf },

    /// Local filesystem failure outside the archive subsystem.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// True when the process could not be run to completion at all
    /// (as opposed to running and reporting failure).
    pub fn is_launch_failure(&self) -> bool {
        matches!(
            self,
            Error::Launch { .. } | Error::Wait { .. } | Error::Timeout { .. }
        )
    }

    /// Exit code reported by the external tool, if this is a `NonZeroExit`.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Error::NonZeroExit { code, .. } => Some(*code),
            _ => None,
        }
    }
}
