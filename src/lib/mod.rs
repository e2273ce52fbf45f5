//! singularity-client library
//!
//! Drives a Singularity-style container runtime through its command line:
//! starts and stops named instances, runs commands in them, copies files out
//! of them as tar archives, and pulls images from Singularity Hub or Docker Hub.

pub mod archive;
pub mod client;
pub mod command;
pub mod config;
pub mod error;
pub mod executor;
pub mod instance;
pub mod pull;
pub mod registry;

// Re-export commonly used items
pub use archive::{ArchiveEntries, ArchiveEntry, ContainerArchive, EntryKind};
pub use client::{Client, TeardownReport};
pub use command::{archive_command, build_command, render_command, Verb, DEFAULT_BINARY};
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use executor::{
    default_environment, run_command, CommandRunner, ExecOptions, ExecutionResult, Invoker,
    SystemRunner,
};
pub use instance::Instance;
pub use pull::{image_filename, is_pullable};
pub use registry::{InstanceRegistry, StopAllReport};
