//! Image acquisition via `singularity pull`
//!
//! Only Singularity Hub and Docker Hub references are accepted; anything
//! else is rejected before a process is started.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::command::Verb;
use crate::error::{Error, Result};
use crate::executor::Invoker;

/// Accepted image reference schemes
const PULL_SCHEME_REGEX: &str = r"^(shub|docker)://";

/// Default image extension
pub const DEFAULT_EXTENSION: &str = "sif";

/// Default tag when the reference carries none
pub const DEFAULT_TAG: &str = "latest";

/// Check that a reference uses `shub://` or `docker://`
pub fn is_pullable(image: &str) -> bool {
    static SCHEME: OnceLock<Regex> = OnceLock::new();
    SCHEME
        .get_or_init(|| Regex::new(PULL_SCHEME_REGEX).expect("pull scheme pattern is valid"))
        .is_match(image)
}

/// Derive the local file name for a pulled image, matching the runtime's
/// default naming when `ext` is the default.
///
/// `docker://godlovedc/lolcow` becomes `lolcow_latest.sif`,
/// `shub://vsoch/hello-world:v1` becomes `hello-world_v1.sif`.
pub fn image_filename(image: &str, ext: Option<&str>) -> String {
    let without_scheme = image.split_once("://").map_or(image, |(_, rest)| rest);
    let without_digest = without_scheme
        .split_once('@')
        .map_or(without_scheme, |(name, _)| name);
    let last = without_digest
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(without_digest);
    let (repo, tag) = match last.split_once(':') {
        Some((repo, tag)) if !tag.is_empty() => (repo, tag),
        Some((repo, _)) => (repo, DEFAULT_TAG),
        None => (last, DEFAULT_TAG),
    };
    let ext = ext
        .map(|e| e.trim_start_matches('.'))
        .filter(|e| !e.is_empty())
        .unwrap_or(DEFAULT_EXTENSION);
    format!("{}_{}.{}", repo, tag, ext)
}

/// Options for a single pull
#[derive(Debug, Clone, Default)]
pub struct PullOptions<'a> {
    /// Local file name; derived from the reference when `None`
    pub name: Option<&'a str>,
    /// Extension used when deriving the name
    pub ext: Option<&'a str>,
    /// Destination folder; the current directory when `None`
    pub folder: Option<&'a Path>,
    /// Run the pull behind `sudo`
    pub elevated: bool,
}

/// Pull `image` and return the path of the local image file
pub fn pull(invoker: &Invoker<'_>, image: &str, options: &PullOptions<'_>) -> Result<PathBuf> {
    if !is_pullable(image) {
        return Err(Error::UnsupportedScheme(image.to_string()));
    }

    let name = match options.name.filter(|n| !n.is_empty()) {
        Some(name) => name.to_string(),
        None => image_filename(image, options.ext),
    };
    let file_name = Path::new(&name)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| name.clone());

    let folder = options
        .folder
        .filter(|f| !f.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(folder)?;

    // The runtime's own naming ignores the requested extension
    let argv = invoker.command(Verb::Pull, ["--name", file_name.as_str(), image]);
    let run_options = invoker.options().clone().with_pwd(folder);
    invoker
        .run_argv(&argv, &run_options, options.elevated)?
        .into_checked(&argv)?;

    let final_image = folder.join(&file_name);
    if !final_image.exists() {
        return Err(Error::PullResultMissing {
            image: image.to_string(),
            path: final_image,
        });
    }

    tracing::info!(image = %image, path = %final_image.display(), "image pulled");
    Ok(final_image)
}
