//! Command builder for the container runtime and the archive tool
//!
//! Everything here is pure: argument vectors are rendered, never run.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use crate::error::{Error, Result};

/// Default runtime binary
pub const DEFAULT_BINARY: &str = "singularity";

/// Archive tool invoked inside the container
pub const ARCHIVE_TOOL: &str = "tar";

/// Runtime subcommands the client knows how to drive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    InstanceStart,
    InstanceStop,
    InstanceList,
    Exec,
    Pull,
    Version,
}

impl Verb {
    /// Words the verb expands to on the command line
    pub fn words(&self) -> &'static [&'static str] {
        match self {
            Verb::InstanceStart => &["instance", "start"],
            Verb::InstanceStop => &["instance", "stop"],
            Verb::InstanceList => &["instance", "list"],
            Verb::Exec => &["exec"],
            Verb::Pull => &["pull"],
            Verb::Version => &["--version"],
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.words().join(" "))
    }
}

impl FromStr for Verb {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ");
        match normalized.as_str() {
            "instance start" => Ok(Verb::InstanceStart),
            "instance stop" => Ok(Verb::InstanceStop),
            "instance list" => Ok(Verb::InstanceList),
            "exec" => Ok(Verb::Exec),
            "pull" => Ok(Verb::Pull),
            "--version" | "version" => Ok(Verb::Version),
            _ => Err(Error::InvalidVerb(s.to_string())),
        }
    }
}

/// Build `<binary> <verb words...> <args...>`
pub fn build_command<I, S>(binary: &str, verb: Verb, args: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut argv = vec![binary.to_string()];
    argv.extend(verb.words().iter().map(|w| w.to_string()));
    argv.extend(args.into_iter().map(|a| a.as_ref().to_string()));
    argv
}

/// Render an argument vector the way it is logged
pub fn render_command(argv: &[String]) -> String {
    argv.join(" ")
}

/// Lexically clean a path: drops `.` components and trailing separators,
/// and folds `..` into the component before it. `..` never climbs above
/// the root; leading `..` of a relative path is kept.
pub(crate) fn clean_path(path: &Path) -> PathBuf {
    let mut parts: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            _ => parts.push(component),
        }
    }
    parts.iter().collect()
}

/// Split an archive source into the directory tar changes into and the
/// entry name it archives.
///
/// `/usr/games/` becomes (`/usr`, `games`). The filesystem root archives `.`
/// from `/`, and a bare relative name archives from `.`.
pub fn split_archive_source(source: &Path) -> (PathBuf, String) {
    let cleaned = clean_path(source);
    let base = match cleaned.file_name() {
        Some(name) => name.to_string_lossy().to_string(),
        None if cleaned.as_os_str().is_empty() => ".".to_string(),
        None if cleaned.parent().is_none() => ".".to_string(),
        None => cleaned
            .components()
            .next_back()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .unwrap_or_else(|| ".".to_string()),
    };
    let parent = match cleaned.parent() {
        Some(p) if p.as_os_str().is_empty() => PathBuf::from("."),
        Some(p) => p.to_path_buf(),
        None if cleaned.has_root() => cleaned.clone(),
        None => PathBuf::from("."),
    };
    (parent, base)
}

/// Build `tar -C <parent> -czvf <destination> <basename>` for a source path.
///
/// Entries in the resulting archive are relative to the source's parent,
/// never absolute host paths.
pub fn archive_command(source: &Path, destination: &Path) -> Vec<String> {
    let (parent, base) = split_archive_source(source);
    vec![
        ARCHIVE_TOOL.to_string(),
        "-C".to_string(),
        parent.to_string_lossy().to_string(),
        "-czvf".to_string(),
        destination.to_string_lossy().to_string(),
        base,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_instance_start() {
        let argv = build_command(
            DEFAULT_BINARY,
            Verb::InstanceStart,
            ["lolcow_latest.sif", "lolcow3"],
        );
        assert_eq!(
            argv,
            vec!["singularity", "instance", "start", "lolcow_latest.sif", "lolcow3"]
        );
    }

    #[test]
    fn test_build_without_args() {
        let argv = build_command("singularity", Verb::InstanceList, Vec::<String>::new());
        assert_eq!(render_command(&argv), "singularity instance list");
    }

    #[test]
    fn test_verb_from_str() {
        assert_eq!("instance stop".parse::<Verb>().unwrap(), Verb::InstanceStop);
        assert_eq!("  instance   list ".parse::<Verb>().unwrap(), Verb::InstanceList);
        assert_eq!("exec".parse::<Verb>().unwrap(), Verb::Exec);
        assert!(matches!(
            "instance destroy".parse::<Verb>(),
            Err(Error::InvalidVerb(_))
        ));
    }

    #[test]
    fn test_archive_command_directory() {
        let argv = archive_command(
            Path::new("/usr/games/"),
            Path::new("/tmp/lolcow3/usr-archive.tar.gz"),
        );
        assert_eq!(
            argv,
            vec![
                "tar",
                "-C",
                "/usr",
                "-czvf",
                "/tmp/lolcow3/usr-archive.tar.gz",
                "games"
            ]
        );
    }

    #[test]
    fn test_archive_command_file() {
        let argv = archive_command(Path::new("/usr/games/cowsay"), Path::new("/tmp/x.tar.gz"));
        assert_eq!(argv[2], "/usr/games");
        assert_eq!(argv[5], "cowsay");
    }

    #[test]
    fn test_split_root_and_relative() {
        assert_eq!(
            split_archive_source(Path::new("/")),
            (PathBuf::from("/"), ".".to_string())
        );
        assert_eq!(
            split_archive_source(Path::new("/etc")),
            (PathBuf::from("/"), "etc".to_string())
        );
        assert_eq!(
            split_archive_source(Path::new("data")),
            (PathBuf::from("."), "data".to_string())
        );
        assert_eq!(
            split_archive_source(Path::new("/usr/games/..")),
            (PathBuf::from("/"), "usr".to_string())
        );
        assert_eq!(
            split_archive_source(Path::new("/usr/./games/../lib/")),
            (PathBuf::from("/usr"), "lib".to_string())
        );
        assert_eq!(
            split_archive_source(Path::new("/..")),
            (PathBuf::from("/"), ".".to_string())
        );
    }

    #[test]
    fn test_clean_path() {
        assert_eq!(clean_path(Path::new("/a/b/../c/./")), PathBuf::from("/a/c"));
        assert_eq!(clean_path(Path::new("../a/..")), PathBuf::from(".."));
        assert_eq!(clean_path(Path::new("a/..")), PathBuf::new());
    }
}
