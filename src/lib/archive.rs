//! Archives copied out of a running instance
//!
//! The archive is produced inside the container by `tar -czvf` into a
//! per-instance scratch directory and reopened here as a sequential entry
//! stream. The caller owns the archive file once `copy_archive` returns:
//! nothing here deletes it unless [`ContainerArchive::remove`] is called.

use std::env;
use std::fs;
use std::io::{Cursor, Read};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::{Archive, EntryType};

use crate::command::{clean_path, split_archive_source};
use crate::error::{Error, Result};
use crate::instance::validate_name;

/// Suffix of every archive file
pub const ARCHIVE_SUFFIX: &str = "-archive.tar.gz";

/// Prefix used when the archived path sits directly under `/`
pub const ROOT_PREFIX: &str = "root";

/// Decompressed archive stream
pub type ArchiveReader = Cursor<Vec<u8>>;

/// Scratch directory for an instance, reused across calls.
///
/// Always a direct child of `root`; names that would resolve elsewhere are
/// refused with [`Error::InvalidInstanceName`].
pub fn scratch_dir(root: &Path, instance: &str) -> Result<PathBuf> {
    validate_name(instance)?;
    Ok(root.join(instance))
}

/// `<parent-basename>-archive.tar.gz` for a source path.
///
/// A relative parent is taken from the working directory, which the runtime
/// shares with the container; `root` is used only for the filesystem root.
pub fn archive_file_name(source: &Path) -> String {
    let (parent, _) = split_archive_source(source);
    let parent = if parent.is_absolute() {
        parent
    } else {
        match env::current_dir() {
            Ok(cwd) => clean_path(&cwd.join(&parent)),
            Err(e) => {
                tracing::debug!(error = %e, "working directory unavailable");
                parent
            }
        }
    };
    let prefix = parent
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| ROOT_PREFIX.to_string());
    format!("{}{}", prefix, ARCHIVE_SUFFIX)
}

/// Kind of an archive entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
    Symlink,
    HardLink,
    Other,
}

impl From<EntryType> for EntryKind {
    fn from(entry_type: EntryType) -> Self {
        match entry_type {
            EntryType::Directory => EntryKind::Directory,
            EntryType::Regular | EntryType::Continuous => EntryKind::File,
            EntryType::Symlink => EntryKind::Symlink,
            EntryType::Link => EntryKind::HardLink,
            _ => EntryKind::Other,
        }
    }
}

/// Path and kind of one entry, with the path lexically cleaned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub path: PathBuf,
    pub kind: EntryKind,
    pub size: u64,
}

/// An archive produced inside an instance, ready to be walked
pub struct ContainerArchive {
    path: PathBuf,
    scratch_dir: PathBuf,
    archive: Archive<ArchiveReader>,
}

impl ContainerArchive {
    /// Reopen and decompress a produced archive
    pub fn open(path: impl Into<PathBuf>, scratch_dir: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let read_error = |reason: String| Error::ArchiveRead {
            path: path.clone(),
            reason,
        };

        let compressed = fs::read(&path).map_err(|e| read_error(e.to_string()))?;
        if compressed.len() < 2 || compressed[0] != 0x1f || compressed[1] != 0x8b {
            return Err(read_error("not a gzip stream".to_string()));
        }

        let mut data = Vec::new();
        GzDecoder::new(&compressed[..])
            .read_to_end(&mut data)
            .map_err(|e| read_error(format!("decompression failed: {}", e)))?;

        Ok(Self {
            path,
            scratch_dir: scratch_dir.into(),
            archive: Archive::new(Cursor::new(data)),
        })
    }

    /// Location of the `.tar.gz` file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding the archive
    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Walk the archive from its first entry
    pub fn entries(&mut self) -> Result<ArchiveEntries<'_>> {
        self.rewind();
        let path = &self.path;
        let inner = self.archive.entries().map_err(|e| Error::ArchiveRead {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        Ok(ArchiveEntries { inner, path })
    }

    /// Cleaned paths and kinds of every entry
    pub fn summaries(&mut self) -> Result<Vec<ArchiveEntry>> {
        let archive_path = self.path.clone();
        let mut summaries = Vec::new();

        for entry in self.entries()? {
            let entry = entry?;
            let raw = entry.path().map_err(|e| Error::ArchiveRead {
                path: archive_path.clone(),
                reason: e.to_string(),
            })?;
            summaries.push(ArchiveEntry {
                path: clean_entry_path(&raw),
                kind: entry.header().entry_type().into(),
                size: entry.size(),
            });
        }

        Ok(summaries)
    }

    /// Delete the scratch directory and the archive inside it
    pub fn remove(self) -> Result<()> {
        fs::remove_dir_all(&self.scratch_dir)?;
        Ok(())
    }

    fn rewind(&mut self) {
        let empty = Archive::new(Cursor::new(Vec::new()));
        let archive = std::mem::replace(&mut self.archive, empty);
        let mut reader = archive.into_inner();
        reader.set_position(0);
        self.archive = Archive::new(reader);
    }
}

impl std::fmt::Debug for ContainerArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerArchive")
            .field("path", &self.path)
            .field("scratch_dir", &self.scratch_dir)
            .finish_non_exhaustive()
    }
}

/// Sequential entry stream over a [`ContainerArchive`]
pub struct ArchiveEntries<'a> {
    inner: tar::Entries<'a, ArchiveReader>,
    path: &'a Path,
}

impl<'a> Iterator for ArchiveEntries<'a> {
    type Item = Result<tar::Entry<'a, ArchiveReader>>;

    fn next(&mut self) -> Option<Self::Item> {
        let path = self.path;
        self.inner.next().map(|entry| {
            entry.map_err(|e| Error::ArchiveRead {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        })
    }
}

/// Drop `.` components, leading separators and trailing slashes
fn clean_entry_path(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| matches!(c, Component::Normal(_) | Component::ParentDir))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_tar_gz(path: &Path, entries: &[(&str, &[u8])]) {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_path(name).unwrap();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append(&header, *content).unwrap();
        }
        let tar_data = builder.into_inner().unwrap();
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
        encoder.write_all(&tar_data).unwrap();
        fs::write(path, encoder.finish().unwrap()).unwrap();
    }

    #[test]
    fn test_archive_file_name() {
        assert_eq!(archive_file_name(Path::new("/usr/games/")), "usr-archive.tar.gz");
        assert_eq!(
            archive_file_name(Path::new("/usr/games/cowsay")),
            "games-archive.tar.gz"
        );
        assert_eq!(archive_file_name(Path::new("/etc")), "root-archive.tar.gz");
        assert_eq!(archive_file_name(Path::new("/")), "root-archive.tar.gz");
        assert_eq!(archive_file_name(Path::new("/usr/games/..")), "root-archive.tar.gz");
    }

    #[test]
    fn test_archive_file_name_relative_source() {
        let cwd = env::current_dir().unwrap();
        let expected = match cwd.file_name() {
            Some(name) => format!("{}-archive.tar.gz", name.to_string_lossy()),
            None => "root-archive.tar.gz".to_string(),
        };
        assert_eq!(archive_file_name(Path::new("data")), expected);
        assert_eq!(archive_file_name(Path::new("./data/")), expected);
        assert_eq!(
            archive_file_name(Path::new("nested/data")),
            "nested-archive.tar.gz"
        );
    }

    #[test]
    fn test_scratch_dir_is_deterministic() {
        let root = Path::new("/tmp");
        assert_eq!(
            scratch_dir(root, "lolcow3").unwrap(),
            scratch_dir(root, "lolcow3").unwrap()
        );
        assert_eq!(
            scratch_dir(root, "lolcow3").unwrap(),
            PathBuf::from("/tmp/lolcow3")
        );
    }

    #[test]
    fn test_scratch_dir_stays_under_root() {
        let root = Path::new("/tmp/scratch");
        for name in ["..", ".", "a/b", "/etc"] {
            assert!(
                matches!(scratch_dir(root, name), Err(Error::InvalidInstanceName(_))),
                "{}",
                name
            );
        }
    }

    #[test]
    fn test_open_and_walk_twice() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x-archive.tar.gz");
        write_tar_gz(&path, &[("./games/a.txt", b"a"), ("games/b.txt", b"bb")]);

        let mut archive = ContainerArchive::open(&path, dir.path()).unwrap();
        let first = archive.summaries().unwrap();
        let second = archive.summaries().unwrap();

        assert_eq!(first, second);
        assert_eq!(first[0].path, PathBuf::from("games/a.txt"));
        assert_eq!(first[1].size, 2);
        assert_eq!(first[1].kind, EntryKind::File);
    }

    #[test]
    fn test_garbage_is_read_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad-archive.tar.gz");
        fs::write(&path, b"definitely not gzip").unwrap();

        let err = ContainerArchive::open(&path, dir.path()).unwrap_err();
        assert!(matches!(err, Error::ArchiveRead { .. }));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let dir = TempDir::new().unwrap();
        let err = ContainerArchive::open(dir.path().join("nope.tar.gz"), dir.path()).unwrap_err();
        assert!(matches!(err, Error::ArchiveRead { .. }));
    }

    #[test]
    fn test_remove_deletes_scratch_dir() {
        let root = TempDir::new().unwrap();
        let scratch = scratch_dir(root.path(), "inst").unwrap();
        fs::create_dir_all(&scratch).unwrap();
        let path = scratch.join("root-archive.tar.gz");
        write_tar_gz(&path, &[("a.txt", b"a")]);

        let archive = ContainerArchive::open(&path, &scratch).unwrap();
        archive.remove().unwrap();
        assert!(!scratch.exists());
    }
}
