//! Staging inputs into the image work directory
//!
//! Everything that ends up in the image is written into a work directory
//! first. Staging must finish before [`crate::create`] is called; the builder
//! packages whatever the directory holds at that moment.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{BuildError, Result};

/// Default file name of the configuration payload
pub const DEFAULT_PAYLOAD_NAME: &str = "config";

/// Default contents of the configuration payload
pub const DEFAULT_PAYLOAD_CONTENTS: &[u8] = b"config-data";

const DEFAULT_FILE_MODE: u32 = 0o644;

/// One staged input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagedEntry {
    /// An in-memory file written at `name` (relative to the work directory)
    File {
        name: String,
        contents: Vec<u8>,
        mode: u32,
    },
    /// A directory tree copied into the root of the work directory
    Tree { source: PathBuf },
}

/// Ordered set of inputs to package into an image
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputSet {
    entries: Vec<StagedEntry>,
}

impl InputSet {
    /// An empty set; staging it leaves the work directory empty
    pub fn new() -> Self {
        Self::default()
    }

    /// The single `config` file the image carries when nothing else is configured
    pub fn default_payload() -> Self {
        Self::new().with_file(DEFAULT_PAYLOAD_NAME, DEFAULT_PAYLOAD_CONTENTS)
    }

    /// Add an in-memory file
    pub fn with_file(mut self, name: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        self.entries.push(StagedEntry::File {
            name: name.into(),
            contents: contents.into(),
            mode: DEFAULT_FILE_MODE,
        });
        self
    }

    /// Add a directory whose contents are copied into the work directory
    pub fn with_tree(mut self, source: impl Into<PathBuf>) -> Self {
        self.entries.push(StagedEntry::Tree {
            source: source.into(),
        });
        self
    }

    /// Entries in staging order
    pub fn entries(&self) -> &[StagedEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write every entry into `work_dir`, returning the number of files written
    pub fn stage(&self, work_dir: &Path) -> Result<usize> {
        let mut written = 0;
        for entry in &self.entries {
            match entry {
                StagedEntry::File {
                    name,
                    contents,
                    mode,
                } => {
                    let target = staged_path(work_dir, name)?;
                    write_file(&target, contents, *mode).map_err(|source| {
                        BuildError::StagingFailed {
                            path: target.clone(),
                            source,
                        }
                    })?;
                    debug!(path = %target.display(), bytes = contents.len(), "Staged file");
                    written += 1;
                }
                StagedEntry::Tree { source } => {
                    written += copy_tree(source, work_dir).map_err(|e| {
                        BuildError::StagingFailed {
                            path: source.clone(),
                            source: e,
                        }
                    })?;
                }
            }
        }
        Ok(written)
    }
}

/// Resolve a staged name under the work directory, refusing anything that escapes it
fn staged_path(work_dir: &Path, name: &str) -> Result<PathBuf> {
    let relative = Path::new(name);
    let escapes = relative.as_os_str().is_empty()
        || relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
    if escapes {
        return Err(BuildError::StagingFailed {
            path: relative.to_path_buf(),
            source: io::Error::new(
                io::ErrorKind::InvalidInput,
                "staged names must be relative paths inside the work directory",
            ),
        });
    }
    Ok(work_dir.join(relative))
}

fn write_file(target: &Path, contents: &[u8], mode: u32) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(target, contents)?;
    set_mode(target, mode)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

/// Recursively copy `source` into `dest`, returning the number of files copied
fn copy_tree(source: &Path, dest: &Path) -> io::Result<usize> {
    let mut copied = 0;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let target = dest.join(entry.file_name());
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
            copied += copy_tree(&entry.path(), &target)?;
        } else if file_type.is_file() {
            // fs::copy carries the permission bits over
            fs::copy(entry.path(), &target)?;
            copied += 1;
        } else {
            warn!(path = %entry.path().display(), "Skipping non-regular file while staging");
        }
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_payload() {
        let dir = tempfile::tempdir().unwrap();
        let written = InputSet::default_payload().stage(dir.path()).unwrap();

        assert_eq!(written, 1);
        assert_eq!(fs::read(dir.path().join("config")).unwrap(), b"config-data");
    }

    #[test]
    fn test_entries_keep_order() {
        assert!(InputSet::new().is_empty());

        let set = InputSet::default_payload().with_tree("/srv/seed");
        assert!(!set.is_empty());
        assert!(matches!(
            set.entries(),
            [StagedEntry::File { name, .. }, StagedEntry::Tree { source }]
                if name == "config" && source == Path::new("/srv/seed")
        ));
    }

    #[test]
    fn test_nested_file() {
        let dir = tempfile::tempdir().unwrap();
        InputSet::new()
            .with_file("openstack/latest/meta_data.json", "{}")
            .stage(dir.path())
            .unwrap();

        assert_eq!(
            fs::read_to_string(dir.path().join("openstack/latest/meta_data.json")).unwrap(),
            "{}"
        );
    }

    #[test]
    fn test_rejects_escaping_names() {
        let dir = tempfile::tempdir().unwrap();

        for name in ["../outside", "/etc/passwd", ""] {
            let err = InputSet::new()
                .with_file(name, "x")
                .stage(dir.path())
                .unwrap_err();
            assert!(matches!(err, BuildError::StagingFailed { .. }), "{name}");
        }
    }

    #[test]
    fn test_copy_tree() {
        let source = tempfile::tempdir().unwrap();
        fs::create_dir_all(source.path().join("sub")).unwrap();
        fs::write(source.path().join("user-data"), "#cloud-config").unwrap();
        fs::write(source.path().join("sub/extra"), "more").unwrap();

        let work = tempfile::tempdir().unwrap();
        let written = InputSet::new()
            .with_tree(source.path())
            .stage(work.path())
            .unwrap();

        assert_eq!(written, 2);
        assert_eq!(
            fs::read_to_string(work.path().join("user-data")).unwrap(),
            "#cloud-config"
        );
        assert_eq!(fs::read_to_string(work.path().join("sub/extra")).unwrap(), "more");
    }

    #[test]
    fn test_missing_tree_source() {
        let work = tempfile::tempdir().unwrap();
        let err = InputSet::new()
            .with_tree(work.path().join("does-not-exist"))
            .stage(work.path())
            .unwrap_err();
        assert!(matches!(err, BuildError::StagingFailed { .. }));
    }
}
