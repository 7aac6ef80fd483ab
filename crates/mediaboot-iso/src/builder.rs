//! Image construction
//!
//! Building an image goes through three typed phases so a finalized image
//! can never be appended to:
//!
//! ```text
//! RawImage::allocate ──> RawImage::format ──> Iso9660Filesystem::finalize
//!   AllocationFailed        FormatFailed          FinalizeFailed
//! ```

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info};

use crate::error::{BuildError, Result};
use crate::label::VolumeLabel;
use crate::writer::{self, Layout, ScannedDir, SECTOR_SIZE};

/// Size the container is truncated to before formatting.
///
/// This is the smallest image the ISO9660 layout can describe, not a
/// capacity limit: the file grows to whatever the content needs when the
/// filesystem is finalized.
pub const MIN_ISO_SIZE: u64 = 38 * 1024;

/// ISO9660 logical block size
pub const LOGICAL_BLOCK_SIZE: usize = SECTOR_SIZE;

/// Everything needed to build one image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSpec {
    /// Directory whose contents become the image root. Must be fully staged.
    pub work_dir: PathBuf,
    pub volume_label: VolumeLabel,
    /// Output file. Its parent directory must exist; an existing file is overwritten.
    pub output_path: PathBuf,
}

impl ImageSpec {
    /// Describe an image to build from `work_dir`
    pub fn new(
        work_dir: impl Into<PathBuf>,
        volume_label: VolumeLabel,
        output_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            work_dir: work_dir.into(),
            volume_label,
            output_path: output_path.into(),
        }
    }

    /// Allocate, format and finalize the image
    pub fn build(&self) -> Result<ImageSummary> {
        let raw = RawImage::allocate(&self.output_path, MIN_ISO_SIZE)?;
        let fs = raw.format(FilesystemSpec::new(
            &self.work_dir,
            self.volume_label.clone(),
        ))?;
        let summary = fs.finalize(FinalizeOptions::rock_ridge(self.volume_label.clone()))?;

        info!(
            path = %summary.path.display(),
            label = %summary.volume_label,
            bytes = summary.size_bytes,
            files = summary.files,
            "ISO image finalized"
        );
        Ok(summary)
    }
}

/// Build an ISO at `output_path` labelled `volume_label` from the contents of `work_dir`
pub fn create(output_path: &Path, work_dir: &Path, volume_label: &str) -> Result<()> {
    let label = VolumeLabel::new(volume_label)
        .map_err(|e| BuildError::FormatFailed(format!("volume descriptor: {}", e)))?;
    ImageSpec::new(work_dir, label, output_path).build()?;
    Ok(())
}

/// What a finished build produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSummary {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub files: usize,
    pub directories: usize,
    pub volume_label: VolumeLabel,
    pub rock_ridge: bool,
}

/// An allocated, unformatted image container
#[derive(Debug)]
pub struct RawImage {
    path: PathBuf,
    file: File,
    capacity: u64,
}

impl RawImage {
    /// Create or truncate `path` and size it to `size` bytes
    pub fn allocate(path: impl Into<PathBuf>, size: u64) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|source| BuildError::AllocationFailed {
                path: path.clone(),
                source,
            })?;
        file.set_len(size)
            .map_err(|source| BuildError::AllocationFailed {
                path: path.clone(),
                source,
            })?;

        debug!(path = %path.display(), size, "Allocated image container");
        Ok(Self {
            path,
            file,
            capacity: size,
        })
    }

    /// Location of the image file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size the container was allocated with
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Lay an ISO9660 filesystem over the container, rooted at `spec.work_dir`
    pub fn format(self, spec: FilesystemSpec) -> Result<Iso9660Filesystem> {
        if spec.logical_block_size != LOGICAL_BLOCK_SIZE {
            return Err(BuildError::FormatFailed(format!(
                "unsupported logical block size {} (ISO9660 uses {})",
                spec.logical_block_size, LOGICAL_BLOCK_SIZE
            )));
        }
        if self.capacity < MIN_ISO_SIZE {
            return Err(BuildError::FormatFailed(format!(
                "container of {} bytes is below the ISO9660 minimum of {}",
                self.capacity, MIN_ISO_SIZE
            )));
        }

        let tree = writer::scan(&spec.work_dir).map_err(|e| {
            BuildError::FormatFailed(format!(
                "cannot read work dir {}: {}",
                spec.work_dir.display(),
                e
            ))
        })?;

        debug!(
            work_dir = %spec.work_dir.display(),
            files = tree.file_count(),
            "Formatted ISO9660 filesystem"
        );
        Ok(Iso9660Filesystem {
            image: self,
            label: spec.volume_label,
            tree,
        })
    }
}

/// Parameters for formatting a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilesystemSpec {
    pub volume_label: VolumeLabel,
    pub work_dir: PathBuf,
    pub logical_block_size: usize,
}

impl FilesystemSpec {
    /// ISO9660 with 2048-byte logical blocks rooted at `work_dir`
    pub fn new(work_dir: impl Into<PathBuf>, volume_label: VolumeLabel) -> Self {
        Self {
            volume_label,
            work_dir: work_dir.into(),
            logical_block_size: LOGICAL_BLOCK_SIZE,
        }
    }
}

/// Options applied when closing the filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeOptions {
    /// Write Rock Ridge entries (POSIX modes, full file names)
    pub rock_ridge: bool,
    /// Volume identifier; defaults to the label given at format time
    pub volume_identifier: Option<VolumeLabel>,
}

impl FinalizeOptions {
    /// Rock Ridge enabled, volume identifier set to `volume_identifier`
    pub fn rock_ridge(volume_identifier: VolumeLabel) -> Self {
        Self {
            rock_ridge: true,
            volume_identifier: Some(volume_identifier),
        }
    }
}

impl Default for FinalizeOptions {
    fn default() -> Self {
        Self {
            rock_ridge: true,
            volume_identifier: None,
        }
    }
}

/// A formatted, not yet finalized ISO9660 filesystem
#[derive(Debug)]
pub struct Iso9660Filesystem {
    image: RawImage,
    label: VolumeLabel,
    tree: ScannedDir,
}

impl Iso9660Filesystem {
    /// Number of regular files found under the work directory
    pub fn file_count(&self) -> usize {
        self.tree.file_count()
    }

    /// Write the complete filesystem and close the image
    pub fn finalize(self, options: FinalizeOptions) -> Result<ImageSummary> {
        let label = options.volume_identifier.unwrap_or(self.label);
        let files = self.tree.file_count();
        let directories = self.tree.dir_count();
        let RawImage { path, file, .. } = self.image;

        let layout = Layout::plan(self.tree, options.rock_ridge)?;

        let mut out = BufWriter::new(&file);
        let written = layout.write(&mut out, label.as_str(), &Utc::now())?;
        out.flush()
            .map_err(|e| BuildError::finalize_io("failed to flush image", e))?;
        drop(out);

        debug_assert_eq!(written, layout.total_bytes());
        file.set_len(written)
            .map_err(|e| BuildError::finalize_io("failed to set final image size", e))?;
        file.sync_all()
            .map_err(|e| BuildError::finalize_io("failed to sync image", e))?;

        Ok(ImageSummary {
            path,
            size_bytes: written,
            files,
            directories,
            volume_label: label,
            rock_ridge: options.rock_ridge,
        })
    }
}
