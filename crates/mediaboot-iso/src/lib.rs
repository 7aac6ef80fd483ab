//! Mediaboot ISO Builder
//!
//! This crate builds the small ISO9660 images that get mounted as virtual
//! media on a remote server. The image is produced in three phases, each
//! with its own failure kind:
//!
//! - **Allocate**: create (or truncate) the output file at its structural minimum size
//! - **Format**: negotiate an ISO9660 filesystem rooted at a work directory
//! - **Finalize**: write descriptors, path tables, directories, file data and
//!   Rock Ridge entries, closing the image for good
//!
//! Inputs are staged into the work directory with [`InputSet`] before the
//! build, and a finished image can be read back with [`IsoImage`].
//!
//! # Example
//!
//! ```no_run
//! use mediaboot_iso::{create, InputSet, IsoImage};
//! use std::path::Path;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let work_dir = Path::new("/tmp/work");
//! InputSet::default_payload().stage(work_dir)?;
//!
//! create(Path::new("/tmp/test-config.iso"), work_dir, "test-config")?;
//!
//! let image = IsoImage::open("/tmp/test-config.iso")?;
//! assert_eq!(image.volume_id(), "test-config");
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod error;
pub mod inspect;
pub mod label;
pub mod stage;
mod writer;

pub use builder::{
    create, FilesystemSpec, FinalizeOptions, ImageSpec, ImageSummary, Iso9660Filesystem,
    RawImage, LOGICAL_BLOCK_SIZE, MIN_ISO_SIZE,
};
pub use error::{BuildError, InspectError, LabelError, Result};
pub use inspect::{IsoFile, IsoImage};
pub use label::VolumeLabel;
pub use stage::{InputSet, StagedEntry};
