//! Volume labels

use std::fmt;
use std::str::FromStr;

use crate::error::LabelError;

/// Maximum length of the ISO9660 volume identifier field
pub const MAX_LABEL_LEN: usize = 32;

/// A validated volume identifier
///
/// Labels are written verbatim into the primary volume descriptor, so they
/// are limited to characters every firmware and OS reader accepts:
/// ASCII letters, digits, `_`, `-` and `.`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VolumeLabel(String);

impl VolumeLabel {
    /// Validate and wrap a label
    pub fn new(label: impl Into<String>) -> Result<Self, LabelError> {
        let label = label.into();
        if label.is_empty() {
            return Err(LabelError::Empty);
        }
        if label.len() > MAX_LABEL_LEN {
            return Err(LabelError::TooLong {
                len: label.len(),
                max: MAX_LABEL_LEN,
            });
        }
        if let Some(ch) = label
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
        {
            return Err(LabelError::InvalidChar(ch));
        }
        Ok(Self(label))
    }

    /// The label as written to the volume descriptor
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for VolumeLabel {
    type Err = LabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for VolumeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for VolumeLabel {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
