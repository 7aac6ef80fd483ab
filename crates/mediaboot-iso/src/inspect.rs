//! Reading finished images back
//!
//! A small ISO9660 reader used to verify a build before it is published.
//! It understands the primary volume descriptor, directory records and the
//! Rock Ridge `NM` and `PX` entries; everything else is ignored.

use std::fs;
use std::path::Path;

use crate::error::InspectError;
use crate::writer::SECTOR_SIZE;

const PVD_SECTOR: usize = 16;
const MAX_DEPTH: usize = 16;
const FLAG_DIRECTORY: u8 = 0x02;
const SP_MAGIC: &[u8] = &[b'S', b'P', 7, 1, 0xBE, 0xEF];

type Result<T> = std::result::Result<T, InspectError>;

/// A regular file found in an image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsoFile {
    /// Slash-separated path from the image root
    pub path: String,
    /// POSIX mode from Rock Ridge `PX`, when present
    pub mode: Option<u32>,
    contents: Vec<u8>,
}

impl IsoFile {
    pub fn contents(&self) -> &[u8] {
        &self.contents
    }

    /// Length of the file in bytes
    pub fn size(&self) -> usize {
        self.contents.len()
    }
}

/// Parsed contents of an ISO9660 image
#[derive(Debug, Clone)]
pub struct IsoImage {
    volume_id: String,
    rock_ridge: bool,
    volume_sectors: u32,
    files: Vec<IsoFile>,
    directories: Vec<String>,
}

impl IsoImage {
    /// Read and parse the image at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let data = fs::read(path)?;
        Self::parse(&data)
    }

    /// Parse an in-memory image
    pub fn parse(data: &[u8]) -> Result<Self> {
        let pvd = data
            .get(PVD_SECTOR * SECTOR_SIZE..(PVD_SECTOR + 1) * SECTOR_SIZE)
            .ok_or_else(|| {
                InspectError::NotIso9660(format!("image is only {} bytes", data.len()))
            })?;
        if pvd[0] != 1 || &pvd[1..6] != b"CD001" {
            return Err(InspectError::NotIso9660(
                "no primary volume descriptor at sector 16".to_string(),
            ));
        }

        let block_size = u16::from_le_bytes([pvd[128], pvd[129]]) as usize;
        if block_size != SECTOR_SIZE {
            return Err(InspectError::Malformed(format!(
                "logical block size {}",
                block_size
            )));
        }

        let volume_id = String::from_utf8_lossy(&pvd[40..72]).trim_end().to_string();
        let volume_sectors = u32::from_le_bytes([pvd[80], pvd[81], pvd[82], pvd[83]]);
        let root = Record::parse(&pvd[156..190])?;

        let root_records = read_directory(data, root.extent, root.size)?;
        let rock_ridge = root_records
            .first()
            .is_some_and(|r| r.system_use.starts_with(SP_MAGIC));

        let mut image = IsoImage {
            volume_id,
            rock_ridge,
            volume_sectors,
            files: Vec::new(),
            directories: Vec::new(),
        };
        image.walk(data, &root_records, "", 0)?;
        Ok(image)
    }

    /// Volume identifier from the primary volume descriptor
    pub fn volume_id(&self) -> &str {
        &self.volume_id
    }

    pub fn has_rock_ridge(&self) -> bool {
        self.rock_ridge
    }

    /// Volume space size from the primary volume descriptor, in sectors
    pub fn volume_sectors(&self) -> u32 {
        self.volume_sectors
    }

    /// Regular files in directory order
    pub fn files(&self) -> &[IsoFile] {
        &self.files
    }

    pub fn directories(&self) -> &[String] {
        &self.directories
    }

    /// Look up a file by its `/`-separated path
    pub fn file(&self, path: &str) -> Option<&IsoFile> {
        self.files.iter().find(|f| f.path == path)
    }

    fn walk(&mut self, data: &[u8], records: &[Record<'_>], prefix: &str, depth: usize) -> Result<()> {
        if depth > MAX_DEPTH {
            return Err(InspectError::Malformed(format!(
                "directory tree deeper than {} levels",
                MAX_DEPTH
            )));
        }

        for record in records {
            // "." and ".."
            if record.ident == [0] || record.ident == [1] {
                continue;
            }

            let name = self.entry_name(record);
            let path = if prefix.is_empty() {
                name
            } else {
                format!("{}/{}", prefix, name)
            };

            if record.flags & FLAG_DIRECTORY != 0 {
                let children = read_directory(data, record.extent, record.size)?;
                self.directories.push(path.clone());
                self.walk(data, &children, &path, depth + 1)?;
            } else {
                let contents = extent(data, record.extent, record.size)?.to_vec();
                let mode = if self.rock_ridge {
                    susp_entry(record.system_use, b"PX")
                        .filter(|px| px.len() >= 4)
                        .map(|px| u32::from_le_bytes([px[0], px[1], px[2], px[3]]))
                } else {
                    None
                };
                self.files.push(IsoFile {
                    path,
                    mode,
                    contents,
                });
            }
        }
        Ok(())
    }

    fn entry_name(&self, record: &Record<'_>) -> String {
        if self.rock_ridge {
            if let Some(nm) = susp_entry(record.system_use, b"NM").filter(|nm| !nm.is_empty()) {
                return String::from_utf8_lossy(&nm[1..]).into_owned();
            }
        }
        let ident = String::from_utf8_lossy(record.ident);
        let ident = ident.strip_suffix(";1").unwrap_or(&ident);
        ident.trim_end_matches('.').to_string()
    }
}

struct Record<'a> {
    extent: u32,
    size: u32,
    flags: u8,
    ident: &'a [u8],
    system_use: &'a [u8],
}

impl<'a> Record<'a> {
    fn parse(buf: &'a [u8]) -> Result<Self> {
        let len = *buf.first().unwrap_or(&0) as usize;
        if len < 34 || len > buf.len() {
            return Err(InspectError::Malformed(format!(
                "directory record length {}",
                len
            )));
        }
        let ident_len = buf[32] as usize;
        let ident_end = 33 + ident_len;
        if ident_end > len {
            return Err(InspectError::Malformed(
                "directory record identifier overruns record".to_string(),
            ));
        }
        let su_start = (ident_end + usize::from(ident_len % 2 == 0)).min(len);

        Ok(Record {
            extent: u32::from_le_bytes([buf[2], buf[3], buf[4], buf[5]]),
            size: u32::from_le_bytes([buf[10], buf[11], buf[12], buf[13]]),
            flags: buf[25],
            ident: &buf[33..ident_end],
            system_use: &buf[su_start..len],
        })
    }
}

fn extent(data: &[u8], lba: u32, size: u32) -> Result<&[u8]> {
    let start = lba as usize * SECTOR_SIZE;
    let end = start + size as usize;
    data.get(start..end).ok_or_else(|| {
        InspectError::Malformed(format!(
            "extent at sector {} ({} bytes) lies outside the image",
            lba, size
        ))
    })
}

/// Records of one directory extent; records never straddle a sector
fn read_directory(data: &[u8], lba: u32, size: u32) -> Result<Vec<Record<'_>>> {
    let dir = extent(data, lba, size)?;
    let mut records = Vec::new();
    let mut pos = 0;
    while pos < dir.len() {
        let len = dir[pos] as usize;
        if len == 0 {
            pos = (pos / SECTOR_SIZE + 1) * SECTOR_SIZE;
            continue;
        }
        let end = (pos + len).min(dir.len());
        records.push(Record::parse(&dir[pos..end])?);
        pos += len;
    }
    Ok(records)
}

/// Data of the first SUSP entry with signature `sig`
fn susp_entry<'a>(system_use: &'a [u8], sig: &[u8; 2]) -> Option<&'a [u8]> {
    let mut pos = 0;
    while pos + 4 <= system_use.len() {
        let len = system_use[pos + 2] as usize;
        if len < 4 || pos + len > system_use.len() {
            break;
        }
        let entry = &system_use[pos..pos + len];
        if &entry[..2] == sig {
            return Some(&entry[4..]);
        }
        if &entry[..2] == b"ST" {
            break;
        }
        pos += len;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_short_file() {
        let err = IsoImage::parse(&[0u8; 1024]).unwrap_err();
        assert!(matches!(err, InspectError::NotIso9660(_)));
    }

    #[test]
    fn test_rejects_non_iso() {
        let err = IsoImage::parse(&vec![0u8; 64 * 1024]).unwrap_err();
        assert!(matches!(err, InspectError::NotIso9660(_)));
    }

    #[test]
    fn test_rejects_out_of_bounds_root() {
        let mut data = vec![0u8; 20 * SECTOR_SIZE];
        let pvd = &mut data[PVD_SECTOR * SECTOR_SIZE..];
        pvd[0] = 1;
        pvd[1..6].copy_from_slice(b"CD001");
        pvd[128..130].copy_from_slice(&2048u16.to_le_bytes());
        pvd[156] = 34;
        pvd[158..162].copy_from_slice(&1000u32.to_le_bytes());
        pvd[166..170].copy_from_slice(&2048u32.to_le_bytes());
        pvd[188] = 1;

        let err = IsoImage::parse(&data).unwrap_err();
        assert!(matches!(err, InspectError::Malformed(_)));
    }

    #[test]
    fn test_susp_entry() {
        let mut su = Vec::new();
        su.extend_from_slice(&[b'P', b'X', 12, 1, 0xA4, 0x81, 0, 0, 0, 0, 0x81, 0xA4]);
        su.extend_from_slice(&[b'N', b'M', 9, 1, 0, b'c', b'o', b'n', b'f']);

        assert_eq!(susp_entry(&su, b"NM"), Some(&[0, b'c', b'o', b'n', b'f'][..]));
        assert_eq!(&susp_entry(&su, b"PX").unwrap()[..4], &0o100644u32.to_le_bytes());
        assert_eq!(susp_entry(&su, b"TF"), None);
        assert_eq!(susp_entry(&[0u8], b"NM"), None);
    }
}
