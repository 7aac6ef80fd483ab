//! ISO9660 layout and encoding
//!
//! The image is laid out in strictly increasing sector order, so it can be
//! written front to back without seeking:
//!
//! ```text
//! 0..16    system area (zeros)
//! 16       primary volume descriptor
//! 17       volume descriptor set terminator
//! 18..     L path table, then M path table
//! ..       directory extents, breadth first
//! ..       file extents, in directory record order
//! ```
//!
//! Rock Ridge entries (SUSP `SP`/`ER` on the root, `PX`, `NM`, `TF` on
//! every record) are kept inside the 255-byte directory record; continuation
//! areas are not used, which caps Rock Ridge names at roughly 150 bytes.

use std::collections::{HashSet, VecDeque};
use std::fs::{self, File, Metadata};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Timelike, Utc};
use tracing::warn;

use crate::error::BuildError;

pub(crate) const SECTOR_SIZE: usize = 2048;

const SYSTEM_AREA_SECTORS: u32 = 16;
const PATH_TABLE_START: u32 = 18;
const MAX_RECORD_LEN: usize = 255;
const MAX_DEPTH: usize = 8;

const FLAG_DIRECTORY: u8 = 0x02;

const S_IFDIR: u32 = 0o040000;
const S_IFREG: u32 = 0o100000;

const RRIP_ID: &[u8] = b"RRIP_1991A";
const RRIP_DESCRIPTOR: &[u8] =
    b"THE ROCK RIDGE INTERCHANGE PROTOCOL PROVIDES SUPPORT FOR POSIX FILE SYSTEM SEMANTICS";
const RRIP_SOURCE: &[u8] = b"PLEASE CONTACT DISC PUBLISHER FOR SPECIFICATION SOURCE";

const APPLICATION_ID: &[u8] = b"MEDIABOOT";

// ---------------------------------------------------------------------------
// Work directory scan
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub(crate) struct ScannedDir {
    name: String,
    mode: u32,
    modified: DateTime<Utc>,
    dirs: Vec<ScannedDir>,
    files: Vec<ScannedFile>,
}

#[derive(Debug)]
pub(crate) struct ScannedFile {
    name: String,
    mode: u32,
    modified: DateTime<Utc>,
    source: PathBuf,
    size: u64,
}

impl ScannedDir {
    pub(crate) fn file_count(&self) -> usize {
        self.files.len() + self.dirs.iter().map(ScannedDir::file_count).sum::<usize>()
    }

    pub(crate) fn dir_count(&self) -> usize {
        1 + self.dirs.iter().map(ScannedDir::dir_count).sum::<usize>()
    }
}

/// Read the work directory into memory. Symlinks are followed; anything
/// that is neither a file nor a directory is skipped.
pub(crate) fn scan(root: &Path) -> io::Result<ScannedDir> {
    let meta = fs::metadata(root)?;
    if !meta.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a directory", root.display()),
        ));
    }
    scan_dir(root, String::new(), &meta, 0)
}

fn scan_dir(path: &Path, name: String, meta: &Metadata, depth: usize) -> io::Result<ScannedDir> {
    if depth >= MAX_DEPTH {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is nested deeper than {} levels", path.display(), MAX_DEPTH),
        ));
    }

    let mut entries = fs::read_dir(path)?.collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());

    let mut dir = ScannedDir {
        name,
        mode: S_IFDIR | permission_bits(meta, 0o755),
        modified: modified_time(meta),
        dirs: Vec::new(),
        files: Vec::new(),
    };

    for entry in entries {
        let entry_path = entry.path();
        let entry_name = entry.file_name().into_string().map_err(|raw| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("file name {:?} is not valid UTF-8", raw),
            )
        })?;
        let entry_meta = fs::metadata(&entry_path)?;

        if entry_meta.is_dir() {
            dir.dirs
                .push(scan_dir(&entry_path, entry_name, &entry_meta, depth + 1)?);
        } else if entry_meta.is_file() {
            dir.files.push(ScannedFile {
                name: entry_name,
                mode: S_IFREG | permission_bits(&entry_meta, 0o644),
                modified: modified_time(&entry_meta),
                source: entry_path,
                size: entry_meta.len(),
            });
        } else {
            warn!(path = %entry_path.display(), "Skipping special file");
        }
    }

    Ok(dir)
}

#[cfg(unix)]
fn permission_bits(meta: &Metadata, _fallback: u32) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(_meta: &Metadata, fallback: u32) -> u32 {
    fallback
}

fn modified_time(meta: &Metadata) -> DateTime<Utc> {
    meta.modified().map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now())
}

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct DirNode {
    ident: Vec<u8>,
    name: String,
    mode: u32,
    modified: DateTime<Utc>,
    parent: usize,
    children: Vec<Child>,
    subdirs: u32,
    extent: u32,
    size: u32,
}

#[derive(Debug)]
struct FileNode {
    ident: Vec<u8>,
    name: String,
    mode: u32,
    modified: DateTime<Utc>,
    source: PathBuf,
    size: u32,
    extent: u32,
}

#[derive(Debug, Clone, Copy)]
enum Child {
    Dir(usize),
    File(usize),
}

/// Fully planned image: every directory and file has its identifier,
/// extent and size assigned.
#[derive(Debug)]
pub(crate) struct Layout {
    dirs: Vec<DirNode>,
    files: Vec<FileNode>,
    rock_ridge: bool,
    path_table_size: u32,
    path_table_sectors: u32,
    total_sectors: u32,
}

enum Pending {
    Dir(ScannedDir, Vec<u8>),
    File(ScannedFile, Vec<u8>),
}

impl Pending {
    fn ident(&self) -> &[u8] {
        match self {
            Pending::Dir(_, ident) | Pending::File(_, ident) => ident,
        }
    }
}

impl Layout {
    /// Assign identifiers, directory sizes and extents
    pub(crate) fn plan(root: ScannedDir, rock_ridge: bool) -> Result<Self, BuildError> {
        let mut layout = Layout {
            dirs: Vec::new(),
            files: Vec::new(),
            rock_ridge,
            path_table_size: 0,
            path_table_sectors: 0,
            total_sectors: 0,
        };

        // Breadth-first with children sorted by identifier gives the order
        // the path table requires: by level, then parent number, then name.
        let mut queue: VecDeque<(ScannedDir, usize, Vec<u8>)> = VecDeque::new();
        queue.push_back((root, 0, vec![0]));

        while let Some((scanned, parent, ident)) = queue.pop_front() {
            let index = layout.dirs.len();
            let mut taken = HashSet::new();
            let mut pending: Vec<Pending> = Vec::new();

            for file in scanned.files {
                let ident = file_ident(&file.name, &mut taken);
                pending.push(Pending::File(file, ident));
            }
            for dir in scanned.dirs {
                let ident = dir_ident(&dir.name, &mut taken);
                pending.push(Pending::Dir(dir, ident));
            }
            pending.sort_by(|a, b| a.ident().cmp(b.ident()));

            let subdirs = pending
                .iter()
                .filter(|p| matches!(p, Pending::Dir(..)))
                .count() as u32;

            layout.dirs.push(DirNode {
                ident,
                name: scanned.name,
                mode: scanned.mode,
                modified: scanned.modified,
                parent,
                children: Vec::with_capacity(pending.len()),
                subdirs,
                extent: 0,
                size: 0,
            });

            for item in pending {
                match item {
                    Pending::Dir(dir, ident) => {
                        let child_index = layout.dirs.len() + queue.len();
                        layout.dirs[index].children.push(Child::Dir(child_index));
                        queue.push_back((dir, index, ident));
                    }
                    Pending::File(file, ident) => {
                        let size = u32::try_from(file.size).map_err(|_| {
                            BuildError::finalize(format!(
                                "{} is too large for a single ISO9660 extent",
                                file.source.display()
                            ))
                        })?;
                        layout.files.push(FileNode {
                            ident,
                            name: file.name,
                            mode: file.mode,
                            modified: file.modified,
                            source: file.source,
                            size,
                            extent: 0,
                        });
                        let file_index = layout.files.len() - 1;
                        layout.dirs[index].children.push(Child::File(file_index));
                    }
                }
            }
        }

        if layout.dirs.len() > u16::MAX as usize {
            return Err(BuildError::finalize(
                "too many directories for a 16-bit path table",
            ));
        }

        for d in 0..layout.dirs.len() {
            let lengths: Vec<usize> = layout
                .dir_records(d)?
                .iter()
                .map(Vec::len)
                .collect();
            layout.dirs[d].size = packed_size(&lengths);
        }

        layout.path_table_size = layout.path_table(false).len() as u32;
        layout.path_table_sectors = sectors_for(layout.path_table_size as u64).max(1);

        let mut next = PATH_TABLE_START + 2 * layout.path_table_sectors;
        for dir in &mut layout.dirs {
            dir.extent = next;
            next += dir.size / SECTOR_SIZE as u32;
        }
        for file in &mut layout.files {
            if file.size == 0 {
                continue;
            }
            file.extent = next;
            next += sectors_for(file.size as u64);
        }
        layout.total_sectors = next;

        Ok(layout)
    }

    pub(crate) fn total_bytes(&self) -> u64 {
        self.total_sectors as u64 * SECTOR_SIZE as u64
    }

    fn l_path_table_lba(&self) -> u32 {
        PATH_TABLE_START
    }

    fn m_path_table_lba(&self) -> u32 {
        PATH_TABLE_START + self.path_table_sectors
    }

    fn nlink(&self, d: usize) -> u32 {
        2 + self.dirs[d].subdirs
    }

    /// Directory records for `.`, `..` and every child of directory `d`
    fn dir_records(&self, d: usize) -> Result<Vec<Vec<u8>>, BuildError> {
        let dir = &self.dirs[d];
        let parent = &self.dirs[dir.parent];
        let mut records = Vec::with_capacity(dir.children.len() + 2);

        let mut dot_su = Vec::new();
        let mut dotdot_su = Vec::new();
        if self.rock_ridge {
            if d == 0 {
                dot_su.extend_from_slice(&susp_sp());
            }
            dot_su.extend_from_slice(&rr_px(dir.mode, self.nlink(d)));
            if d == 0 {
                dot_su.extend_from_slice(&susp_er());
            }
            dotdot_su.extend_from_slice(&rr_px(parent.mode, self.nlink(dir.parent)));
        }

        records.push(directory_record(
            &[0],
            dir.extent,
            dir.size,
            FLAG_DIRECTORY,
            &dir.modified,
            &dot_su,
        )?);
        records.push(directory_record(
            &[1],
            parent.extent,
            parent.size,
            FLAG_DIRECTORY,
            &parent.modified,
            &dotdot_su,
        )?);

        for child in &dir.children {
            let record = match *child {
                Child::Dir(c) => {
                    let sub = &self.dirs[c];
                    let su = if self.rock_ridge {
                        rock_ridge_entry(sub.mode, self.nlink(c), &sub.name, &sub.modified)
                    } else {
                        Vec::new()
                    };
                    directory_record(
                        &sub.ident,
                        sub.extent,
                        sub.size,
                        FLAG_DIRECTORY,
                        &sub.modified,
                        &su,
                    )
                    .map_err(|e| name_error(&sub.name, e))?
                }
                Child::File(f) => {
                    let file = &self.files[f];
                    let su = if self.rock_ridge {
                        rock_ridge_entry(file.mode, 1, &file.name, &file.modified)
                    } else {
                        Vec::new()
                    };
                    directory_record(&file.ident, file.extent, file.size, 0, &file.modified, &su)
                        .map_err(|e| name_error(&file.name, e))?
                }
            };
            records.push(record);
        }

        Ok(records)
    }

    fn path_table(&self, big_endian: bool) -> Vec<u8> {
        let mut table = Vec::new();
        for dir in &self.dirs {
            table.push(dir.ident.len() as u8);
            table.push(0);
            if big_endian {
                table.extend_from_slice(&dir.extent.to_be_bytes());
                table.extend_from_slice(&((dir.parent + 1) as u16).to_be_bytes());
            } else {
                table.extend_from_slice(&dir.extent.to_le_bytes());
                table.extend_from_slice(&((dir.parent + 1) as u16).to_le_bytes());
            }
            table.extend_from_slice(&dir.ident);
            if dir.ident.len() % 2 == 1 {
                table.push(0);
            }
        }
        table
    }

    fn primary_volume_descriptor(
        &self,
        label: &str,
        now: &DateTime<Utc>,
    ) -> Result<Vec<u8>, BuildError> {
        let root = &self.dirs[0];
        let mut pvd = vec![0u8; SECTOR_SIZE];

        pvd[0] = 1;
        pvd[1..6].copy_from_slice(b"CD001");
        pvd[6] = 1;
        pvd[8..40].copy_from_slice(&padded(b"", 32));
        pvd[40..72].copy_from_slice(&padded(label.as_bytes(), 32));
        pvd[80..88].copy_from_slice(&both_u32(self.total_sectors));
        pvd[120..124].copy_from_slice(&both_u16(1));
        pvd[124..128].copy_from_slice(&both_u16(1));
        pvd[128..132].copy_from_slice(&both_u16(SECTOR_SIZE as u16));
        pvd[132..140].copy_from_slice(&both_u32(self.path_table_size));
        pvd[140..144].copy_from_slice(&self.l_path_table_lba().to_le_bytes());
        pvd[148..152].copy_from_slice(&self.m_path_table_lba().to_be_bytes());

        let root_record =
            directory_record(&[0], root.extent, root.size, FLAG_DIRECTORY, now, &[])?;
        pvd[156..190].copy_from_slice(&root_record);

        pvd[190..318].copy_from_slice(&padded(label.as_bytes(), 128));
        pvd[318..446].copy_from_slice(&padded(b"", 128));
        pvd[446..574].copy_from_slice(&padded(b"", 128));
        pvd[574..702].copy_from_slice(&padded(APPLICATION_ID, 128));
        pvd[702..739].copy_from_slice(&padded(b"", 37));
        pvd[739..776].copy_from_slice(&padded(b"", 37));
        pvd[776..813].copy_from_slice(&padded(b"", 37));
        pvd[813..830].copy_from_slice(&volume_date(Some(now)));
        pvd[830..847].copy_from_slice(&volume_date(Some(now)));
        pvd[847..864].copy_from_slice(&volume_date(None));
        pvd[864..881].copy_from_slice(&volume_date(None));
        pvd[881] = 1;

        Ok(pvd)
    }

    /// Write the complete image. Returns the number of bytes written.
    pub(crate) fn write<W: Write>(
        &self,
        out: W,
        label: &str,
        now: &DateTime<Utc>,
    ) -> Result<u64, BuildError> {
        let mut out = SectorWriter::new(out);
        let io_err = |what: &str| {
            let what = what.to_string();
            move |e: io::Error| BuildError::finalize_io(format!("failed to write {}", what), e)
        };

        out.write_all(&vec![0u8; SYSTEM_AREA_SECTORS as usize * SECTOR_SIZE])
            .map_err(io_err("system area"))?;

        let pvd = self.primary_volume_descriptor(label, now)?;
        out.write_all(&pvd)
            .map_err(io_err("primary volume descriptor"))?;

        let mut terminator = vec![0u8; SECTOR_SIZE];
        terminator[0] = 255;
        terminator[1..6].copy_from_slice(b"CD001");
        terminator[6] = 1;
        out.write_all(&terminator)
            .map_err(io_err("volume descriptor terminator"))?;

        for (lba, big_endian) in [
            (self.l_path_table_lba(), false),
            (self.m_path_table_lba(), true),
        ] {
            out.expect_sector(lba)?;
            out.write_all(&self.path_table(big_endian))
                .map_err(io_err("path table"))?;
            out.pad_to(self.path_table_sectors as u64 * SECTOR_SIZE as u64 + lba as u64 * SECTOR_SIZE as u64)
                .map_err(io_err("path table"))?;
        }

        for (d, dir) in self.dirs.iter().enumerate() {
            out.expect_sector(dir.extent)?;
            let mut used = 0;
            for record in self.dir_records(d)? {
                if used + record.len() > SECTOR_SIZE {
                    out.pad_to_sector().map_err(io_err("directory extent"))?;
                    used = 0;
                }
                out.write_all(&record).map_err(io_err("directory record"))?;
                used += record.len();
            }
            out.pad_to(dir.extent as u64 * SECTOR_SIZE as u64 + dir.size as u64)
                .map_err(io_err("directory extent"))?;
        }

        for file in self.files.iter().filter(|f| f.size > 0) {
            out.expect_sector(file.extent)?;
            let source = File::open(&file.source).map_err(|e| {
                BuildError::finalize_io(format!("failed to open {}", file.source.display()), e)
            })?;
            let copied = io::copy(&mut source.take(file.size as u64), &mut out)
                .map_err(io_err("file data"))?;
            if copied != file.size as u64 {
                return Err(BuildError::finalize(format!(
                    "{} changed size during the build ({} of {} bytes)",
                    file.source.display(),
                    copied,
                    file.size
                )));
            }
            out.pad_to_sector().map_err(io_err("file data"))?;
        }

        out.expect_sector(self.total_sectors)?;
        out.flush().map_err(io_err("image"))?;
        Ok(out.position)
    }
}

fn name_error(name: &str, err: BuildError) -> BuildError {
    match err {
        BuildError::FinalizeFailed { reason, source } => BuildError::FinalizeFailed {
            reason: format!("{}: {}", name, reason),
            source,
        },
        other => other,
    }
}

/// Size of a directory extent holding records of the given lengths.
/// Records never straddle a sector boundary.
fn packed_size(lengths: &[usize]) -> u32 {
    let mut sectors = 1u32;
    let mut used = 0usize;
    for &len in lengths {
        if used + len > SECTOR_SIZE {
            sectors += 1;
            used = 0;
        }
        used += len;
    }
    sectors * SECTOR_SIZE as u32
}

fn sectors_for(bytes: u64) -> u32 {
    bytes.div_ceil(SECTOR_SIZE as u64) as u32
}

/// Writer that tracks its byte position so extents can be checked as they are written
struct SectorWriter<W: Write> {
    inner: W,
    position: u64,
}

impl<W: Write> SectorWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, position: 0 }
    }

    fn expect_sector(&self, lba: u32) -> Result<(), BuildError> {
        let expected = lba as u64 * SECTOR_SIZE as u64;
        if self.position != expected {
            return Err(BuildError::finalize(format!(
                "layout mismatch: at byte {} but sector {} starts at {}",
                self.position, lba, expected
            )));
        }
        Ok(())
    }

    fn pad_to(&mut self, offset: u64) -> io::Result<()> {
        if offset > self.position {
            let zeros = vec![0u8; (offset - self.position) as usize];
            self.write_all(&zeros)?;
        }
        Ok(())
    }

    fn pad_to_sector(&mut self) -> io::Result<()> {
        let rem = self.position % SECTOR_SIZE as u64;
        if rem != 0 {
            self.pad_to(self.position + (SECTOR_SIZE as u64 - rem))?;
        }
        Ok(())
    }
}

impl<W: Write> Write for SectorWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.position += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

fn both_u16(v: u16) -> [u8; 4] {
    let le = v.to_le_bytes();
    let be = v.to_be_bytes();
    [le[0], le[1], be[0], be[1]]
}

fn both_u32(v: u32) -> [u8; 8] {
    let mut out = [0u8; 8];
    out[..4].copy_from_slice(&v.to_le_bytes());
    out[4..].copy_from_slice(&v.to_be_bytes());
    out
}

fn padded(value: &[u8], len: usize) -> Vec<u8> {
    let mut out = vec![b' '; len];
    let n = value.len().min(len);
    out[..n].copy_from_slice(&value[..n]);
    out
}

/// 7-byte directory record timestamp, always UTC
fn record_date(t: &DateTime<Utc>) -> [u8; 7] {
    [
        (t.year() - 1900).clamp(0, 255) as u8,
        t.month() as u8,
        t.day() as u8,
        t.hour() as u8,
        t.minute() as u8,
        t.second() as u8,
        0,
    ]
}

/// 17-byte volume descriptor timestamp; `None` encodes "not specified"
fn volume_date(t: Option<&DateTime<Utc>>) -> [u8; 17] {
    let mut out = [b'0'; 17];
    out[16] = 0;
    if let Some(t) = t {
        let digits = t.format("%Y%m%d%H%M%S").to_string();
        out[..14].copy_from_slice(&digits.as_bytes()[..14]);
    }
    out
}

fn directory_record(
    ident: &[u8],
    extent: u32,
    size: u32,
    flags: u8,
    recorded: &DateTime<Utc>,
    system_use: &[u8],
) -> Result<Vec<u8>, BuildError> {
    let pad = usize::from(ident.len() % 2 == 0);
    let mut len = 33 + ident.len() + pad + system_use.len();
    len += len % 2;
    if len > MAX_RECORD_LEN {
        return Err(BuildError::finalize(format!(
            "directory record would be {} bytes (max: {})",
            len, MAX_RECORD_LEN
        )));
    }

    let mut record = Vec::with_capacity(len);
    record.push(len as u8);
    record.push(0);
    record.extend_from_slice(&both_u32(extent));
    record.extend_from_slice(&both_u32(size));
    record.extend_from_slice(&record_date(recorded));
    record.push(flags);
    record.push(0);
    record.push(0);
    record.extend_from_slice(&both_u16(1));
    record.push(ident.len() as u8);
    record.extend_from_slice(ident);
    if pad == 1 {
        record.push(0);
    }
    record.extend_from_slice(system_use);
    record.resize(len, 0);
    Ok(record)
}

fn susp_sp() -> [u8; 7] {
    [b'S', b'P', 7, 1, 0xBE, 0xEF, 0]
}

fn susp_er() -> Vec<u8> {
    let len = 8 + RRIP_ID.len() + RRIP_DESCRIPTOR.len() + RRIP_SOURCE.len();
    let mut entry = vec![
        b'E',
        b'R',
        len as u8,
        1,
        RRIP_ID.len() as u8,
        RRIP_DESCRIPTOR.len() as u8,
        RRIP_SOURCE.len() as u8,
        1,
    ];
    entry.extend_from_slice(RRIP_ID);
    entry.extend_from_slice(RRIP_DESCRIPTOR);
    entry.extend_from_slice(RRIP_SOURCE);
    entry
}

fn rr_px(mode: u32, nlink: u32) -> Vec<u8> {
    let mut entry = vec![b'P', b'X', 36, 1];
    entry.extend_from_slice(&both_u32(mode));
    entry.extend_from_slice(&both_u32(nlink));
    entry.extend_from_slice(&both_u32(0));
    entry.extend_from_slice(&both_u32(0));
    entry
}

fn rr_nm(name: &str) -> Vec<u8> {
    let mut entry = vec![b'N', b'M', (5 + name.len()).min(255) as u8, 1, 0];
    entry.extend_from_slice(name.as_bytes());
    entry
}

fn rr_tf(modified: &DateTime<Utc>) -> Vec<u8> {
    // flags 0x02: modify time only, short form
    let mut entry = vec![b'T', b'F', 12, 1, 0x02];
    entry.extend_from_slice(&record_date(modified));
    entry
}

fn rock_ridge_entry(mode: u32, nlink: u32, name: &str, modified: &DateTime<Utc>) -> Vec<u8> {
    let mut su = rr_px(mode, nlink);
    su.extend_from_slice(&rr_nm(name));
    su.extend_from_slice(&rr_tf(modified));
    su
}

// ---------------------------------------------------------------------------
// ISO9660 identifiers
// ---------------------------------------------------------------------------

fn d_chars(value: &str, max: usize) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .take(max)
        .collect()
}

fn with_suffix(stem: &str, n: usize, max: usize) -> String {
    let suffix = format!("~{}", n);
    let keep = max.saturating_sub(suffix.len()).min(stem.len());
    format!("{}{}", &stem[..keep], suffix)
}

/// Level 1 (8.3) file identifier, unique within `taken`
fn file_ident(name: &str, taken: &mut HashSet<Vec<u8>>) -> Vec<u8> {
    let (stem, ext) = match name.rfind('.') {
        Some(i) if i > 0 => (&name[..i], &name[i + 1..]),
        _ => (name, ""),
    };
    let mut stem = d_chars(stem, 8);
    if stem.is_empty() {
        stem.push('_');
    }
    let ext = d_chars(ext, 3);

    let mut candidate = format!("{}.{};1", stem, ext);
    let mut n = 1;
    while taken.contains(candidate.as_bytes()) {
        candidate = format!("{}.{};1", with_suffix(&stem, n, 8), ext);
        n += 1;
    }
    taken.insert(candidate.clone().into_bytes());
    candidate.into_bytes()
}

/// Level 1 directory identifier, unique within `taken`
fn dir_ident(name: &str, taken: &mut HashSet<Vec<u8>>) -> Vec<u8> {
    let mut base = d_chars(name, 8);
    if base.is_empty() {
        base.push('_');
    }

    let mut candidate = base.clone();
    let mut n = 1;
    while taken.contains(candidate.as_bytes()) {
        candidate = with_suffix(&base, n, 8);
        n += 1;
    }
    taken.insert(candidate.clone().into_bytes());
    candidate.into_bytes()
}
