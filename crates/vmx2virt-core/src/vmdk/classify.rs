//! Disk-container classification.
//!
//! A `.vmdk` in a VM directory is one of three things: a text descriptor
//! pointing at extent files, a snapshot (delta) descriptor, or raw/sparse
//! data. The rules live in [`classify_header`] so they can be tested
//! without touching the filesystem.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Number of leading bytes inspected when classifying a file.
pub const HEADER_LEN: usize = 512;

/// Token present only in snapshot descriptors.
pub const PARENT_HINT_TOKEN: &str = "parentFileNameHint";

/// Token present in every text descriptor.
pub const CREATE_TYPE_TOKEN: &str = "createType";

/// Upper bound on how much of a descriptor is read for refinement.
pub const MAX_DESCRIPTOR_LEN: u64 = 64 * 1024;

/// What a disk-container file turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskRole {
    /// Text descriptor of a base disk.
    Descriptor,
    /// Text descriptor of a delta disk. Never converted.
    SnapshotDescriptor,
    /// Data file (flat extent or monolithic sparse disk).
    Flat,
    /// File whose metadata could not be read.
    Unknown,
}

impl DiskRole {
    /// Whether the file is one of the descriptor kinds.
    pub fn is_descriptor(self) -> bool {
        matches!(self, DiskRole::Descriptor | DiskRole::SnapshotDescriptor)
    }
}

impl std::fmt::Display for DiskRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiskRole::Descriptor => write!(f, "descriptor"),
            DiskRole::SnapshotDescriptor => write!(f, "snapshot descriptor"),
            DiskRole::Flat => write!(f, "data"),
            DiskRole::Unknown => write!(f, "unknown"),
        }
    }
}

/// A discovered disk-container file and its role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDisk {
    pub path: PathBuf,
    pub byte_size: u64,
    pub role: DiskRole,
}

impl SourceDisk {
    /// The file name for display, falling back to the full path.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Classify a file from its first bytes.
///
/// Bytes that are not valid UTF-8 are dropped before matching.
pub fn classify_header(header: &[u8]) -> DiskRole {
    let header = &header[..header.len().min(HEADER_LEN)];
    let text = String::from_utf8_lossy(header);

    if text.contains(PARENT_HINT_TOKEN) {
        DiskRole::SnapshotDescriptor
    } else if text.contains(CREATE_TYPE_TOKEN) {
        DiskRole::Descriptor
    } else {
        DiskRole::Flat
    }
}

/// Refine a descriptor classification with the full descriptor text.
///
/// Long descriptors can put the parent hint past the first 512 bytes.
pub fn classify_descriptor_text(text: &str) -> DiskRole {
    if text.contains(PARENT_HINT_TOKEN) {
        DiskRole::SnapshotDescriptor
    } else {
        DiskRole::Descriptor
    }
}

/// Classify a file on disk. Never fails: unreadable files are data files.
pub fn classify_file(path: &Path) -> SourceDisk {
    let byte_size = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not stat disk file");
            return SourceDisk {
                path: path.to_path_buf(),
                byte_size: 0,
                role: DiskRole::Unknown,
            };
        }
    };

    let role = match read_header(path) {
        Ok(header) => match classify_header(&header) {
            DiskRole::Descriptor => match read_prefix(path, MAX_DESCRIPTOR_LEN) {
                Ok(bytes) => classify_descriptor_text(&String::from_utf8_lossy(&bytes)),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "could not read descriptor");
                    DiskRole::Descriptor
                }
            },
            role => role,
        },
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not read disk header, treating as data");
            DiskRole::Flat
        }
    };

    debug!(path = %path.display(), %role, byte_size, "classified disk");

    SourceDisk {
        path: path.to_path_buf(),
        byte_size,
        role,
    }
}

fn read_header(path: &Path) -> std::io::Result<Vec<u8>> {
    read_prefix(path, HEADER_LEN as u64)
}

fn read_prefix(path: &Path, limit: u64) -> std::io::Result<Vec<u8>> {
    let file = File::open(path)?;
    let mut bytes = Vec::new();
    file.take(limit).read_to_end(&mut bytes)?;
    Ok(bytes)
}
