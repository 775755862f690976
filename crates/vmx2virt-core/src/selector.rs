//! Conversion target selection.

use std::path::Path;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::vmdk::{DiskRole, SourceDisk};

/// Pick the disks to convert, preserving discovery order.
///
/// Base descriptors are preferred: the image tool follows their extent
/// pointers to the data files. Only when a directory has no base descriptor
/// are the data files converted directly. Snapshot descriptors are never
/// selected.
///
/// # Errors
///
/// Returns [`Error::NoConvertibleDisks`] when nothing is left to convert.
pub fn select_targets<'a>(dir: &Path, disks: &'a [SourceDisk]) -> Result<Vec<&'a SourceDisk>> {
    let mut descriptors = Vec::new();
    let mut data_files = Vec::new();

    for disk in disks {
        match disk.role {
            DiskRole::Descriptor => descriptors.push(disk),
            DiskRole::SnapshotDescriptor => {
                debug!(disk = %disk.file_name(), "skipping snapshot descriptor");
            }
            DiskRole::Flat | DiskRole::Unknown => data_files.push(disk),
        }
    }

    let targets = if descriptors.is_empty() {
        info!(count = data_files.len(), "using monolithic disk file(s)");
        data_files
    } else {
        info!(count = descriptors.len(), "using disk descriptor(s)");
        descriptors
    };

    if targets.is_empty() {
        return Err(Error::NoConvertibleDisks {
            dir: dir.to_path_buf(),
        });
    }

    Ok(targets)
}
