//! Input directory discovery.
//!
//! Finds the VMX file, the disk-container files and any suspend artifacts in
//! a VMware VM directory. Nothing is written.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::vmdk::{classify_file, SourceDisk};

/// Memory dump left behind by a suspended or crashed VM.
pub const MEMORY_DUMP_EXTENSION: &str = "vmem";

/// Suspend state file.
pub const SUSPEND_STATE_EXTENSION: &str = "vmss";

/// Everything found in a VMware VM directory.
#[derive(Debug, Clone)]
pub struct VmSource {
    /// The input directory.
    pub dir: PathBuf,
    /// VM name, taken from the VMX file stem.
    pub name: String,
    pub vmx_path: PathBuf,
    /// Classified disk-container files in discovery order.
    pub disks: Vec<SourceDisk>,
    /// `.vmem` files, sorted.
    pub memory_dumps: Vec<PathBuf>,
    /// `.vmss` files, sorted.
    pub suspend_states: Vec<PathBuf>,
}

impl VmSource {
    /// Whether the VM left suspend or crash artifacts behind.
    pub fn has_suspend_artifacts(&self) -> bool {
        !self.memory_dumps.is_empty() || !self.suspend_states.is_empty()
    }
}

/// Scan and classify a VM directory.
///
/// Files are listed in file-name order so that repeated runs over the same
/// directory produce the same disk order.
///
/// # Errors
///
/// Returns [`Error::Discovery`] if the directory is missing or unreadable,
/// or if it contains no `.vmx` or no `.vmdk` files.
pub fn discover(dir: &Path) -> Result<VmSource> {
    if !dir.exists() {
        return Err(Error::discovery(format!(
            "Input directory '{}' does not exist",
            dir.display()
        )));
    }
    if !dir.is_dir() {
        return Err(Error::discovery(format!(
            "Input path '{}' is not a directory",
            dir.display()
        )));
    }

    let vmx_files = list_with_extension(dir, "vmx")?;
    let vmx_path = vmx_files.into_iter().next().ok_or_else(|| {
        Error::discovery(format!(
            "No VMware configuration (.vmx) file found in '{}'",
            dir.display()
        ))
    })?;
    let name = vmx_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    info!(vm = %name, "found VMware VM");

    let vmdk_files = list_with_extension(dir, "vmdk")?;
    if vmdk_files.is_empty() {
        return Err(Error::discovery(format!(
            "No VMware disk (.vmdk) files found in '{}'",
            dir.display()
        )));
    }

    let disks: Vec<SourceDisk> = vmdk_files.iter().map(|p| classify_file(p)).collect();
    debug!(count = disks.len(), "classified disk files");

    Ok(VmSource {
        dir: dir.to_path_buf(),
        name,
        vmx_path,
        disks,
        memory_dumps: list_with_extension(dir, MEMORY_DUMP_EXTENSION)?,
        suspend_states: list_with_extension(dir, SUSPEND_STATE_EXTENSION)?,
    })
}

/// List regular files in `dir` with exactly the given extension, sorted.
pub fn list_with_extension(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| {
        Error::discovery(format!("Cannot read directory '{}': {}", dir.display(), e))
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(e, dir))?;
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == extension) {
            files.push(path);
        }
    }

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}
