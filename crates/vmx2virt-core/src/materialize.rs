//! Output directory preparation.
//!
//! Creates the output directory and copies auxiliary files (NVRAM, logs
//! excluded) from the VM directory. Runs once, before any conversion.

use std::fs;
use std::path::Path;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::warning::{Stage, Warning};

/// Extensions that are converted, regenerated, or irrelevant to libvirt.
pub const SKIPPED_EXTENSIONS: &[&str] = &["vmdk", "vmx", "vmsd", "log"];

/// Files copied and problems found while preparing the output directory.
#[derive(Debug, Clone, Default)]
pub struct Materialized {
    pub created_dir: bool,
    /// Names of copied files, sorted.
    pub copied: Vec<String>,
    pub warnings: Vec<Warning>,
}

/// Create `output_dir` if needed and copy auxiliary files into it.
///
/// # Errors
///
/// Fails only if the output directory cannot be created or the input
/// directory cannot be listed. Individual copy failures become warnings.
pub fn prepare_output_dir(input_dir: &Path, output_dir: &Path) -> Result<Materialized> {
    let mut result = Materialized::default();

    if !output_dir.exists() {
        fs::create_dir_all(output_dir).map_err(|e| Error::io(e, output_dir))?;
        info!(dir = %output_dir.display(), "created output directory");
        result.created_dir = true;
    }

    let entries = fs::read_dir(input_dir).map_err(|e| Error::io(e, input_dir))?;
    let mut candidates = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| Error::io(e, input_dir))?.path();
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if path.is_file() && !SKIPPED_EXTENSIONS.contains(&ext) {
            candidates.push(path);
        }
    }
    candidates.sort();

    for path in candidates {
        let Some(name) = path.file_name() else {
            continue;
        };
        let file_name = name.to_string_lossy().into_owned();
        match fs::copy(&path, output_dir.join(name)) {
            Ok(_) => {
                debug!(file = %file_name, "copied auxiliary file");
                result.copied.push(file_name);
            }
            Err(e) => result.warnings.push(Warning::new(
                Stage::Materialize,
                &file_name,
                format!("Could not copy: {}", e),
            )),
        }
    }

    if !result.copied.is_empty() {
        info!(files = %result.copied.join(", "), "copied additional files");
    }

    Ok(result)
}
