//! Bootability checks.
//!
//! Two probes are used, both through external tools: a partition-table
//! reader (`fdisk -l`) and a content-type sniffer (`file -s`). After
//! conversion their findings are advisory only. Before conversion, a source
//! disk without a partition table, in a VM that was not suspended, stops the
//! run.

use std::ffi::OsStr;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::convert::ConvertedDisk;
use crate::discovery::VmSource;
use crate::error::{Error, Result};
use crate::repair;
use crate::tools::{ToolRunner, Toolchain};
use crate::warning::{Stage, Warning};

/// Disks smaller than this are not sniffed during source validation.
pub const MIN_SNIFF_SIZE: u64 = 1024;

/// Markers in partition-reader output that indicate a disk label.
const DISK_LABEL_MARKERS: &[&str] = &["Disklabel type:", "Device"];

/// Outcome of the partition-table probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionProbe {
    Found,
    Missing,
    /// The reader could not be run.
    Failed(String),
}

impl PartitionProbe {
    /// Interpret partition-reader stdout.
    pub fn from_output(stdout: &str) -> Self {
        if DISK_LABEL_MARKERS.iter().any(|m| stdout.contains(m)) {
            PartitionProbe::Found
        } else {
            PartitionProbe::Missing
        }
    }
}

/// Outcome of the content-type sniffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signature {
    /// A boot sector or filesystem was recognized.
    BootOrFilesystem(String),
    /// The sniffer saw nothing but undifferentiated data.
    Data,
    /// Something else was recognized.
    Unrecognized(String),
    /// The sniffer could not be run.
    Failed(String),
}

impl Signature {
    /// Interpret a sniffer description (the text after `path: `).
    pub fn from_description(description: &str) -> Self {
        let description = description.trim();
        let lower = description.to_lowercase();
        if lower.contains("boot sector") || lower.contains("filesystem") {
            Signature::BootOrFilesystem(description.to_string())
        } else if description == "data" {
            Signature::Data
        } else {
            Signature::Unrecognized(description.to_string())
        }
    }

    /// Whether the description points at a DOS/Windows boot sector.
    pub fn is_dos_boot(&self) -> bool {
        match self {
            Signature::BootOrFilesystem(d) | Signature::Unrecognized(d) => {
                d.contains("DOS/MBR boot sector") || d.contains("Microsoft")
            }
            Signature::Data | Signature::Failed(_) => false,
        }
    }

    pub fn is_boot_or_filesystem(&self) -> bool {
        matches!(self, Signature::BootOrFilesystem(_))
    }
}

/// Strip the `path: ` prefix the sniffer puts in front of its description.
fn sniff_description<'a>(stdout: &'a str, path: &Path) -> &'a str {
    let stdout = stdout.trim();
    let prefix = format!("{}:", path.display());
    if let Some(rest) = stdout.strip_prefix(prefix.as_str()) {
        return rest.trim();
    }
    stdout
        .split_once(": ")
        .map(|(_, description)| description.trim())
        .unwrap_or(stdout)
}

/// Result of pre-conversion validation.
#[derive(Debug, Clone, Default)]
pub struct SourceValidation {
    pub warnings: Vec<Warning>,
    /// Number of source disks with a partition table.
    pub bootable_disks: usize,
}

/// Runs the partition and signature probes.
pub struct Verifier<'a> {
    runner: &'a dyn ToolRunner,
    toolchain: &'a Toolchain,
}

impl<'a> Verifier<'a> {
    pub fn new(runner: &'a dyn ToolRunner, toolchain: &'a Toolchain) -> Self {
        Self { runner, toolchain }
    }

    /// Run the partition-table reader against `path`.
    pub fn probe_partition_table(&self, path: &Path) -> PartitionProbe {
        let args = [OsStr::new("-l"), path.as_os_str()];
        match self.runner.run(&self.toolchain.partition_reader, &args) {
            Ok(output) => PartitionProbe::from_output(&output.stdout),
            Err(e) => PartitionProbe::Failed(e.to_string()),
        }
    }

    /// Run the content-type sniffer against `path`.
    pub fn sniff(&self, path: &Path) -> Signature {
        let args = [OsStr::new("-s"), path.as_os_str()];
        match self.runner.run(&self.toolchain.sniffer, &args) {
            Ok(output) if output.success => {
                Signature::from_description(sniff_description(&output.stdout, path))
            }
            Ok(output) => Signature::Failed(output.diagnostic()),
            Err(e) => Signature::Failed(e.to_string()),
        }
    }

    /// Check a freshly converted image and record the result on it.
    ///
    /// Never fails; problems are returned as warnings.
    pub fn verify_converted(&self, disk: &mut ConvertedDisk) -> Vec<Warning> {
        let path = disk.output_path.clone();
        let name = disk.output_name();
        let mut warnings = Vec::new();

        let has_table = match self.probe_partition_table(&path) {
            PartitionProbe::Found => {
                info!(disk = %name, "partition table detected in converted disk");
                true
            }
            PartitionProbe::Missing => {
                warn!(disk = %name, "no partition table detected in converted disk");
                warnings.push(self.advise_repair(&path, &name));
                false
            }
            PartitionProbe::Failed(e) => {
                warnings.push(Warning::new(
                    Stage::Verification,
                    &name,
                    format!("Could not verify disk structure: {}", e),
                ));
                false
            }
        };

        match self.sniff(&path) {
            Signature::BootOrFilesystem(d) => {
                debug!(disk = %name, signature = %d, "boot/filesystem signature found")
            }
            Signature::Data => warnings.push(Warning::new(
                Stage::Verification,
                &name,
                "shows as 'data' with no recognizable structure",
            )),
            Signature::Unrecognized(d) => debug!(disk = %name, signature = %d, "signature"),
            Signature::Failed(e) => warnings.push(Warning::new(
                Stage::Verification,
                &name,
                format!("Could not check boot signature: {}", e),
            )),
        }

        disk.mark_verified(has_table);
        warnings
    }

    /// Diagnose an image without a partition table.
    fn advise_repair(&self, path: &Path, name: &str) -> Warning {
        let signature = self.sniff(path);
        let message = if signature.is_dos_boot() {
            info!(disk = %name, "Windows/DOS boot sector detected, creating backup");
            match repair::create_backup(path) {
                Ok(backup) => repair::dos_repair_advice(&backup),
                Err(e) => {
                    warn!(disk = %name, error = %e, "image backup failed");
                    repair::backup_failed_advice(&e)
                }
            }
        } else {
            repair::UNDIAGNOSED_ADVICE.to_string()
        };
        Warning::new(Stage::Verification, name, message)
    }

    /// Pre-conversion validation of every discovered disk.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SourceNotBootable`] when a data disk has no
    /// partition table and the VM left no suspend artifacts that would
    /// explain it.
    pub fn validate_source(&self, source: &VmSource) -> Result<SourceValidation> {
        let mut report = SourceValidation::default();

        if !source.memory_dumps.is_empty() {
            report.warnings.push(Warning::new(
                Stage::Validation,
                &source.name,
                format!(
                    "Found {} memory dump files (.vmem) - VM may have been suspended or crashed",
                    source.memory_dumps.len()
                ),
            ));
        }
        if !source.suspend_states.is_empty() {
            report.warnings.push(Warning::new(
                Stage::Validation,
                &source.name,
                format!(
                    "Found {} snapshot files (.vmss) - VM may be in suspended state",
                    source.suspend_states.len()
                ),
            ));
        }

        let mut missing_table = Vec::new();
        for disk in &source.disks {
            let name = disk.file_name();
            match self.probe_partition_table(&disk.path) {
                PartitionProbe::Found => {
                    info!(disk = %name, "has valid partition table");
                    report.bootable_disks += 1;
                }
                PartitionProbe::Missing if disk.role.is_descriptor() => {
                    debug!(disk = %name, "descriptor file, skipping partition check");
                }
                PartitionProbe::Missing => missing_table.push(name),
                PartitionProbe::Failed(e) => report.warnings.push(Warning::new(
                    Stage::Validation,
                    &name,
                    format!("Could not analyze: {}", e),
                )),
            }
        }

        for disk in source.disks.iter().filter(|d| d.byte_size >= MIN_SNIFF_SIZE) {
            let name = disk.file_name();
            match self.sniff(&disk.path) {
                Signature::BootOrFilesystem(d) => {
                    info!(disk = %name, signature = %d, "recognizable boot/filesystem signature");
                }
                Signature::Data => report.warnings.push(Warning::new(
                    Stage::Validation,
                    &name,
                    "shows as 'data' with no recognizable structure",
                )),
                Signature::Unrecognized(_) => {}
                Signature::Failed(e) => report.warnings.push(Warning::new(
                    Stage::Validation,
                    &name,
                    format!("Could not check boot signature: {}", e),
                )),
            }
        }

        if !missing_table.is_empty() && !source.has_suspend_artifacts() {
            return Err(Error::SourceNotBootable {
                disks: missing_table,
            });
        }

        for name in missing_table {
            report.warnings.push(Warning::new(
                Stage::Validation,
                &name,
                "has no partition table and may not be bootable",
            ));
        }

        if report.bootable_disks == 0 && report.warnings.is_empty() {
            info!("no bootable disks detected; the converted VM may not boot");
        }

        Ok(report)
    }
}
