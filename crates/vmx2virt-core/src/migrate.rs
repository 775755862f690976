//! Migration orchestrator.
//!
//! Coordinates the full conversion of one VMware VM directory:
//! 1. Discover and classify the VM's files
//! 2. Validate the source disks (hard stop if they look corrupt)
//! 3. Select the disks to convert
//! 4. Prepare the output directory
//! 5. Convert each disk and verify it before moving on
//! 6. Write the libvirt domain XML
//!
//! # Example
//!
//! ```no_run
//! use vmx2virt_core::migrate::{migrate_vm, MigrateOptions};
//! use std::path::Path;
//!
//! let report = migrate_vm(
//!     Path::new("/vms/win10"),
//!     Path::new("/var/lib/libvirt/images/win10"),
//!     MigrateOptions::default(),
//!     None,
//! )
//! .unwrap();
//! println!("descriptor: {}", report.descriptor_path.display());
//! ```

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::convert::{ConvertedDisk, ImageConverter};
use crate::discovery::{discover, VmSource};
use crate::domain::{descriptor_file_name, generate_domain};
use crate::error::{Error, Result};
use crate::materialize::prepare_output_dir;
use crate::pool::run_indexed;
use crate::selector::select_targets;
use crate::tools::{SystemRunner, ToolRunner, Toolchain};
use crate::verify::Verifier;
use crate::vmdk::{parse_descriptor, DiskRole, SourceDisk, VmdkDescriptor};
use crate::vmx::{parse_vmx, VmResourceConfig};
use crate::warning::{Stage, Warning};

/// Options for a migration run.
#[derive(Debug, Clone)]
pub struct MigrateOptions {
    /// External programs to use.
    pub toolchain: Toolchain,
    /// Number of disks converted concurrently (1 = strictly sequential).
    pub jobs: usize,
}

impl Default for MigrateOptions {
    fn default() -> Self {
        Self {
            toolchain: Toolchain::default(),
            jobs: 1,
        }
    }
}

impl MigrateOptions {
    pub fn new(toolchain: Toolchain, jobs: usize) -> Self {
        Self {
            toolchain,
            jobs: jobs.max(1),
        }
    }
}

/// Phase of the migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigratePhase {
    Discovering,
    Validating,
    Converting,
    Verifying,
    Describing,
    Complete,
}

impl fmt::Display for MigratePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigratePhase::Discovering => write!(f, "Discovering"),
            MigratePhase::Validating => write!(f, "Validating"),
            MigratePhase::Converting => write!(f, "Converting"),
            MigratePhase::Verifying => write!(f, "Verifying"),
            MigratePhase::Describing => write!(f, "Describing"),
            MigratePhase::Complete => write!(f, "Complete"),
        }
    }
}

/// Progress information for the migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrateProgress {
    pub phase: MigratePhase,
    /// Disk being processed (1-indexed), 0 outside the per-disk phases.
    pub current_disk: usize,
    pub total_disks: usize,
    pub disk_name: Option<String>,
}

impl MigrateProgress {
    pub fn new(phase: MigratePhase, total_disks: usize) -> Self {
        Self {
            phase,
            current_disk: 0,
            total_disks,
            disk_name: None,
        }
    }

    fn for_disk(phase: MigratePhase, index: usize, total_disks: usize, name: String) -> Self {
        Self {
            phase,
            current_disk: index + 1,
            total_disks,
            disk_name: Some(name),
        }
    }
}

/// Type alias for the progress callback function.
pub type ProgressCallback = Box<dyn Fn(MigrateProgress) + Send + Sync>;

/// How the run ended, given that it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    CompletedWithWarnings,
}

/// Outcome of a successful migration.
#[derive(Debug, Clone)]
pub struct MigrationReport {
    pub vm_name: String,
    pub output_dir: PathBuf,
    /// Converted disks in device order.
    pub converted: Vec<ConvertedDisk>,
    pub descriptor_path: PathBuf,
    /// Auxiliary files copied into the output directory.
    pub copied_files: Vec<String>,
    pub warnings: Vec<Warning>,
}

impl MigrationReport {
    pub fn status(&self) -> RunStatus {
        if self.warnings.is_empty() {
            RunStatus::Completed
        } else {
            RunStatus::CompletedWithWarnings
        }
    }
}

/// Convert a VMware VM directory using the system's external tools.
pub fn migrate_vm(
    input_dir: &Path,
    output_dir: &Path,
    options: MigrateOptions,
    progress_callback: Option<ProgressCallback>,
) -> Result<MigrationReport> {
    migrate_vm_with(&SystemRunner, input_dir, output_dir, options, progress_callback)
}

/// Convert a VMware VM directory, running external tools through `runner`.
///
/// Nothing is written before discovery, validation and target selection
/// have succeeded. A conversion failure leaves the disks converted so far
/// in the output directory.
pub fn migrate_vm_with(
    runner: &dyn ToolRunner,
    input_dir: &Path,
    output_dir: &Path,
    options: MigrateOptions,
    progress_callback: Option<ProgressCallback>,
) -> Result<MigrationReport> {
    let report_progress = |progress: MigrateProgress| {
        if let Some(ref callback) = progress_callback {
            callback(progress);
        }
    };

    report_progress(MigrateProgress::new(MigratePhase::Discovering, 0));
    let source = discover(input_dir)?;

    report_progress(MigrateProgress::new(MigratePhase::Validating, 0));
    let verifier = Verifier::new(runner, &options.toolchain);
    let validation = verifier.validate_source(&source)?;
    let mut warnings = validation.warnings;

    let targets = select_targets(&source.dir, &source.disks)?;
    let total = targets.len();

    let converter = ImageConverter::new(runner, &options.toolchain);
    converter.check_available()?;

    let materialized = prepare_output_dir(&source.dir, output_dir)?;
    warnings.extend(materialized.warnings);

    info!(count = total, "converting disk image(s)");
    let results = run_indexed(options.jobs, targets, |index, target| {
        let name = target.file_name();
        report_progress(MigrateProgress::for_disk(
            MigratePhase::Converting,
            index,
            total,
            name.clone(),
        ));
        let mut disk = converter.convert(target, output_dir)?;

        report_progress(MigrateProgress::for_disk(
            MigratePhase::Verifying,
            index,
            total,
            name.clone(),
        ));
        let mut disk_warnings = Vec::new();
        if disk.attempts.len() > 1 {
            disk_warnings.push(Warning::new(
                Stage::Conversion,
                &name,
                format!(
                    "detected as {} and converted as {} after the structured conversion failed",
                    disk.detected_format, disk.strategy
                ),
            ));
        }
        disk_warnings.extend(verifier.verify_converted(&mut disk));
        for warning in &disk_warnings {
            warn!(%warning, "disk warning");
        }
        Ok((disk, disk_warnings))
    })?;

    let mut converted = Vec::with_capacity(results.len());
    for (disk, disk_warnings) in results {
        converted.push(disk);
        warnings.extend(disk_warnings);
    }

    report_progress(MigrateProgress::new(MigratePhase::Describing, total));
    info!(vmx = %source.vmx_path.display(), "processing configuration file");
    let config = parse_vmx(&source.vmx_path)?;
    let xml = generate_domain(&source.name, &config, &converted)?;

    let descriptor_path = output_dir.join(descriptor_file_name(&source.name));
    fs::write(&descriptor_path, xml).map_err(|e| Error::io(e, &descriptor_path))?;
    info!(path = %descriptor_path.display(), "wrote domain descriptor");

    report_progress(MigrateProgress::new(MigratePhase::Complete, total));

    Ok(MigrationReport {
        vm_name: source.name,
        output_dir: output_dir.to_path_buf(),
        converted,
        descriptor_path,
        copied_files: materialized.copied,
        warnings,
    })
}

/// A classified disk, with its parsed descriptor when it has one.
#[derive(Debug, Clone)]
pub struct DiskSummary {
    pub disk: SourceDisk,
    pub descriptor: Option<VmdkDescriptor>,
}

/// Read-only view of a VM directory.
#[derive(Debug, Clone)]
pub struct VmInspection {
    pub name: String,
    pub vmx_path: PathBuf,
    pub config: VmResourceConfig,
    pub disks: Vec<DiskSummary>,
    /// Disks that would be converted, in device order. Empty if none.
    pub targets: Vec<PathBuf>,
    pub suspend_artifacts: Vec<PathBuf>,
}

/// Describe a VM directory without converting or probing anything.
pub fn inspect_vm(input_dir: &Path) -> Result<VmInspection> {
    let source = discover(input_dir)?;
    let config = parse_vmx(&source.vmx_path)?;

    let targets = select_targets(&source.dir, &source.disks)
        .map(|targets| targets.iter().map(|d| d.path.clone()).collect())
        .unwrap_or_default();

    let disks = source.disks.iter().map(summarize).collect();
    let VmSource {
        name,
        vmx_path,
        memory_dumps,
        suspend_states,
        ..
    } = source;

    Ok(VmInspection {
        name,
        vmx_path,
        config,
        disks,
        targets,
        suspend_artifacts: memory_dumps.into_iter().chain(suspend_states).collect(),
    })
}

fn summarize(disk: &SourceDisk) -> DiskSummary {
    let descriptor = if disk.role.is_descriptor() {
        fs::read(&disk.path)
            .ok()
            .and_then(|bytes| parse_descriptor(&String::from_utf8_lossy(&bytes)).ok())
    } else {
        None
    };
    DiskSummary {
        disk: disk.clone(),
        descriptor,
    }
}

/// Number of disks of each role, for display.
pub fn role_counts(disks: &[DiskSummary]) -> [(DiskRole, usize); 4] {
    let count = |role| disks.iter().filter(|d| d.disk.role == role).count();
    [
        (DiskRole::Descriptor, count(DiskRole::Descriptor)),
        (DiskRole::SnapshotDescriptor, count(DiskRole::SnapshotDescriptor)),
        (DiskRole::Flat, count(DiskRole::Flat)),
        (DiskRole::Unknown, count(DiskRole::Unknown)),
    ]
}
