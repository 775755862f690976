//! vmx2virt CLI - Convert VMware VMs to libvirt/KVM.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;
use vmx2virt_core::domain::device_name;
use vmx2virt_core::migrate::role_counts;
use vmx2virt_core::{
    inspect_vm, migrate_vm, Error, MigrateOptions, MigratePhase, MigrateProgress,
    MigrationReport, RunStatus, Toolchain,
};

/// Convert a VMware VM directory into qcow2 disks and a libvirt domain.
#[derive(Parser)]
#[command(name = "vmx2virt")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable verbose (debug) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a VMware VM to a libvirt/KVM VM.
    Convert {
        /// Directory containing the VMware VM files (.vmx, .vmdk).
        input_dir: PathBuf,

        /// Directory where the converted files will be created.
        output_dir: PathBuf,

        /// Do not ask before writing into a non-empty output directory.
        #[arg(short, long)]
        yes: bool,

        /// Number of disks to convert concurrently.
        #[arg(short, long, default_value = "1")]
        jobs: usize,

        /// Image conversion tool.
        #[arg(long, default_value = "qemu-img")]
        qemu_img: String,

        /// Partition-table reader.
        #[arg(long, default_value = "fdisk")]
        fdisk: String,

        /// Content-type sniffer.
        #[arg(long, default_value = "file")]
        file: String,

        /// Suppress progress output and the conversion summary. Warnings
        /// are still listed.
        #[arg(short, long)]
        quiet: bool,
    },

    /// Display how a VMware VM directory would be converted.
    Inspect {
        /// Directory containing the VMware VM files.
        input_dir: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Convert {
            input_dir,
            output_dir,
            yes,
            jobs,
            qemu_img,
            fdisk,
            file,
            quiet,
        } => {
            let toolchain = Toolchain {
                image_tool: qemu_img,
                partition_reader: fdisk,
                sniffer: file,
            };
            run_convert(&input_dir, &output_dir, toolchain, jobs, yes, quiet)
        }
        Commands::Inspect { input_dir } => show_inspection(&input_dir),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            if let Some(Error::SourceNotBootable { .. }) = err.downcast_ref::<Error>() {
                print_not_bootable_help();
            }
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(io::stderr)
        .init();
}

fn run_convert(
    input_dir: &Path,
    output_dir: &Path,
    toolchain: Toolchain,
    jobs: usize,
    yes: bool,
    quiet: bool,
) -> Result<()> {
    if !yes && is_non_empty_dir(output_dir)? && !confirm(output_dir)? {
        bail!("Operation cancelled by user");
    }

    if !quiet {
        println!(
            "Starting conversion from '{}' to '{}'",
            input_dir.display(),
            output_dir.display()
        );
    }

    let progress_bar = if quiet {
        None
    } else {
        let pb = ProgressBar::new(0);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-");
        pb.set_style(style);
        Some(pb)
    };

    let callback: Option<vmx2virt_core::ProgressCallback> = progress_bar.clone().map(|pb| {
        Box::new(move |progress: MigrateProgress| {
            pb.set_length(progress.total_disks as u64);
            let disk = progress.disk_name.as_deref().unwrap_or_default();
            match progress.phase {
                MigratePhase::Discovering => pb.set_message("Discovering..."),
                MigratePhase::Validating => pb.set_message("Validating VM..."),
                MigratePhase::Converting => {
                    pb.set_position(progress.current_disk.saturating_sub(1) as u64);
                    pb.set_message(format!("Converting {}", disk));
                }
                MigratePhase::Verifying => pb.set_message(format!("Verifying {}", disk)),
                MigratePhase::Describing => {
                    pb.set_position(progress.total_disks as u64);
                    pb.set_message("Writing domain XML...");
                }
                MigratePhase::Complete => pb.set_message("Complete!"),
            }
        }) as vmx2virt_core::ProgressCallback
    });

    let options = MigrateOptions::new(toolchain, jobs);
    let outcome = migrate_vm(input_dir, output_dir, options, callback);

    if let Some(pb) = &progress_bar {
        match &outcome {
            Ok(_) => pb.finish_with_message("Complete!"),
            Err(_) => pb.abandon_with_message("Failed"),
        }
    }
    let report = outcome.context("Conversion aborted")?;

    print!("{}", render_summary(&report, quiet));
    Ok(())
}

/// Text printed after a successful conversion. Quiet mode keeps only the
/// warning list.
fn render_summary(report: &MigrationReport, quiet: bool) -> String {
    let mut out = String::new();

    if !quiet {
        out.push('\n');
        for (index, disk) in report.converted.iter().enumerate() {
            out.push_str(&format!(
                "  {} {} -> {} (as {}{})\n",
                device_name(index),
                disk.source_path.display(),
                disk.output_name(),
                disk.strategy,
                if disk.verified() { ", partition table ok" } else { "" }
            ));
        }
        if !report.copied_files.is_empty() {
            out.push_str(&format!(
                "Copied additional files: {}\n",
                report.copied_files.join(", ")
            ));
        }
    }

    if !report.warnings.is_empty() {
        out.push_str("\nWarnings:\n");
        for warning in &report.warnings {
            out.push_str(&format!("  - {}\n", warning));
        }
    }

    if quiet {
        return out;
    }

    out.push('\n');
    out.push_str(match report.status() {
        RunStatus::Completed => "Conversion completed successfully!\n",
        RunStatus::CompletedWithWarnings => "Conversion completed with warnings.\n",
    });
    out.push_str(&format!(
        "VM files converted to: {}\n",
        report.output_dir.display()
    ));
    out.push_str(&format!(
        "Configuration file:    {}\n",
        report.descriptor_path.display()
    ));
    out.push_str("\nTo import and start the VM:\n");
    out.push_str(&format!(
        "  1. Define the VM: sudo virsh define {}\n",
        report.descriptor_path.display()
    ));
    out.push_str(&format!(
        "  2. Start the VM:  sudo virsh start {}\n",
        report.vm_name
    ));
    out.push_str("  3. Open virt-manager to view the VM console\n");
    out
}

fn show_inspection(input_dir: &Path) -> Result<()> {
    let info = inspect_vm(input_dir)?;

    println!("VM Information");
    println!("==============");
    println!();
    println!("Name:      {}", info.name);
    println!("VMX:       {}", info.vmx_path.display());
    println!("Guest OS:  {}", info.config.guest_os().unwrap_or("unknown"));
    println!("CPUs:      {}", info.config.vcpus());
    println!("Memory:    {} MB", info.config.memory_mb());
    println!();

    println!("Disk files:");
    for summary in &info.disks {
        println!(
            "  {} - {} ({})",
            summary.disk.file_name(),
            format_bytes(summary.disk.byte_size),
            summary.disk.role
        );
        if let Some(descriptor) = &summary.descriptor {
            println!(
                "      createType {}, {} extent(s), {}",
                descriptor.create_type,
                descriptor.extents.len(),
                format_bytes(descriptor.disk_size_bytes())
            );
            if let Some(parent) = &descriptor.parent_file_name_hint {
                println!("      parent {}", parent);
            }
        }
    }
    let counts: Vec<String> = role_counts(&info.disks)
        .iter()
        .filter(|(_, n)| *n > 0)
        .map(|(role, n)| format!("{} {}", n, role))
        .collect();
    println!("  ({})", counts.join(", "));
    println!();

    if info.targets.is_empty() {
        println!("Conversion targets: none");
    } else {
        println!("Conversion targets:");
        for (index, path) in info.targets.iter().enumerate() {
            println!("  {} <- {}", device_name(index), path.display());
        }
    }

    if !info.suspend_artifacts.is_empty() {
        println!();
        println!("Suspend/crash artifacts (VM may not have been shut down cleanly):");
        for path in &info.suspend_artifacts {
            println!("  {}", path.display());
        }
    }

    Ok(())
}

fn is_non_empty_dir(path: &Path) -> Result<bool> {
    if !path.is_dir() {
        return Ok(false);
    }
    let mut entries = std::fs::read_dir(path)
        .with_context(|| format!("Cannot read output directory '{}'", path.display()))?;
    Ok(entries.next().is_some())
}

fn confirm(output_dir: &Path) -> Result<bool> {
    print!(
        "Output directory '{}' is not empty. Continue? [y/N] ",
        output_dir.display()
    );
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn print_not_bootable_help() {
    eprintln!();
    eprintln!("This VMware VM appears to be corrupted or non-bootable.");
    eprintln!("Possible causes:");
    eprintln!("  - VM was not properly shut down");
    eprintln!("  - VM is in suspended/snapshot state");
    eprintln!("  - Disk corruption occurred");
    eprintln!("  - VM was never bootable to begin with");
    eprintln!();
    eprintln!("Recommendations:");
    eprintln!("  - Boot the VM in VMware first to verify it works");
    eprintln!("  - Properly shut down the VM before conversion");
    eprintln!("  - Delete any snapshots and memory files");
    eprintln!("  - Use VMware's disk repair tools if needed");
}

/// Format bytes as human-readable string.
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmx2virt_core::{Stage, Warning};

    fn report(warnings: Vec<Warning>) -> MigrationReport {
        MigrationReport {
            vm_name: "win10".to_string(),
            output_dir: PathBuf::from("/out"),
            converted: Vec::new(),
            descriptor_path: PathBuf::from("/out/win10.xml"),
            copied_files: vec!["win10.nvram".to_string()],
            warnings,
        }
    }

    #[test]
    fn test_quiet_summary_keeps_warnings() {
        let warning = Warning::new(Stage::Verification, "win10.qcow2", "no partition table");
        let summary = render_summary(&report(vec![warning]), true);

        assert!(summary.contains("Warnings:"));
        assert!(summary.contains("[verification] win10.qcow2: no partition table"));
        assert!(!summary.contains("virsh"));
        assert!(!summary.contains("win10.nvram"));
    }

    #[test]
    fn test_quiet_summary_without_warnings_is_empty() {
        assert!(render_summary(&report(Vec::new()), true).is_empty());
    }

    #[test]
    fn test_full_summary() {
        let summary = render_summary(&report(Vec::new()), false);
        assert!(summary.contains("Copied additional files: win10.nvram"));
        assert!(summary.contains("Conversion completed successfully!"));
        assert!(summary.contains("sudo virsh define /out/win10.xml"));
        assert!(summary.contains("sudo virsh start win10"));
        assert!(!summary.contains("Warnings:"));
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00 GB");
    }
}
