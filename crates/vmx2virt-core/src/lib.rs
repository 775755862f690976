//! vmx2virt Core Library
//!
//! This crate provides the core functionality for converting VMware VMs to
//! libvirt/KVM.
//!
//! # Overview
//!
//! vmx2virt takes a VMware VM directory (VMX + VMDK files), converts its
//! disks to qcow2 with `qemu-img`, checks that the results still look
//! bootable, and writes a libvirt domain XML that references them. The main
//! entry point is [`migrate_vm`].
//!
//! # Modules
//!
//! - [`error`] - Error types and Result alias
//! - [`warning`] - Non-fatal findings
//! - [`discovery`] - Input directory scanning
//! - [`vmdk`] - Disk classification and descriptor parsing
//! - [`selector`] - Choosing which disks to convert
//! - [`tools`] - External tool invocation
//! - [`convert`] - Image conversion with format fallback
//! - [`verify`] - Partition-table and boot-signature checks
//! - [`repair`] - Backup and repair advice for unbootable images
//! - [`pool`] - Bounded worker pool for per-disk work
//! - [`vmx`] - VMX file parsing
//! - [`domain`] - libvirt domain XML generation
//! - [`materialize`] - Output directory preparation
//! - [`migrate`] - Orchestrator coordinating the full run
//!
//! # Quick Start
//!
//! ```no_run
//! use vmx2virt_core::{migrate_vm, MigrateOptions};
//! use std::path::Path;
//!
//! let input = Path::new("/vms/ubuntu");
//! let output = Path::new("/vms/ubuntu-kvm");
//!
//! let report = migrate_vm(input, output, MigrateOptions::default(), None).unwrap();
//! for warning in &report.warnings {
//!     eprintln!("{}", warning);
//! }
//! ```

pub mod convert;
pub mod discovery;
pub mod domain;
pub mod error;
pub mod materialize;
pub mod migrate;
pub mod pool;
pub mod repair;
pub mod selector;
pub mod tools;
pub mod verify;
pub mod vmdk;
pub mod vmx;
pub mod warning;

pub use error::{Error, Result};
pub use warning::{Stage, Warning};

pub use convert::{ConversionAttempt, ConvertedDisk, SourceFormat};
pub use migrate::{
    inspect_vm, migrate_vm, migrate_vm_with, DiskSummary, MigrateOptions, MigratePhase,
    MigrateProgress, MigrationReport, ProgressCallback, RunStatus, VmInspection,
};
pub use tools::{SystemRunner, ToolOutput, ToolRunner, Toolchain};
pub use vmdk::{DiskRole, SourceDisk};
