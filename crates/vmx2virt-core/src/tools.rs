//! External tool invocation.
//!
//! Every external process (image tool, partition reader, sniffer) goes
//! through [`ToolRunner`], so the conversion and verification logic can be
//! exercised against scripted output in tests.

use std::ffi::OsStr;
use std::io;
use std::process::Command;

use tracing::debug;

/// Captured result of one tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Whether the process exited with status 0.
    pub success: bool,
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// A successful run with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed run with the given stderr.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// The most useful diagnostic text: stderr, else stdout, else the code.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        match self.code {
            Some(code) => format!("exited with status {}", code),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Runs an external program to completion and captures its output.
///
/// An `Err` means the program could not be started at all; a program that
/// ran and failed is an `Ok` with `success == false`.
pub trait ToolRunner: Send + Sync {
    fn run(&self, program: &str, args: &[&OsStr]) -> io::Result<ToolOutput>;
}

/// [`ToolRunner`] backed by `std::process::Command`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl ToolRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&OsStr]) -> io::Result<ToolOutput> {
        debug!(program, ?args, "running tool");
        let output = Command::new(program).args(args).output()?;

        Ok(ToolOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Names (or paths) of the external programs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    /// Image introspection and conversion tool.
    pub image_tool: String,
    /// Partition-table reader.
    pub partition_reader: String,
    /// Content-type sniffer.
    pub sniffer: String,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            image_tool: "qemu-img".to_string(),
            partition_reader: "fdisk".to_string(),
            sniffer: "file".to_string(),
        }
    }
}

/// Installation hint printed when the image tool is missing.
pub const IMAGE_TOOL_HINT: &str = "Please install the qemu-utils package:\n  \
     Ubuntu/Debian: sudo apt-get install qemu-utils\n  \
     CentOS/RHEL: sudo yum install qemu-img\n  \
     Fedora: sudo dnf install qemu-img";
