//! Error types for the vmx2virt core library.
//!
//! Only conditions that must stop a migration are errors. Everything else
//! (unreadable files during classification, probe failures, sniffer
//! ambiguity) is collected as a [`Warning`](crate::warning::Warning).

use std::path::PathBuf;

/// The main error type for vmx2virt operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error with optional path context.
    #[error("I/O error{}: {source}", path.as_ref().map(|p| format!(" at '{}'", p.display())).unwrap_or_default())]
    Io {
        source: std::io::Error,
        path: Option<PathBuf>,
    },

    /// The input directory is missing, unreadable, or holds no VM files.
    #[error("Discovery failed: {message}")]
    Discovery { message: String },

    /// Source disks have no partition table and nothing explains why.
    #[error("Source VM does not look bootable: {}", disks.join(", "))]
    SourceNotBootable { disks: Vec<String> },

    /// Every discovered disk was excluded from conversion.
    #[error("No convertible disks found in '{}'", dir.display())]
    NoConvertibleDisks { dir: PathBuf },

    /// The image tool failed to convert a disk.
    #[error("Failed to convert {disk}: {diagnostic}")]
    ConversionFailed { disk: String, diagnostic: String },

    /// A converted image disappeared before the descriptor was written.
    #[error("Disk file does not exist: {}", path.display())]
    DiskPathMissing { path: PathBuf },

    /// A required external tool could not be run.
    #[error("{tool} not found. {hint}")]
    ToolUnavailable { tool: String, hint: String },
}

/// A specialized Result type for vmx2virt operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an I/O error with path context.
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io {
            source,
            path: Some(path.into()),
        }
    }

    /// Create an I/O error without path context.
    pub fn io_simple(source: std::io::Error) -> Self {
        Self::Io { source, path: None }
    }

    /// Create a discovery error.
    pub fn discovery(message: impl Into<String>) -> Self {
        Self::Discovery {
            message: message.into(),
        }
    }

    /// Create a conversion error for the named disk.
    pub fn conversion(disk: impl Into<String>, diagnostic: impl Into<String>) -> Self {
        Self::ConversionFailed {
            disk: disk.into(),
            diagnostic: diagnostic.into(),
        }
    }

    /// Create a missing-tool error with an installation hint.
    pub fn tool_unavailable(tool: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::ToolUnavailable {
            tool: tool.into(),
            hint: hint.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Self::io_simple(source)
    }
}
