//! Non-fatal findings collected during a migration.

use std::fmt;

/// Pipeline stage that produced a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Scanning and classifying the input directory.
    Discovery,
    /// Pre-conversion checks on the source disks.
    Validation,
    /// Running the image tool.
    Conversion,
    /// Post-conversion checks on the converted images.
    Verification,
    /// Creating the output directory and copying auxiliary files.
    Materialize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Discovery => write!(f, "discovery"),
            Stage::Validation => write!(f, "validation"),
            Stage::Conversion => write!(f, "conversion"),
            Stage::Verification => write!(f, "verification"),
            Stage::Materialize => write!(f, "materialize"),
        }
    }
}

/// A single warning, attached to the file or directory it concerns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    /// Stage that raised the warning.
    pub stage: Stage,
    /// File name (or other short label) the warning is about.
    pub subject: String,
    /// Human-readable explanation, possibly with remediation steps.
    pub message: String,
}

impl Warning {
    pub fn new(stage: Stage, subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stage,
            subject: subject.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.stage, self.subject, self.message)
    }
}
