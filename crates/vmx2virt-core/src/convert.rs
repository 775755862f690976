//! Disk image conversion.
//!
//! Conversion is delegated to the image tool (`qemu-img`). This module
//! decides which source format to tell it about: the detected one, or for
//! disks detected as raw, `vmdk` first and `raw` as a fallback. Some VMware
//! tooling produces structured disks that probe as raw; reading them as raw
//! yields an image without the embedded partition table.

use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::tools::{ToolRunner, Toolchain, IMAGE_TOOL_HINT};
use crate::vmdk::SourceDisk;

/// Output container format.
pub const TARGET_FORMAT: &str = "qcow2";

/// Source format tag passed to the image tool with `-f`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Vmdk,
    Raw,
    Qcow2,
    Vpc,
    Vhdx,
    Vdi,
}

impl SourceFormat {
    /// Interpret the image tool's format hint. Unknown or missing hints are
    /// read as `vmdk`, the format every disk in a VMware directory claims.
    pub fn from_hint(hint: Option<&str>) -> Self {
        match hint.map(str::trim) {
            Some("raw") => SourceFormat::Raw,
            Some("qcow2") => SourceFormat::Qcow2,
            Some("vpc") => SourceFormat::Vpc,
            Some("vhdx") => SourceFormat::Vhdx,
            Some("vdi") => SourceFormat::Vdi,
            _ => SourceFormat::Vmdk,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SourceFormat::Vmdk => "vmdk",
            SourceFormat::Raw => "raw",
            SourceFormat::Qcow2 => "qcow2",
            SourceFormat::Vpc => "vpc",
            SourceFormat::Vhdx => "vhdx",
            SourceFormat::Vdi => "vdi",
        }
    }

    /// Format tags to try, in order, for a disk detected as `self`.
    pub fn strategies(self) -> Vec<SourceFormat> {
        match self {
            SourceFormat::Raw => vec![SourceFormat::Vmdk, SourceFormat::Raw],
            other => vec![other],
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One invocation of the image tool's convert command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionAttempt {
    /// Format tag passed with `-f`.
    pub format: SourceFormat,
    pub succeeded: bool,
    /// Tool diagnostic for failed attempts.
    pub diagnostic: Option<String>,
}

/// A successfully converted disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedDisk {
    pub source_path: PathBuf,
    pub output_path: PathBuf,
    /// Format reported by the image tool's info command.
    pub detected_format: SourceFormat,
    /// Format tag of the attempt that succeeded.
    pub strategy: SourceFormat,
    /// Every attempt made, in order. The last one succeeded.
    pub attempts: Vec<ConversionAttempt>,
    verified: Option<bool>,
}

impl ConvertedDisk {
    /// Whether post-conversion verification found a partition table.
    /// `false` until the disk has been verified.
    pub fn verified(&self) -> bool {
        self.verified.unwrap_or(false)
    }

    /// Whether verification has run.
    pub fn is_checked(&self) -> bool {
        self.verified.is_some()
    }

    pub(crate) fn mark_verified(&mut self, verified: bool) {
        debug_assert!(self.verified.is_none(), "disk verified twice");
        self.verified = Some(verified);
    }

    /// Output file name for display.
    pub fn output_name(&self) -> String {
        self.output_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// The subset of `qemu-img info --output=json` this crate reads.
#[derive(Debug, Deserialize)]
struct ImageInfo {
    format: Option<String>,
}

/// Output path for a source disk: same stem, qcow2 extension.
pub fn output_path_for(source: &Path, output_dir: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "disk".to_string());
    output_dir.join(format!("{}.{}", stem, TARGET_FORMAT))
}

/// Drives the image tool for format detection and conversion.
pub struct ImageConverter<'a> {
    runner: &'a dyn ToolRunner,
    tool: &'a str,
}

impl<'a> ImageConverter<'a> {
    pub fn new(runner: &'a dyn ToolRunner, toolchain: &'a Toolchain) -> Self {
        Self {
            runner,
            tool: &toolchain.image_tool,
        }
    }

    /// Check that the image tool can be run and return its version line.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ToolUnavailable`] if the tool is missing or fails.
    pub fn check_available(&self) -> Result<String> {
        match self.runner.run(self.tool, &[OsStr::new("--version")]) {
            Ok(output) if output.success => {
                let version = output.stdout.lines().next().unwrap_or_default().to_string();
                debug!(tool = self.tool, %version, "image tool available");
                Ok(version)
            }
            _ => Err(Error::tool_unavailable(self.tool, IMAGE_TOOL_HINT)),
        }
    }

    /// Ask the image tool for the on-disk format of `path`.
    ///
    /// A failing query or unparsable output counts as a missing hint.
    pub fn detect_format(&self, path: &Path) -> SourceFormat {
        let args = [OsStr::new("info"), OsStr::new("--output=json"), path.as_os_str()];
        let hint = match self.runner.run(self.tool, &args) {
            Ok(output) if output.success => serde_json::from_str::<ImageInfo>(&output.stdout)
                .map_err(|e| {
                    warn!(path = %path.display(), error = %e, "unparsable image info");
                })
                .ok()
                .and_then(|info| info.format),
            Ok(output) => {
                warn!(path = %path.display(), diagnostic = %output.diagnostic(), "image info failed");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not run image info");
                None
            }
        };

        SourceFormat::from_hint(hint.as_deref())
    }

    /// Convert one source disk into `output_dir`.
    ///
    /// The output file is always fully rewritten, so retrying a failed run
    /// is safe.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConversionFailed`] once every strategy for the
    /// detected format has failed.
    pub fn convert(&self, source: &SourceDisk, output_dir: &Path) -> Result<ConvertedDisk> {
        let output_path = output_path_for(&source.path, output_dir);
        let detected = self.detect_format(&source.path);
        info!(
            disk = %source.file_name(),
            output = %output_path.display(),
            format = %detected,
            "converting disk"
        );

        let mut attempts = Vec::new();
        for format in detected.strategies() {
            let attempt = self.attempt(&source.path, &output_path, format);
            let succeeded = attempt.succeeded;
            if !succeeded {
                warn!(
                    disk = %source.file_name(),
                    %format,
                    diagnostic = attempt.diagnostic.as_deref().unwrap_or_default(),
                    "conversion attempt failed"
                );
            }
            attempts.push(attempt);

            if succeeded {
                info!(disk = %source.file_name(), %format, "converted");
                return Ok(ConvertedDisk {
                    source_path: source.path.clone(),
                    output_path,
                    detected_format: detected,
                    strategy: format,
                    attempts,
                    verified: None,
                });
            }
        }

        let diagnostic = attempts
            .last()
            .and_then(|a| a.diagnostic.clone())
            .unwrap_or_else(|| "no conversion strategy available".to_string());
        Err(Error::conversion(source.file_name(), diagnostic))
    }

    fn attempt(&self, source: &Path, output: &Path, format: SourceFormat) -> ConversionAttempt {
        let args = [
            OsStr::new("convert"),
            OsStr::new("-f"),
            OsStr::new(format.as_str()),
            OsStr::new("-O"),
            OsStr::new(TARGET_FORMAT),
            source.as_os_str(),
            output.as_os_str(),
        ];

        let (succeeded, diagnostic) = match self.runner.run(self.tool, &args) {
            Ok(output) if output.success => (true, None),
            Ok(output) => (false, Some(output.diagnostic())),
            Err(e) => (false, Some(format!("could not run {}: {}", self.tool, e))),
        };

        ConversionAttempt {
            format,
            succeeded,
            diagnostic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolOutput;
    use crate::vmdk::DiskRole;
    use std::io;
    use std::sync::Mutex;

    /// Answers `info` with a fixed format and fails `convert` for the listed
    /// format tags.
    struct ScriptedImageTool {
        info: Option<&'static str>,
        failing: Vec<&'static str>,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedImageTool {
        fn new(info: Option<&'static str>, failing: &[&'static str]) -> Self {
            Self {
                info,
                failing: failing.to_vec(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn convert_formats(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|args| args[0] == "convert")
                .map(|args| args[2].clone())
                .collect()
        }
    }

    impl ToolRunner for ScriptedImageTool {
        fn run(&self, _program: &str, args: &[&OsStr]) -> io::Result<ToolOutput> {
            let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
            self.calls.lock().unwrap().push(args.clone());
            Ok(match args[0].as_str() {
                "--version" => ToolOutput::ok("qemu-img version 8.2.2\n"),
                "info" => match self.info {
                    Some(format) => ToolOutput::ok(format!("{{\"format\": \"{}\"}}", format)),
                    None => ToolOutput::failed(1, "could not open"),
                },
                "convert" if self.failing.contains(&args[2].as_str()) => {
                    ToolOutput::failed(1, format!("cannot read as {}", args[2]))
                }
                _ => ToolOutput::ok(""),
            })
        }
    }

    fn source() -> SourceDisk {
        SourceDisk {
            path: PathBuf::from("/vm/disk.vmdk"),
            byte_size: 0,
            role: DiskRole::Flat,
        }
    }

    #[test]
    fn test_format_hints() {
        assert_eq!(SourceFormat::from_hint(Some("raw")), SourceFormat::Raw);
        assert_eq!(SourceFormat::from_hint(Some("vmdk")), SourceFormat::Vmdk);
        assert_eq!(SourceFormat::from_hint(Some("vhdx")), SourceFormat::Vhdx);
        assert_eq!(SourceFormat::from_hint(Some("luks")), SourceFormat::Vmdk);
        assert_eq!(SourceFormat::from_hint(None), SourceFormat::Vmdk);
    }

    #[test]
    fn test_strategies() {
        assert_eq!(
            SourceFormat::Raw.strategies(),
            vec![SourceFormat::Vmdk, SourceFormat::Raw]
        );
        assert_eq!(SourceFormat::Vmdk.strategies(), vec![SourceFormat::Vmdk]);
    }

    #[test]
    fn test_output_path_for() {
        assert_eq!(
            output_path_for(Path::new("/vm/Win10.vmdk"), Path::new("/out")),
            PathBuf::from("/out/Win10.qcow2")
        );
    }

    #[test]
    fn test_detect_format_missing_hint_is_vmdk() {
        let tool = ScriptedImageTool::new(None, &[]);
        let toolchain = Toolchain::default();
        let converter = ImageConverter::new(&tool, &toolchain);
        assert_eq!(converter.detect_format(Path::new("/vm/disk.vmdk")), SourceFormat::Vmdk);
    }

    #[test]
    fn test_vmdk_single_attempt() {
        let tool = ScriptedImageTool::new(Some("vmdk"), &[]);
        let toolchain = Toolchain::default();
        let converter = ImageConverter::new(&tool, &toolchain);

        let converted = converter.convert(&source(), Path::new("/out")).unwrap();
        assert_eq!(converted.output_path, PathBuf::from("/out/disk.qcow2"));
        assert_eq!(converted.strategy, SourceFormat::Vmdk);
        assert_eq!(converted.attempts.len(), 1);
        assert!(!converted.is_checked());
    }

    #[test]
    fn test_vmdk_failure_is_fatal_without_fallback() {
        let tool = ScriptedImageTool::new(Some("vmdk"), &["vmdk"]);
        let toolchain = Toolchain::default();
        let converter = ImageConverter::new(&tool, &toolchain);

        let err = converter.convert(&source(), Path::new("/out")).unwrap_err();
        assert!(matches!(err, Error::ConversionFailed { .. }));
        assert_eq!(tool.convert_formats(), vec!["vmdk"]);
    }

    #[test]
    fn test_raw_tries_structured_first() {
        let tool = ScriptedImageTool::new(Some("raw"), &[]);
        let toolchain = Toolchain::default();
        let converter = ImageConverter::new(&tool, &toolchain);

        let converted = converter.convert(&source(), Path::new("/out")).unwrap();
        assert_eq!(converted.detected_format, SourceFormat::Raw);
        assert_eq!(converted.strategy, SourceFormat::Vmdk);
        assert_eq!(tool.convert_formats(), vec!["vmdk"]);
    }

    #[test]
    fn test_raw_fallback_records_two_attempts() {
        let tool = ScriptedImageTool::new(Some("raw"), &["vmdk"]);
        let toolchain = Toolchain::default();
        let converter = ImageConverter::new(&tool, &toolchain);

        let converted = converter.convert(&source(), Path::new("/out")).unwrap();
        assert_eq!(converted.strategy, SourceFormat::Raw);
        assert_eq!(converted.attempts.len(), 2);
        assert!(!converted.attempts[0].succeeded);
        assert!(converted.attempts[1].succeeded);
        assert_eq!(tool.convert_formats(), vec!["vmdk", "raw"]);
    }

    #[test]
    fn test_raw_both_fail() {
        let tool = ScriptedImageTool::new(Some("raw"), &["vmdk", "raw"]);
        let toolchain = Toolchain::default();
        let converter = ImageConverter::new(&tool, &toolchain);

        let err = converter.convert(&source(), Path::new("/out")).unwrap_err();
        assert!(err.to_string().contains("cannot read as raw"));
    }

    #[test]
    fn test_check_available() {
        let tool = ScriptedImageTool::new(None, &[]);
        let toolchain = Toolchain::default();
        let converter = ImageConverter::new(&tool, &toolchain);
        assert_eq!(converter.check_available().unwrap(), "qemu-img version 8.2.2");
    }
}
