//! Shared fixtures: a scripted tool runner and VM directory builders.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Mutex;

use vmx2virt_core::{ToolOutput, ToolRunner};

/// Stands in for qemu-img, fdisk and file.
///
/// Answers are keyed by the file name of the path argument. A successful
/// `convert` writes a small image to the requested output path so later
/// steps find a real file.
#[derive(Default)]
pub struct FakeTools {
    image_tool_missing: bool,
    formats: HashMap<String, String>,
    failing_formats: HashSet<String>,
    partition_tables: HashSet<String>,
    signatures: HashMap<String, String>,
    calls: Mutex<Vec<(String, Vec<String>)>>,
}

impl FakeTools {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `qemu-img --version` fail to start.
    pub fn without_image_tool(mut self) -> Self {
        self.image_tool_missing = true;
        self
    }

    /// Format reported by `qemu-img info` for `file`. Unlisted files make
    /// `info` fail.
    pub fn format(mut self, file: &str, format: &str) -> Self {
        self.formats.insert(file.to_string(), format.to_string());
        self
    }

    /// Make `qemu-img convert -f <format>` fail.
    pub fn failing_format(mut self, format: &str) -> Self {
        self.failing_formats.insert(format.to_string());
        self
    }

    /// Make `fdisk -l` report a disk label for `file`.
    pub fn partition_table(mut self, file: &str) -> Self {
        self.partition_tables.insert(file.to_string());
        self
    }

    /// Description `file -s` prints for `file`. Unlisted files are `data`.
    pub fn signature(mut self, file: &str, description: &str) -> Self {
        self.signatures
            .insert(file.to_string(), description.to_string());
        self
    }

    /// Every invocation so far as (program, args).
    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }

    /// File names passed to `qemu-img convert`, with the `-f` tag.
    pub fn conversions(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter(|(program, args)| program == "qemu-img" && args[0] == "convert")
            .map(|(_, args)| (file_name(&args[5]), args[2].clone()))
            .collect()
    }

    fn image_tool(&self, args: &[String]) -> io::Result<ToolOutput> {
        if self.image_tool_missing {
            return Err(io::Error::new(io::ErrorKind::NotFound, "qemu-img"));
        }
        match args[0].as_str() {
            "--version" => Ok(ToolOutput::ok("qemu-img version 8.2.2\n")),
            "info" => match self.formats.get(&file_name(&args[2])) {
                Some(format) => Ok(ToolOutput::ok(format!(
                    "{{\"virtual-size\": 4194304, \"filename\": \"{}\", \"format\": \"{}\"}}",
                    args[2], format
                ))),
                None => Ok(ToolOutput::failed(1, "qemu-img: Could not open image")),
            },
            "convert" => {
                let format = &args[2];
                if self.failing_formats.contains(format) {
                    return Ok(ToolOutput::failed(
                        1,
                        format!("qemu-img: Could not open '{}' as {}", args[5], format),
                    ));
                }
                fs::write(&args[6], b"QFI\xfb\0\0\0\x03 converted image")?;
                Ok(ToolOutput::ok(""))
            }
            other => Ok(ToolOutput::failed(1, format!("unknown command {}", other))),
        }
    }

    fn partition_reader(&self, args: &[String]) -> ToolOutput {
        let path = &args[1];
        if self.partition_tables.contains(&file_name(path)) {
            ToolOutput::ok(format!(
                "Disk {}: 2 MiB, 2097152 bytes, 4096 sectors\nDisklabel type: dos\n\n\
                 Device     Boot Start   End Sectors Size Id Type\n{}1  *     2048  4095    2048   1M 83 Linux\n",
                path, path
            ))
        } else {
            ToolOutput::ok(format!(
                "Disk {}: 2 MiB, 2097152 bytes, 4096 sectors\nUnits: sectors of 1 * 512 = 512 bytes\n",
                path
            ))
        }
    }

    fn sniffer(&self, args: &[String]) -> ToolOutput {
        let path = &args[1];
        let description = self
            .signatures
            .get(&file_name(path))
            .map(String::as_str)
            .unwrap_or("data");
        ToolOutput::ok(format!("{}: {}\n", path, description))
    }
}

impl ToolRunner for FakeTools {
    fn run(&self, program: &str, args: &[&OsStr]) -> io::Result<ToolOutput> {
        let args: Vec<String> = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        self.calls
            .lock()
            .unwrap()
            .push((program.to_string(), args.clone()));

        match program {
            "qemu-img" => self.image_tool(&args),
            "fdisk" => Ok(self.partition_reader(&args)),
            "file" => Ok(self.sniffer(&args)),
            _ => Err(io::Error::new(io::ErrorKind::NotFound, program.to_string())),
        }
    }
}

fn file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub const VMX: &str = r#".encoding = "UTF-8"
config.version = "8"
displayName = "Test VM"
guestOS = "ubuntu-64"
memsize = "2048"
numvcpus = "2"
scsi0:0.fileName = "disk.vmdk"
"#;

pub fn write_vmx(dir: &Path, name: &str) {
    fs::write(dir.join(format!("{}.vmx", name)), VMX).unwrap();
}

/// A base descriptor for a flat extent.
pub fn write_descriptor(dir: &Path, name: &str, extent: &str) {
    let content = format!(
        "# Disk DescriptorFile\nversion=1\nencoding=\"UTF-8\"\nCID=fffffffe\n\
         parentCID=ffffffff\ncreateType=\"vmfs\"\n\n# Extent description\n\
         RW 4096 VMFS \"{}\"\n\n# The Disk Data Base\nddb.virtualHWVersion = \"8\"\n",
        extent
    );
    fs::write(dir.join(name), content).unwrap();
}

/// A snapshot descriptor pointing at `parent`.
pub fn write_snapshot_descriptor(dir: &Path, name: &str, parent: &str, extent: &str) {
    let content = format!(
        "# Disk DescriptorFile\nversion=1\nCID=a1b2c3d4\nparentCID=fffffffe\n\
         createType=\"vmfsSparse\"\nparentFileNameHint=\"{}\"\n\n\
         RW 4096 VMFSSPARSE \"{}\"\n",
        parent, extent
    );
    fs::write(dir.join(name), content).unwrap();
}

/// A binary data file of `size` bytes.
pub fn write_data(dir: &Path, name: &str, size: usize) {
    let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8 | 0x80).collect();
    fs::write(dir.join(name), data).unwrap();
}
