//! libvirt domain XML generation.
//!
//! The descriptor is one fixed template: every element is always emitted,
//! whatever the VMX file did or did not say, so the result imports cleanly
//! even when the source configuration is partial. Disks use the IDE bus for
//! maximum guest compatibility.

use std::fs;
use std::path::{Path, PathBuf};

use quick_xml::escape::escape;
use uuid::Uuid;

use crate::convert::{ConvertedDisk, TARGET_FORMAT};
use crate::error::{Error, Result};
use crate::vmx::VmResourceConfig;

/// Device name for the disk at `index`: hda, hdb, ..., hdz, hdaa, hdab, ...
pub fn device_name(index: usize) -> String {
    let mut letters = Vec::new();
    let mut i = index;
    loop {
        letters.push(b'a' + (i % 26) as u8);
        if i < 26 {
            break;
        }
        i = i / 26 - 1;
    }
    letters.reverse();
    format!("hd{}", String::from_utf8_lossy(&letters))
}

/// Render the domain XML with a fresh UUID.
pub fn generate_domain(
    vm_name: &str,
    config: &VmResourceConfig,
    disks: &[ConvertedDisk],
) -> Result<String> {
    render_domain(vm_name, &Uuid::new_v4(), config, disks)
}

/// Render the domain XML.
///
/// Output depends only on the arguments and on where the disk paths resolve.
///
/// # Errors
///
/// Returns [`Error::DiskPathMissing`] if a converted image no longer exists.
pub fn render_domain(
    vm_name: &str,
    uuid: &Uuid,
    config: &VmResourceConfig,
    disks: &[ConvertedDisk],
) -> Result<String> {
    let disk_xml = disks
        .iter()
        .enumerate()
        .map(|(index, disk)| {
            let path = resolve_disk_path(&disk.output_path)?;
            Ok(disk_entry(index, &path))
        })
        .collect::<Result<Vec<_>>>()?
        .join("\n");

    let memory_kib = config.memory_kib();

    Ok(format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<domain type="kvm">
  <name>{name}</name>
  <uuid>{uuid}</uuid>
  <memory unit="KiB">{memory_kib}</memory>
  <currentMemory unit="KiB">{memory_kib}</currentMemory>
  <vcpu placement="static">{vcpus}</vcpu>
  <os>
    <type arch="x86_64" machine="pc-i440fx-2.9">hvm</type>
    <boot dev="hd"/>
  </os>
  <features>
    <acpi/>
    <apic/>
  </features>
  <cpu mode="host-passthrough"/>
  <clock offset="utc"/>
  <on_poweroff>destroy</on_poweroff>
  <on_reboot>restart</on_reboot>
  <on_crash>destroy</on_crash>
  <devices>
    <emulator>/usr/bin/qemu-system-x86_64</emulator>
{disk_xml}
    <interface type="network">
      <source network="default"/>
      <model type="e1000"/>
    </interface>
    <serial type="pty">
      <target port="0"/>
    </serial>
    <console type="pty">
      <target type="serial" port="0"/>
    </console>
    <input type="mouse" bus="ps2"/>
    <input type="keyboard" bus="ps2"/>
    <graphics type="vnc" port="-1" autoport="yes"/>
    <video>
      <model type="cirrus" vram="16384" heads="1" primary="yes"/>
    </video>
  </devices>
</domain>
"#,
        name = escape(vm_name),
        uuid = uuid.hyphenated(),
        memory_kib = memory_kib,
        vcpus = config.vcpus(),
        disk_xml = disk_xml,
    ))
}

fn resolve_disk_path(path: &Path) -> Result<PathBuf> {
    fs::canonicalize(path).map_err(|_| Error::DiskPathMissing {
        path: path.to_path_buf(),
    })
}

fn disk_entry(index: usize, path: &Path) -> String {
    let path = path.to_string_lossy();
    format!(
        r#"    <disk type="file" device="disk">
      <driver name="qemu" type="{format}" cache="writethrough"/>
      <source file="{path}"/>
      <target dev="{dev}" bus="ide"/>
    </disk>"#,
        format = TARGET_FORMAT,
        path = escape(&*path),
        dev = device_name(index),
    )
}

/// File name of the descriptor for a VM: `<name>.xml` with path-hostile
/// characters replaced.
pub fn descriptor_file_name(vm_name: &str) -> String {
    format!("{}.xml", sanitize_filename(vm_name))
}

/// Sanitize a filename by removing or replacing invalid characters.
fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c == '-' || c == '.' || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.trim().is_empty() {
        "vm".to_string()
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_names() {
        assert_eq!(device_name(0), "hda");
        assert_eq!(device_name(1), "hdb");
        assert_eq!(device_name(25), "hdz");
        assert_eq!(device_name(26), "hdaa");
        assert_eq!(device_name(27), "hdab");
        assert_eq!(device_name(26 * 27), "hdaaa");
    }

    #[test]
    fn test_descriptor_file_name() {
        assert_eq!(descriptor_file_name("Windows 10"), "Windows 10.xml");
        assert_eq!(descriptor_file_name("a/b\\c:d"), "a_b_c_d.xml");
        assert_eq!(descriptor_file_name(""), "vm.xml");
    }

    #[test]
    fn test_render_without_disks_uses_defaults() {
        let uuid = Uuid::nil();
        let xml = render_domain("Test <VM>", &uuid, &VmResourceConfig::default(), &[]).unwrap();
        assert!(xml.contains("<name>Test &lt;VM&gt;</name>"));
        assert!(xml.contains("<uuid>00000000-0000-0000-0000-000000000000</uuid>"));
        assert!(xml.contains("<memory unit=\"KiB\">1048576</memory>"));
        assert!(xml.contains("<vcpu placement=\"static\">1</vcpu>"));
        assert!(!xml.contains("<disk"));
    }
}
