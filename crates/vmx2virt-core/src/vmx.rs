//! VMX file parsing.
//!
//! The VMX file is a flat list of `key = "value"` lines. Only a handful of
//! keys matter for the libvirt domain (memory, vCPUs), so the parsed form is
//! kept as a plain map with typed accessors on top.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Memory size used when `memsize` is absent or unparsable, in MiB.
pub const DEFAULT_MEMORY_MB: u64 = 1024;

/// vCPU count used when `numvcpus` is absent or unparsable.
pub const DEFAULT_VCPUS: u32 = 1;

/// Key/value settings read from a VMX file. Read-only after parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VmResourceConfig {
    entries: HashMap<String, String>,
}

impl VmResourceConfig {
    /// Build a config from already-parsed entries.
    pub fn from_entries(entries: HashMap<String, String>) -> Self {
        Self { entries }
    }

    /// Look up a raw value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Number of parsed keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Guest memory in MiB (`memsize`).
    pub fn memory_mb(&self) -> u64 {
        self.get("memsize")
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_MEMORY_MB)
    }

    /// Guest memory in KiB, the unit the domain descriptor uses.
    ///
    /// A `memsize` too large to express in KiB falls back to the default.
    pub fn memory_kib(&self) -> u64 {
        self.memory_mb()
            .checked_mul(1024)
            .unwrap_or(DEFAULT_MEMORY_MB * 1024)
    }

    /// Number of virtual CPUs (`numvcpus`).
    pub fn vcpus(&self) -> u32 {
        self.get("numvcpus")
            .and_then(|s| s.trim().parse::<u32>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_VCPUS)
    }

    /// The VM's display name, if set.
    pub fn display_name(&self) -> Option<&str> {
        self.get("displayName")
    }

    /// The guest OS identifier, if set.
    pub fn guest_os(&self) -> Option<&str> {
        self.get("guestOS")
    }
}

/// Parse a VMX file.
///
/// The file is decoded as UTF-8 when possible and as Latin-1 otherwise, so
/// configurations written by older VMware releases still parse.
///
/// # Errors
///
/// Returns an error only if the file cannot be read.
pub fn parse_vmx(path: &Path) -> Result<VmResourceConfig> {
    let bytes = fs::read(path).map_err(|e| Error::io(e, path))?;
    Ok(parse_vmx_content(&decode_text(bytes)))
}

/// Parse VMX content from a string.
pub fn parse_vmx_content(content: &str) -> VmResourceConfig {
    VmResourceConfig::from_entries(parse_key_value_pairs(content))
}

fn decode_text(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        // Every byte is a valid Latin-1 code point.
        Err(err) => err.into_bytes().iter().map(|&b| b as char).collect(),
    }
}

/// Parse key-value pairs from VMX content.
///
/// Handles both quoted and unquoted values:
/// - `key = "value"` -> ("key", "value")
/// - `key = value` -> ("key", "value")
fn parse_key_value_pairs(content: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();

    for line in content.lines() {
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);

            map.insert(key.trim().to_string(), value.to_string());
        }
    }

    map
}
