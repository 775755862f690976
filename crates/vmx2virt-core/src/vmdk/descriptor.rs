//! VMDK descriptor file parsing.
//!
//! Descriptors are small text files that name the extents holding the disk
//! data and, for delta disks, the parent they were snapshotted from. The
//! parser is lenient: unknown keys and extent types are kept or ignored
//! rather than rejected, since descriptors from many VMware products land
//! here.

use crate::error::{Error, Result};

/// The type of a VMDK extent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtentType {
    /// Raw disk data in a separate file.
    Flat,
    /// Grain-table allocated data.
    Sparse,
    /// Zeroed data without storage.
    Zero,
    /// VMFS flat extent.
    Vmfs,
    /// VMFS delta (snapshot) extent.
    VmfsSparse,
    /// Any type this parser does not know about.
    Other(String),
}

impl ExtentType {
    fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "FLAT" => ExtentType::Flat,
            "SPARSE" => ExtentType::Sparse,
            "ZERO" => ExtentType::Zero,
            "VMFS" => ExtentType::Vmfs,
            "VMFSSPARSE" => ExtentType::VmfsSparse,
            _ => ExtentType::Other(s.to_string()),
        }
    }
}

/// One extent line, e.g. `RW 41943040 FLAT "disk-flat.vmdk" 0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extent {
    /// Access mode ("RW", "RDONLY", "NOACCESS").
    pub access: String,
    /// Size of this extent in 512-byte sectors.
    pub size_sectors: u64,
    pub extent_type: ExtentType,
    /// File holding the extent data, relative to the descriptor.
    pub filename: String,
    /// Offset within the extent file in sectors. Absent for sparse extents.
    pub offset: u64,
}

/// Parsed VMDK descriptor.
#[derive(Debug, Clone, Default)]
pub struct VmdkDescriptor {
    pub version: u32,
    pub cid: Option<u32>,
    pub parent_cid: Option<u32>,
    /// e.g. "monolithicFlat", "twoGbMaxExtentSparse".
    pub create_type: String,
    /// Set only on snapshot (delta) descriptors.
    pub parent_file_name_hint: Option<String>,
    pub extents: Vec<Extent>,
}

/// `parentCID` value of a disk that has no parent.
const NO_PARENT_CID: u32 = 0xffff_ffff;

impl VmdkDescriptor {
    /// Total disk size in sectors.
    pub fn disk_size_sectors(&self) -> u64 {
        self.extents
            .iter()
            .fold(0u64, |total, e| total.saturating_add(e.size_sectors))
    }

    /// Total disk size in bytes.
    pub fn disk_size_bytes(&self) -> u64 {
        self.disk_size_sectors().saturating_mul(512)
    }

    /// True when the descriptor describes a delta disk on top of a parent.
    pub fn is_snapshot(&self) -> bool {
        self.parent_file_name_hint.is_some()
            || self.parent_cid.is_some_and(|cid| cid != NO_PARENT_CID)
    }
}

/// Parse a VMDK descriptor from its text content.
///
/// # Errors
///
/// Returns an error if an extent line is malformed. Unknown keys are ignored.
pub fn parse_descriptor(content: &str) -> Result<VmdkDescriptor> {
    let mut descriptor = VmdkDescriptor {
        version: 1,
        ..Default::default()
    };

    for line in content.lines() {
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if ["RW ", "RDONLY ", "NOACCESS "]
            .iter()
            .any(|mode| line.starts_with(mode))
        {
            descriptor.extents.push(parse_extent_line(line)?);
            continue;
        }

        let Some((key, value)) = parse_key_value(line) else {
            continue;
        };

        match key {
            "version" => descriptor.version = value.parse().unwrap_or(1),
            "CID" => descriptor.cid = u32::from_str_radix(value, 16).ok(),
            "parentCID" => descriptor.parent_cid = u32::from_str_radix(value, 16).ok(),
            "createType" => descriptor.create_type = value.to_string(),
            "parentFileNameHint" => descriptor.parent_file_name_hint = Some(value.to_string()),
            _ => {}
        }
    }

    Ok(descriptor)
}

fn parse_key_value(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once('=')?;
    let value = value.trim();
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);
    Some((key.trim(), value))
}

/// Parse an extent line: ACCESS SIZE TYPE "FILENAME" [OFFSET].
fn parse_extent_line(line: &str) -> Result<Extent> {
    let mut parts = line.splitn(4, char::is_whitespace);
    let (Some(access), Some(size), Some(kind), Some(rest)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::discovery(format!("invalid extent line: {}", line)));
    };

    let size_sectors = size
        .parse()
        .map_err(|_| Error::discovery(format!("invalid extent size: {}", size)))?;

    let rest = rest.trim();
    let quoted = rest
        .strip_prefix('"')
        .ok_or_else(|| Error::discovery(format!("expected quoted filename, got: {}", rest)))?;
    let (filename, tail) = quoted
        .split_once('"')
        .ok_or_else(|| Error::discovery(format!("unclosed quote in: {}", rest)))?;

    let tail = tail.trim();
    let offset = if tail.is_empty() {
        0
    } else {
        tail.parse()
            .map_err(|_| Error::discovery(format!("invalid extent offset: {}", tail)))?
    };

    Ok(Extent {
        access: access.to_string(),
        size_sectors,
        extent_type: ExtentType::parse(kind),
        filename: filename.to_string(),
        offset,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extent_type_parse() {
        assert_eq!(ExtentType::parse("flat"), ExtentType::Flat);
        assert_eq!(ExtentType::parse("VMFSSPARSE"), ExtentType::VmfsSparse);
        assert_eq!(
            ExtentType::parse("SESPARSE"),
            ExtentType::Other("SESPARSE".to_string())
        );
    }

    #[test]
    fn test_parse_extent_line_flat() {
        let extent = parse_extent_line("RW 838860800 FLAT \"TestVM-flat.vmdk\" 0").unwrap();
        assert_eq!(extent.access, "RW");
        assert_eq!(extent.size_sectors, 838860800);
        assert_eq!(extent.extent_type, ExtentType::Flat);
        assert_eq!(extent.filename, "TestVM-flat.vmdk");
        assert_eq!(extent.offset, 0);
    }

    #[test]
    fn test_parse_extent_line_sparse_without_offset() {
        let extent = parse_extent_line("RW 4192256 SPARSE \"disk-s001.vmdk\"").unwrap();
        assert_eq!(extent.extent_type, ExtentType::Sparse);
        assert_eq!(extent.offset, 0);
    }

    #[test]
    fn test_parse_extent_line_filename_with_spaces() {
        let extent = parse_extent_line("RW 100 FLAT \"my disk-flat.vmdk\" 128").unwrap();
        assert_eq!(extent.filename, "my disk-flat.vmdk");
        assert_eq!(extent.offset, 128);
    }

    #[test]
    fn test_parse_extent_line_errors() {
        assert!(parse_extent_line("RW 100").is_err());
        assert!(parse_extent_line("RW abc FLAT \"a.vmdk\" 0").is_err());
        assert!(parse_extent_line("RW 100 FLAT a.vmdk 0").is_err());
        assert!(parse_extent_line("RW 100 FLAT \"a.vmdk 0").is_err());
    }

    #[test]
    fn test_is_snapshot() {
        let base = parse_descriptor("CID=1\nparentCID=ffffffff\n").unwrap();
        assert!(!base.is_snapshot());

        let delta = parse_descriptor("parentCID=1a2b3c4d\n").unwrap();
        assert!(delta.is_snapshot());

        let hinted = parse_descriptor("parentFileNameHint=\"base.vmdk\"\n").unwrap();
        assert!(hinted.is_snapshot());
    }

    #[test]
    fn test_disk_size() {
        let descriptor = parse_descriptor(
            "RW 1000 FLAT \"a-f001.vmdk\" 0\nRW 2000 FLAT \"a-f002.vmdk\" 0\n",
        )
        .unwrap();
        assert_eq!(descriptor.disk_size_sectors(), 3000);
        assert_eq!(descriptor.disk_size_bytes(), 3000 * 512);
    }

    #[test]
    fn test_disk_size_saturates() {
        let huge = parse_descriptor("RW 18446744073709551615 FLAT \"a.vmdk\" 0\n").unwrap();
        assert_eq!(huge.disk_size_sectors(), u64::MAX);
        assert_eq!(huge.disk_size_bytes(), u64::MAX);

        let split = parse_descriptor(
            "RW 18446744073709551615 FLAT \"a.vmdk\" 0\nRW 10 FLAT \"b.vmdk\" 0\n",
        )
        .unwrap();
        assert_eq!(split.disk_size_sectors(), u64::MAX);
    }
}
