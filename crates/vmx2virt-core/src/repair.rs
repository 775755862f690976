//! Repair advice for converted images without a partition table.
//!
//! Nothing here rewrites disk contents. For images that carry a DOS/Windows
//! boot sector the advisor makes a byte-for-byte backup so the operator can
//! run a partition repair tool against the original safely.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Extension appended to an image's file name for its backup copy.
pub const BACKUP_SUFFIX: &str = "backup";

/// Tools suggested for repairing a partition table by hand.
pub const REPAIR_TOOLS: &[&str] = &["testdisk", "gparted"];

/// Advice given when the disk type cannot be determined.
pub const UNDIAGNOSED_ADVICE: &str =
    "No partition table detected and the disk type could not be detected for automatic diagnosis; \
     the converted VM may not boot";

/// `disk.qcow2` -> `disk.qcow2.backup`.
pub fn backup_path(image: &Path) -> PathBuf {
    let mut name = image.as_os_str().to_os_string();
    name.push(".");
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// Copy `image` next to itself and confirm the copy is byte-identical.
///
/// # Errors
///
/// Returns an I/O error if the copy fails or the digests differ. A
/// mismatching backup is removed.
pub fn create_backup(image: &Path) -> Result<PathBuf> {
    let backup = backup_path(image);
    fs::copy(image, &backup).map_err(|e| Error::io(e, &backup))?;

    let original = sha256_file(image)?;
    let copy = sha256_file(&backup)?;
    if original != copy {
        if let Err(e) = fs::remove_file(&backup) {
            warn!(backup = %backup.display(), error = %e, "could not remove mismatching backup");
        }
        return Err(Error::io(
            io::Error::other("backup copy does not match the original image"),
            &backup,
        ));
    }

    info!(backup = %backup.display(), sha256 = %hex(&original), "created image backup");
    Ok(backup)
}

/// SHA-256 of a file's contents.
pub fn sha256_file(path: &Path) -> Result<[u8; 32]> {
    let file = File::open(path).map_err(|e| Error::io(e, path))?;
    let len = file.metadata().map_err(|e| Error::io(e, path))?.len();

    let mut hasher = Sha256::new();
    if len > 0 {
        // Safety: the file is opened read-only and only read while mapped.
        let mmap = unsafe { Mmap::map(&file).map_err(|e| Error::io(e, path))? };
        hasher.update(&mmap[..]);
    }
    Ok(hasher.finalize().into())
}

/// Operator advice for an image with a DOS/Windows boot sector but no
/// readable partition table.
pub fn dos_repair_advice(backup: &Path) -> String {
    format!(
        "Windows/DOS boot sector detected but no partition table; boot sector repair requires \
         manual intervention. Backup created at: {}. Consider using tools like {} to repair \
         the partition table",
        backup.display(),
        REPAIR_TOOLS
            .iter()
            .map(|t| format!("'{}'", t))
            .collect::<Vec<_>>()
            .join(" or ")
    )
}

/// Advice when the backup itself could not be made.
pub fn backup_failed_advice(error: &Error) -> String {
    format!(
        "Windows/DOS boot sector detected but no partition table, and the backup copy failed \
         ({}). Copy the image manually before attempting a repair",
        error
    )
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_path() {
        assert_eq!(
            backup_path(Path::new("/out/disk.qcow2")),
            PathBuf::from("/out/disk.qcow2.backup")
        );
    }

    #[test]
    fn test_create_backup_is_identical() {
        let tmp = tempfile::tempdir().unwrap();
        let image = tmp.path().join("disk.qcow2");
        let content: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        fs::write(&image, &content).unwrap();

        let backup = create_backup(&image).unwrap();
        assert_eq!(backup, tmp.path().join("disk.qcow2.backup"));
        assert_eq!(fs::read(&backup).unwrap(), content);
        assert!(image.exists());
    }

    #[test]
    fn test_create_backup_missing_image() {
        let tmp = tempfile::tempdir().unwrap();
        let err = create_backup(&tmp.path().join("gone.qcow2")).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn test_backup_failed_advice_carries_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = create_backup(&tmp.path().join("gone.qcow2")).unwrap_err();
        let advice = backup_failed_advice(&err);
        assert!(advice.contains("backup copy failed"));
        assert!(advice.contains("gone.qcow2.backup"));
    }

    #[test]
    fn test_sha256_empty_file() {
        let tmp = tempfile::tempdir().unwrap();
        let empty = tmp.path().join("empty");
        fs::write(&empty, b"").unwrap();
        assert_eq!(
            hex(&sha256_file(&empty).unwrap()),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_dos_repair_advice_names_tools_and_backup() {
        let advice = dos_repair_advice(Path::new("/out/disk.qcow2.backup"));
        assert!(advice.contains("/out/disk.qcow2.backup"));
        assert!(advice.contains("'testdisk' or 'gparted'"));
    }
}
