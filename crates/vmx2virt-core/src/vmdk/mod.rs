//! VMDK disk handling.
//!
//! Classification of disk-container files and parsing of text descriptors.
//! Disk bytes themselves are never decoded here; conversion is delegated to
//! the image tool.

pub mod classify;
pub mod descriptor;

pub use classify::{
    classify_descriptor_text, classify_file, classify_header, DiskRole, SourceDisk, HEADER_LEN,
};
pub use descriptor::{parse_descriptor, Extent, ExtentType, VmdkDescriptor};
