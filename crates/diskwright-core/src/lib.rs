//! Diskwright Core Library
//!
//! This crate detects and converts disk image formats by driving external
//! helper programs such as `qemu-img`, `vmdktool` and `isoinfo`.
//!
//! # Overview
//!
//! Images are represented by [`DiskRepresentation`]. Opening a file detects its
//! format; converting it picks a capable helper, installing one through the
//! platform's package manager when allowed, and writes the result next to
//! the requested output directory.
//!
//! # Modules
//!
//! - [`error`] - Error types and Result alias
//! - [`version`] - Helper version parsing
//! - [`helper`] - External helper programs, package managers and selection
//! - [`disk`] - Disk formats, detection, creation and conversion
//!
//! # Quick Start
//!
//! ```no_run
//! use diskwright_core::{DiskFormat, DiskRepresentation, Toolbox, ToolboxOptions};
//! use std::path::Path;
//!
//! let toolbox = Toolbox::new(ToolboxOptions::default().assume_yes());
//! let disk = DiskRepresentation::from_file(&toolbox, Path::new("/path/to/disk.qcow2")).unwrap();
//! let vmdk = disk
//!     .convert(&toolbox, DiskFormat::Vmdk, None, Path::new("/path/to/out"))
//!     .unwrap();
//! println!("{}", vmdk.path().display());
//! ```

pub mod disk;
pub mod error;
pub mod helper;
pub mod version;

pub use error::{Error, Result};

// Re-export the main disk and helper types for convenience
pub use disk::{CreateOptions, DiskFormat, DiskRepresentation, DriveType, Subformat};
pub use helper::{
    helper_select, CallOptions, Candidate, Helper, Platform, Selection, Toolbox, ToolboxOptions,
};
