//! Raw disk images.

use std::ffi::OsString;
use std::fs;
use std::path::Path;

use crate::disk::convert::{qemu_img_convert, QEMU_IMG_STREAM_OPTIMIZED};
use crate::disk::detect::Probe;
use crate::disk::{CreateOptions, DiskFormat, DiskRepresentation, FormatHandler, Subformat};
use crate::error::{Error, Result};
use crate::helper::catalog::{FATDISK, QEMU_IMG, VMDKTOOL};
use crate::helper::{helper_select, CallOptions, Candidate, Toolbox};

const MIB: u64 = 1024 * 1024;

/// Space reserved for FAT metadata when sizing an image around its files.
const FAT_OVERHEAD: u64 = 8 * MIB;

/// qemu-img reports "raw" for anything it does not recognise.
const INSPECTED_CONFIDENCE: u8 = 60;

/// Confidence when no inspector is available and no other magic matched.
const UNINSPECTED_CONFIDENCE: u8 = 50;

/// Handler for raw images.
pub struct RawFormat;

impl RawFormat {
    fn create_with_files(
        &self,
        toolbox: &Toolbox,
        path: &Path,
        options: &CreateOptions,
    ) -> Result<()> {
        let capacity = match options.capacity {
            Some(capacity) => capacity,
            None => {
                let mut total = 0;
                for file in &options.files {
                    total += fs::metadata(file).map_err(|e| Error::io(e, file))?.len();
                }
                total + FAT_OVERHEAD
            }
        };
        let capacity_mb = capacity.div_ceil(MIB);

        let fatdisk = toolbox.helper(FATDISK);
        let format_args: Vec<OsString> = vec![
            path.into(),
            "format".into(),
            "size".into(),
            format!("{}M", capacity_mb).into(),
            "fat32".into(),
        ];
        fatdisk.call(toolbox, &format_args, &CallOptions::captured())?;

        for file in &options.files {
            let name = file.file_name().ok_or_else(|| {
                Error::invalid_argument(format!("'{}' has no file name", file.display()))
            })?;
            let add_args: Vec<OsString> = vec![
                path.into(),
                "fileadd".into(),
                file.into(),
                name.into(),
            ];
            fatdisk.call(toolbox, &add_args, &CallOptions::captured())?;
        }
        Ok(())
    }
}

impl FormatHandler for RawFormat {
    fn format(&self) -> DiskFormat {
        DiskFormat::Raw
    }

    fn confidence(&self, _toolbox: &Toolbox, probe: &Probe) -> u8 {
        if probe.has_iso_magic() || probe.has_qcow2_magic() || probe.has_vmdk_magic() {
            return 0;
        }
        match probe.inspected_format() {
            Some("raw") => INSPECTED_CONFIDENCE,
            Some(_) => 0,
            None => UNINSPECTED_CONFIDENCE,
        }
    }

    fn capacity(&self, _toolbox: &Toolbox, disk: &DiskRepresentation) -> Result<u64> {
        Ok(fs::metadata(disk.path())
            .map_err(|e| Error::io(e, disk.path()))?
            .len())
    }

    fn create_file(
        &self,
        toolbox: &Toolbox,
        path: &Path,
        _subformat: Option<Subformat>,
        options: &CreateOptions,
    ) -> Result<()> {
        if !options.files.is_empty() {
            return self.create_with_files(toolbox, path, options);
        }
        let capacity = options.capacity.ok_or_else(|| {
            Error::invalid_argument("a blank raw image needs a capacity")
        })?;
        let args: Vec<OsString> = vec![
            "create".into(),
            "-f".into(),
            "raw".into(),
            path.into(),
            capacity.to_string().into(),
        ];
        toolbox
            .helper(QEMU_IMG)
            .call(toolbox, &args, &CallOptions::captured())?;
        Ok(())
    }

    fn write_converted(
        &self,
        toolbox: &Toolbox,
        source: &DiskRepresentation,
        dest: &Path,
        _subformat: Option<Subformat>,
    ) -> Result<()> {
        if source.disk_format() != DiskFormat::Vmdk {
            let qemu_img = toolbox.helper(QEMU_IMG);
            return qemu_img_convert(
                toolbox,
                &qemu_img,
                source.path(),
                source.disk_format(),
                dest,
                DiskFormat::Raw,
                None,
            );
        }

        // Older qemu-img cannot read streamOptimized VMDKs.
        let selection = helper_select(
            toolbox,
            &[
                Candidate::at_least(QEMU_IMG, QEMU_IMG_STREAM_OPTIMIZED),
                Candidate::any(VMDKTOOL),
            ],
        )?;
        if selection.name() == VMDKTOOL {
            let args: Vec<OsString> = vec!["-s".into(), dest.into(), source.path().into()];
            selection
                .helper
                .call(toolbox, &args, &CallOptions::captured())?;
            Ok(())
        } else {
            qemu_img_convert(
                toolbox,
                &selection.helper,
                source.path(),
                DiskFormat::Vmdk,
                dest,
                DiskFormat::Raw,
                None,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_toolbox() -> Toolbox {
        Toolbox::new(crate::helper::ToolboxOptions::default().with_search_path(""))
    }

    #[test]
    fn uninspected_file_is_probably_raw() {
        let probe = Probe::from_parts("disk.img", None, vec![0u8; 512]);
        assert_eq!(RawFormat.confidence(&offline_toolbox(), &probe), UNINSPECTED_CONFIDENCE);
    }

    #[test]
    fn other_magic_rules_out_raw() {
        let probe = Probe::from_parts("disk.img", Some("file format: raw\n".into()), b"QFI\xfb".to_vec());
        assert_eq!(RawFormat.confidence(&offline_toolbox(), &probe), 0);
    }

    #[test]
    fn inspector_saying_raw_scores_below_magic() {
        let probe = Probe::from_parts("disk.img", Some("file format: raw\n".into()), vec![0u8; 512]);
        let score = RawFormat.confidence(&offline_toolbox(), &probe);
        assert_eq!(score, INSPECTED_CONFIDENCE);
        assert!(score < crate::disk::detect::MAGIC_CONFIDENCE);
    }

    #[test]
    fn blank_raw_needs_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let err = RawFormat
            .create_file(&offline_toolbox(), &dir.path().join("x.img"), None, &CreateOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[test]
    fn capacity_is_file_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.img");
        fs::write(&path, vec![0u8; 4096]).unwrap();
        let disk = DiskRepresentation::open(&path, DiskFormat::Raw, None).unwrap();
        assert_eq!(disk.capacity(&offline_toolbox()).unwrap(), 4096);
    }
}
