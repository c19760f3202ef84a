//! QCOW2 images.

use std::ffi::OsString;
use std::path::Path;

use crate::disk::convert::{parent_dir, qemu_img_convert, with_raw_input, QEMU_IMG_STREAM_OPTIMIZED};
use crate::disk::detect::Probe;
use crate::disk::{CreateOptions, DiskFormat, DiskRepresentation, FormatHandler, Subformat};
use crate::error::{Error, Result};
use crate::helper::catalog::{QEMU_IMG, VMDKTOOL};
use crate::helper::{helper_select, CallOptions, Candidate, Toolbox};

/// Handler for QCOW2 images.
pub struct Qcow2Format;

impl FormatHandler for Qcow2Format {
    fn format(&self) -> DiskFormat {
        DiskFormat::Qcow2
    }

    fn has_magic(&self, probe: &Probe) -> bool {
        probe.has_qcow2_magic()
    }

    fn create_file(
        &self,
        toolbox: &Toolbox,
        path: &Path,
        _subformat: Option<Subformat>,
        options: &CreateOptions,
    ) -> Result<()> {
        if !options.files.is_empty() {
            return Err(Error::unsupported("creating a QCOW2 image with files"));
        }
        let capacity = options
            .capacity
            .ok_or_else(|| Error::invalid_argument("a blank QCOW2 image needs a capacity"))?;
        let args: Vec<OsString> = vec![
            "create".into(),
            "-f".into(),
            "qcow2".into(),
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
                DiskFormat::Qcow2,
                None,
            );
        }

        let selection = helper_select(
            toolbox,
            &[
                Candidate::at_least(QEMU_IMG, QEMU_IMG_STREAM_OPTIMIZED),
                Candidate::any(VMDKTOOL),
            ],
        )?;
        if selection.name() != VMDKTOOL {
            return qemu_img_convert(
                toolbox,
                &selection.helper,
                source.path(),
                DiskFormat::Vmdk,
                dest,
                DiskFormat::Qcow2,
                None,
            );
        }

        // vmdktool only speaks raw; qemu-img of any version finishes the job.
        with_raw_input(toolbox, source, parent_dir(dest), |raw| {
            let qemu_img = toolbox.helper(QEMU_IMG);
            qemu_img_convert(
                toolbox,
                &qemu_img,
                raw,
                DiskFormat::Raw,
                dest,
                DiskFormat::Qcow2,
                None,
            )
        })
    }
}
