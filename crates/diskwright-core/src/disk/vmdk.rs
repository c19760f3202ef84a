//! VMDK images.
//!
//! StreamOptimized is the default subformat since it is what OVF packages
//! and ESXi imports expect. Writing it needs either a recent qemu-img or
//! vmdktool; older qemu-img releases are used only as a last resort.

use std::ffi::OsString;
use std::path::Path;

use crate::disk::convert::{
    parent_dir, qemu_img_convert, with_raw_input, QEMU_IMG_STREAM_OPTIMIZED,
    QEMU_IMG_STREAM_OPTIMIZED_V3,
};
use crate::disk::detect::Probe;
use crate::disk::raw::RawFormat;
use crate::disk::{CreateOptions, DiskFormat, DiskRepresentation, FormatHandler, Subformat};
use crate::error::{Error, Result};
use crate::helper::catalog::{QEMU_IMG, VMDKTOOL};
use crate::helper::{helper_select, CallOptions, Candidate, Selection, Toolbox};

/// Handler for VMDK images.
pub struct VmdkFormat;

impl VmdkFormat {
    fn write_stream_optimized(
        &self,
        toolbox: &Toolbox,
        source: &DiskRepresentation,
        dest: &Path,
    ) -> Result<()> {
        let selection = helper_select(
            toolbox,
            &[
                Candidate::at_least(QEMU_IMG, QEMU_IMG_STREAM_OPTIMIZED_V3),
                Candidate::any(VMDKTOOL),
                Candidate::at_least(QEMU_IMG, QEMU_IMG_STREAM_OPTIMIZED),
            ],
        )?;

        if selection.name() == VMDKTOOL {
            return with_raw_input(toolbox, source, parent_dir(dest), |raw| {
                let args: Vec<OsString> =
                    vec!["-z9".into(), "-v".into(), dest.into(), raw.into()];
                selection
                    .helper
                    .call(toolbox, &args, &CallOptions::captured())?;
                Ok(())
            });
        }

        warn_if_old_stream_format(&selection);
        qemu_img_convert(
            toolbox,
            &selection.helper,
            source.path(),
            source.disk_format(),
            dest,
            DiskFormat::Vmdk,
            Some(Subformat::StreamOptimized),
        )
    }
}

fn warn_if_old_stream_format(selection: &Selection) {
    if selection.min_version.as_ref() == Some(&QEMU_IMG_STREAM_OPTIMIZED) {
        let found = selection
            .helper
            .version()
            .map(|v| v.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        log::warn!(
            "qemu-img {} writes an older streamOptimized VMDK version that \
             VMware ESXi may reject; install vmdktool or qemu-img >= {}",
            found,
            QEMU_IMG_STREAM_OPTIMIZED_V3
        );
    }
}

impl FormatHandler for VmdkFormat {
    fn format(&self) -> DiskFormat {
        DiskFormat::Vmdk
    }

    fn default_subformat(&self) -> Option<Subformat> {
        Some(Subformat::StreamOptimized)
    }

    fn supports_subformat(&self, subformat: Option<Subformat>) -> bool {
        matches!(
            subformat,
            Some(Subformat::StreamOptimized | Subformat::MonolithicSparse)
        )
    }

    fn has_magic(&self, probe: &Probe) -> bool {
        probe.has_vmdk_magic()
    }

    fn detect_subformat(&self, _toolbox: &Toolbox, probe: &Probe) -> Result<Option<Subformat>> {
        let Some(create_type) = probe.vmdk_create_type() else {
            return Ok(None);
        };
        match create_type.parse::<Subformat>() {
            Ok(sub) if self.supports_subformat(Some(sub)) => Ok(Some(sub)),
            _ => {
                log::debug!(
                    "{} has VMDK create type '{}', which is not a known subformat",
                    probe.path().display(),
                    create_type
                );
                Ok(None)
            }
        }
    }

    fn create_file(
        &self,
        toolbox: &Toolbox,
        path: &Path,
        subformat: Option<Subformat>,
        options: &CreateOptions,
    ) -> Result<()> {
        let subformat = subformat.unwrap_or(Subformat::StreamOptimized);

        if options.files.is_empty() && subformat == Subformat::MonolithicSparse {
            let capacity = options
                .capacity
                .ok_or_else(|| Error::invalid_argument("a blank VMDK image needs a capacity"))?;
            let args: Vec<OsString> = vec![
                "create".into(),
                "-f".into(),
                "vmdk".into(),
                "-o".into(),
                format!("subformat={}", subformat.tag()).into(),
                path.into(),
                capacity.to_string().into(),
            ];
            toolbox
                .helper(QEMU_IMG)
                .call(toolbox, &args, &CallOptions::captured())?;
            return Ok(());
        }

        // Build a raw image first and convert it; the scratch copy goes away either way.
        let scratch = tempfile::Builder::new()
            .prefix(".diskwright-create-")
            .tempdir_in(parent_dir(path))
            .map_err(|e| Error::io(e, parent_dir(path)))?;
        let stem = path.file_stem().ok_or_else(|| {
            Error::invalid_argument(format!("'{}' has no file name", path.display()))
        })?;
        let mut raw_name = stem.to_os_string();
        raw_name.push(".img");
        let raw_path = scratch.path().join(raw_name);

        RawFormat.create_file(toolbox, &raw_path, None, options)?;
        let raw = DiskRepresentation::wrap(raw_path, DiskFormat::Raw, None);
        self.write_converted(toolbox, &raw, path, Some(subformat))?;

        scratch.close().map_err(|e| Error::io(e, parent_dir(path)))?;
        Ok(())
    }

    fn write_converted(
        &self,
        toolbox: &Toolbox,
        source: &DiskRepresentation,
        dest: &Path,
        subformat: Option<Subformat>,
    ) -> Result<()> {
        match subformat.unwrap_or(Subformat::StreamOptimized) {
            Subformat::StreamOptimized => self.write_stream_optimized(toolbox, source, dest),
            sub @ Subformat::MonolithicSparse => {
                let qemu_img = toolbox.helper(QEMU_IMG);
                qemu_img_convert(
                    toolbox,
                    &qemu_img,
                    source.path(),
                    source.disk_format(),
                    dest,
                    DiskFormat::Vmdk,
                    Some(sub),
                )
            }
            other => Err(Error::unsupported(format!("VMDK subformat '{}'", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_toolbox() -> (tempfile::TempDir, Toolbox) {
        let dir = tempfile::tempdir().unwrap();
        let options = crate::helper::ToolboxOptions::default().with_search_path(dir.path());
        (dir, Toolbox::new(options))
    }

    #[test]
    fn subformat_from_inspector() {
        let (_dir, toolbox) = offline_toolbox();
        let info = "file format: vmdk\nFormat specific information:\n    create type: monolithicSparse\n";
        let probe = Probe::from_parts("a.vmdk", Some(info.to_string()), Vec::new());
        assert_eq!(
            VmdkFormat.detect_subformat(&toolbox, &probe).unwrap(),
            Some(Subformat::MonolithicSparse)
        );
    }

    #[test]
    fn unknown_create_type_has_no_subformat() {
        let (_dir, toolbox) = offline_toolbox();
        let header = b"# Disk DescriptorFile\ncreateType=\"twoGbMaxExtentFlat\"\n".to_vec();
        let probe = Probe::from_parts("a.vmdk", None, header);
        assert_eq!(VmdkFormat.detect_subformat(&toolbox, &probe).unwrap(), None);
    }

    #[test]
    fn supported_subformats() {
        assert!(VmdkFormat.supports_subformat(Some(Subformat::StreamOptimized)));
        assert!(VmdkFormat.supports_subformat(Some(Subformat::MonolithicSparse)));
        assert!(!VmdkFormat.supports_subformat(Some(Subformat::RockRidge)));
        assert!(!VmdkFormat.supports_subformat(None));
    }

    #[test]
    fn rock_ridge_vmdk_is_unsupported() {
        let (dir, toolbox) = offline_toolbox();
        let source = DiskRepresentation::wrap(dir.path().join("a.img"), DiskFormat::Raw, None);
        let err = VmdkFormat
            .write_converted(&toolbox, &source, &dir.path().join("a.vmdk"), Some(Subformat::RockRidge))
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported { .. }));
    }

    #[test]
    fn failed_create_leaves_no_scratch() {
        let (dir, toolbox) = offline_toolbox();
        let out = tempfile::tempdir().unwrap();
        let err = VmdkFormat
            .create_file(&toolbox, &out.path().join("a.vmdk"), None, &CreateOptions::blank(1 << 20))
            .unwrap_err();
        assert!(matches!(err, Error::HelperNotFound { .. }));
        assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
        drop(dir);
    }
}
