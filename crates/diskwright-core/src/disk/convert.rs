//! Conversion plumbing shared by the format handlers.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use semver::Version;

use crate::disk::{handler, DiskFormat, DiskRepresentation, Subformat};
use crate::error::{Error, Result};
use crate::helper::{CallOptions, Helper, Toolbox};

/// First qemu-img release able to read and write streamOptimized VMDKs.
pub const QEMU_IMG_STREAM_OPTIMIZED: Version = Version::new(2, 1, 0);

/// First qemu-img release writing streamOptimized VMDKs at version 3, as
/// expected by VMware ESXi.
pub const QEMU_IMG_STREAM_OPTIMIZED_V3: Version = Version::new(2, 5, 1);

/// Where a converted copy of `source` goes: `output_dir/<stem>.<extension>`.
pub fn output_path(source: &Path, output_dir: &Path, format: DiskFormat) -> Result<PathBuf> {
    let stem = source.file_stem().ok_or_else(|| {
        Error::invalid_argument(format!("'{}' has no file name", source.display()))
    })?;
    let mut name = stem.to_os_string();
    name.push(".");
    name.push(format.extension());
    Ok(output_dir.join(name))
}

/// Directory holding `path`, for scratch files that must live on the same filesystem.
pub fn parent_dir(path: &Path) -> &Path {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Whether writing `dest` would replace the file at `source`.
///
/// Paths are compared after resolving `..` and symlinks as far as they exist.
pub fn would_overwrite(source: &Path, dest: &Path) -> bool {
    source == dest || resolve(source) == resolve(dest)
}

fn resolve(path: &Path) -> PathBuf {
    if let Ok(full) = fs::canonicalize(path) {
        return full;
    }
    match (fs::canonicalize(parent_dir(path)), path.file_name()) {
        (Ok(parent), Some(name)) => parent.join(name),
        _ => path.to_path_buf(),
    }
}

/// Run `step` with a raw version of `source`.
///
/// Raw sources are passed through as-is. Anything else is first converted to
/// a raw image inside a scratch directory under `scratch_parent`; the scratch
/// directory is deleted whether or not `step` succeeds.
pub fn with_raw_input<T>(
    toolbox: &Toolbox,
    source: &DiskRepresentation,
    scratch_parent: &Path,
    step: impl FnOnce(&Path) -> Result<T>,
) -> Result<T> {
    if source.disk_format() == DiskFormat::Raw {
        return step(source.path());
    }

    let scratch = tempfile::Builder::new()
        .prefix(".diskwright-raw-")
        .tempdir_in(scratch_parent)
        .map_err(|e| Error::io(e, scratch_parent))?;
    log::debug!(
        "Converting {} to a temporary raw image in {}",
        source.path().display(),
        scratch.path().display()
    );
    let raw = handler(DiskFormat::Raw).from_other_image(toolbox, source, scratch.path(), None)?;

    let value = step(raw.path())?;
    scratch.close().map_err(|e| Error::io(e, scratch_parent))?;
    Ok(value)
}

/// `qemu-img convert` from `source` (in `source_format`) to `dest`.
pub fn qemu_img_convert(
    toolbox: &Toolbox,
    qemu_img: &Helper,
    source: &Path,
    source_format: DiskFormat,
    dest: &Path,
    dest_format: DiskFormat,
    subformat: Option<Subformat>,
) -> Result<()> {
    let mut args: Vec<OsString> = vec![
        "convert".into(),
        "-f".into(),
        source_format.qemu_format().into(),
        "-O".into(),
        dest_format.qemu_format().into(),
    ];
    if let Some(subformat) = subformat {
        args.push("-o".into());
        args.push(format!("subformat={}", subformat.tag()).into());
    }
    args.push(source.into());
    args.push(dest.into());

    qemu_img.call(toolbox, &args, &CallOptions::captured())?;
    Ok(())
}
