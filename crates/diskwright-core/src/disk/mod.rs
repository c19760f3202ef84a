//! Disk image representations.
//!
//! A [`DiskRepresentation`] wraps an image file on disk together with its
//! format, subformat and lazily computed metadata. Each format has a handler
//! implementing detection, creation and conversion through external helpers;
//! handlers are looked up through a static table keyed by [`DiskFormat`].
//!
//! # Example
//!
//! ```no_run
//! use diskwright_core::{DiskFormat, DiskRepresentation, Subformat, Toolbox};
//! use std::path::Path;
//!
//! let toolbox = Toolbox::default();
//! let disk = DiskRepresentation::from_file(&toolbox, Path::new("disk.qcow2")).unwrap();
//! let vmdk = disk
//!     .convert(&toolbox, DiskFormat::Vmdk, Some(Subformat::StreamOptimized), Path::new("out"))
//!     .unwrap();
//! println!("{}", vmdk.path().display());
//! ```

pub mod convert;
pub mod detect;
pub mod iso;
pub mod qcow2;
pub mod raw;
pub mod vmdk;

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use once_cell::unsync::OnceCell;

use crate::error::{Error, Result};
use crate::helper::Toolbox;
use detect::Probe;

/// Disk image container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiskFormat {
    /// Plain byte-for-byte disk image.
    Raw,
    /// ISO 9660 CD-ROM image.
    Iso,
    /// QEMU copy-on-write v2 image.
    Qcow2,
    /// VMware sparse / stream-optimized image.
    Vmdk,
}

impl DiskFormat {
    /// Detection scan order. Raw comes last because it matches almost anything.
    pub const ALL: [DiskFormat; 4] = [
        DiskFormat::Iso,
        DiskFormat::Qcow2,
        DiskFormat::Vmdk,
        DiskFormat::Raw,
    ];

    /// Format tag as used by qemu-img and on the command line.
    pub fn tag(self) -> &'static str {
        match self {
            DiskFormat::Raw => "raw",
            DiskFormat::Iso => "iso",
            DiskFormat::Qcow2 => "qcow2",
            DiskFormat::Vmdk => "vmdk",
        }
    }

    /// File extension for newly created images of this format.
    pub fn extension(self) -> &'static str {
        match self {
            DiskFormat::Raw => "img",
            DiskFormat::Iso => "iso",
            DiskFormat::Qcow2 => "qcow2",
            DiskFormat::Vmdk => "vmdk",
        }
    }

    /// Format name qemu-img uses when reading an image of this format.
    pub fn qemu_format(self) -> &'static str {
        match self {
            DiskFormat::Iso => "raw",
            other => other.tag(),
        }
    }
}

impl std::fmt::Display for DiskFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

impl FromStr for DiskFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        DiskFormat::ALL
            .into_iter()
            .find(|format| format.tag().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::unsupported(format!("disk format '{}'", s)))
    }
}

/// Format-specific variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subformat {
    /// ISO with Rock Ridge extensions.
    RockRidge,
    /// Compressed, streamable VMDK, as used inside OVA packages.
    StreamOptimized,
    /// Single-file growable VMDK.
    MonolithicSparse,
}

impl Subformat {
    /// Subformat tag.
    pub fn tag(self) -> &'static str {
        match self {
            Subformat::RockRidge => "rockridge",
            Subformat::StreamOptimized => "streamOptimized",
            Subformat::MonolithicSparse => "monolithicSparse",
        }
    }

    /// The format this subformat belongs to.
    pub fn format(self) -> DiskFormat {
        match self {
            Subformat::RockRidge => DiskFormat::Iso,
            Subformat::StreamOptimized | Subformat::MonolithicSparse => DiskFormat::Vmdk,
        }
    }
}

impl std::fmt::Display for Subformat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

impl FromStr for Subformat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        [
            Subformat::RockRidge,
            Subformat::StreamOptimized,
            Subformat::MonolithicSparse,
        ]
        .into_iter()
        .find(|sub| sub.tag().eq_ignore_ascii_case(s))
        .ok_or_else(|| Error::unsupported(format!("subformat '{}'", s)))
    }
}

/// How a disk gets attached to a virtual machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveType {
    /// CD/DVD drive.
    Cdrom,
    /// Hard disk.
    Harddisk,
}

impl DriveType {
    /// Guess the drive type from a file name's extension.
    ///
    /// # Errors
    ///
    /// Unknown extensions are rejected; the caller must state the drive type.
    pub fn from_extension(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "iso" => Ok(DriveType::Cdrom),
            "vmdk" | "raw" | "qcow2" | "img" => Ok(DriveType::Harddisk),
            _ => Err(Error::invalid_argument(format!(
                "cannot guess drive type for '{}'; specify it explicitly",
                path.display()
            ))),
        }
    }
}

impl std::fmt::Display for DriveType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriveType::Cdrom => write!(f, "cdrom"),
            DriveType::Harddisk => write!(f, "harddisk"),
        }
    }
}

/// Parameters for creating a new image.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Capacity in bytes.
    pub capacity: Option<u64>,
    /// Files to place in the image's filesystem.
    pub files: Vec<PathBuf>,
}

impl CreateOptions {
    /// A blank image of the given size.
    pub fn blank(capacity: u64) -> Self {
        Self {
            capacity: Some(capacity),
            files: Vec::new(),
        }
    }

    /// An image holding the given files.
    pub fn with_files(files: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            capacity: None,
            files: files.into_iter().map(Into::into).collect(),
        }
    }
}

/// Per-format behavior.
pub(crate) trait FormatHandler {
    /// The format this handler implements.
    fn format(&self) -> DiskFormat;

    /// Subformat used when the caller does not ask for one.
    fn default_subformat(&self) -> Option<Subformat> {
        None
    }

    /// Whether `subformat` is valid for this format.
    fn supports_subformat(&self, subformat: Option<Subformat>) -> bool {
        subformat.is_none()
    }

    /// Confidence (0-100) that the probed file is in this format.
    ///
    /// The default trusts the inspector's answer, falling back to magic
    /// numbers when the inspector is unavailable.
    fn confidence(&self, _toolbox: &Toolbox, probe: &Probe) -> u8 {
        match probe.inspected_format() {
            Some(found) if found == self.format().qemu_format() => 100,
            Some(_) => 0,
            None if self.has_magic(probe) => detect::MAGIC_CONFIDENCE,
            None => 0,
        }
    }

    /// Whether the probe's header carries this format's magic number.
    fn has_magic(&self, _probe: &Probe) -> bool {
        false
    }

    /// Subformat of an existing file.
    fn detect_subformat(&self, _toolbox: &Toolbox, _probe: &Probe) -> Result<Option<Subformat>> {
        Ok(None)
    }

    /// Virtual capacity in bytes.
    fn capacity(&self, toolbox: &Toolbox, disk: &DiskRepresentation) -> Result<u64> {
        detect::qemu_img_capacity(toolbox, disk.path())
    }

    /// Files stored in the image, when the format supports listing them.
    fn files(&self, _toolbox: &Toolbox, _disk: &DiskRepresentation) -> Result<Option<Vec<String>>> {
        Ok(None)
    }

    /// Create a new image at `path`.
    fn create_file(
        &self,
        toolbox: &Toolbox,
        path: &Path,
        subformat: Option<Subformat>,
        options: &CreateOptions,
    ) -> Result<()>;

    /// Write `source`, converted to this format, to `dest`.
    fn write_converted(
        &self,
        toolbox: &Toolbox,
        source: &DiskRepresentation,
        dest: &Path,
        subformat: Option<Subformat>,
    ) -> Result<()>;

    /// Convert `source` into a new file in `output_dir`.
    fn from_other_image(
        &self,
        toolbox: &Toolbox,
        source: &DiskRepresentation,
        output_dir: &Path,
        subformat: Option<Subformat>,
    ) -> Result<DiskRepresentation> {
        let dest = convert::output_path(source.path(), output_dir, self.format())?;
        if convert::would_overwrite(source.path(), &dest) {
            return Err(Error::invalid_argument(format!(
                "converting '{}' into '{}' would overwrite it",
                source.path().display(),
                output_dir.display()
            )));
        }
        log::info!(
            "Converting {} ({}) to {}",
            source.path().display(),
            source.disk_format(),
            dest.display()
        );
        self.write_converted(toolbox, source, &dest, subformat)?;
        Ok(DiskRepresentation::wrap(dest, self.format(), subformat))
    }
}

/// The handler for `format`.
pub(crate) fn handler(format: DiskFormat) -> &'static dyn FormatHandler {
    match format {
        DiskFormat::Raw => &raw::RawFormat,
        DiskFormat::Iso => &iso::IsoFormat,
        DiskFormat::Qcow2 => &qcow2::Qcow2Format,
        DiskFormat::Vmdk => &vmdk::VmdkFormat,
    }
}

/// Resolve the requested subformat against `format`'s default and validate it.
fn resolve_subformat(format: DiskFormat, subformat: Option<Subformat>) -> Result<Option<Subformat>> {
    let handler = handler(format);
    let subformat = subformat.or(handler.default_subformat());
    if !handler.supports_subformat(subformat) {
        return Err(Error::unsupported(format!(
            "{} subformat '{}'",
            format,
            subformat.map(|s| s.tag()).unwrap_or("none")
        )));
    }
    Ok(subformat)
}

/// A disk image file.
///
/// Capacity and file list are computed on first use and cached; they assume
/// the backing file is not modified while the representation is alive.
#[derive(Debug, Clone)]
pub struct DiskRepresentation {
    path: PathBuf,
    format: DiskFormat,
    subformat: Option<Subformat>,
    capacity: OnceCell<u64>,
    files: OnceCell<Option<Vec<String>>>,
}

impl DiskRepresentation {
    pub(crate) fn wrap(path: PathBuf, format: DiskFormat, subformat: Option<Subformat>) -> Self {
        Self {
            path,
            format,
            subformat,
            capacity: OnceCell::new(),
            files: OnceCell::new(),
        }
    }

    fn require_existing(path: &Path) -> Result<()> {
        if path.is_file() {
            Ok(())
        } else {
            Err(Error::io(
                std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
                path,
            ))
        }
    }

    /// Detect the format of an existing file and wrap it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedFileType`] when no format matches at all.
    pub fn from_file(toolbox: &Toolbox, path: &Path) -> Result<Self> {
        Self::require_existing(path)?;
        let probe = Probe::new(toolbox, path)?;
        let (format, confidence) = detect::select_format(toolbox, &probe)?;
        let subformat = handler(format).detect_subformat(toolbox, &probe)?;
        log::debug!(
            "{} detected as {}{} (confidence {})",
            path.display(),
            format,
            subformat.map(|s| format!("/{}", s)).unwrap_or_default(),
            confidence
        );
        Ok(Self::wrap(path.to_path_buf(), format, subformat))
    }

    /// Wrap an existing file whose format is already known.
    ///
    /// `None` is accepted for any format, matching what detection returns
    /// for an existing image whose subformat it cannot tell.
    pub fn open(path: &Path, format: DiskFormat, subformat: Option<Subformat>) -> Result<Self> {
        Self::require_existing(path)?;
        if subformat.is_some() && !handler(format).supports_subformat(subformat) {
            return Err(Error::unsupported(format!(
                "{} subformat '{}'",
                format,
                subformat.map(|s| s.tag()).unwrap_or("none")
            )));
        }
        Ok(Self::wrap(path.to_path_buf(), format, subformat))
    }

    /// Create a new image file.
    ///
    /// # Errors
    ///
    /// Fails if `path` already exists, if the format cannot hold the requested
    /// content, or if a helper fails.
    pub fn create_file(
        toolbox: &Toolbox,
        path: &Path,
        format: DiskFormat,
        subformat: Option<Subformat>,
        options: &CreateOptions,
    ) -> Result<Self> {
        if path.exists() {
            return Err(Error::invalid_argument(format!(
                "'{}' already exists",
                path.display()
            )));
        }
        let subformat = resolve_subformat(format, subformat)?;
        log::info!("Creating {} image {}", format, path.display());
        handler(format).create_file(toolbox, path, subformat, options)?;
        Ok(Self::wrap(path.to_path_buf(), format, subformat))
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Container format.
    pub fn disk_format(&self) -> DiskFormat {
        self.format
    }

    /// Format-specific variant, if known.
    pub fn subformat(&self) -> Option<Subformat> {
        self.subformat
    }

    /// Drive type this image would normally be attached as.
    pub fn predicted_drive_type(&self) -> DriveType {
        match self.format {
            DiskFormat::Iso => DriveType::Cdrom,
            _ => DriveType::Harddisk,
        }
    }

    /// Virtual capacity in bytes.
    pub fn capacity(&self, toolbox: &Toolbox) -> Result<u64> {
        self.capacity
            .get_or_try_init(|| handler(self.format).capacity(toolbox, self))
            .copied()
    }

    /// Files contained in the image, or `None` if the format cannot list them.
    pub fn files(&self, toolbox: &Toolbox) -> Result<Option<&[String]>> {
        let files = self
            .files
            .get_or_try_init(|| handler(self.format).files(toolbox, self))?;
        Ok(files.as_deref())
    }

    /// Convert this image to `format`/`subformat` in `output_dir`.
    ///
    /// Converting to the current format and subformat returns a representation
    /// of the same file without running any helper.
    pub fn convert(
        &self,
        toolbox: &Toolbox,
        format: DiskFormat,
        subformat: Option<Subformat>,
        output_dir: &Path,
    ) -> Result<DiskRepresentation> {
        let subformat = resolve_subformat(format, subformat)?;
        if self.format == format && self.subformat == subformat {
            log::debug!(
                "{} is already {}; nothing to convert",
                self.path.display(),
                format
            );
            return Ok(self.clone());
        }
        fs::create_dir_all(output_dir).map_err(|e| Error::io(e, output_dir))?;
        handler(format).from_other_image(toolbox, self, output_dir, subformat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_tags_round_trip() {
        for format in DiskFormat::ALL {
            assert_eq!(format.tag().parse::<DiskFormat>().unwrap(), format);
        }
        assert_eq!("QCOW2".parse::<DiskFormat>().unwrap(), DiskFormat::Qcow2);
    }

    #[test]
    fn unknown_format_is_unsupported() {
        let err = "vhdx".parse::<DiskFormat>().unwrap_err();
        assert!(matches!(err, Error::Unsupported { .. }));
    }

    #[test]
    fn subformat_parsing() {
        assert_eq!(
            "streamOptimized".parse::<Subformat>().unwrap(),
            Subformat::StreamOptimized
        );
        assert_eq!("rockridge".parse::<Subformat>().unwrap(), Subformat::RockRidge);
        assert_eq!(Subformat::MonolithicSparse.format(), DiskFormat::Vmdk);
        assert!("twoGbMaxExtentFlat".parse::<Subformat>().is_err());
    }

    #[test]
    fn drive_type_from_extension() {
        assert_eq!(DriveType::from_extension(Path::new("a.iso")).unwrap(), DriveType::Cdrom);
        for name in ["a.vmdk", "a.raw", "a.qcow2", "a.img", "A.VMDK"] {
            assert_eq!(
                DriveType::from_extension(Path::new(name)).unwrap(),
                DriveType::Harddisk
            );
        }
        assert!(DriveType::from_extension(Path::new("a.txt")).is_err());
        assert!(DriveType::from_extension(Path::new("noext")).is_err());
    }

    #[test]
    fn vmdk_defaults_to_stream_optimized() {
        assert_eq!(
            resolve_subformat(DiskFormat::Vmdk, None).unwrap(),
            Some(Subformat::StreamOptimized)
        );
        assert!(resolve_subformat(DiskFormat::Vmdk, Some(Subformat::RockRidge)).is_err());
        assert!(resolve_subformat(DiskFormat::Qcow2, Some(Subformat::StreamOptimized)).is_err());
        assert_eq!(resolve_subformat(DiskFormat::Iso, Some(Subformat::RockRidge)).unwrap(), Some(Subformat::RockRidge));
    }

    #[test]
    fn open_requires_existing_file() {
        let err = DiskRepresentation::open(Path::new("/nonexistent/disk.img"), DiskFormat::Raw, None)
            .unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn open_accepts_vmdk_of_unknown_subformat() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.vmdk");
        fs::write(&path, b"KDMV").unwrap();

        let disk = DiskRepresentation::open(&path, DiskFormat::Vmdk, None).unwrap();
        assert_eq!(disk.subformat(), None);
        let err = DiskRepresentation::open(&path, DiskFormat::Vmdk, Some(Subformat::RockRidge))
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported { .. }));
    }

    #[test]
    fn predicted_drive_type_follows_format() {
        let iso = DiskRepresentation::wrap(PathBuf::from("x.iso"), DiskFormat::Iso, None);
        let vmdk = DiskRepresentation::wrap(PathBuf::from("x.vmdk"), DiskFormat::Vmdk, None);
        assert_eq!(iso.predicted_drive_type(), DriveType::Cdrom);
        assert_eq!(vmdk.predicted_drive_type(), DriveType::Harddisk);
    }
}
