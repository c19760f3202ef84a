//! Format detection.
//!
//! Detection asks `qemu-img info` once per file and reads a small header
//! from the file for magic-number fallbacks. Each format handler turns this
//! [`Probe`] into a confidence score and the highest score wins.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::disk::{handler, DiskFormat};
use crate::error::{Error, Result};
use crate::helper::catalog::QEMU_IMG;
use crate::helper::{CallOptions, Toolbox};

/// Confidence assigned to a magic-number match.
pub const MAGIC_CONFIDENCE: u8 = 90;

/// Confidence below which a detection result is logged as a guess.
pub const LOW_CONFIDENCE: u8 = 50;

/// Bytes read from the start of each file; covers the last ISO descriptor offset.
const HEADER_LEN: u64 = 0x9010;

/// Offsets of the ISO 9660 "CD001" identifier.
const ISO_MAGIC_OFFSETS: [usize; 3] = [0x8001, 0x8801, 0x9001];
const ISO_MAGIC: &[u8] = b"CD001";
const QCOW2_MAGIC: &[u8] = b"QFI\xfb";
const VMDK_SPARSE_MAGIC: &[u8] = b"KDMV";
const VMDK_COWD_MAGIC: &[u8] = b"COWD";
const VMDK_DESCRIPTOR_MAGIC: &[u8] = b"# Disk DescriptorFile";

static FILE_FORMAT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^file format:\s*(\S+)").expect("valid regex"));
static VIRTUAL_SIZE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"virtual size:.*\((\d+) bytes\)").expect("valid regex"));
static CREATE_TYPE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)create[ _]?type\s*[:=]\s*"?([A-Za-z]+)"?"#).expect("valid regex")
});

/// What is known about a file before scoring it.
#[derive(Debug, Clone)]
pub struct Probe {
    path: PathBuf,
    info: Option<String>,
    header: Vec<u8>,
}

impl Probe {
    /// Inspect `path`: run `qemu-img info` if it is available, and read the header.
    ///
    /// A missing or failing inspector is not an error; detection then relies
    /// on magic numbers alone.
    pub fn new(toolbox: &Toolbox, path: &Path) -> Result<Self> {
        let qemu_img = toolbox.helper(QEMU_IMG);
        let info = if qemu_img.is_usable() {
            match qemu_img.call(toolbox, [Path::new("info"), path], &CallOptions::captured()) {
                Ok(output) => Some(output),
                Err(err) => {
                    log::debug!("qemu-img could not inspect {}: {}", path.display(), err);
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            path: path.to_path_buf(),
            info,
            header: read_header(path)?,
        })
    }

    /// Build a probe from already known parts.
    pub fn from_parts(path: impl Into<PathBuf>, info: Option<String>, header: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            info,
            header,
        }
    }

    /// The probed file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Full `qemu-img info` output, if the inspector ran.
    pub fn info(&self) -> Option<&str> {
        self.info.as_deref()
    }

    /// The format reported by the inspector, if it ran.
    pub fn inspected_format(&self) -> Option<&str> {
        self.info.as_deref().and_then(parse_file_format)
    }

    /// The first bytes of the file.
    pub fn header(&self) -> &[u8] {
        &self.header
    }

    /// Whether `magic` appears at `offset`.
    pub fn has_bytes_at(&self, offset: usize, magic: &[u8]) -> bool {
        self.header
            .get(offset..offset + magic.len())
            .is_some_and(|bytes| bytes == magic)
    }

    /// ISO 9660 volume descriptor identifier.
    pub fn has_iso_magic(&self) -> bool {
        ISO_MAGIC_OFFSETS
            .iter()
            .any(|&offset| self.has_bytes_at(offset, ISO_MAGIC))
    }

    /// QCOW header.
    pub fn has_qcow2_magic(&self) -> bool {
        self.has_bytes_at(0, QCOW2_MAGIC)
    }

    /// Sparse VMDK header or text descriptor.
    pub fn has_vmdk_magic(&self) -> bool {
        self.has_bytes_at(0, VMDK_SPARSE_MAGIC)
            || self.has_bytes_at(0, VMDK_COWD_MAGIC)
            || self.has_bytes_at(0, VMDK_DESCRIPTOR_MAGIC)
    }

    /// The `createType` of a VMDK, from the inspector or the embedded descriptor.
    pub fn vmdk_create_type(&self) -> Option<String> {
        if let Some(found) = self.info.as_deref().and_then(parse_create_type) {
            return Some(found);
        }
        parse_create_type(&String::from_utf8_lossy(&self.header))
    }
}

fn read_header(path: &Path) -> Result<Vec<u8>> {
    let file = File::open(path).map_err(|e| Error::io(e, path))?;
    let mut header = Vec::new();
    file.take(HEADER_LEN)
        .read_to_end(&mut header)
        .map_err(|e| Error::io(e, path))?;
    Ok(header)
}

/// Extract the "file format" line from `qemu-img info` output.
pub fn parse_file_format(info: &str) -> Option<&str> {
    FILE_FORMAT_RE
        .captures(info)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Extract the virtual size in bytes from `qemu-img info` output.
pub fn parse_virtual_size(info: &str) -> Option<u64> {
    VIRTUAL_SIZE_RE
        .captures(info)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Extract a VMDK create type from inspector output or descriptor text.
pub fn parse_create_type(text: &str) -> Option<String> {
    CREATE_TYPE_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Virtual size of an image as reported by `qemu-img info`.
pub fn qemu_img_capacity(toolbox: &Toolbox, path: &Path) -> Result<u64> {
    let output = toolbox
        .helper(QEMU_IMG)
        .call(toolbox, [Path::new("info"), path], &CallOptions::captured())?;
    parse_virtual_size(&output).ok_or_else(|| {
        Error::helper_failed(
            QEMU_IMG,
            None,
            format!("no virtual size in output for '{}':\n{}", path.display(), output),
        )
    })
}

/// Score every format against `probe` and pick the best.
///
/// Ties keep the earlier format in [`DiskFormat::ALL`] order and log a
/// warning; a winner below [`LOW_CONFIDENCE`] is used but logged as a guess.
///
/// # Errors
///
/// Returns [`Error::UnsupportedFileType`] when every format scores zero.
pub fn select_format(toolbox: &Toolbox, probe: &Probe) -> Result<(DiskFormat, u8)> {
    let mut best: Option<(DiskFormat, u8)> = None;

    for format in DiskFormat::ALL {
        let score = handler(format).confidence(toolbox, probe);
        log::debug!("{}: {} confidence {}", probe.path().display(), format, score);
        if score == 0 {
            continue;
        }
        match best {
            Some((_, best_score)) if score > best_score => best = Some((format, score)),
            Some((best_format, best_score)) if score == best_score => log::warn!(
                "{} matches both {} and {} with confidence {}; using {}",
                probe.path().display(),
                best_format,
                format,
                score,
                best_format
            ),
            Some(_) => {}
            None => best = Some((format, score)),
        }
    }

    let (format, score) = best.ok_or_else(|| Error::unsupported_file_type(probe.path()))?;
    if score < LOW_CONFIDENCE {
        log::warn!(
            "{} is probably {} but detection confidence is only {}",
            probe.path().display(),
            format,
            score
        );
    }
    Ok((format, score))
}

#[cfg(test)]
mod tests {
    use super::*;

    const QEMU_INFO_VMDK: &str = "image: disk.vmdk
file format: vmdk
virtual size: 1.0G (1073741824 bytes)
disk size: 64K
Format specific information:
    cid: 1234
    parent cid: 4294967295
    create type: streamOptimized
";

    fn offline_toolbox() -> (tempfile::TempDir, Toolbox) {
        let dir = tempfile::tempdir().unwrap();
        let options = crate::helper::ToolboxOptions::default().with_search_path(dir.path());
        (dir, Toolbox::new(options))
    }

    fn iso_header() -> Vec<u8> {
        let mut header = vec![0u8; 0x9010];
        header[0x8001..0x8006].copy_from_slice(b"CD001");
        header
    }

    #[test]
    fn parses_qemu_info() {
        assert_eq!(parse_file_format(QEMU_INFO_VMDK), Some("vmdk"));
        assert_eq!(parse_virtual_size(QEMU_INFO_VMDK), Some(1073741824));
        assert_eq!(parse_create_type(QEMU_INFO_VMDK).as_deref(), Some("streamOptimized"));
    }

    #[test]
    fn parses_newer_virtual_size_format() {
        let info = "file format: qcow2\nvirtual size: 8 GiB (8589934592 bytes)\n";
        assert_eq!(parse_virtual_size(info), Some(8589934592));
    }

    #[test]
    fn parses_descriptor_create_type() {
        let descriptor = "# Disk DescriptorFile\nversion=1\ncreateType=\"monolithicSparse\"\n";
        assert_eq!(parse_create_type(descriptor).as_deref(), Some("monolithicSparse"));
    }

    #[test]
    fn magic_numbers() {
        let iso = Probe::from_parts("a.iso", None, iso_header());
        assert!(iso.has_iso_magic());
        assert!(!iso.has_qcow2_magic());

        let qcow = Probe::from_parts("a.qcow2", None, b"QFI\xfb\x00\x00\x00\x03".to_vec());
        assert!(qcow.has_qcow2_magic());
        assert!(!qcow.has_vmdk_magic());

        let vmdk = Probe::from_parts("a.vmdk", None, b"KDMV\x03\x00\x00\x00".to_vec());
        assert!(vmdk.has_vmdk_magic());
    }

    #[test]
    fn short_header_has_no_iso_magic() {
        let probe = Probe::from_parts("tiny", None, vec![0u8; 16]);
        assert!(!probe.has_iso_magic());
        assert!(!probe.has_bytes_at(10, b"0123456789"));
    }

    #[test]
    fn select_prefers_inspector_answer() {
        let (_dir, toolbox) = offline_toolbox();
        let probe = Probe::from_parts("disk.vmdk", Some(QEMU_INFO_VMDK.to_string()), Vec::new());
        let (format, score) = select_format(&toolbox, &probe).unwrap();
        assert_eq!(format, DiskFormat::Vmdk);
        assert_eq!(score, 100);
    }

    #[test]
    fn select_uses_magic_without_inspector() {
        let (_dir, toolbox) = offline_toolbox();
        let probe = Probe::from_parts("disk", None, b"QFI\xfb".to_vec());
        assert_eq!(select_format(&toolbox, &probe).unwrap(), (DiskFormat::Qcow2, MAGIC_CONFIDENCE));
    }

    #[test]
    fn winner_scores_strictly_above_every_other_format() {
        let (_dir, toolbox) = offline_toolbox();
        let info = |format: &str| Some(format!("file format: {}\nvirtual size: 1.0 MiB (1048576 bytes)\n", format));
        let descriptor = b"# Disk DescriptorFile\nversion=1\ncreateType=\"monolithicSparse\"\n".to_vec();
        let cases = [
            (iso_header(), "raw", DiskFormat::Iso),
            (b"QFI\xfb\x00\x00\x00\x03".to_vec(), "qcow2", DiskFormat::Qcow2),
            (b"KDMV\x01\x00\x00\x00".to_vec(), "vmdk", DiskFormat::Vmdk),
            (descriptor, "vmdk", DiskFormat::Vmdk),
            (vec![0x55u8; 4096], "raw", DiskFormat::Raw),
            (Vec::new(), "raw", DiskFormat::Raw),
        ];

        for (header, inspected, expected) in cases {
            for probe_info in [info(inspected), None] {
                let probe = Probe::from_parts("disk", probe_info.clone(), header.clone());
                let winner = handler(expected).confidence(&toolbox, &probe);
                assert!(
                    winner >= LOW_CONFIDENCE,
                    "{expected} scored {winner} (inspector: {probe_info:?})"
                );
                for other in DiskFormat::ALL.into_iter().filter(|f| *f != expected) {
                    let score = handler(other).confidence(&toolbox, &probe);
                    assert!(
                        score < winner,
                        "{other} scored {score} against {expected} at {winner} (inspector: {probe_info:?})"
                    );
                }
                assert_eq!(select_format(&toolbox, &probe).unwrap(), (expected, winner));
            }
        }
    }

    #[test]
    fn select_fails_when_nothing_matches() {
        let (_dir, toolbox) = offline_toolbox();
        let probe = Probe::from_parts(
            "mystery",
            Some("file format: vpc\n".to_string()),
            Vec::new(),
        );
        let err = select_format(&toolbox, &probe).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFileType { .. }));
    }
}
