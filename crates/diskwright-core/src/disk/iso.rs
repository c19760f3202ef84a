//! ISO 9660 CD-ROM images.

use std::ffi::OsString;
use std::fs;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::disk::detect::Probe;
use crate::disk::{CreateOptions, DiskFormat, DiskRepresentation, FormatHandler, Subformat};
use crate::error::{Error, Result};
use crate::helper::catalog::{GENISOIMAGE, ISOINFO, MKISOFS, XORRISO};
use crate::helper::{helper_select, CallOptions, Candidate, Toolbox};

static VOLUME_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^Volume id:").expect("valid regex"));
static ROCK_RIDGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Rock Ridge signatures version \d+ found").expect("valid regex"));

/// Handler for ISO images.
pub struct IsoFormat;

impl IsoFormat {
    fn describe(&self, toolbox: &Toolbox, path: &Path) -> Result<String> {
        let args: Vec<OsString> = vec!["-i".into(), path.into(), "-d".into()];
        toolbox
            .helper(ISOINFO)
            .call(toolbox, &args, &CallOptions::captured())
    }
}

impl FormatHandler for IsoFormat {
    fn format(&self) -> DiskFormat {
        DiskFormat::Iso
    }

    fn supports_subformat(&self, subformat: Option<Subformat>) -> bool {
        matches!(subformat, None | Some(Subformat::RockRidge))
    }

    /// isoinfo gives a definite answer; qemu-img only sees ISOs as raw.
    fn confidence(&self, toolbox: &Toolbox, probe: &Probe) -> u8 {
        if toolbox.helper(ISOINFO).is_usable() {
            match self.describe(toolbox, probe.path()) {
                Ok(description) if VOLUME_ID_RE.is_match(&description) => 100,
                Ok(_) => 0,
                Err(err) => {
                    log::debug!("isoinfo rejected {}: {}", probe.path().display(), err);
                    0
                }
            }
        } else if self.has_magic(probe) {
            crate::disk::detect::MAGIC_CONFIDENCE
        } else {
            0
        }
    }

    fn has_magic(&self, probe: &Probe) -> bool {
        probe.has_iso_magic()
    }

    fn detect_subformat(&self, toolbox: &Toolbox, probe: &Probe) -> Result<Option<Subformat>> {
        if !toolbox.helper(ISOINFO).is_usable() {
            return Ok(None);
        }
        let description = self.describe(toolbox, probe.path())?;
        Ok(ROCK_RIDGE_RE
            .is_match(&description)
            .then_some(Subformat::RockRidge))
    }

    fn capacity(&self, _toolbox: &Toolbox, disk: &DiskRepresentation) -> Result<u64> {
        Ok(fs::metadata(disk.path())
            .map_err(|e| Error::io(e, disk.path()))?
            .len())
    }

    fn files(&self, toolbox: &Toolbox, disk: &DiskRepresentation) -> Result<Option<Vec<String>>> {
        let mut args: Vec<OsString> = vec!["-i".into(), disk.path().into(), "-f".into()];
        if disk.subformat() == Some(Subformat::RockRidge) {
            args.push("-R".into());
        }
        let output = toolbox
            .helper(ISOINFO)
            .call(toolbox, &args, &CallOptions::captured())?;
        Ok(Some(parse_file_list(&output)))
    }

    fn create_file(
        &self,
        toolbox: &Toolbox,
        path: &Path,
        subformat: Option<Subformat>,
        options: &CreateOptions,
    ) -> Result<()> {
        if options.files.is_empty() {
            return Err(Error::invalid_argument(
                "an ISO image must be created with at least one file",
            ));
        }

        let selection = helper_select(
            toolbox,
            &[
                Candidate::any(MKISOFS),
                Candidate::any(GENISOIMAGE),
                Candidate::any(XORRISO),
            ],
        )?;

        let mut args: Vec<OsString> = Vec::new();
        if selection.name() == XORRISO {
            args.push("-as".into());
            args.push("mkisofs".into());
        }
        let common: [OsString; 6] = [
            "-output".into(),
            path.into(),
            "-full-iso9660-filenames".into(),
            "-iso-level".into(),
            "2".into(),
            "-allow-lowercase".into(),
        ];
        args.extend(common);
        if subformat == Some(Subformat::RockRidge) {
            args.push("-r".into());
        }
        args.extend(options.files.iter().map(OsString::from));

        selection
            .helper
            .call(toolbox, &args, &CallOptions::captured())?;
        Ok(())
    }

    fn write_converted(
        &self,
        _toolbox: &Toolbox,
        source: &DiskRepresentation,
        _dest: &Path,
        _subformat: Option<Subformat>,
    ) -> Result<()> {
        Err(Error::unsupported(format!(
            "conversion from {} to ISO",
            source.disk_format()
        )))
    }
}

/// Turn `isoinfo -f` output into plain relative file names.
fn parse_file_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let line = line.strip_prefix('/').unwrap_or(line);
            line.strip_suffix(";1").unwrap_or(line).to_string()
        })
        .collect()
}
