//! Helper version parsing.
//!
//! External tools report versions in loose dotted forms ("1.4", "3.01",
//! "2.5.1"). These are normalized into a [`semver::Version`] at parse time so
//! that minimum-version checks are plain comparisons.

use regex::Regex;
use semver::Version;

use crate::error::{Error, Result};

/// Parse a dotted version string into a semantic version.
///
/// Missing minor/patch components default to zero, leading zeros are dropped
/// and components beyond the third are ignored. A leading `v` is accepted.
///
/// # Errors
///
/// Returns an error if the string is empty or contains a non-numeric component.
pub fn parse_version(input: &str) -> Result<Version> {
    let trimmed = input.trim();
    let normalized = trimmed.strip_prefix('v').unwrap_or(trimmed);
    if normalized.is_empty() {
        return Err(Error::invalid_argument("invalid version: empty string"));
    }

    let mut parts = [0u64; 3];
    for (i, component) in normalized.split('.').enumerate() {
        if component.is_empty() {
            return Err(Error::invalid_argument(format!(
                "invalid version '{}': empty component",
                input
            )));
        }
        let value: u64 = component.parse().map_err(|_| {
            Error::invalid_argument(format!(
                "invalid version '{}': non-numeric component '{}'",
                input, component
            ))
        })?;
        if i < parts.len() {
            parts[i] = value;
        }
    }

    Ok(Version::new(parts[0], parts[1], parts[2]))
}

/// Extract and parse a version from a tool's output with the tool's regex.
///
/// The regex must have one capture group containing the dotted version.
pub fn extract_version(name: &str, pattern: &Regex, output: &str) -> Result<Version> {
    let captured = pattern
        .captures(output)
        .and_then(|caps| caps.get(1))
        .ok_or_else(|| {
            Error::version(
                name,
                format!(
                    "version pattern '{}' did not match output:\n{}",
                    pattern.as_str(),
                    output
                ),
            )
        })?;

    parse_version(captured.as_str().trim_end_matches('.'))
        .map_err(|e| Error::version(name, e.to_string()))
}
