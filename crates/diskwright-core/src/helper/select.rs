//! Choosing between competing helpers.
//!
//! Several conversions can be done by more than one tool, and some only work
//! correctly with a minimum tool version. [`helper_select`] picks the best
//! available candidate, preferring tools that are already installed over
//! tools that would need installing.

use std::rc::Rc;

use semver::Version;

use crate::error::{Error, Result};
use crate::helper::{Helper, Toolbox};

/// One acceptable choice: a helper name, optionally with a minimum version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Helper name.
    pub name: String,
    /// Lowest acceptable version, if any.
    pub min_version: Option<Version>,
}

impl Candidate {
    /// Any version of `name`.
    pub fn any(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            min_version: None,
        }
    }

    /// `name` at `min_version` or newer.
    pub fn at_least(name: impl Into<String>, min_version: Version) -> Self {
        Self {
            name: name.into(),
            min_version: Some(min_version),
        }
    }
}

impl From<&str> for Candidate {
    fn from(name: &str) -> Self {
        Candidate::any(name)
    }
}

impl From<(&str, Version)> for Candidate {
    fn from((name, min_version): (&str, Version)) -> Self {
        Candidate::at_least(name, min_version)
    }
}

impl std::fmt::Display for Candidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.min_version {
            Some(v) => write!(f, "{} >= {}", self.name, v),
            None => write!(f, "{}", self.name),
        }
    }
}

/// The outcome of [`helper_select`]: which candidate clause matched.
#[derive(Debug, Clone)]
pub struct Selection {
    /// The chosen helper.
    pub helper: Rc<Helper>,
    /// Position of the matching clause in the candidate list.
    pub index: usize,
    /// The matching clause's minimum version.
    pub min_version: Option<Version>,
}

impl Selection {
    /// Name of the chosen helper.
    pub fn name(&self) -> &str {
        self.helper.name()
    }
}

/// Whether `helper` meets `min_version`. Unreadable versions never satisfy a minimum.
fn satisfies(helper: &Helper, min_version: Option<&Version>) -> bool {
    let Some(min) = min_version else {
        return true;
    };
    match helper.version() {
        Ok(version) => version >= *min,
        Err(err) => {
            log::warn!("Ignoring '{}' for '>= {}': {}", helper.name(), min, err);
            false
        }
    }
}

/// Select the first usable helper from `candidates`, most preferred first.
///
/// 1. Return the first candidate that is installed and meets its own minimum.
/// 2. Otherwise install installable candidates in order, returning the first
///    one that then meets its own minimum.
///
/// # Errors
///
/// Returns [`Error::NoUsableHelper`] listing every candidate when nothing fits,
/// or the installation error if installing a candidate fails outright.
pub fn helper_select(toolbox: &Toolbox, candidates: &[Candidate]) -> Result<Selection> {
    let resolved: Vec<(Rc<Helper>, &Candidate)> = candidates
        .iter()
        .map(|c| (toolbox.helper(&c.name), c))
        .collect();

    let select = |index: usize, helper: &Rc<Helper>, candidate: &Candidate| {
        log::debug!("Selected '{}' for clause '{}'", helper.name(), candidate);
        Selection {
            helper: Rc::clone(helper),
            index,
            min_version: candidate.min_version.clone(),
        }
    };

    for (index, (helper, candidate)) in resolved.iter().enumerate() {
        if helper.is_installed() && satisfies(helper, candidate.min_version.as_ref()) {
            return Ok(select(index, helper, *candidate));
        }
    }

    for (index, (helper, candidate)) in resolved.iter().enumerate() {
        if !helper.is_installable(toolbox) {
            continue;
        }
        helper.install(toolbox)?;
        if satisfies(helper, candidate.min_version.as_ref()) {
            return Ok(select(index, helper, *candidate));
        }
    }

    let diagnostics: Vec<String> = resolved
        .iter()
        .map(|(helper, candidate)| match (helper.is_installed(), &candidate.min_version) {
            (true, Some(_)) => match helper.version() {
                Ok(version) => format!(
                    "'{}' version {} is installed, but '{}' is required",
                    helper.name(),
                    version,
                    candidate
                ),
                Err(err) => format!("'{}': {}", helper.name(), err),
            },
            _ => helper.unsure_how_to_install(toolbox).to_string(),
        })
        .collect();

    Err(Error::no_usable_helper(diagnostics.join("\n")))
}
