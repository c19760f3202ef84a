//! External helper programs.
//!
//! A [`Helper`] wraps one external executable (qemu-img, vmdktool, ...). It
//! knows how to find the executable, how to ask it for its version, how to
//! invoke it, and how to install it through a package manager when missing.
//!
//! Helpers are owned by a [`Toolbox`], which also holds the package managers
//! and the confirmation callback used before on-demand installation.
//!
//! Path, version and installed state are memoized per helper for the life of
//! the toolbox. If a tool is installed outside this process after it has been
//! looked up, the cached answer is stale until [`Helper::invalidate`] is called.

pub mod catalog;
pub mod package_manager;
pub mod select;
pub mod source_build;
pub mod toolbox;

use std::cell::{Cell, RefCell};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Command;

use regex::Regex;
use semver::Version;

use crate::error::{Error, Result};
use crate::version::extract_version;

pub use package_manager::{PackageManager, PackageManagerKind, PackageSpec};
pub use select::{helper_select, Candidate, Selection};
pub use source_build::SourceRecipe;
pub use toolbox::{ConfirmCallback, Toolbox, ToolboxOptions};

/// Operating system family, used to decide which package managers make sense.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Linux distributions (apt-get, yum).
    Linux,
    /// macOS (brew, port).
    MacOs,
    /// Anything else; no package managers are considered.
    Other,
}

impl Platform {
    /// Detect the platform this binary was built for.
    pub fn current() -> Self {
        if cfg!(target_os = "linux") {
            Platform::Linux
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Other
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Linux => write!(f, "Linux"),
            Platform::MacOs => write!(f, "macOS"),
            Platform::Other => write!(f, "this platform"),
        }
    }
}

/// How a helper gets installed when it is missing.
#[derive(Debug, Clone, Copy)]
pub enum InstallStrategy {
    /// Install through the first usable declared package manager.
    PackageManagers,
    /// Use a package manager if one is usable, else build from source.
    SourceBuild(&'static SourceRecipe),
    /// Never install automatically (for example for licensing reasons).
    Never,
}

/// Static description of a helper program.
#[derive(Debug, Clone)]
pub struct HelperSpec {
    /// Executable name, also the registry key.
    pub name: String,
    /// Arguments that make the tool print its version.
    pub version_args: Vec<String>,
    /// Regex with one capture group that extracts the version from the output.
    pub version_pattern: Option<String>,
    /// Where a human can learn more about the tool.
    pub info_uri: Option<String>,
    /// Package declarations, tried in this order.
    pub providers: Vec<(PackageManagerKind, PackageSpec)>,
    /// Installation strategy.
    pub strategy: InstallStrategy,
}

impl HelperSpec {
    /// A helper with no version pattern and no declared packages.
    ///
    /// The strategy defaults to package managers, so the helper only becomes
    /// installable once a provider is declared.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version_args: vec!["--version".to_string()],
            version_pattern: None,
            info_uri: None,
            providers: Vec::new(),
            strategy: InstallStrategy::PackageManagers,
        }
    }

    /// Set the version arguments and extraction pattern.
    pub fn version(mut self, args: &[&str], pattern: &str) -> Self {
        self.version_args = args.iter().map(|a| a.to_string()).collect();
        self.version_pattern = Some(pattern.to_string());
        self
    }

    /// Set the informational URI.
    pub fn info_uri(mut self, uri: &str) -> Self {
        self.info_uri = Some(uri.to_string());
        self
    }

    /// Declare a package that provides this helper.
    pub fn provider(mut self, kind: PackageManagerKind, package: impl Into<PackageSpec>) -> Self {
        self.providers.push((kind, package.into()));
        self
    }

    /// Set the installation strategy.
    pub fn strategy(mut self, strategy: InstallStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}

/// Options for a single helper invocation.
#[derive(Debug, Clone)]
pub struct CallOptions {
    /// Capture and return stdout and stderr instead of inheriting them.
    pub capture_output: bool,
    /// Return normally even when the tool exits non-zero.
    pub allow_failure: bool,
    /// Retry once through `sudo` if the call fails.
    pub retry_with_sudo: bool,
    /// Working directory for the child process.
    pub cwd: Option<PathBuf>,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self::captured()
    }
}

impl CallOptions {
    /// Capture output and fail on non-zero exit.
    pub fn captured() -> Self {
        Self {
            capture_output: true,
            allow_failure: false,
            retry_with_sudo: false,
            cwd: None,
        }
    }

    /// Inherit the parent's stdout/stderr.
    pub fn passthrough() -> Self {
        Self {
            capture_output: false,
            ..Self::captured()
        }
    }

    /// Tolerate a non-zero exit status.
    pub fn allow_failure(mut self) -> Self {
        self.allow_failure = true;
        self
    }

    /// Retry through `sudo` on failure.
    pub fn retry_with_sudo(mut self) -> Self {
        self.retry_with_sudo = true;
        self
    }

    /// Run in the given directory.
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }
}

#[derive(Debug, Default)]
struct HelperCache {
    path: Option<Option<PathBuf>>,
    version: Option<Version>,
}

/// A proxy for one external executable.
#[derive(Debug)]
pub struct Helper {
    spec: HelperSpec,
    search_path: Option<OsString>,
    cache: RefCell<HelperCache>,
    forced_installed: Cell<Option<bool>>,
}

impl Helper {
    /// Create a helper that searches `search_path` (or `$PATH` when `None`).
    pub fn new(spec: HelperSpec, search_path: Option<OsString>) -> Self {
        Self {
            spec,
            search_path,
            cache: RefCell::new(HelperCache::default()),
            forced_installed: Cell::new(None),
        }
    }

    /// Name of the executable.
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// The static description of this helper.
    pub fn spec(&self) -> &HelperSpec {
        &self.spec
    }

    /// Informational URI, if any.
    pub fn info_uri(&self) -> Option<&str> {
        self.spec.info_uri.as_deref()
    }

    /// Resolved location of the executable, searched once and cached.
    pub fn path(&self) -> Option<PathBuf> {
        if let Some(cached) = &self.cache.borrow().path {
            return cached.clone();
        }

        let found = match &self.search_path {
            Some(paths) => {
                let cwd = std::env::current_dir().unwrap_or_default();
                which::which_in(self.name(), Some(paths), cwd).ok()
            }
            None => which::which(self.name()).ok(),
        };
        match &found {
            Some(p) => log::debug!("Found '{}' at {}", self.name(), p.display()),
            None => log::debug!("'{}' not found", self.name()),
        }
        self.cache.borrow_mut().path = Some(found.clone());
        found
    }

    /// Whether the executable was found on the search path.
    pub fn is_usable(&self) -> bool {
        self.path().is_some()
    }

    /// Whether the helper counts as installed.
    ///
    /// This is [`Helper::is_usable`] unless overridden with [`Helper::set_installed`].
    pub fn is_installed(&self) -> bool {
        match self.forced_installed.get() {
            Some(forced) => forced,
            None => self.is_usable(),
        }
    }

    /// Force the installed state, or pass `None` to go back to path lookup.
    pub fn set_installed(&self, installed: Option<bool>) {
        self.forced_installed.set(installed);
    }

    /// Forget the cached path and version.
    pub fn invalidate(&self) {
        *self.cache.borrow_mut() = HelperCache::default();
    }

    /// Version reported by the tool, computed once and cached.
    ///
    /// # Errors
    ///
    /// Fails if the helper is not usable, has no version pattern, or its
    /// output does not match the pattern.
    pub fn version(&self) -> Result<Version> {
        if let Some(version) = &self.cache.borrow().version {
            return Ok(version.clone());
        }

        let program = self.path().ok_or_else(|| {
            Error::helper_not_found(self.name(), "cannot determine version of a missing helper")
        })?;
        let pattern = self
            .spec
            .version_pattern
            .as_deref()
            .ok_or_else(|| Error::version(self.name(), "no version pattern is known"))?;
        let regex = Regex::new(pattern).map_err(|e| Error::version(self.name(), e.to_string()))?;

        let args: Vec<OsString> = self.spec.version_args.iter().map(OsString::from).collect();
        let output = run_command(
            self.name(),
            &program,
            &args,
            &CallOptions::captured().allow_failure(),
        )?;
        let version = extract_version(self.name(), &regex, &output)?;
        log::debug!("'{}' is version {}", self.name(), version);

        self.cache.borrow_mut().version = Some(version.clone());
        Ok(version)
    }

    /// Whether this helper can be installed by some strategy available here.
    pub fn is_installable(&self, toolbox: &Toolbox) -> bool {
        match self.spec.strategy {
            InstallStrategy::Never => false,
            InstallStrategy::PackageManagers => self.usable_provider(toolbox).is_some(),
            InstallStrategy::SourceBuild(recipe) => {
                self.usable_provider(toolbox).is_some() || recipe.is_applicable(toolbox)
            }
        }
    }

    fn usable_provider<'t>(
        &self,
        toolbox: &'t Toolbox,
    ) -> Option<(&'t PackageManager, &PackageSpec)> {
        self.spec.providers.iter().find_map(|(kind, package)| {
            let manager = toolbox.package_manager(*kind);
            manager.is_usable().then_some((manager, package))
        })
    }

    /// Build the "unsure how to install" diagnostic for this helper.
    ///
    /// The error is [`Error::UnsureHowToInstall`] when a declared package manager
    /// could exist on this platform, else [`Error::UnsupportedPlatform`].
    pub fn unsure_how_to_install(&self, toolbox: &Toolbox) -> Error {
        let platform = toolbox.platform();
        let mut message = format!("No automatic installation of '{}' is possible.", self.name());

        if let InstallStrategy::Never = self.spec.strategy {
            message.push_str(" It must be installed manually.");
            if let Some(uri) = self.info_uri() {
                message.push_str(&format!(" See {}", uri));
            }
            return Error::unsupported_platform(self.name(), message);
        }

        let candidates: Vec<&str> = self
            .spec
            .providers
            .iter()
            .map(|(kind, _)| *kind)
            .filter(|kind| kind.platform() == platform)
            .map(|kind| kind.name())
            .collect();
        let source_possible = matches!(self.spec.strategy, InstallStrategy::SourceBuild(_))
            && platform == Platform::Linux;

        if !candidates.is_empty() {
            message.push_str(&format!(
                " Install one of these package managers and retry: {}.",
                candidates.join(", ")
            ));
        }
        if source_possible {
            message.push_str(" Building from source requires apt-get or yum.");
        }
        if let Some(uri) = self.info_uri() {
            message.push_str(&format!(" Manual installation instructions: {}", uri));
        }

        if candidates.is_empty() && !source_possible {
            Error::unsupported_platform(self.name(), message)
        } else {
            Error::unsure_how_to_install(self.name(), message)
        }
    }

    /// Install the helper if it is not already installed.
    ///
    /// # Errors
    ///
    /// Returns an "unsure how to install" error when no strategy applies, and
    /// [`Error::InstallFailed`] when installation was attempted but failed or
    /// did not make the executable appear.
    pub fn install(&self, toolbox: &Toolbox) -> Result<()> {
        if self.is_installed() {
            return Ok(());
        }
        if !self.is_installable(toolbox) {
            return Err(self.unsure_how_to_install(toolbox));
        }

        log::info!("Installing '{}'...", self.name());
        let attempt = match (self.usable_provider(toolbox), self.spec.strategy) {
            (Some((manager, package)), _) => manager.install_package(toolbox, package),
            (None, InstallStrategy::SourceBuild(recipe)) => recipe.build(toolbox, self),
            (None, _) => Err(self.unsure_how_to_install(toolbox)),
        };
        attempt.map_err(|e| {
            if e.is_install_unknown() {
                e
            } else {
                Error::install_failed(self.name(), e.to_string())
            }
        })?;

        self.invalidate();
        if !self.is_installed() {
            return Err(Error::install_failed(
                self.name(),
                "installation finished but the executable is still not on the search path",
            ));
        }
        log::info!("Successfully installed '{}'", self.name());
        Ok(())
    }

    /// Invoke the helper with the given arguments.
    ///
    /// If the helper is missing, the toolbox's confirmation callback is asked
    /// whether to install it first.
    ///
    /// # Returns
    ///
    /// The combined stdout and stderr text in captured mode, or an empty
    /// string in passthrough mode.
    ///
    /// # Errors
    ///
    /// - [`Error::HelperNotFound`] if the helper is missing and cannot be
    ///   installed, or installation was declined.
    /// - [`Error::HelperFailed`] on non-zero exit, unless failure is allowed.
    pub fn call<I, S>(&self, toolbox: &Toolbox, args: I, options: &CallOptions) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        if !self.is_installed() {
            if !self.is_installable(toolbox) {
                return Err(Error::helper_not_found(
                    self.name(),
                    self.unsure_how_to_install(toolbox).to_string(),
                ));
            }
            let prompt = format!(
                "'{}' does not appear to be installed.\nTry to install it?",
                self.name()
            );
            if !toolbox.confirm(&prompt) {
                return Err(Error::helper_not_found(
                    self.name(),
                    "not installed and installation was declined",
                ));
            }
            self.install(toolbox)?;
        }

        let program = self.path().unwrap_or_else(|| PathBuf::from(self.name()));
        let args: Vec<OsString> = args.into_iter().map(|a| a.as_ref().to_owned()).collect();
        log::debug!("Calling '{}'", display_command(self.name(), &args));

        match run_command(self.name(), &program, &args, options) {
            Err(err) if options.retry_with_sudo && should_elevate(&err) => {
                let sudo = toolbox.helper("sudo");
                let Some(sudo_path) = sudo.path().filter(|_| toolbox.options().allow_elevation)
                else {
                    return Err(err);
                };
                log::info!("'{}' failed ({}); retrying with sudo", self.name(), err);
                let mut elevated = vec![program.into_os_string()];
                elevated.extend(args);
                let mut retry_options = options.clone();
                retry_options.retry_with_sudo = false;
                run_command(self.name(), &sudo_path, &elevated, &retry_options)
            }
            result => result,
        }
    }
}

/// Whether a failed call is worth retrying with elevated privileges.
fn should_elevate(err: &Error) -> bool {
    match err {
        Error::Io { source, .. } => source.kind() == std::io::ErrorKind::PermissionDenied,
        Error::HelperFailed { .. } => true,
        _ => false,
    }
}

fn display_command(name: &str, args: &[OsString]) -> String {
    let mut line = name.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(&arg.to_string_lossy());
    }
    line
}

/// Spawn `program` and wait for it, attributing errors to helper `name`.
fn run_command(name: &str, program: &Path, args: &[OsString], options: &CallOptions) -> Result<String> {
    let mut command = Command::new(program);
    command.args(args);
    if let Some(dir) = &options.cwd {
        command.current_dir(dir);
    }

    let spawn_error = |e: std::io::Error| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::helper_not_found(name, format!("unable to execute '{}'", program.display()))
        } else {
            Error::io(e, program)
        }
    };

    if options.capture_output {
        let output = command.output().map_err(spawn_error)?;
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        if !output.status.success() && !options.allow_failure {
            return Err(Error::helper_failed(name, output.status.code(), text));
        }
        Ok(text)
    } else {
        let status = command.status().map_err(spawn_error)?;
        if !status.success() && !options.allow_failure {
            return Err(Error::helper_failed(name, status.code(), String::new()));
        }
        Ok(String::new())
    }
}
