//! Package managers used to install missing helpers.

use std::cell::Cell;
use std::rc::Rc;

use crate::error::Result;
use crate::helper::{CallOptions, Helper, HelperSpec, InstallStrategy, Platform, Toolbox};

/// The package managers diskwright knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PackageManagerKind {
    /// Debian/Ubuntu `apt-get`.
    AptGet,
    /// RHEL/CentOS/Fedora `yum`.
    Yum,
    /// Homebrew on macOS.
    Brew,
    /// MacPorts.
    Port,
}

impl PackageManagerKind {
    /// All kinds, in the order they are registered.
    pub const ALL: [PackageManagerKind; 4] = [
        PackageManagerKind::AptGet,
        PackageManagerKind::Yum,
        PackageManagerKind::Brew,
        PackageManagerKind::Port,
    ];

    /// Executable name.
    pub fn name(self) -> &'static str {
        match self {
            PackageManagerKind::AptGet => "apt-get",
            PackageManagerKind::Yum => "yum",
            PackageManagerKind::Brew => "brew",
            PackageManagerKind::Port => "port",
        }
    }

    /// The platform this package manager belongs to.
    pub fn platform(self) -> Platform {
        match self {
            PackageManagerKind::AptGet | PackageManagerKind::Yum => Platform::Linux,
            PackageManagerKind::Brew | PackageManagerKind::Port => Platform::MacOs,
        }
    }

    /// Arguments that refresh the repository metadata, if this manager needs it.
    pub fn refresh_args(self) -> Option<&'static [&'static str]> {
        match self {
            PackageManagerKind::AptGet => Some(&["-q", "update"]),
            PackageManagerKind::Yum => None,
            PackageManagerKind::Brew => Some(&["update"]),
            PackageManagerKind::Port => Some(&["selfupdate"]),
        }
    }

    /// Arguments that precede the package spec on install.
    ///
    /// Installs must never wait for an interactive answer.
    pub fn install_args(self) -> &'static [&'static str] {
        match self {
            PackageManagerKind::AptGet => &["-q", "install", "-y"],
            PackageManagerKind::Yum => &["--quiet", "install", "-y"],
            PackageManagerKind::Brew => &["install"],
            PackageManagerKind::Port => &["install"],
        }
    }

    /// Whether calls should be retried through `sudo`.
    pub fn needs_elevation(self) -> bool {
        !matches!(self, PackageManagerKind::Brew)
    }

    /// The helper description for the package manager executable itself.
    pub fn helper_spec(self) -> HelperSpec {
        let spec = HelperSpec::new(self.name()).strategy(InstallStrategy::Never);
        match self {
            PackageManagerKind::AptGet => spec
                .version(&["--version"], r"apt ([0-9.]+)")
                .info_uri("https://wiki.debian.org/Apt"),
            PackageManagerKind::Yum => spec
                .version(&["--version"], r"^\s*([0-9.]+)")
                .info_uri("http://yum.baseurl.org"),
            PackageManagerKind::Brew => spec
                .version(&["--version"], r"Homebrew ([0-9.]+)")
                .info_uri("http://brew.sh"),
            PackageManagerKind::Port => spec
                .version(&["version"], r"Version: ([0-9.]+)")
                .info_uri("https://www.macports.org"),
        }
    }
}

impl std::fmt::Display for PackageManagerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// What to pass to a package manager to install a helper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageSpec {
    /// A single package name.
    Name(String),
    /// An ordered argument list (several packages, or extra flags).
    Args(Vec<String>),
}

impl PackageSpec {
    /// The arguments this spec contributes to the install command.
    pub fn to_args(&self) -> Vec<String> {
        match self {
            PackageSpec::Name(name) => vec![name.clone()],
            PackageSpec::Args(args) => args.clone(),
        }
    }
}

impl From<&str> for PackageSpec {
    fn from(name: &str) -> Self {
        PackageSpec::Name(name.to_string())
    }
}

impl From<&[&str]> for PackageSpec {
    fn from(args: &[&str]) -> Self {
        PackageSpec::Args(args.iter().map(|a| a.to_string()).collect())
    }
}

/// A package manager helper that can install other packages.
///
/// Each toolbox holds exactly one instance per kind, so the repository refresh
/// runs at most once per toolbox.
#[derive(Debug)]
pub struct PackageManager {
    kind: PackageManagerKind,
    helper: Rc<Helper>,
    platform: Platform,
    refreshed: Cell<bool>,
}

impl PackageManager {
    pub(crate) fn new(kind: PackageManagerKind, helper: Rc<Helper>, platform: Platform) -> Self {
        Self {
            kind,
            helper,
            platform,
            refreshed: Cell::new(false),
        }
    }

    /// Which package manager this is.
    pub fn kind(&self) -> PackageManagerKind {
        self.kind
    }

    /// The package manager's own executable.
    pub fn helper(&self) -> &Helper {
        &self.helper
    }

    /// Whether the package manager is present and belongs to this platform.
    pub fn is_usable(&self) -> bool {
        self.kind.platform() == self.platform && self.helper.is_usable()
    }

    /// Whether the repository refresh has already run.
    pub fn is_refreshed(&self) -> bool {
        self.refreshed.get()
    }

    fn call_options(&self) -> CallOptions {
        let options = CallOptions::passthrough();
        if self.kind.needs_elevation() {
            options.retry_with_sudo()
        } else {
            options
        }
    }

    /// Refresh repository metadata once.
    pub fn refresh(&self, toolbox: &Toolbox) -> Result<()> {
        let Some(args) = self.kind.refresh_args() else {
            return Ok(());
        };
        if self.refreshed.get() {
            return Ok(());
        }
        log::info!("Refreshing {} package metadata", self.kind);
        self.helper.call(toolbox, args, &self.call_options())?;
        self.refreshed.set(true);
        Ok(())
    }

    /// Install a package, refreshing repository metadata first if needed.
    pub fn install_package(&self, toolbox: &Toolbox, package: &PackageSpec) -> Result<()> {
        self.refresh(toolbox)?;

        let mut args: Vec<String> = self.kind.install_args().iter().map(|a| a.to_string()).collect();
        args.extend(package.to_args());
        log::info!("Installing {:?} with {}", package.to_args(), self.kind);
        self.helper.call(toolbox, &args, &self.call_options())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_platforms() {
        assert_eq!(PackageManagerKind::AptGet.platform(), Platform::Linux);
        assert_eq!(PackageManagerKind::Yum.platform(), Platform::Linux);
        assert_eq!(PackageManagerKind::Brew.platform(), Platform::MacOs);
        assert_eq!(PackageManagerKind::Port.platform(), Platform::MacOs);
    }

    #[test]
    fn only_brew_skips_elevation() {
        for kind in PackageManagerKind::ALL {
            assert_eq!(kind.needs_elevation(), kind != PackageManagerKind::Brew);
        }
    }

    #[test]
    fn linux_installs_are_non_interactive() {
        assert_eq!(PackageManagerKind::AptGet.install_args(), &["-q", "install", "-y"][..]);
        assert_eq!(PackageManagerKind::Yum.install_args(), &["--quiet", "install", "-y"][..]);
    }

    #[test]
    fn yum_has_no_refresh() {
        assert!(PackageManagerKind::Yum.refresh_args().is_none());
        assert_eq!(PackageManagerKind::AptGet.refresh_args(), Some(&["-q", "update"][..]));
    }

    #[test]
    fn package_spec_args() {
        assert_eq!(PackageSpec::from("qemu-utils").to_args(), vec!["qemu-utils"]);
        let spec = PackageSpec::from(&["make", "zlib1g-dev"][..]);
        assert_eq!(spec.to_args(), vec!["make", "zlib1g-dev"]);
    }
}
