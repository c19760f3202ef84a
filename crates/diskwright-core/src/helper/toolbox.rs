//! The helper registry.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::rc::Rc;

use crate::helper::catalog;
use crate::helper::{Helper, HelperSpec, PackageManager, PackageManagerKind, Platform};

/// Asked before a missing helper is installed on demand; return `true` to proceed.
pub type ConfirmCallback = Box<dyn Fn(&str) -> bool>;

/// Options for building a [`Toolbox`].
pub struct ToolboxOptions {
    /// Directories to search for executables instead of `$PATH`.
    pub search_path: Option<OsString>,
    /// Platform used to pick package managers.
    pub platform: Platform,
    /// Confirmation callback for on-demand installation. `None` declines.
    pub confirm: Option<ConfirmCallback>,
    /// Whether calls may be retried through `sudo`.
    pub allow_elevation: bool,
    /// Parent directory for source-build scratch space. `None` uses the
    /// system temporary directory.
    pub scratch_dir: Option<PathBuf>,
}

impl Default for ToolboxOptions {
    fn default() -> Self {
        Self {
            search_path: None,
            platform: Platform::current(),
            confirm: None,
            allow_elevation: true,
            scratch_dir: None,
        }
    }
}

impl std::fmt::Debug for ToolboxOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolboxOptions")
            .field("search_path", &self.search_path)
            .field("platform", &self.platform)
            .field("confirm", &self.confirm.is_some())
            .field("allow_elevation", &self.allow_elevation)
            .field("scratch_dir", &self.scratch_dir)
            .finish()
    }
}

impl ToolboxOptions {
    /// Search only the given directories (a `PATH`-style list is accepted).
    pub fn with_search_path(mut self, path: impl Into<OsString>) -> Self {
        self.search_path = Some(path.into());
        self
    }

    /// Pretend to run on a different platform.
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Use a custom confirmation callback.
    pub fn with_confirm(mut self, confirm: impl Fn(&str) -> bool + 'static) -> Self {
        self.confirm = Some(Box::new(confirm));
        self
    }

    /// Install missing helpers without asking.
    pub fn assume_yes(self) -> Self {
        self.with_confirm(|_| true)
    }

    /// Never retry through `sudo`.
    pub fn without_elevation(mut self) -> Self {
        self.allow_elevation = false;
        self
    }

    /// Build helpers from source under `dir`.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }
}

/// Registry of helpers and package managers shared by one run.
///
/// Known helpers are registered eagerly by [`Toolbox::new`]. The toolbox is
/// single-threaded: callers that want to share it across threads must wrap
/// and serialize access themselves.
#[derive(Debug)]
pub struct Toolbox {
    options: ToolboxOptions,
    helpers: RefCell<BTreeMap<String, Rc<Helper>>>,
    package_managers: Vec<PackageManager>,
}

impl Default for Toolbox {
    fn default() -> Self {
        Self::new(ToolboxOptions::default())
    }
}

impl Toolbox {
    /// Create a toolbox with every known helper and package manager registered.
    pub fn new(options: ToolboxOptions) -> Self {
        let mut helpers = BTreeMap::new();
        let mut package_managers = Vec::with_capacity(PackageManagerKind::ALL.len());

        for kind in PackageManagerKind::ALL {
            let helper = Rc::new(Helper::new(kind.helper_spec(), options.search_path.clone()));
            helpers.insert(kind.name().to_string(), Rc::clone(&helper));
            package_managers.push(PackageManager::new(kind, helper, options.platform));
        }
        for spec in catalog::known_helpers() {
            let helper = Helper::new(spec, options.search_path.clone());
            helpers.insert(helper.name().to_string(), Rc::new(helper));
        }

        Self {
            options,
            helpers: RefCell::new(helpers),
            package_managers,
        }
    }

    /// The options this toolbox was built with.
    pub fn options(&self) -> &ToolboxOptions {
        &self.options
    }

    /// The platform used for package manager selection.
    pub fn platform(&self) -> Platform {
        self.options.platform
    }

    /// Register (or replace) a helper.
    pub fn register(&self, spec: HelperSpec) -> Rc<Helper> {
        let helper = Rc::new(Helper::new(spec, self.options.search_path.clone()));
        self.helpers
            .borrow_mut()
            .insert(helper.name().to_string(), Rc::clone(&helper));
        helper
    }

    /// Look up a registered helper without creating one.
    pub fn get(&self, name: &str) -> Option<Rc<Helper>> {
        self.helpers.borrow().get(name).cloned()
    }

    /// Look up a helper, creating a generic one for unknown names.
    ///
    /// Generic helpers are found by path search only and cannot be installed.
    pub fn helper(&self, name: &str) -> Rc<Helper> {
        if let Some(helper) = self.get(name) {
            return helper;
        }
        log::debug!("Registering generic helper '{}'", name);
        self.register(HelperSpec::new(name).strategy(crate::helper::InstallStrategy::Never))
    }

    /// All registered helpers, sorted by name.
    pub fn helpers(&self) -> Vec<Rc<Helper>> {
        self.helpers.borrow().values().cloned().collect()
    }

    /// The package manager of the given kind.
    pub fn package_manager(&self, kind: PackageManagerKind) -> &PackageManager {
        // Every kind is registered in `new`, in `ALL` order.
        &self.package_managers[kind as usize]
    }

    /// All package managers in registration order.
    pub fn package_managers(&self) -> &[PackageManager] {
        &self.package_managers
    }

    /// Ask the confirmation callback; declines when none is configured.
    pub fn confirm(&self, prompt: &str) -> bool {
        match &self.options.confirm {
            Some(confirm) => confirm(prompt),
            None => {
                log::debug!("No confirmation callback; declining: {}", prompt);
                false
            }
        }
    }

    /// Forget every cached path and version.
    pub fn invalidate_all(&self) {
        for helper in self.helpers.borrow().values() {
            helper.invalidate();
        }
    }
}
