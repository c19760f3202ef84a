//! Building helpers from source on Linux hosts without a usable package.

use crate::error::{Error, Result};
use crate::helper::{CallOptions, Helper, PackageManagerKind, PackageSpec, Platform, Toolbox};

/// How to fetch, build and install one helper from source.
#[derive(Debug)]
pub struct SourceRecipe {
    /// Source archive location.
    pub archive_url: &'static str,
    /// File name to save the archive as.
    pub archive_name: &'static str,
    /// Directory the archive unpacks into.
    pub source_dir: &'static str,
    /// Build prerequisites per package manager.
    pub prerequisites: &'static [(PackageManagerKind, &'static [&'static str])],
    /// Commands run in the source directory.
    pub build: &'static [&'static [&'static str]],
    /// Commands run in the source directory, retried with sudo on failure.
    pub install: &'static [&'static [&'static str]],
}

pub(crate) static VMDKTOOL: SourceRecipe = SourceRecipe {
    archive_url: "http://people.freebsd.org/~brian/vmdktool/vmdktool-1.4.tar.gz",
    archive_name: "vmdktool-1.4.tar.gz",
    source_dir: "vmdktool-1.4",
    prerequisites: &[
        (PackageManagerKind::AptGet, &["make", "gcc", "zlib1g-dev"]),
        (PackageManagerKind::Yum, &["make", "gcc", "zlib-devel"]),
    ],
    build: &[&["make", "CFLAGS=-D_GNU_SOURCE -g -O -pipe"]],
    install: &[
        &["mkdir", "-p", "--mode=755", "/usr/local/man/man8"],
        &["make", "install"],
    ],
};

pub(crate) static FATDISK: SourceRecipe = SourceRecipe {
    archive_url: "https://github.com/goblinhack/fatdisk/archive/master.tar.gz",
    archive_name: "fatdisk.tar.gz",
    source_dir: "fatdisk-master",
    prerequisites: &[
        (PackageManagerKind::AptGet, &["make", "gcc"]),
        (PackageManagerKind::Yum, &["make", "gcc"]),
    ],
    build: &[&["sh", "RUNME"]],
    install: &[&["cp", "fatdisk", "/usr/local/bin/fatdisk"]],
};

impl SourceRecipe {
    /// Source builds need Linux and a package manager for the prerequisites.
    pub fn is_applicable(&self, toolbox: &Toolbox) -> bool {
        toolbox.platform() == Platform::Linux && self.prerequisite_manager(toolbox).is_some()
    }

    fn prerequisite_manager<'t>(
        &self,
        toolbox: &'t Toolbox,
    ) -> Option<(&'t crate::helper::PackageManager, &'static [&'static str])> {
        self.prerequisites.iter().find_map(|(kind, packages)| {
            let manager = toolbox.package_manager(*kind);
            manager.is_usable().then_some((manager, *packages))
        })
    }

    /// Download, build and install `helper` inside a scratch directory.
    ///
    /// The scratch directory is removed on every exit path.
    pub fn build(&self, toolbox: &Toolbox, helper: &Helper) -> Result<()> {
        let (manager, packages) = self
            .prerequisite_manager(toolbox)
            .ok_or_else(|| helper.unsure_how_to_install(toolbox))?;

        log::info!("Installing build prerequisites for '{}'", helper.name());
        manager.install_package(toolbox, &PackageSpec::from(packages))?;

        let mut builder = tempfile::Builder::new();
        builder.prefix("diskwright-build-");
        let scratch = match &toolbox.options().scratch_dir {
            Some(dir) => builder.tempdir_in(dir).map_err(|e| Error::io(e, dir))?,
            None => builder.tempdir().map_err(Error::io_simple)?,
        };
        log::debug!("Building '{}' in {}", helper.name(), scratch.path().display());

        let in_scratch = CallOptions::passthrough().in_dir(scratch.path());
        toolbox.helper("curl").call(
            toolbox,
            ["-L", "-sS", "-o", self.archive_name, self.archive_url],
            &in_scratch,
        )?;
        toolbox
            .helper("tar")
            .call(toolbox, ["-xzf", self.archive_name], &in_scratch)?;

        let source = scratch.path().join(self.source_dir);
        let in_source = CallOptions::passthrough().in_dir(&source);
        for command in self.build {
            run_step(toolbox, command, &in_source)?;
        }
        let elevated = in_source.retry_with_sudo();
        for command in self.install {
            run_step(toolbox, command, &elevated)?;
        }

        scratch.close().map_err(Error::io_simple)?;
        Ok(())
    }
}

fn run_step(toolbox: &Toolbox, command: &[&str], options: &CallOptions) -> Result<()> {
    let Some((program, args)) = command.split_first() else {
        return Ok(());
    };
    toolbox.helper(program).call(toolbox, args, options)?;
    Ok(())
}
