//! Fake helper programs for hermetic tests.
//!
//! Every fake is a small POSIX shell script placed in a temporary directory
//! that serves as the toolbox's only search path. Each script appends its
//! name and arguments to `calls.log` before doing anything else.

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use diskwright_core::{Platform, Toolbox, ToolboxOptions};
use tempfile::TempDir;

pub const QCOW2_HEADER: &[u8] = b"QFI\xfb\x00\x00\x00\x03";

/// Copies the second-to-last argument onto the last one.
const COPY_LAST_TWO: &str = r#"src=""; dst=""
for a; do src="$dst"; dst="$a"; done
cp "$src" "$dst"
"#;

pub struct FakeTools {
    root: TempDir,
}

impl FakeTools {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("bin")).unwrap();
        fs::create_dir(root.path().join("stash")).unwrap();
        fs::write(root.path().join("calls.log"), "").unwrap();
        Self { root }
    }

    /// The search path holding the fakes.
    pub fn bin(&self) -> PathBuf {
        self.root.path().join("bin")
    }

    fn log_path(&self) -> PathBuf {
        self.root.path().join("calls.log")
    }

    fn script(&self, name: &str, body: &str) -> String {
        format!(
            "#!/bin/sh\necho \"{} $*\" >> '{}'\n{}",
            name,
            self.log_path().display(),
            body
        )
    }

    fn write_executable(path: &Path, text: &str) {
        fs::write(path, text).unwrap();
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    /// Install a fake `name` on the search path running `body`.
    pub fn add(&self, name: &str, body: &str) {
        Self::write_executable(&self.bin().join(name), &self.script(name, body));
    }

    /// Prepare a fake `name` that a fake package manager can install later.
    pub fn stash(&self, name: &str, body: &str) {
        Self::write_executable(&self.root.path().join("stash").join(name), &self.script(name, body));
    }

    /// A qemu-img reporting `version` whose `info` goes by file extension.
    pub fn add_qemu_img(&self, version: &str) {
        let body = format!(
            r#"case "$1" in
--version)
    echo "qemu-img version {version}, Copyright (c) 2003-2017 Fabrice Bellard"
    ;;
info)
    case "$2" in
    *.qcow2) echo "file format: qcow2" ;;
    *.vmdk) echo "file format: vmdk"; echo "    create type: streamOptimized" ;;
    *) echo "file format: raw" ;;
    esac
    echo "virtual size: 1.0 MiB (1048576 bytes)"
    ;;
create)
    n=0; for a; do n=$((n + 1)); done
    i=0; for a; do i=$((i + 1)); if [ "$i" -eq $((n - 1)) ]; then : > "$a"; fi; done
    ;;
convert)
{copy}    ;;
*)
    exit 1
    ;;
esac
"#,
            version = version,
            copy = COPY_LAST_TWO
        );
        self.add("qemu-img", &body);
    }

    fn vmdktool_body() -> String {
        format!(
            r#"if [ "$1" = "-V" ]; then echo "vmdktool version 1.4"; exit 0; fi
{}"#,
            COPY_LAST_TWO
        )
    }

    /// A working vmdktool on the search path.
    pub fn add_vmdktool(&self) {
        self.add("vmdktool", &Self::vmdktool_body());
    }

    /// A vmdktool that reports its version but fails every conversion.
    pub fn add_broken_vmdktool(&self) {
        self.add(
            "vmdktool",
            "if [ \"$1\" = \"-V\" ]; then echo \"vmdktool version 1.4\"; exit 0; fi\necho \"vmdktool: write error\" >&2\nexit 1\n",
        );
    }

    /// A brew that "installs" packages by copying them out of the stash.
    ///
    /// Stashes a working vmdktool for it to install.
    pub fn add_brew(&self) {
        self.stash("vmdktool", &Self::vmdktool_body());
        let body = format!(
            r#"case "$1" in
--version) echo "Homebrew 4.1.0" ;;
update) ;;
install)
    [ -f '{stash}/'"$2" ] || exit 1
    cp '{stash}/'"$2" '{bin}/'"$2"
    ;;
*) exit 1 ;;
esac
"#,
            stash = self.root.path().join("stash").display(),
            bin = self.bin().display()
        );
        self.add("brew", &body);
    }

    /// Prepare package `package` providing executable `exe` for
    /// [`FakeTools::add_linux_package_manager`] to install.
    pub fn stash_package(&self, package: &str, exe: &str, body: &str) {
        let dir = self.root.path().join("stash").join(package);
        fs::create_dir_all(&dir).unwrap();
        Self::write_executable(&dir.join(exe), &self.script(exe, body));
    }

    /// An apt-get or yum that installs stashed packages and accepts any other
    /// package name without doing anything.
    pub fn add_linux_package_manager(&self, name: &str) {
        let body = format!(
            r#"for a; do
    case "$a" in
    -*|install|update) ;;
    *) if [ -d '{stash}/'"$a" ]; then cp '{stash}/'"$a"/* '{bin}/'; fi ;;
    esac
done
"#,
            stash = self.root.path().join("stash").display(),
            bin = self.bin().display()
        );
        self.add(name, &body);
    }

    /// curl, tar and mkdir fakes that let a vmdktool source build reach its
    /// `make` steps, with `make` running `make_body`.
    pub fn add_vmdktool_source_tools(&self, make_body: &str) {
        self.add("curl", "for a; do out=\"$prev\"; prev=\"$a\"; done\n: > \"$out\"\n");
        self.add("tar", "mkdir vmdktool-1.4\n");
        self.add("mkdir", "exit 0\n");
        self.add("make", make_body);
    }

    /// A `make` whose `install` target puts a working vmdktool on the search path.
    pub fn vmdktool_make_body(&self) -> String {
        let exe = self.root.path().join("stash").join("vmdktool");
        Self::write_executable(&exe, &self.script("vmdktool", &Self::vmdktool_body()));
        format!(
            "if [ \"$1\" = install ]; then cp '{}' '{}/'; fi\n",
            exe.display(),
            self.bin().display()
        )
    }

    /// Every recorded invocation, in order.
    pub fn calls(&self) -> Vec<String> {
        fs::read_to_string(self.log_path())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Invocations whose command line starts with `prefix`.
    pub fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    /// A toolbox limited to the fakes that installs without asking.
    pub fn toolbox(&self, platform: Platform) -> Toolbox {
        Toolbox::new(
            ToolboxOptions::default()
                .with_search_path(self.bin())
                .with_platform(platform)
                .assume_yes()
                .without_elevation(),
        )
    }
}

/// Write `contents` to `dir/name` and return the path.
pub fn write_file(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

/// A small QCOW2-looking file.
pub fn qcow2_file(dir: &Path, name: &str) -> PathBuf {
    let mut contents = QCOW2_HEADER.to_vec();
    contents.resize(4096, 0);
    write_file(dir, name, &contents)
}

/// A header with the ISO 9660 identifier in the first volume descriptor.
pub fn iso_bytes() -> Vec<u8> {
    let mut contents = vec![0u8; 0x9800];
    contents[0x8001..0x8006].copy_from_slice(b"CD001");
    contents
}
