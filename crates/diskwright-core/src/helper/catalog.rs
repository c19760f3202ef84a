//! Descriptions of the helper programs diskwright knows about.

use crate::helper::source_build;
use crate::helper::{HelperSpec, InstallStrategy, PackageManagerKind};

use PackageManagerKind::{AptGet, Brew, Port, Yum};

/// General-purpose disk image converter and inspector.
pub const QEMU_IMG: &str = "qemu-img";
/// Raw to/from streamOptimized VMDK converter.
pub const VMDKTOOL: &str = "vmdktool";
/// ISO inspector.
pub const ISOINFO: &str = "isoinfo";
// ISO creators, in order of preference.
pub const MKISOFS: &str = "mkisofs";
pub const GENISOIMAGE: &str = "genisoimage";
pub const XORRISO: &str = "xorriso";
/// FAT filesystem image builder.
pub const FATDISK: &str = "fatdisk";
/// VMware's OVF tool.
pub const OVFTOOL: &str = "ovftool";

/// Every helper registered by default (package managers are added separately).
pub fn known_helpers() -> Vec<HelperSpec> {
    vec![
        HelperSpec::new(QEMU_IMG)
            .version(&["--version"], r"qemu-img version ([0-9.]+)")
            .info_uri("http://www.qemu.org")
            .provider(AptGet, "qemu-utils")
            .provider(Yum, "qemu-img")
            .provider(Brew, "qemu")
            .provider(Port, "qemu"),
        HelperSpec::new(VMDKTOOL)
            .version(&["-V"], r"vmdktool version ([0-9.]+)")
            .info_uri("http://www.freshports.org/sysutils/vmdktool/")
            .provider(Brew, "vmdktool")
            .provider(Port, "vmdktool")
            .strategy(InstallStrategy::SourceBuild(&source_build::VMDKTOOL)),
        HelperSpec::new(ISOINFO)
            .version(&["--version"], r"isoinfo ([0-9.]+)")
            .info_uri("http://cdrtools.sourceforge.net/private/man/cdrecord/isoinfo.8.html")
            .provider(AptGet, "genisoimage")
            .provider(Yum, "genisoimage")
            .provider(Brew, "cdrtools")
            .provider(Port, "cdrtools"),
        HelperSpec::new(MKISOFS)
            .version(&["-version"], r"mkisofs ([0-9.]+)")
            .info_uri("http://cdrtools.sourceforge.net/private/cdrecord.html")
            .provider(Brew, "cdrtools")
            .provider(Port, "cdrtools"),
        HelperSpec::new(GENISOIMAGE)
            .version(&["--version"], r"genisoimage ([0-9.]+)")
            .info_uri("http://cdrkit.org/")
            .provider(AptGet, "genisoimage")
            .provider(Yum, "genisoimage"),
        HelperSpec::new(XORRISO)
            .version(&["-version"], r"xorriso ([0-9.]+)")
            .info_uri("https://www.gnu.org/software/xorriso/")
            .provider(AptGet, "xorriso")
            .provider(Yum, "xorriso")
            .provider(Brew, "xorriso")
            .provider(Port, "xorriso"),
        HelperSpec::new(FATDISK)
            .version(&["--version"], r"version ([0-9.]+)")
            .info_uri("https://github.com/goblinhack/fatdisk")
            .provider(Port, "fatdisk")
            .strategy(InstallStrategy::SourceBuild(&source_build::FATDISK)),
        HelperSpec::new(OVFTOOL)
            .version(&["--version"], r"VMware ovftool ([0-9.]+)")
            .info_uri("https://www.vmware.com/support/developer/ovf/")
            .strategy(InstallStrategy::Never),
        HelperSpec::new("make")
            .version(&["--version"], r"GNU Make ([0-9.]+)")
            .info_uri("https://www.gnu.org/software/make/")
            .provider(AptGet, "make")
            .provider(Yum, "make"),
    ]
}
