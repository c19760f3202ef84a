//! Error types for the diskwright core library.

use std::path::PathBuf;

/// The main error type for diskwright operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error with optional path context.
    #[error("I/O error{}: {source}", path.as_ref().map(|p| format!(" at '{}'", p.display())).unwrap_or_default())]
    Io {
        source: std::io::Error,
        path: Option<PathBuf>,
    },

    /// The helper program could not be found and was not installed.
    #[error("Helper '{name}' not found: {message}")]
    HelperNotFound { name: String, message: String },

    /// The helper program ran but reported failure.
    #[error("Helper '{name}' failed{}:\n{output}", code.map(|c| format!(" with exit code {c}")).unwrap_or_default())]
    HelperFailed {
        name: String,
        code: Option<i32>,
        output: String,
    },

    /// The helper's version could not be determined.
    #[error("Unable to determine version of '{name}': {message}")]
    Version { name: String, message: String },

    /// No known way to install the helper, but one might exist on this platform.
    #[error("Unsure how to install '{name}': {message}")]
    UnsureHowToInstall { name: String, message: String },

    /// The helper cannot be installed automatically on this platform at all.
    #[error("Cannot install '{name}' on this platform: {message}")]
    UnsupportedPlatform { name: String, message: String },

    /// Installation was attempted and failed.
    #[error("Installation of '{name}' failed: {message}")]
    InstallFailed { name: String, message: String },

    /// None of the candidate helpers could be found or installed.
    #[error("No usable helper found:\n{message}")]
    NoUsableHelper { message: String },

    /// The requested format, subformat or conversion is not implemented.
    #[error("Not implemented: {message}")]
    Unsupported { message: String },

    /// Format detection found no match for the file.
    #[error("Unsupported file type: '{}'", path.display())]
    UnsupportedFileType { path: PathBuf },

    /// A caller-supplied value was rejected.
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },
}

/// A specialized Result type for diskwright operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an I/O error with path context.
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io {
            source,
            path: Some(path.into()),
        }
    }

    /// Create an I/O error without path context.
    pub fn io_simple(source: std::io::Error) -> Self {
        Self::Io { source, path: None }
    }

    /// Create a helper-not-found error.
    pub fn helper_not_found(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HelperNotFound {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a helper failure error.
    pub fn helper_failed(name: impl Into<String>, code: Option<i32>, output: impl Into<String>) -> Self {
        Self::HelperFailed {
            name: name.into(),
            code,
            output: output.into(),
        }
    }

    /// Create a version detection error.
    pub fn version(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Version {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create an "unsure how to install" error.
    pub fn unsure_how_to_install(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UnsureHowToInstall {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create an unsupported-platform installation error.
    pub fn unsupported_platform(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UnsupportedPlatform {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create an installation failure error.
    pub fn install_failed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InstallFailed {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create an aggregated selection failure.
    pub fn no_usable_helper(message: impl Into<String>) -> Self {
        Self::NoUsableHelper {
            message: message.into(),
        }
    }

    /// Create a not-implemented error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    /// Create an unsupported-file-type error.
    pub fn unsupported_file_type(path: impl Into<PathBuf>) -> Self {
        Self::UnsupportedFileType { path: path.into() }
    }

    /// Create an invalid-argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Exit code reported by a failed helper, if any.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::HelperFailed { code, .. } => *code,
            _ => None,
        }
    }

    /// Whether the failure could go away after the user changes their environment
    /// (for example by installing a package manager or the helper itself).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::HelperNotFound { .. } | Self::UnsureHowToInstall { .. } | Self::NoUsableHelper { .. }
        )
    }

    /// Whether this is one of the "don't know how to install" errors.
    pub fn is_install_unknown(&self) -> bool {
        matches!(
            self,
            Self::UnsureHowToInstall { .. } | Self::UnsupportedPlatform { .. }
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Self::io_simple(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_with_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::io(io_err, "/path/to/disk.vmdk");
        let msg = err.to_string();
        assert!(msg.contains("I/O error"));
        assert!(msg.contains("/path/to/disk.vmdk"));
    }

    #[test]
    fn test_io_error_without_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::io_simple(io_err);
        assert!(!err.to_string().contains("at '"));
    }

    #[test]
    fn test_helper_failed_carries_exit_code() {
        let err = Error::helper_failed("qemu-img", Some(3), "boom");
        assert_eq!(err.exit_code(), Some(3));
        let msg = err.to_string();
        assert!(msg.contains("qemu-img"));
        assert!(msg.contains("exit code 3"));
        assert!(msg.contains("boom"));
    }

    #[test]
    fn test_helper_failed_without_code() {
        let err = Error::helper_failed("vmdktool", None, "killed");
        assert_eq!(err.exit_code(), None);
        assert!(!err.to_string().contains("exit code"));
    }

    #[test]
    fn test_install_errors_are_distinguishable() {
        let unsure = Error::unsure_how_to_install("fatdisk", "no package manager");
        let platform = Error::unsupported_platform("fatdisk", "not on this OS");
        let failed = Error::install_failed("fatdisk", "make failed");

        assert!(unsure.is_retryable());
        assert!(!platform.is_retryable());
        assert!(!failed.is_retryable());

        assert!(unsure.is_install_unknown());
        assert!(platform.is_install_unknown());
        assert!(!failed.is_install_unknown());
    }

    #[test]
    fn test_unsupported_error() {
        let err = Error::unsupported("QCOW2 with files");
        assert!(err.to_string().contains("Not implemented"));
        assert!(err.to_string().contains("QCOW2 with files"));
    }

    #[test]
    fn test_unsupported_file_type() {
        let err = Error::unsupported_file_type("/tmp/mystery.bin");
        assert!(err.to_string().contains("/tmp/mystery.bin"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io { path: None, .. }));
    }
}
