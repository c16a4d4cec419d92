//! Error taxonomy for the build stage and the launcher.
//!
//! Every fatal condition terminates the enclosing build or process. The
//! [`ErrorClass`] of an error decides the exit status the binary reports.

use std::path::PathBuf;

/// Result alias used across stevedore crates.
pub type StevedoreResult<T> = Result<T, StevedoreError>;

/// Coarse grouping used for exit codes and log levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Build-time fatal: lock mismatch, unavailable pin, failed writes.
    Build,
    /// Startup fatal: bind failures and entry-point resolution.
    Startup,
    /// Configuration and internal errors.
    Other,
}

impl ErrorClass {
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorClass::Build => 2,
            ErrorClass::Startup => 3,
            ErrorClass::Other => 1,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StevedoreError {
    /// The descriptor's constraints are not satisfied by the lock artifact.
    #[error("lock mismatch for '{package}': {reason}")]
    LockMismatch { package: String, reason: String },

    /// A pinned artifact could not be fetched from its declared origin.
    #[error("dependency unavailable: {package}=={version} from {origin}: {reason}")]
    DependencyUnavailable {
        package: String,
        version: String,
        origin: String,
        reason: String,
    },

    /// Fetched bytes do not match the pinned digest.
    #[error("integrity check failed for {package}=={version}: expected sha256 {expected}, got {actual}")]
    ArtifactIntegrity {
        package: String,
        version: String,
        expected: String,
        actual: String,
    },

    /// Filesystem failure under the runtime-environment prefix.
    #[error("cannot write runtime environment at {}: {reason}", .path.display())]
    EnvironmentWrite { path: PathBuf, reason: String },

    /// A build input (lock file, descriptor, bundle) is missing or unreadable.
    #[error("build input {} unavailable: {reason}", .path.display())]
    BuildInput { path: PathBuf, reason: String },

    /// Copying the application bundle into the working directory failed.
    #[error("cannot copy application bundle to {}: {reason}", .path.display())]
    BundleCopy { path: PathBuf, reason: String },

    #[error("address already in use: {addr}")]
    AddressInUse { addr: String },

    #[error("failed to bind {addr}: {reason}")]
    Bind { addr: String, reason: String },

    #[error("cannot resolve entry point '{entry_point}': {reason}")]
    EntryPointResolution { entry_point: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StevedoreError {
    pub fn class(&self) -> ErrorClass {
        match self {
            StevedoreError::LockMismatch { .. }
            | StevedoreError::DependencyUnavailable { .. }
            | StevedoreError::ArtifactIntegrity { .. }
            | StevedoreError::EnvironmentWrite { .. }
            | StevedoreError::BuildInput { .. }
            | StevedoreError::BundleCopy { .. } => ErrorClass::Build,
            StevedoreError::AddressInUse { .. }
            | StevedoreError::Bind { .. }
            | StevedoreError::EntryPointResolution { .. } => ErrorClass::Startup,
            StevedoreError::Config(_)
            | StevedoreError::InvalidState(_)
            | StevedoreError::Internal(_)
            | StevedoreError::Io(_) => ErrorClass::Other,
        }
    }

    /// Wrap an I/O failure that happened under the environment prefix.
    pub fn env_write(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        StevedoreError::EnvironmentWrite {
            path: path.into(),
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_by_class() {
        let mismatch = StevedoreError::LockMismatch {
            package: "fastapi".into(),
            reason: "not pinned".into(),
        };
        assert_eq!(mismatch.class().exit_code(), 2);

        let in_use = StevedoreError::AddressInUse {
            addr: "0.0.0.0:8000".into(),
        };
        assert_eq!(in_use.class().exit_code(), 3);

        assert_eq!(StevedoreError::Config("x".into()).class().exit_code(), 1);
    }

    #[test]
    fn test_diagnostic_names_failing_input() {
        let err = StevedoreError::DependencyUnavailable {
            package: "fastapi".into(),
            version: "0.100.0".into(),
            origin: "wheels/fastapi.tar.gz".into(),
            reason: "not found".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("fastapi==0.100.0"));
        assert!(msg.contains("wheels/fastapi.tar.gz"));
    }
}
