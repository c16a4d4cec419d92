//! Runtime environment prefix: installed packages plus the installed-set record.
//!
//! ```text
//! <prefix>/
//!   packages/<name>-<version>/
//!   .stevedore/receipts.json
//!   .stevedore/staging/<run-id>/
//! ```

mod receipts;

pub use receipts::{InstallReceipts, PackageReceipt};

use crate::lock::PinnedPackage;
use std::io::Write;
use std::path::{Path, PathBuf};
use stevedore_shared::{StevedoreError, StevedoreResult};

pub mod filenames {
    pub const PACKAGES: &str = "packages";
    pub const STATE: &str = ".stevedore";
    pub const STAGING: &str = "staging";
    pub const RECEIPTS: &str = "receipts.json";
}

#[derive(Debug, Clone)]
pub struct RuntimeEnvironment {
    prefix: PathBuf,
}

impl RuntimeEnvironment {
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn packages_dir(&self) -> PathBuf {
        self.prefix.join(filenames::PACKAGES)
    }

    pub fn package_dir(&self, pin: &PinnedPackage) -> PathBuf {
        self.packages_dir().join(pin.install_dir_name())
    }

    pub fn state_dir(&self) -> PathBuf {
        self.prefix.join(filenames::STATE)
    }

    pub fn receipts_path(&self) -> PathBuf {
        self.state_dir().join(filenames::RECEIPTS)
    }

    pub fn staging_root(&self) -> PathBuf {
        self.state_dir().join(filenames::STAGING)
    }

    /// Create the directory skeleton (idempotent).
    pub fn prepare(&self) -> StevedoreResult<()> {
        for dir in [self.packages_dir(), self.staging_root()] {
            std::fs::create_dir_all(&dir).map_err(|e| StevedoreError::env_write(&dir, e))?;
        }
        Ok(())
    }

    /// Load the installed-set record; a fresh prefix has none.
    pub fn load_receipts(&self) -> StevedoreResult<InstallReceipts> {
        let path = self.receipts_path();
        match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                StevedoreError::Config(format!("corrupt receipts at {}: {}", path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(InstallReceipts::default()),
            Err(e) => Err(StevedoreError::env_write(&path, e)),
        }
    }

    /// Persist receipts atomically (write to a temp file, then rename).
    pub fn save_receipts(&self, receipts: &InstallReceipts) -> StevedoreResult<()> {
        let path = self.receipts_path();
        let state_dir = self.state_dir();
        let json = serde_json::to_vec_pretty(receipts)
            .map_err(|e| StevedoreError::Internal(format!("serialize receipts: {}", e)))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&state_dir)
            .map_err(|e| StevedoreError::env_write(&state_dir, e))?;
        tmp.write_all(&json)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| StevedoreError::env_write(tmp.path(), e))?;
        tmp.persist(&path)
            .map_err(|e| StevedoreError::env_write(&path, e.error))?;
        Ok(())
    }

    /// A pin is satisfied when its receipt matches and its directory exists.
    pub fn is_satisfied(&self, receipts: &InstallReceipts, pin: &PinnedPackage) -> bool {
        receipts.get(&pin.key()).is_some_and(|r| {
            r.version == pin.version.to_string()
                && r.sha256 == pin.sha256
                && self.packages_dir().join(&r.install_dir).is_dir()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::{PackageSource, Version};
    use chrono::Utc;
    use tempfile::TempDir;

    fn pin(version: &str) -> PinnedPackage {
        PinnedPackage {
            name: "FastAPI".into(),
            version: version.parse::<Version>().unwrap(),
            source: PackageSource::Path("fastapi.tgz".into()),
            sha256: "a".repeat(64),
        }
    }

    fn receipt_for(pin: &PinnedPackage) -> PackageReceipt {
        PackageReceipt {
            name: pin.name.clone(),
            version: pin.version.to_string(),
            sha256: pin.sha256.clone(),
            origin: pin.source.to_string(),
            install_dir: pin.install_dir_name(),
            installed_at: Utc::now(),
        }
    }

    #[test]
    fn test_receipts_round_trip_and_missing_file() {
        let dir = TempDir::new().unwrap();
        let env = RuntimeEnvironment::new(dir.path().join("env"));
        env.prepare().unwrap();
        assert!(env.load_receipts().unwrap().is_empty());

        let mut receipts = InstallReceipts::default();
        receipts.insert(receipt_for(&pin("0.100.0")));
        receipts.inputs_digest = Some("d".into());
        env.save_receipts(&receipts).unwrap();

        let loaded = env.load_receipts().unwrap();
        assert_eq!(loaded.inputs_digest.as_deref(), Some("d"));
        assert_eq!(loaded.get("fastapi").unwrap().version, "0.100.0");
    }

    #[test]
    fn test_is_satisfied_requires_dir_and_exact_pin() {
        let dir = TempDir::new().unwrap();
        let env = RuntimeEnvironment::new(dir.path());
        env.prepare().unwrap();

        let installed = pin("0.100.0");
        let mut receipts = InstallReceipts::default();
        receipts.insert(receipt_for(&installed));
        assert!(!env.is_satisfied(&receipts, &installed), "directory missing");

        std::fs::create_dir_all(env.package_dir(&installed)).unwrap();
        assert!(env.is_satisfied(&receipts, &installed));
        assert!(!env.is_satisfied(&receipts, &pin("0.101.0")));

        let mut rehashed = installed.clone();
        rehashed.sha256 = "b".repeat(64);
        assert!(!env.is_satisfied(&receipts, &rehashed));
    }
}
