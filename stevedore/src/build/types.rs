//! Shared state for the sync pipeline.

use super::config::SyncConfig;
use crate::environment::{InstallReceipts, PackageReceipt, RuntimeEnvironment};
use crate::lock::{LockArtifact, PinnedPackage, ProjectDescriptor};
use crate::pipeline::PipelineMetrics;
use crate::source::ArtifactFetcher;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use ulid::Ulid;

pub type SyncCtx = Arc<Mutex<SyncContext>>;

/// Lock and descriptor as read from disk.
pub struct BuildInputs {
    pub lock: LockArtifact,
    pub descriptor: ProjectDescriptor,
    pub digest: String,
}

/// What the verified lock requires of the environment.
#[derive(Debug, Default, Clone)]
pub struct InstallPlan {
    /// Pins that must be fetched and unpacked.
    pub pending: Vec<PinnedPackage>,
    /// Pins already satisfied by the receipts.
    pub satisfied: Vec<PinnedPackage>,
    /// Receipt keys present in the environment but absent from the lock.
    pub extraneous: Vec<String>,
}

pub struct SyncContext {
    pub config: SyncConfig,
    pub run_id: Ulid,
    pub env: RuntimeEnvironment,
    pub inputs: Option<BuildInputs>,
    /// Receipts as they were before this run.
    pub previous: InstallReceipts,
    pub plan: Option<InstallPlan>,
    /// Receipts produced by this run's fetch tasks.
    pub installed: Vec<PackageReceipt>,
    pub removed: Vec<String>,
    pub fetcher: Option<Arc<ArtifactFetcher>>,
    pub permits: Arc<Semaphore>,
    pub guard: CleanupGuard,
}

impl SyncContext {
    pub fn new(config: SyncConfig) -> Self {
        let env = RuntimeEnvironment::new(&config.environment);
        let run_id = Ulid::new();
        let staging = env.staging_root().join(run_id.to_string());
        let permits = Arc::new(Semaphore::new(config.concurrency));
        Self {
            config,
            run_id,
            env,
            inputs: None,
            previous: InstallReceipts::default(),
            plan: None,
            installed: Vec::new(),
            removed: Vec::new(),
            fetcher: None,
            permits,
            guard: CleanupGuard::new(staging),
        }
    }

    /// Per-run scratch directory; each fetch task uses its own subdirectory.
    pub fn staging_dir(&self) -> &Path {
        self.guard.staging()
    }
}

/// RAII cleanup for a failed sync.
///
/// While armed, dropping removes this run's staging directory and freshly
/// installed package directories, and moves displaced directories back.
pub struct CleanupGuard {
    staging: PathBuf,
    created: Vec<PathBuf>,
    /// (backup location, original location)
    displaced: Vec<(PathBuf, PathBuf)>,
    armed: bool,
}

impl CleanupGuard {
    pub fn new(staging: PathBuf) -> Self {
        Self {
            staging,
            created: Vec::new(),
            displaced: Vec::new(),
            armed: true,
        }
    }

    pub fn staging(&self) -> &Path {
        &self.staging
    }

    /// Register a package directory installed by this run.
    pub fn track_created(&mut self, dir: PathBuf) {
        self.created.push(dir);
    }

    /// Register a directory moved aside so a pin could be reinstalled.
    pub fn track_displaced(&mut self, backup: PathBuf, original: PathBuf) {
        self.displaced.push((backup, original));
    }

    /// Disarm the guard (call once receipts are committed).
    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        tracing::warn!(staging = %self.staging.display(), "Sync failed, rolling back this run");

        for dir in &self.created {
            if let Err(e) = std::fs::remove_dir_all(dir)
                && e.kind() != std::io::ErrorKind::NotFound
            {
                tracing::warn!("Failed to remove {}: {}", dir.display(), e);
            }
        }

        for (backup, original) in &self.displaced {
            if let Err(e) = std::fs::rename(backup, original) {
                tracing::warn!(
                    "Failed to restore {} from {}: {}",
                    original.display(),
                    backup.display(),
                    e
                );
            }
        }

        if let Err(e) = std::fs::remove_dir_all(&self.staging)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!("Failed to remove staging {}: {}", self.staging.display(), e);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSummary {
    pub name: String,
    pub version: String,
}

impl From<&PinnedPackage> for PackageSummary {
    fn from(pin: &PinnedPackage) -> Self {
        Self {
            name: pin.name.clone(),
            version: pin.version.to_string(),
        }
    }
}

impl From<&PackageReceipt> for PackageSummary {
    fn from(receipt: &PackageReceipt) -> Self {
        Self {
            name: receipt.name.clone(),
            version: receipt.version.clone(),
        }
    }
}

/// Outcome of a successful sync (and bundle copy, for builds).
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub environment: PathBuf,
    pub inputs_digest: String,
    pub installed: Vec<PackageSummary>,
    pub skipped: Vec<PackageSummary>,
    pub removed: Vec<String>,
    pub metrics: PipelineMetrics,
}

impl SyncReport {
    pub fn log(&self) {
        tracing::info!(
            environment = %self.environment.display(),
            installed = self.installed.len(),
            skipped = self.skipped.len(),
            removed = self.removed.len(),
            duration_ms = self.metrics.total_duration_ms as u64,
            "Sync complete"
        );
        for package in &self.installed {
            tracing::info!(package = %package.name, version = %package.version, "Installed");
        }
        for name in &self.removed {
            tracing::info!(package = %name, "Removed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_armed_guard_rolls_back() {
        let dir = TempDir::new().unwrap();
        let staging = dir.path().join("staging");
        let created = dir.path().join("packages/new-1.0");
        let original = dir.path().join("packages/old-1.0");
        let backup = staging.join("old-1.0.previous");
        std::fs::create_dir_all(&created).unwrap();
        std::fs::create_dir_all(&backup).unwrap();

        {
            let mut guard = CleanupGuard::new(staging.clone());
            guard.track_created(created.clone());
            guard.track_displaced(backup.clone(), original.clone());
        }

        assert!(!created.exists());
        assert!(original.is_dir());
        assert!(!staging.exists());
    }

    #[test]
    fn test_disarmed_guard_leaves_files() {
        let dir = TempDir::new().unwrap();
        let staging = dir.path().join("staging");
        let created = dir.path().join("packages/new-1.0");
        std::fs::create_dir_all(&created).unwrap();
        std::fs::create_dir_all(&staging).unwrap();

        let mut guard = CleanupGuard::new(staging.clone());
        guard.track_created(created.clone());
        guard.disarm();
        drop(guard);

        assert!(created.is_dir());
        assert!(staging.is_dir());
    }
}
