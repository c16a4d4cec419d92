//! Explicit inputs for the build stage.
//!
//! Nothing in the build stage reads environment variables; the CLI resolves
//! them and hands over these values.

use std::path::{Path, PathBuf};
use stevedore_shared::{StevedoreError, StevedoreResult};

pub const DEFAULT_LOCK_FILE: &str = "stevedore.lock";
pub const DEFAULT_DESCRIPTOR_FILE: &str = "project.toml";
pub const DEFAULT_ENVIRONMENT_DIR: &str = ".stevedore-env";
pub const DEFAULT_CONCURRENCY: usize = 8;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub lock_path: PathBuf,
    pub descriptor_path: PathBuf,
    /// Runtime-environment prefix packages are installed under.
    pub environment: PathBuf,
    /// Maximum concurrent artifact fetches.
    pub concurrency: usize,
    /// Remove installed packages that are no longer pinned.
    pub exact: bool,
}

impl SyncConfig {
    /// Defaults for a project directory: `stevedore.lock`, `project.toml` and
    /// a `.stevedore-env` prefix inside it.
    pub fn for_project(project_dir: impl AsRef<Path>) -> Self {
        let dir = project_dir.as_ref();
        Self {
            lock_path: dir.join(DEFAULT_LOCK_FILE),
            descriptor_path: dir.join(DEFAULT_DESCRIPTOR_FILE),
            environment: dir.join(DEFAULT_ENVIRONMENT_DIR),
            concurrency: DEFAULT_CONCURRENCY,
            exact: true,
        }
    }

    pub fn with_environment(mut self, environment: impl Into<PathBuf>) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn sanitize(&self) -> StevedoreResult<()> {
        if self.concurrency == 0 {
            return Err(StevedoreError::Config("concurrency must be at least 1".into()));
        }
        if self.environment.as_os_str().is_empty() {
            return Err(StevedoreError::Config(
                "runtime environment path must not be empty".into(),
            ));
        }
        for input in [&self.lock_path, &self.descriptor_path] {
            if input.starts_with(&self.environment) {
                return Err(StevedoreError::Config(format!(
                    "{} lies inside the runtime environment {}",
                    input.display(),
                    self.environment.display()
                )));
            }
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::for_project(".")
    }
}

/// Where the application bundle comes from and where it lands.
#[derive(Debug, Clone)]
pub struct BundleConfig {
    pub source: PathBuf,
    pub destination: PathBuf,
}

impl BundleConfig {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }

    pub fn sanitize(&self) -> StevedoreResult<()> {
        if !self.source.is_dir() {
            return Err(StevedoreError::BuildInput {
                path: self.source.clone(),
                reason: "application bundle is not a directory".into(),
            });
        }
        let source = self.source.canonicalize()?;
        let destination = absolute(&self.destination)?;
        if destination.starts_with(&source) {
            return Err(StevedoreError::Config(format!(
                "bundle destination {} lies inside the bundle {}",
                destination.display(),
                source.display()
            )));
        }
        Ok(())
    }
}

// The destination may not exist yet, so canonicalize its nearest existing parent.
fn absolute(path: &Path) -> StevedoreResult<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut tail = Vec::new();
    while !existing.exists() {
        match (existing.file_name(), existing.parent()) {
            (Some(name), Some(parent)) => {
                tail.push(name.to_os_string());
                existing = if parent.as_os_str().is_empty() {
                    PathBuf::from(".")
                } else {
                    parent.to_path_buf()
                };
            }
            _ => break,
        }
    }
    let mut resolved = existing.canonicalize()?;
    resolved.extend(tail.iter().rev());
    Ok(resolved)
}
