//! Task: fetch one pinned artifact and install it under `packages/`.
//!
//! Each task owns `staging/<run>/<name>-<version>` and
//! `packages/<name>-<version>`; no two tasks of a run share a path.

use super::{SyncCtx, log_task_error, task_start};
use crate::environment::PackageReceipt;
use crate::lock::PinnedPackage;
use crate::pipeline::PipelineTask;
use async_trait::async_trait;
use chrono::Utc;
use flate2::read::GzDecoder;
use std::path::{Component, Path, PathBuf};
use stevedore_shared::{StevedoreError, StevedoreResult};

const ARCHIVE_SUFFIXES: [&str; 2] = [".tar.gz", ".tgz"];
const FALLBACK_FILE_NAME: &str = "artifact";

pub struct FetchPackageTask {
    pin: PinnedPackage,
    name: String,
}

impl FetchPackageTask {
    pub fn new(pin: PinnedPackage) -> Self {
        let name = format!("fetch:{}", pin.key());
        Self { pin, name }
    }
}

#[async_trait]
impl PipelineTask<SyncCtx> for FetchPackageTask {
    async fn run(self: Box<Self>, ctx: SyncCtx) -> StevedoreResult<()> {
        let task_name = self.name();
        let run_id = task_start(&ctx, task_name).await;
        let pin = &self.pin;

        let (fetcher, permits, staging, target) = {
            let ctx = ctx.lock().await;
            let fetcher = ctx
                .fetcher
                .clone()
                .ok_or_else(|| StevedoreError::Internal("load_inputs task must run first".into()))?;
            (
                fetcher,
                ctx.permits.clone(),
                ctx.staging_dir().join(pin.install_dir_name()),
                ctx.env.package_dir(pin),
            )
        };

        let _permit = permits
            .acquire_owned()
            .await
            .map_err(|e| StevedoreError::Internal(format!("fetch permits closed: {}", e)))?;

        let bytes = fetcher
            .fetch(pin)
            .await
            .inspect_err(|e| log_task_error(&run_id, task_name, e))?;
        let size = bytes.len();

        let install_pin = pin.clone();
        let install_target = target.clone();
        let displaced = tokio::task::spawn_blocking(move || {
            unpack_artifact(&install_pin, &bytes, &staging)?;
            install(&staging, &install_target)
        })
        .await
        .map_err(|e| StevedoreError::Internal(format!("install task panicked: {}", e)))?
        .inspect_err(|e| log_task_error(&run_id, task_name, e))?;

        tracing::info!(
            package = %pin.name,
            version = %pin.version,
            bytes = size,
            dir = %target.display(),
            "Package installed"
        );

        let receipt = PackageReceipt {
            name: pin.name.clone(),
            version: pin.version.to_string(),
            sha256: pin.sha256.clone(),
            origin: pin.source.to_string(),
            install_dir: pin.install_dir_name(),
            installed_at: Utc::now(),
        };

        let mut ctx = ctx.lock().await;
        if let Some(backup) = displaced {
            ctx.guard.track_displaced(backup, target.clone());
        }
        ctx.guard.track_created(target);
        ctx.installed.push(receipt);

        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Unpack `bytes` into `dest`: gzip tarballs are extracted, anything else is
/// stored as a single file named after the source.
pub(crate) fn unpack_artifact(pin: &PinnedPackage, bytes: &[u8], dest: &Path) -> StevedoreResult<()> {
    std::fs::create_dir_all(dest).map_err(|e| StevedoreError::env_write(dest, e))?;

    let file_name = pin
        .source
        .file_name()
        .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string());

    if !is_archive(&file_name) {
        let path = dest.join(&file_name);
        return std::fs::write(&path, bytes).map_err(|e| StevedoreError::env_write(&path, e));
    }

    let unusable = |reason: String| StevedoreError::DependencyUnavailable {
        package: pin.name.clone(),
        version: pin.version.to_string(),
        origin: pin.source.to_string(),
        reason,
    };

    let mut archive = tar::Archive::new(GzDecoder::new(bytes));
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(true);

    let entries = archive
        .entries()
        .map_err(|e| unusable(format!("unreadable archive: {}", e)))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| unusable(format!("unreadable archive: {}", e)))?;
        let relative = entry
            .path()
            .map_err(|e| unusable(format!("bad entry path: {}", e)))?
            .into_owned();
        if !is_contained(&relative) {
            return Err(unusable(format!(
                "archive entry {} escapes the package directory",
                relative.display()
            )));
        }
        let kind = entry.header().entry_type();
        if (kind.is_symlink() || kind.is_hard_link())
            && !entry
                .link_name()
                .ok()
                .flatten()
                .is_some_and(|link| is_contained(&link))
        {
            return Err(unusable(format!(
                "archive link {} points outside the package directory",
                relative.display()
            )));
        }
        entry
            .unpack_in(dest)
            .map_err(|e| StevedoreError::env_write(dest.join(&relative), e))?;
    }
    Ok(())
}

fn is_archive(file_name: &str) -> bool {
    ARCHIVE_SUFFIXES.iter().any(|suffix| file_name.ends_with(suffix))
}

fn is_contained(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Move the staged directory into place. An existing target (stale install)
/// is moved into the staging area first; its backup path is returned.
fn install(staged: &Path, target: &Path) -> StevedoreResult<Option<PathBuf>> {
    let backup = if target.exists() {
        let mut name = staged.as_os_str().to_os_string();
        name.push(".previous");
        let backup = PathBuf::from(name);
        std::fs::rename(target, &backup).map_err(|e| StevedoreError::env_write(target, e))?;
        Some(backup)
    } else {
        None
    };

    if let Err(e) = std::fs::rename(staged, target) {
        if let Some(backup) = &backup {
            let _ = std::fs::rename(backup, target);
        }
        return Err(StevedoreError::env_write(target, e));
    }
    Ok(backup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::PackageSource;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use tempfile::TempDir;

    fn pin(source: &str) -> PinnedPackage {
        PinnedPackage {
            name: "fastapi".into(),
            version: "0.100.0".parse().unwrap(),
            source: PackageSource::Path(source.into()),
            sha256: "0".repeat(64),
        }
    }

    fn tarball(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (path, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_unpacks_tarball() {
        let dir = TempDir::new().unwrap();
        let bytes = tarball(&[("fastapi/__init__.py", b"VERSION = '0.100.0'")]);
        unpack_artifact(&pin("fastapi-0.100.0.tar.gz"), &bytes, dir.path()).unwrap();
        assert_eq!(
            std::fs::read(dir.path().join("fastapi/__init__.py")).unwrap(),
            b"VERSION = '0.100.0'"
        );
    }

    #[test]
    fn test_rejects_traversal() {
        let dir = TempDir::new().unwrap();
        // Builder refuses `..` paths, so write the raw header name.
        let mut header = tar::Header::new_gnu();
        header.as_gnu_mut().unwrap().name[..9].copy_from_slice(b"../evil.p");
        header.set_size(1);
        header.set_mode(0o644);
        header.set_cksum();
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        builder.append(&header, &b"x"[..]).unwrap();
        let bytes = builder.into_inner().unwrap().finish().unwrap();

        let dest = dir.path().join("pkg");
        let err = unpack_artifact(&pin("evil.tgz"), &bytes, &dest).unwrap_err();
        assert!(matches!(err, StevedoreError::DependencyUnavailable { .. }));
        assert!(!dir.path().join("evil.p").exists());
    }

    #[test]
    fn test_non_archive_stored_as_file() {
        let dir = TempDir::new().unwrap();
        unpack_artifact(&pin("wheels/fastapi-0.100.0-py3-none-any.whl"), b"wheel", dir.path())
            .unwrap();
        assert!(dir.path().join("fastapi-0.100.0-py3-none-any.whl").is_file());
    }

    #[test]
    fn test_install_displaces_stale_target() {
        let dir = TempDir::new().unwrap();
        let staged = dir.path().join("staging/fastapi-0.100.0");
        let target = dir.path().join("packages/fastapi-0.100.0");
        std::fs::create_dir_all(&staged).unwrap();
        std::fs::write(staged.join("new"), b"").unwrap();
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("old"), b"").unwrap();

        let backup = install(&staged, &target).unwrap().unwrap();
        assert!(target.join("new").is_file());
        assert!(backup.join("old").is_file());
        assert!(!staged.exists());
    }
}
