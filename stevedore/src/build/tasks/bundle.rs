//! Task: copy the application bundle into the working directory.
//!
//! Runs after commit, so a failed sync never creates the destination.

use super::{SyncCtx, log_task_error, task_start};
use crate::build::config::BundleConfig;
use crate::pipeline::PipelineTask;
use async_trait::async_trait;
use filetime::FileTime;
use std::path::Path;
use stevedore_shared::{StevedoreError, StevedoreResult};
use walkdir::WalkDir;

pub struct CopyBundleTask {
    bundle: BundleConfig,
}

impl CopyBundleTask {
    pub fn new(bundle: BundleConfig) -> Self {
        Self { bundle }
    }
}

#[async_trait]
impl PipelineTask<SyncCtx> for CopyBundleTask {
    async fn run(self: Box<Self>, ctx: SyncCtx) -> StevedoreResult<()> {
        let task_name = self.name();
        let run_id = task_start(&ctx, task_name).await;

        let BundleConfig {
            source,
            destination,
        } = self.bundle.clone();
        let files = tokio::task::spawn_blocking(move || copy_tree(&source, &destination))
            .await
            .map_err(|e| StevedoreError::Internal(format!("bundle copy panicked: {}", e)))?
            .inspect_err(|e| log_task_error(&run_id, task_name, e))?;

        tracing::info!(
            source = %self.bundle.source.display(),
            destination = %self.bundle.destination.display(),
            files,
            "Application bundle copied"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "copy_bundle"
    }
}

/// Copy `source` into `destination` keeping contents, permissions, mtimes and
/// symlinks. Returns the number of regular files copied.
pub(crate) fn copy_tree(source: &Path, destination: &Path) -> StevedoreResult<usize> {
    let mut files = 0;
    let mut dirs = Vec::new();
    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.map_err(|e| copy_err(source, &e))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| copy_err(entry.path(), &e))?;
        let target = destination.join(relative);
        let metadata = entry.metadata().map_err(|e| copy_err(entry.path(), &e))?;
        let file_type = entry.file_type();

        if file_type.is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| copy_err(&target, &e))?;
            std::fs::set_permissions(&target, metadata.permissions())
                .map_err(|e| copy_err(&target, &e))?;
            // Directory mtimes change as children land, so set them last.
            dirs.push((target, FileTime::from_last_modification_time(&metadata)));
        } else if file_type.is_symlink() {
            let link = std::fs::read_link(entry.path()).map_err(|e| copy_err(entry.path(), &e))?;
            remove_existing(&target)?;
            symlink(&link, &target).map_err(|e| copy_err(&target, &e))?;
        } else {
            std::fs::copy(entry.path(), &target).map_err(|e| copy_err(&target, &e))?;
            filetime::set_file_mtime(&target, FileTime::from_last_modification_time(&metadata))
                .map_err(|e| copy_err(&target, &e))?;
            files += 1;
        }
    }

    for (dir, mtime) in dirs.iter().rev() {
        filetime::set_file_mtime(dir, *mtime).map_err(|e| copy_err(dir, &e))?;
    }
    Ok(files)
}

// A previous copy may have left a link or file where the link goes.
fn remove_existing(target: &Path) -> StevedoreResult<()> {
    match std::fs::symlink_metadata(target) {
        Ok(meta) if meta.is_dir() => {
            std::fs::remove_dir_all(target).map_err(|e| copy_err(target, &e))
        }
        Ok(_) => std::fs::remove_file(target).map_err(|e| copy_err(target, &e)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(copy_err(target, &e)),
    }
}

fn copy_err(path: &Path, e: &impl std::fmt::Display) -> StevedoreError {
    StevedoreError::BundleCopy {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

#[cfg(unix)]
fn symlink(link: &Path, target: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(link, target)
}

#[cfg(not(unix))]
fn symlink(_link: &Path, target: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        format!("cannot recreate symlink {}", target.display()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_copy_preserves_layout_and_mtime() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("app");
        std::fs::create_dir_all(src.join("static")).unwrap();
        std::fs::write(src.join("server.py"), b"api = object()").unwrap();
        std::fs::write(src.join("static/index.html"), b"<html/>").unwrap();
        let stamp = FileTime::from_unix_time(1_600_000_000, 0);
        filetime::set_file_mtime(src.join("server.py"), stamp).unwrap();

        let dest = dir.path().join("work");
        let files = copy_tree(&src, &dest).unwrap();

        assert_eq!(files, 2);
        assert_eq!(std::fs::read(dest.join("server.py")).unwrap(), b"api = object()");
        assert!(dest.join("static/index.html").is_file());
        let copied = std::fs::metadata(dest.join("server.py")).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&copied), stamp);
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_keeps_symlinks_and_modes() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let src = dir.path().join("app");
        std::fs::create_dir(&src).unwrap();
        std::fs::write(src.join("run.sh"), b"#!/bin/sh").unwrap();
        std::fs::set_permissions(src.join("run.sh"), std::fs::Permissions::from_mode(0o755))
            .unwrap();
        std::os::unix::fs::symlink("run.sh", src.join("start")).unwrap();

        let dest = dir.path().join("work");
        copy_tree(&src, &dest).unwrap();

        let mode = std::fs::metadata(dest.join("run.sh")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        assert_eq!(
            std::fs::read_link(dest.join("start")).unwrap(),
            std::path::PathBuf::from("run.sh")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_into_previous_copy_replaces_links() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("app");
        std::fs::create_dir(&src).unwrap();
        std::fs::write(src.join("run.sh"), b"#!/bin/sh").unwrap();
        std::fs::write(src.join("run2.sh"), b"#!/bin/sh").unwrap();
        std::os::unix::fs::symlink("run.sh", src.join("start")).unwrap();

        let dest = dir.path().join("work");
        copy_tree(&src, &dest).unwrap();

        std::fs::remove_file(src.join("start")).unwrap();
        std::os::unix::fs::symlink("run2.sh", src.join("start")).unwrap();
        std::fs::write(src.join("server.py"), b"api = object()").unwrap();
        let files = copy_tree(&src, &dest).unwrap();

        assert_eq!(files, 3);
        assert_eq!(
            std::fs::read_link(dest.join("start")).unwrap(),
            std::path::PathBuf::from("run2.sh")
        );
        assert!(dest.join("server.py").is_file());
    }
}
