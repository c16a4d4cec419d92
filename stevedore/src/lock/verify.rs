//! Locked-mode verification: the lock must satisfy the descriptor as-is.
//!
//! Nothing here re-resolves. A descriptor the lock cannot satisfy exactly is
//! a [`StevedoreError::LockMismatch`], raised before anything is written.

use super::artifact::LockArtifact;
use super::descriptor::ProjectDescriptor;
use std::collections::{BTreeMap, BTreeSet};
use stevedore_shared::{StevedoreError, StevedoreResult};

pub fn verify_locked(descriptor: &ProjectDescriptor, lock: &LockArtifact) -> StevedoreResult<()> {
    let mut seen = BTreeMap::new();
    for pin in &lock.packages {
        if let Some(previous) = seen.insert(pin.key(), &pin.version) {
            return Err(StevedoreError::LockMismatch {
                package: pin.name.clone(),
                reason: format!(
                    "pinned more than once ({} and {})",
                    previous, pin.version
                ),
            });
        }
    }

    if let Some(project) = &lock.project
        && project != &descriptor.name
    {
        return Err(StevedoreError::LockMismatch {
            package: descriptor.name.clone(),
            reason: format!("lock file was produced for project '{}'", project),
        });
    }

    for requirement in &descriptor.dependencies {
        let pin = lock
            .pins_for(&requirement.name)
            .next()
            .ok_or_else(|| StevedoreError::LockMismatch {
                package: requirement.name.clone(),
                reason: "declared by the project descriptor but not pinned in the lock file".into(),
            })?;

        if !requirement.specifiers.contains(&pin.version) {
            return Err(StevedoreError::LockMismatch {
                package: requirement.name.clone(),
                reason: format!(
                    "pinned version {} does not satisfy '{}'",
                    pin.version, requirement.specifiers
                ),
            });
        }
    }

    let declared: BTreeSet<String> = descriptor.dependencies.iter().map(|r| r.canonical()).collect();
    let recorded: BTreeSet<String> = lock.requires.iter().map(|r| r.canonical()).collect();
    if let Some(stale) = declared.symmetric_difference(&recorded).next() {
        let package = descriptor
            .dependencies
            .iter()
            .chain(lock.requires.iter())
            .find(|r| &r.canonical() == stale)
            .map(|r| r.name.clone())
            .unwrap_or_else(|| stale.clone());
        let side = if declared.contains(stale) {
            "declared by the descriptor but not recorded in the lock file"
        } else {
            "recorded in the lock file but no longer declared by the descriptor"
        };
        return Err(StevedoreError::LockMismatch {
            package,
            reason: format!("lock file is out of date: '{}' is {}", stale, side),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn lock(requires: &str, pins: &[(&str, &str)]) -> LockArtifact {
        let mut text = format!("version = 1\n[manifest]\nrequires = [{}]\n", requires);
        for (name, version) in pins {
            text.push_str(&format!(
                "[[package]]\nname = \"{}\"\nversion = \"{}\"\nsource = {{ path = \"{}.tgz\" }}\nsha256 = \"{}\"\n",
                name,
                version,
                name,
                "0".repeat(64)
            ));
        }
        LockArtifact::parse(&text, PathBuf::from(".")).unwrap()
    }

    fn descriptor(deps: &str) -> ProjectDescriptor {
        ProjectDescriptor::parse(&format!("[project]\nname = \"svc\"\ndependencies = [{}]\n", deps))
            .unwrap()
    }

    #[test]
    fn test_satisfied_range_passes() {
        let lock = lock(r#""fastapi>=0.90,<1.0""#, &[("fastapi", "0.100.0"), ("starlette", "0.27.0")]);
        verify_locked(&descriptor(r#""fastapi>=0.90,<1.0""#), &lock).unwrap();
    }

    #[test]
    fn test_unsatisfied_constraint_is_mismatch() {
        let lock = lock(r#""fastapi>=2.0""#, &[("fastapi", "0.100.0")]);
        let err = verify_locked(&descriptor(r#""fastapi>=2.0""#), &lock).unwrap_err();
        match err {
            StevedoreError::LockMismatch { package, reason } => {
                assert_eq!(package, "fastapi");
                assert!(reason.contains("0.100.0"), "{}", reason);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unpinned_dependency_is_mismatch() {
        let lock = lock(r#""fastapi>=0.90""#, &[("fastapi", "0.100.0")]);
        let err = verify_locked(&descriptor(r#""fastapi>=0.90", "redis""#), &lock).unwrap_err();
        assert!(matches!(err, StevedoreError::LockMismatch { ref package, .. } if package == "redis"));
    }

    #[test]
    fn test_stale_manifest_is_mismatch() {
        // constraint still satisfied, but the descriptor moved on since locking
        let lock = lock(r#""fastapi>=0.90,<1.0""#, &[("fastapi", "0.100.0")]);
        let err = verify_locked(&descriptor(r#""fastapi>=0.95""#), &lock).unwrap_err();
        assert!(err.to_string().contains("out of date"));
    }

    #[test]
    fn test_spelling_differences_are_not_drift() {
        let lock = lock(r#""Slack_Bolt >= 1.18""#, &[("slack-bolt", "1.18.0")]);
        verify_locked(&descriptor(r#""slack-bolt>=1.18""#), &lock).unwrap();
    }

    #[test]
    fn test_trailing_zero_spelling_is_not_drift() {
        let short = lock(r#""fastapi>=0.90""#, &[("fastapi", "0.100.0")]);
        verify_locked(&descriptor(r#""fastapi>=0.90.0""#), &short).unwrap();

        let padded = lock(r#""fastapi>=0.90.0,<1.0""#, &[("fastapi", "0.100.0")]);
        verify_locked(&descriptor(r#""fastapi<1,>=0.90""#), &padded).unwrap();
    }

    #[test]
    fn test_duplicate_pin_is_mismatch() {
        let lock = lock(r#""fastapi""#, &[("fastapi", "0.100.0"), ("FastAPI", "0.101.0")]);
        let err = verify_locked(&descriptor(r#""fastapi""#), &lock).unwrap_err();
        assert!(err.to_string().contains("pinned more than once"));
    }
}
