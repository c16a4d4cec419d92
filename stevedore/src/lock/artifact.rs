//! The lock artifact: exact pins, the only source of truth for installation.

use super::specifier::{Requirement, normalize_name};
use super::version::Version;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use stevedore_shared::{StevedoreError, StevedoreResult};

/// Lock format understood by this build.
pub const LOCK_FORMAT_VERSION: u32 = 1;

/// Where a pinned artifact is fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageSource {
    /// Local file, relative paths resolve against the lock file's directory.
    Path(PathBuf),
    /// `http://` or `https://` URL.
    Url(String),
}

impl PackageSource {
    /// File name of the artifact, used to decide how to unpack it.
    pub fn file_name(&self) -> Option<String> {
        match self {
            PackageSource::Path(path) => path.file_name().map(|n| n.to_string_lossy().into_owned()),
            PackageSource::Url(url) => url
                .split(['?', '#'])
                .next()
                .and_then(|u| u.rsplit('/').next())
                .filter(|n| !n.is_empty())
                .map(String::from),
        }
    }
}

impl fmt::Display for PackageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageSource::Path(path) => write!(f, "{}", path.display()),
            PackageSource::Url(url) => write!(f, "{}", url),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PinnedPackage {
    /// Name as written in the lock file.
    pub name: String,
    pub version: Version,
    pub source: PackageSource,
    /// Lower-case hex sha256 of the artifact bytes.
    pub sha256: String,
}

impl PinnedPackage {
    pub fn key(&self) -> String {
        normalize_name(&self.name)
    }

    /// Directory name under `packages/` for this pin.
    pub fn install_dir_name(&self) -> String {
        format!("{}-{}", self.key(), self.version)
    }
}

#[derive(Debug, Clone)]
pub struct LockArtifact {
    pub project: Option<String>,
    /// Descriptor constraints the lock was produced from.
    pub requires: Vec<Requirement>,
    pub packages: Vec<PinnedPackage>,
    /// Directory relative `path` sources resolve against.
    pub base_dir: PathBuf,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLock {
    version: u32,
    #[serde(default)]
    manifest: RawManifest,
    #[serde(default, rename = "package")]
    packages: Vec<RawPackage>,
}

#[derive(Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawManifest {
    project: Option<String>,
    #[serde(default)]
    requires: Vec<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPackage {
    name: String,
    version: String,
    source: PackageSource,
    sha256: String,
}

impl LockArtifact {
    /// Read and parse the lock file at `path`.
    pub fn load(path: &Path) -> StevedoreResult<(Self, Vec<u8>)> {
        let bytes = std::fs::read(path).map_err(|e| StevedoreError::BuildInput {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let text = std::str::from_utf8(&bytes).map_err(|e| StevedoreError::BuildInput {
            path: path.to_path_buf(),
            reason: format!("not UTF-8: {}", e),
        })?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let lock = Self::parse(text, base_dir).map_err(|e| match e {
            StevedoreError::Config(msg) => {
                StevedoreError::Config(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })?;
        Ok((lock, bytes))
    }

    pub fn parse(text: &str, base_dir: PathBuf) -> StevedoreResult<Self> {
        let raw: RawLock = toml::from_str(text)
            .map_err(|e| StevedoreError::Config(format!("malformed lock file: {}", e)))?;

        if raw.version != LOCK_FORMAT_VERSION {
            return Err(StevedoreError::Config(format!(
                "unsupported lock format version {} (expected {})",
                raw.version, LOCK_FORMAT_VERSION
            )));
        }

        let requires = raw
            .manifest
            .requires
            .iter()
            .map(|r| r.parse())
            .collect::<StevedoreResult<Vec<Requirement>>>()?;

        let packages = raw
            .packages
            .into_iter()
            .map(|p| {
                let sha256 = p.sha256.trim().to_ascii_lowercase();
                if sha256.len() != 64 || !sha256.bytes().all(|b| b.is_ascii_hexdigit()) {
                    return Err(StevedoreError::Config(format!(
                        "package '{}' has an invalid sha256 digest",
                        p.name
                    )));
                }
                if let PackageSource::Url(url) = &p.source
                    && !(url.starts_with("http://") || url.starts_with("https://"))
                {
                    return Err(StevedoreError::Config(format!(
                        "package '{}' has unsupported url source '{}'",
                        p.name, url
                    )));
                }
                Ok(PinnedPackage {
                    version: p.version.parse()?,
                    name: p.name,
                    source: p.source,
                    sha256,
                })
            })
            .collect::<StevedoreResult<Vec<_>>>()?;

        Ok(Self {
            project: raw.manifest.project,
            requires,
            packages,
            base_dir,
        })
    }

    /// All pins whose normalized name equals `name`'s.
    pub fn pins_for<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a PinnedPackage> + 'a {
        let key = normalize_name(name);
        self.packages.iter().filter(move |p| p.key() == key)
    }
}

/// Digest over the build inputs, recorded with the receipts.
pub fn inputs_digest(lock_bytes: &[u8], descriptor_bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update((lock_bytes.len() as u64).to_le_bytes());
    hasher.update(lock_bytes);
    hasher.update(descriptor_bytes);
    hex::encode(hasher.finalize())
}
