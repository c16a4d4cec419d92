//! Fetching pinned artifacts from their declared origin.

use crate::lock::{PackageSource, PinnedPackage};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::time::Duration;
use stevedore_shared::{StevedoreError, StevedoreResult};

const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

/// Fetches artifact bytes for pins. Cheap to share behind an `Arc`.
pub struct ArtifactFetcher {
    client: reqwest::Client,
    base_dir: PathBuf,
}

impl ArtifactFetcher {
    /// `base_dir` is where relative `path` sources resolve (the lock's directory).
    pub fn new(base_dir: impl Into<PathBuf>) -> StevedoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("stevedore/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StevedoreError::Internal(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            base_dir: base_dir.into(),
        })
    }

    /// Fetch the artifact and verify its digest.
    pub async fn fetch(&self, pin: &PinnedPackage) -> StevedoreResult<Vec<u8>> {
        let unavailable = |reason: String| StevedoreError::DependencyUnavailable {
            package: pin.name.clone(),
            version: pin.version.to_string(),
            origin: pin.source.to_string(),
            reason,
        };

        let bytes = match &pin.source {
            PackageSource::Path(path) => {
                let path = if path.is_absolute() {
                    path.clone()
                } else {
                    self.base_dir.join(path)
                };
                tracing::debug!(package = %pin.name, path = %path.display(), "Reading local artifact");
                tokio::fs::read(&path)
                    .await
                    .map_err(|e| unavailable(e.to_string()))?
            }
            PackageSource::Url(url) => {
                tracing::debug!(package = %pin.name, url = %url, "Downloading artifact");
                let response = self
                    .client
                    .get(url)
                    .send()
                    .await
                    .map_err(|e| unavailable(e.to_string()))?;
                let status = response.status();
                if !status.is_success() {
                    return Err(unavailable(format!("HTTP {}", status)));
                }
                response
                    .bytes()
                    .await
                    .map_err(|e| unavailable(e.to_string()))?
                    .to_vec()
            }
        };

        verify_digest(pin, &bytes)?;
        Ok(bytes)
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn verify_digest(pin: &PinnedPackage, bytes: &[u8]) -> StevedoreResult<()> {
    let actual = sha256_hex(bytes);
    if actual != pin.sha256 {
        return Err(StevedoreError::ArtifactIntegrity {
            package: pin.name.clone(),
            version: pin.version.to_string(),
            expected: pin.sha256.clone(),
            actual,
        });
    }
    Ok(())
}
