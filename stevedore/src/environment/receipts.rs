use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Record of one installed pin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageReceipt {
    pub name: String,
    pub version: String,
    pub sha256: String,
    /// Source the artifact was fetched from, for diagnostics only.
    pub origin: String,
    /// Directory name under `packages/`.
    pub install_dir: String,
    pub installed_at: DateTime<Utc>,
}

/// Installed set, keyed by normalized package name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstallReceipts {
    /// Digest of (lock, descriptor) from the last successful sync.
    #[serde(default)]
    pub inputs_digest: Option<String>,
    #[serde(default)]
    packages: BTreeMap<String, PackageReceipt>,
}

impl InstallReceipts {
    pub fn get(&self, key: &str) -> Option<&PackageReceipt> {
        self.packages.get(key)
    }

    /// Insert or replace, returning the receipt previously held for the key.
    pub fn insert(&mut self, receipt: PackageReceipt) -> Option<PackageReceipt> {
        self.packages
            .insert(crate::lock::normalize_name(&receipt.name), receipt)
    }

    pub fn remove(&mut self, key: &str) -> Option<PackageReceipt> {
        self.packages.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PackageReceipt)> {
        self.packages.iter()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}
