//! The project descriptor: abstract constraints plus project metadata.

use super::specifier::Requirement;
use serde::Deserialize;
use std::path::Path;
use stevedore_shared::{StevedoreError, StevedoreResult};

#[derive(Debug, Clone)]
pub struct ProjectDescriptor {
    pub name: String,
    pub version: Option<String>,
    pub dependencies: Vec<Requirement>,
}

// Other tables (tool configuration and the like) are ignored.
#[derive(Deserialize)]
struct RawDescriptor {
    project: RawProject,
}

#[derive(Deserialize)]
struct RawProject {
    name: String,
    version: Option<String>,
    #[serde(default)]
    dependencies: Vec<String>,
}

impl ProjectDescriptor {
    pub fn load(path: &Path) -> StevedoreResult<(Self, Vec<u8>)> {
        let bytes = std::fs::read(path).map_err(|e| StevedoreError::BuildInput {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let text = std::str::from_utf8(&bytes).map_err(|e| StevedoreError::BuildInput {
            path: path.to_path_buf(),
            reason: format!("not UTF-8: {}", e),
        })?;
        let descriptor = Self::parse(text).map_err(|e| match e {
            StevedoreError::Config(msg) => {
                StevedoreError::Config(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })?;
        Ok((descriptor, bytes))
    }

    pub fn parse(text: &str) -> StevedoreResult<Self> {
        let raw: RawDescriptor = toml::from_str(text)
            .map_err(|e| StevedoreError::Config(format!("malformed project descriptor: {}", e)))?;

        let dependencies = raw
            .project
            .dependencies
            .iter()
            .map(|d| d.parse())
            .collect::<StevedoreResult<Vec<Requirement>>>()?;

        Ok(Self {
            name: raw.project.name,
            version: raw.project.version,
            dependencies,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_descriptor_ignores_tool_tables() {
        let text = r#"
[project]
name = "bagamba"
version = "0.1.0"
dependencies = ["fastapi>=0.90,<1.0", "slack-bolt"]

[tool.ruff]
line-length = 100
"#;
        let descriptor = ProjectDescriptor::parse(text).unwrap();
        assert_eq!(descriptor.name, "bagamba");
        assert_eq!(descriptor.dependencies.len(), 2);
        assert_eq!(descriptor.dependencies[1].key(), "slack-bolt");
    }

    #[test]
    fn test_missing_project_table() {
        let err = ProjectDescriptor::parse("[tool.x]\na = 1\n").unwrap_err();
        assert!(matches!(err, StevedoreError::Config(_)));
    }
}
