//! Version specifiers and requirement strings.

use super::version::Version;
use std::fmt;
use std::str::FromStr;
use stevedore_shared::{StevedoreError, StevedoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equal,
    NotEqual,
    GreaterEqual,
    LessEqual,
    Greater,
    Less,
    Compatible,
}

impl Operator {
    fn symbol(self) -> &'static str {
        match self {
            Operator::Equal => "==",
            Operator::NotEqual => "!=",
            Operator::GreaterEqual => ">=",
            Operator::LessEqual => "<=",
            Operator::Greater => ">",
            Operator::Less => "<",
            Operator::Compatible => "~=",
        }
    }
}

/// One clause such as `>=0.90` or `==1.2.*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Specifier {
    op: Operator,
    version: Version,
    /// `==X.Y.*` / `!=X.Y.*` prefix match.
    wildcard: bool,
}

impl Specifier {
    pub fn contains(&self, candidate: &Version) -> bool {
        match self.op {
            Operator::Equal if self.wildcard => self.prefix_matches(candidate),
            Operator::NotEqual if self.wildcard => !self.prefix_matches(candidate),
            Operator::Equal => candidate == &self.version,
            Operator::NotEqual => candidate != &self.version,
            Operator::GreaterEqual => candidate >= &self.version,
            Operator::LessEqual => candidate <= &self.version,
            Operator::Greater => candidate > &self.version,
            Operator::Less => candidate < &self.version,
            Operator::Compatible => {
                // ~=X.Y.Z means >=X.Y.Z, ==X.Y.*
                let len = self.version.release().len();
                candidate >= &self.version
                    && (0..len - 1).all(|i| candidate.segment(i) == self.version.segment(i))
            }
        }
    }

    /// Normalized text of the clause. Prefix and `~=` clauses depend on the
    /// number of release segments and keep them as written.
    pub fn canonical(&self) -> String {
        if self.wildcard || self.op == Operator::Compatible {
            return self.to_string();
        }
        format!("{}{}", self.op.symbol(), self.version.trimmed())
    }

    fn prefix_matches(&self, candidate: &Version) -> bool {
        (0..self.version.release().len()).all(|i| candidate.segment(i) == self.version.segment(i))
    }
}

impl fmt::Display for Specifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.op.symbol(), self.version)?;
        if self.wildcard {
            write!(f, ".*")?;
        }
        Ok(())
    }
}

impl FromStr for Specifier {
    type Err = StevedoreError;

    fn from_str(input: &str) -> StevedoreResult<Self> {
        let text = input.trim();
        const OPERATORS: &[(&str, Operator)] = &[
            ("===", Operator::Equal),
            ("==", Operator::Equal),
            ("!=", Operator::NotEqual),
            (">=", Operator::GreaterEqual),
            ("<=", Operator::LessEqual),
            ("~=", Operator::Compatible),
            (">", Operator::Greater),
            ("<", Operator::Less),
        ];
        let (symbol, op) = OPERATORS
            .iter()
            .find(|(symbol, _)| text.starts_with(symbol))
            .ok_or_else(|| StevedoreError::Config(format!("specifier '{}' has no operator", input)))?;
        if *symbol == "===" {
            return Err(StevedoreError::Config(format!(
                "arbitrary equality is not supported: '{}'",
                input
            )));
        }

        let mut body = text[symbol.len()..].trim();
        let wildcard = body.ends_with(".*");
        if wildcard {
            if !matches!(op, Operator::Equal | Operator::NotEqual) {
                return Err(StevedoreError::Config(format!(
                    "wildcard only allowed with == or !=: '{}'",
                    input
                )));
            }
            body = &body[..body.len() - 2];
        }

        let version: Version = body.parse()?;
        if *op == Operator::Compatible && version.release().len() < 2 {
            return Err(StevedoreError::Config(format!(
                "~= needs at least two release segments: '{}'",
                input
            )));
        }

        Ok(Specifier {
            op: *op,
            version,
            wildcard,
        })
    }
}

/// Comma-separated conjunction of specifiers. Empty means any version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecifierSet(Vec<Specifier>);

impl SpecifierSet {
    pub fn contains(&self, candidate: &Version) -> bool {
        self.0.iter().all(|s| s.contains(candidate))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sorted, deduplicated canonical clauses joined by commas.
    pub fn canonical(&self) -> String {
        let mut parts: Vec<String> = self.0.iter().map(Specifier::canonical).collect();
        parts.sort();
        parts.dedup();
        parts.join(",")
    }
}

impl fmt::Display for SpecifierSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self.0.iter().map(Specifier::to_string).collect();
        parts.sort();
        write!(f, "{}", parts.join(","))
    }
}

impl FromStr for SpecifierSet {
    type Err = StevedoreError;

    fn from_str(input: &str) -> StevedoreResult<Self> {
        input
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::parse::<Specifier>)
            .collect::<StevedoreResult<Vec<_>>>()
            .map(SpecifierSet)
    }
}

/// Normalized package name: lower-case with `-`, `_` and `.` runs folded to `-`.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.trim().chars() {
        if matches!(c, '-' | '_' | '.') {
            pending_dash = !out.is_empty();
            continue;
        }
        if pending_dash {
            out.push('-');
            pending_dash = false;
        }
        out.push(c.to_ascii_lowercase());
    }
    out
}

/// A dependency declaration: `name[extras] specifiers`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub name: String,
    pub extras: Vec<String>,
    pub specifiers: SpecifierSet,
}

impl Requirement {
    pub fn key(&self) -> String {
        normalize_name(&self.name)
    }

    /// Form used to compare requirement lists regardless of spelling.
    pub fn canonical(&self) -> String {
        let mut out = self.key();
        if !self.extras.is_empty() {
            let mut extras: Vec<String> = self.extras.iter().map(|e| normalize_name(e)).collect();
            extras.sort();
            out.push_str(&format!("[{}]", extras.join(",")));
        }
        out.push_str(&self.specifiers.canonical());
        out
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.extras.is_empty() {
            write!(f, "[{}]", self.extras.join(","))?;
        }
        write!(f, "{}", self.specifiers)
    }
}

impl FromStr for Requirement {
    type Err = StevedoreError;

    fn from_str(input: &str) -> StevedoreResult<Self> {
        let text = input.trim();
        if text.contains(';') {
            return Err(StevedoreError::Config(format!(
                "environment markers are not supported: '{}'",
                input
            )));
        }
        if text.contains('@') {
            return Err(StevedoreError::Config(format!(
                "direct references are not supported: '{}'",
                input
            )));
        }

        let name_len = text
            .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
            .unwrap_or(text.len());
        let name = &text[..name_len];
        if name.is_empty() {
            return Err(StevedoreError::Config(format!(
                "requirement '{}' has no package name",
                input
            )));
        }

        let mut rest = text[name_len..].trim_start();
        let mut extras = Vec::new();
        if let Some(after) = rest.strip_prefix('[') {
            let close = after.find(']').ok_or_else(|| {
                StevedoreError::Config(format!("unclosed extras in '{}'", input))
            })?;
            extras = after[..close]
                .split(',')
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(String::from)
                .collect();
            rest = after[close + 1..].trim_start();
        }

        if let Some(inner) = rest.strip_prefix('(') {
            rest = inner.strip_suffix(')').ok_or_else(|| {
                StevedoreError::Config(format!("unbalanced parentheses in '{}'", input))
            })?;
        }

        Ok(Requirement {
            name: name.to_string(),
            extras,
            specifiers: rest.parse()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn satisfies(spec: &str, version: &str) -> bool {
        spec.parse::<SpecifierSet>()
            .unwrap()
            .contains(&version.parse().unwrap())
    }

    #[test]
    fn test_range_scenarios() {
        assert!(satisfies(">=0.90,<1.0", "0.100.0"));
        assert!(!satisfies(">=2.0", "0.100.0"));
        assert!(satisfies("", "0.0.1"));
        assert!(!satisfies(">1.0", "1.0.0"));
        assert!(satisfies("!=1.1", "1.2"));
    }

    #[test]
    fn test_compatible_release() {
        assert!(satisfies("~=2.2", "2.9"));
        assert!(!satisfies("~=2.2", "3.0"));
        assert!(satisfies("~=1.4.5", "1.4.9"));
        assert!(!satisfies("~=1.4.5", "1.5.0"));
        assert!("~=1".parse::<Specifier>().is_err());
    }

    #[test]
    fn test_wildcards() {
        assert!(satisfies("==1.2.*", "1.2.7"));
        assert!(satisfies("==1.2.*", "1.2"));
        assert!(!satisfies("==1.2.*", "1.3.0"));
        assert!(satisfies("!=1.2.*", "1.3.0"));
        assert!(">=1.2.*".parse::<Specifier>().is_err());
    }

    #[test]
    fn test_requirement_parsing() {
        let req: Requirement = "Uvicorn[standard, http] >=0.20 , <1".parse().unwrap();
        assert_eq!(req.key(), "uvicorn");
        assert_eq!(req.extras, vec!["standard", "http"]);
        assert_eq!(req.canonical(), "uvicorn[http,standard]<1,>=0.20");

        let bare: Requirement = "slack_bolt".parse().unwrap();
        assert!(bare.specifiers.is_empty());
        assert_eq!(bare.key(), "slack-bolt");

        let paren: Requirement = "redis (>=5.0)".parse().unwrap();
        assert!(paren.specifiers.contains(&"5.1".parse().unwrap()));
    }

    #[test]
    fn test_canonical_ignores_trailing_zeros() {
        let spelled = |s: &str| s.parse::<Requirement>().unwrap().canonical();
        assert_eq!(spelled("fastapi>=0.90"), spelled("FastAPI >= 0.90.0"));
        assert_eq!(spelled("jira<4,>=3.0"), spelled("jira>=3.0.0,<4.0"));
        assert_ne!(spelled("jira==3.*"), spelled("jira==3.0.*"));
        assert_ne!(spelled("jira~=3.5"), spelled("jira~=3.5.0"));
    }

    #[test]
    fn test_requirement_rejects_markers_and_urls() {
        assert!("jira; python_version > '3.8'".parse::<Requirement>().is_err());
        assert!("pkg @ https://example.com/pkg.tar.gz".parse::<Requirement>().is_err());
        assert!(">=1.0".parse::<Requirement>().is_err());
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("Pydantic_Settings"), "pydantic-settings");
        assert_eq!(normalize_name("zope..interface"), "zope-interface");
        assert_eq!(normalize_name("A-_-B"), "a-b");
    }
}
