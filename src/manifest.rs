//! Manifest parsing for frankenfest.toml
//!
//! The manifest is the declarative description of every package in the
//! repository. It is loaded once per invocation and never mutated afterwards.

use miette::NamedSource;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{FrankenError, Result};

/// Name of the manifest file at the repository root
pub const MANIFEST_FILE: &str = "frankenfest.toml";

/// Manifest schema versions this build understands
pub const SUPPORTED_VERSIONS: &[u32] = &[1];

/// The kinds of operation a package can declare commands for.
///
/// Variant order is lexical so that derived `Ord` gives deterministic
/// tie-breaking in the topological sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Build,
    Format,
    Lint,
    Test,
}

impl OperationKind {
    pub const ALL: [OperationKind; 4] = [
        OperationKind::Build,
        OperationKind::Format,
        OperationKind::Lint,
        OperationKind::Test,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Build => "build",
            OperationKind::Format => "format",
            OperationKind::Lint => "lint",
            OperationKind::Test => "test",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Root manifest structure
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    /// Schema version
    pub version: u32,

    /// Repository-wide external dependencies
    #[serde(default)]
    pub external_deps: Vec<String>,

    /// Package definitions
    #[serde(default)]
    pub packages: Vec<Package>,

    /// Directory the manifest was loaded from; package paths are relative to it
    #[serde(skip, default = "default_root")]
    pub root: PathBuf,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

/// A single package in the repository
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Package {
    /// Unique package name
    pub name: String,

    /// Location relative to the repository root
    pub path: PathBuf,

    /// Dependencies outside the repository (reported, never installed)
    #[serde(default)]
    pub external_deps: Vec<String>,

    /// Names of other packages in this manifest
    #[serde(default)]
    pub internal_deps: Vec<String>,

    #[serde(default)]
    pub build: Vec<String>,

    #[serde(default)]
    pub test: Vec<String>,

    #[serde(default)]
    pub format: Vec<String>,

    #[serde(default)]
    pub lint: Vec<String>,
}

impl Package {
    /// Commands declared for the given operation, in execution order
    pub fn commands(&self, kind: OperationKind) -> &[String] {
        match kind {
            OperationKind::Build => &self.build,
            OperationKind::Format => &self.format,
            OperationKind::Lint => &self.lint,
            OperationKind::Test => &self.test,
        }
    }

    pub fn has_commands(&self, kind: OperationKind) -> bool {
        !self.commands(kind).is_empty()
    }
}

impl Manifest {
    /// Load `frankenfest.toml` from the given repository root
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(MANIFEST_FILE);
        if !path.exists() {
            return Err(FrankenError::ManifestNotFound { path });
        }

        let content = std::fs::read_to_string(&path).map_err(|source| {
            FrankenError::ManifestRead {
                path: path.clone(),
                source,
            }
        })?;

        let mut manifest = Self::parse(&content, &path)?;
        manifest.root = root.to_path_buf();
        Ok(manifest)
    }

    /// Parse and validate manifest text. `path` is only used for diagnostics.
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let manifest: Manifest =
            toml::from_str(content).map_err(|e| FrankenError::ManifestParse {
                path: path.to_path_buf(),
                message: e.message().to_string(),
                src: NamedSource::new(path.display().to_string(), content.to_string()),
                span: e.span().map(Into::into),
            })?;

        manifest.validate(path)?;
        Ok(manifest)
    }

    fn validate(&self, path: &Path) -> Result<()> {
        let invalid = |reason: String| FrankenError::ManifestInvalid {
            path: path.to_path_buf(),
            reason,
        };

        if !SUPPORTED_VERSIONS.contains(&self.version) {
            return Err(invalid(format!(
                "unsupported schema version {} (supported: {:?})",
                self.version, SUPPORTED_VERSIONS
            )));
        }

        let mut seen = HashSet::new();
        for pkg in &self.packages {
            if pkg.name.trim().is_empty() {
                return Err(invalid("package with an empty name".to_string()));
            }

            if !seen.insert(pkg.name.as_str()) {
                return Err(invalid(format!("duplicate package '{}'", pkg.name)));
            }

            for kind in OperationKind::ALL {
                if pkg.commands(kind).iter().any(|cmd| cmd.trim().is_empty()) {
                    return Err(invalid(format!(
                        "package '{}' has an empty {} command",
                        pkg.name, kind
                    )));
                }
            }
        }

        Ok(())
    }

    /// Get a package by name
    pub fn package(&self, name: &str) -> Option<&Package> {
        self.packages.iter().find(|pkg| pkg.name == name)
    }

    /// List all package names in declaration order
    pub fn package_names(&self) -> Vec<&str> {
        self.packages.iter().map(|pkg| pkg.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> Result<Manifest> {
        Manifest::parse(toml, Path::new(MANIFEST_FILE))
    }

    #[test]
    fn test_parse_manifest() {
        let manifest = parse(
            r#"
            version = 1
            external_deps = ["gcc"]

            [[packages]]
            name = "core"
            path = "core"
            external_deps = ["libc"]
            build = ["make", "make install"]

            [[packages]]
            name = "api"
            path = "services/api"
            internal_deps = ["core"]
            build = ["cargo build"]
            test = ["cargo test"]
        "#,
        )
        .unwrap();

        assert_eq!(manifest.version, 1);
        assert_eq!(manifest.packages.len(), 2);
        assert_eq!(manifest.package_names(), vec!["core", "api"]);

        let api = manifest.package("api").unwrap();
        assert_eq!(api.internal_deps, vec!["core"]);
        assert_eq!(api.commands(OperationKind::Test), ["cargo test"]);
        assert!(!api.has_commands(OperationKind::Lint));
        assert_eq!(
            manifest.package("core").unwrap().commands(OperationKind::Build),
            ["make", "make install"]
        );
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = parse(
            r#"
            version = 1

            [[packages]]
            name = "core"
            path = "core"
            depends = ["x"]
        "#,
        );

        assert!(matches!(result, Err(FrankenError::ManifestParse { .. })));
    }

    #[test]
    fn test_missing_required_field() {
        let result = parse(
            r#"
            version = 1

            [[packages]]
            name = "core"
        "#,
        );

        match result {
            Err(FrankenError::ManifestParse { message, .. }) => {
                assert!(message.contains("path"), "unexpected message: {message}");
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_version() {
        let result = parse("packages = []");
        assert!(matches!(result, Err(FrankenError::ManifestParse { .. })));
    }

    #[test]
    fn test_unsupported_version() {
        let result = parse("version = 7");
        assert!(matches!(result, Err(FrankenError::ManifestInvalid { .. })));
    }

    #[test]
    fn test_duplicate_package() {
        let result = parse(
            r#"
            version = 1

            [[packages]]
            name = "core"
            path = "a"

            [[packages]]
            name = "core"
            path = "b"
        "#,
        );

        match result {
            Err(FrankenError::ManifestInvalid { reason, .. }) => {
                assert!(reason.contains("duplicate package 'core'"));
            }
            other => panic!("expected invalid manifest, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_command_rejected() {
        let result = parse(
            r#"
            version = 1

            [[packages]]
            name = "core"
            path = "core"
            lint = ["  "]
        "#,
        );

        assert!(matches!(result, Err(FrankenError::ManifestInvalid { .. })));
    }

    #[test]
    fn test_load_sets_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(MANIFEST_FILE),
            "version = 1\n[[packages]]\nname = \"core\"\npath = \"core\"\n",
        )
        .unwrap();

        let manifest = Manifest::load(dir.path()).unwrap();
        assert_eq!(manifest.root, dir.path());
    }

    #[test]
    fn test_load_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let result = Manifest::load(dir.path());
        assert!(matches!(result, Err(FrankenError::ManifestNotFound { .. })));
    }
}
