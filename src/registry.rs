//! External dependency registry
//!
//! Collects every externally declared dependency across the manifest for
//! reporting. Nothing here resolves or installs anything.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::manifest::Manifest;

/// Who declared an external dependency
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Declarer {
    /// The top-level `external_deps` of the manifest
    Repository,
    Package(String),
}

impl fmt::Display for Declarer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Declarer::Repository => f.write_str("(repository)"),
            Declarer::Package(name) => f.write_str(name),
        }
    }
}

/// Read-only set of external dependency identifiers
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct ExternalDeps {
    deps: BTreeMap<String, BTreeSet<Declarer>>,
}

impl ExternalDeps {
    /// Aggregate the external dependencies of the repository and every package
    pub fn collect(manifest: &Manifest) -> Self {
        let mut deps: BTreeMap<String, BTreeSet<Declarer>> = BTreeMap::new();

        for dep in &manifest.external_deps {
            deps.entry(dep.clone()).or_default().insert(Declarer::Repository);
        }

        for pkg in &manifest.packages {
            for dep in &pkg.external_deps {
                deps.entry(dep.clone())
                    .or_default()
                    .insert(Declarer::Package(pkg.name.clone()));
            }
        }

        Self { deps }
    }

    /// Identifiers in sorted order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.deps.keys().map(String::as_str)
    }

    pub fn contains(&self, dep: &str) -> bool {
        self.deps.contains_key(dep)
    }

    /// Packages (or the repository) that declared `dep`
    pub fn declared_by(&self, dep: &str) -> impl Iterator<Item = &Declarer> {
        self.deps.get(dep).into_iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.deps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_collect_merges_duplicates() {
        let manifest = Manifest::parse(
            r#"
            version = 1
            external_deps = ["git"]

            [[packages]]
            name = "core"
            path = "core"
            external_deps = ["gcc", "make"]

            [[packages]]
            name = "api"
            path = "api"
            external_deps = ["cargo", "make", "git"]
        "#,
            Path::new("frankenfest.toml"),
        )
        .unwrap();

        let deps = ExternalDeps::collect(&manifest);

        assert_eq!(
            deps.iter().collect::<Vec<_>>(),
            vec!["cargo", "gcc", "git", "make"]
        );
        assert_eq!(deps.len(), 4);
        assert!(deps.contains("gcc"));
        assert!(!deps.contains("python"));
        assert_eq!(
            deps.declared_by("git").cloned().collect::<Vec<_>>(),
            vec![Declarer::Repository, Declarer::Package("api".to_string())]
        );
        assert_eq!(deps.declared_by("make").count(), 2);
        assert_eq!(deps.declared_by("python").count(), 0);
    }

    #[test]
    fn test_json_names_declarers() {
        let manifest = Manifest::parse(
            r#"
            version = 1
            external_deps = ["git"]

            [[packages]]
            name = "api"
            path = "api"
            external_deps = ["git"]
        "#,
            Path::new("frankenfest.toml"),
        )
        .unwrap();

        let json = serde_json::to_value(ExternalDeps::collect(&manifest)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "git": ["repository", { "package": "api" }] })
        );
    }

    #[test]
    fn test_empty_manifest() {
        let manifest = Manifest::parse("version = 1", Path::new("frankenfest.toml")).unwrap();
        assert!(ExternalDeps::collect(&manifest).is_empty());
    }
}
