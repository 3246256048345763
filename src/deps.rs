use crate::errors::Result;
use crate::rules::ReplacementRule;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// The dependency sections of a `package.json`.
#[derive(Debug, Clone)]
pub struct PackageManifest {
    /// Location of the `package.json` file.
    pub path: PathBuf,
    pub dependencies: BTreeMap<String, String>,
    pub dev_dependencies: BTreeMap<String, String>,
}

/// Which section of `package.json` a dependency was declared in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DependencySource {
    #[serde(rename = "dependencies")]
    Dependencies,
    #[serde(rename = "devDependencies")]
    DevDependencies,
}

impl fmt::Display for DependencySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencySource::Dependencies => f.write_str("dependencies"),
            DependencySource::DevDependencies => f.write_str("devDependencies"),
        }
    }
}

/// A declared dependency that has a replacement rule.
#[derive(Debug, Clone, Serialize)]
pub struct DependencyFinding {
    pub name: String,
    pub source: DependencySource,
    pub rule: ReplacementRule,
}

/// Finds the nearest `package.json` at or above `start` and parses it.
pub fn find_package(start: &Path) -> Result<Option<PackageManifest>> {
    let start = start.canonicalize().unwrap_or_else(|_| start.to_path_buf());
    for dir in start.ancestors() {
        let candidate = dir.join("package.json");
        if candidate.is_file() {
            let text = fs::read_to_string(&candidate)?;
            return parse_manifest(&candidate, &text).map(Some);
        }
    }
    Ok(None)
}

/// Parses the dependency sections out of `package.json` text.
///
/// A section that is missing, or is not a map of strings, is treated as empty.
pub fn parse_manifest(path: &Path, text: &str) -> Result<PackageManifest> {
    let json: Value = serde_json::from_str(text)?;
    Ok(PackageManifest {
        path: path.to_path_buf(),
        dependencies: dependency_map(path, "dependencies", json.get("dependencies")),
        dev_dependencies: dependency_map(path, "devDependencies", json.get("devDependencies")),
    })
}

fn dependency_map(path: &Path, section: &str, value: Option<&Value>) -> BTreeMap<String, String> {
    let Some(value) = value else {
        return BTreeMap::new();
    };
    let map = value.as_object().and_then(|object| {
        object
            .iter()
            .map(|(name, version)| Some((name.clone(), version.as_str()?.to_string())))
            .collect::<Option<BTreeMap<_, _>>>()
    });
    map.unwrap_or_else(|| {
        warn!(path = %path.display(), section, "ignoring malformed dependency section");
        BTreeMap::new()
    })
}

/// Reports every dependency whose name has a replacement rule.
pub fn scan_dependencies(
    dependencies: &BTreeMap<String, String>,
    rules: &[ReplacementRule],
    source: DependencySource,
) -> Vec<DependencyFinding> {
    dependencies
        .keys()
        .flat_map(|name| {
            rules
                .iter()
                .filter(move |rule| &rule.module_name == name)
                .map(move |rule| DependencyFinding {
                    name: name.clone(),
                    source,
                    rule: rule.clone(),
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleCatalog;
    use tempfile::TempDir;

    const PACKAGE: &str = r#"{
  "name": "demo",
  "dependencies": { "moment": "^2.29.0", "react": "^18.0.0" },
  "devDependencies": { "chalk": "^5.0.0" }
}"#;

    #[test]
    fn test_scan_dependencies_by_section() {
        let rules = RuleCatalog::builtin().unwrap().select(&["preferred"]).unwrap();
        let manifest = parse_manifest(Path::new("package.json"), PACKAGE).unwrap();

        let found = scan_dependencies(&manifest.dependencies, &rules, DependencySource::Dependencies);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "moment");
        assert_eq!(found[0].source, DependencySource::Dependencies);

        let dev = scan_dependencies(&manifest.dev_dependencies, &rules, DependencySource::DevDependencies);
        assert_eq!(dev.len(), 1);
        assert_eq!(dev[0].name, "chalk");
    }

    #[test]
    fn test_malformed_section_is_empty() {
        let manifest = parse_manifest(
            Path::new("package.json"),
            r#"{ "dependencies": { "moment": 2 }, "devDependencies": [] }"#,
        )
        .unwrap();
        assert!(manifest.dependencies.is_empty());
        assert!(manifest.dev_dependencies.is_empty());
    }

    #[test]
    fn test_find_package_walks_up() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("packages/app/src");
        fs::create_dir_all(&nested).unwrap();
        fs::write(temp_dir.path().join("package.json"), PACKAGE).unwrap();

        let manifest = find_package(&nested).unwrap().unwrap();
        assert!(manifest.path.ends_with("package.json"));
        assert!(manifest.dependencies.contains_key("moment"));
    }
}
