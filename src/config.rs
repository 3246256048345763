use crate::errors::Result;
use crate::rules::RuleCatalog;
use std::env;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::info;

/// Name of the per-user configuration directory under the platform config dir.
const APP_DIR: &str = "modswap";

/// A utility for locating and loading rule catalogs.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Finds a catalog file by searching in a prioritized list of locations.
    ///
    /// The search order is:
    /// 1. The absolute path provided in `config_path`, if it exists.
    /// 2. A path relative to the current directory.
    /// 3. A path relative to the `working_dir`.
    /// 4. Inside the user's `modswap` config directory.
    /// 5. Next to the executable, then its parent and grandparent
    ///    (to handle `target/release` builds).
    ///
    /// # Returns
    ///
    /// The path to the first match, or an error listing every location tried.
    pub fn find_config(config_path: &Path, working_dir: &Path) -> Result<PathBuf> {
        if config_path.is_absolute() && config_path.exists() {
            return Ok(config_path.to_path_buf());
        }

        let candidates = Self::candidates(config_path, working_dir);
        if let Some(found) = candidates.iter().find(|p| p.exists()) {
            return Ok(found.clone());
        }

        let tried: Vec<String> = candidates.iter().map(|p| p.display().to_string()).collect();
        Err(format!(
            "Catalog file '{}' not found. Searched in:\n  - {}",
            config_path.display(),
            tried.join("\n  - ")
        )
        .into())
    }

    fn candidates(config_path: &Path, working_dir: &Path) -> Vec<PathBuf> {
        let mut candidates = vec![config_path.to_path_buf(), working_dir.join(config_path)];

        if let Some(config_dir) = dirs::config_dir() {
            candidates.push(config_dir.join(APP_DIR).join(config_path));
        }

        if let Some(exe_dir) = env::current_exe().ok().and_then(|p| p.parent().map(Path::to_path_buf)) {
            candidates.extend(exe_dir.ancestors().take(3).map(|dir| dir.join(config_path)));
        }

        candidates
    }

    /// Loads a `RuleCatalog` from a YAML file.
    pub fn load_catalog(path: &Path) -> Result<RuleCatalog> {
        let file = File::open(path)?;
        Ok(serde_yaml::from_reader(file)?)
    }

    /// Loads the catalog at `catalog` when given, otherwise the built-in one.
    pub fn resolve_catalog(catalog: Option<&Path>, working_dir: &Path) -> Result<RuleCatalog> {
        match catalog {
            Some(path) => {
                let resolved = Self::find_config(path, working_dir)?;
                info!(catalog = %resolved.display(), "using rule catalog");
                Self::load_catalog(&resolved)
            }
            None => Self::builtin_catalog(),
        }
    }

    /// The catalog compiled into the binary.
    pub fn builtin_catalog() -> Result<RuleCatalog> {
        RuleCatalog::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const CATALOG: &str = r#"
manifests:
  house:
    - module_name: left-pad
      kind: simple
      replacement: "Use String.prototype.padStart."
"#;

    #[test]
    fn test_find_config_in_working_dir() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("house-rules.yaml"), CATALOG).unwrap();

        let found = ConfigLoader::find_config(Path::new("house-rules.yaml"), temp_dir.path()).unwrap();
        assert_eq!(found, temp_dir.path().join("house-rules.yaml"));
    }

    #[test]
    fn test_missing_config_lists_locations() {
        let temp_dir = TempDir::new().unwrap();
        let err = ConfigLoader::find_config(Path::new("does-not-exist-7f3a.yaml"), temp_dir.path())
            .unwrap_err()
            .to_string();
        assert!(err.contains("does-not-exist-7f3a.yaml"));
        assert!(err.contains(&temp_dir.path().display().to_string()));
    }

    #[test]
    fn test_resolve_catalog_defaults_to_builtin() {
        let temp_dir = TempDir::new().unwrap();
        let catalog = ConfigLoader::resolve_catalog(None, temp_dir.path()).unwrap();
        assert!(catalog.manifests.contains_key("native"));
    }

    #[test]
    fn test_load_catalog() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("rules.yaml");
        fs::write(&path, CATALOG).unwrap();

        let catalog = ConfigLoader::load_catalog(&path).unwrap();
        let rules = catalog.select(&["house"]).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].module_name, "left-pad");
    }
}
