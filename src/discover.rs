use crate::errors::Result;
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Extensions scanned when the user does not pass `--ext`.
pub const DEFAULT_EXTENSIONS: [&str; 8] = ["ts", "tsx", "js", "jsx", "mjs", "cjs", "mts", "cts"];

/// Collects the source files under `dir` that should be scanned.
///
/// The walk honours `.gitignore` and hidden-file rules and never descends into
/// `node_modules`. Unreadable directory entries are logged and skipped.
pub fn collect_source_files(dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    let exts = normalize_extensions(extensions);
    let mut files = Vec::new();

    let mut walker = WalkBuilder::new(dir);
    walker
        .standard_filters(true)
        .filter_entry(|entry| entry.file_name() != "node_modules");

    for entry in walker.build() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        let path = entry.path();
        if entry.file_type().is_some_and(|ft| ft.is_file()) && should_process_file(path, &exts) {
            files.push(path.to_path_buf());
        }
    }

    Ok(files)
}

/// Lowercases and strips leading dots; falls back to the default set.
pub(crate) fn normalize_extensions(extensions: &[String]) -> Vec<String> {
    let exts: Vec<String> = extensions
        .iter()
        .map(|e| e.trim().trim_start_matches('.').to_lowercase())
        .filter(|e| !e.is_empty())
        .collect();
    if exts.is_empty() {
        DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect()
    } else {
        exts
    }
}

/// A helper function to determine if a file should be processed based on its extension.
pub(crate) fn should_process_file(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|os| os.to_str())
        .map(|s| extensions.contains(&s.to_lowercase()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn layout() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("src/nested")).unwrap();
        fs::create_dir_all(root.join("node_modules/chalk")).unwrap();
        fs::write(root.join("src/index.ts"), "").unwrap();
        fs::write(root.join("src/nested/view.TSX"), "").unwrap();
        fs::write(root.join("src/util.mjs"), "").unwrap();
        fs::write(root.join("README.md"), "").unwrap();
        fs::write(root.join("node_modules/chalk/index.js"), "").unwrap();
        temp_dir
    }

    fn names(files: &[PathBuf], root: &Path) -> Vec<String> {
        let mut names: Vec<String> = files
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_default_extensions_skip_node_modules() {
        let temp_dir = layout();
        let files = collect_source_files(temp_dir.path(), &[]).unwrap();
        assert_eq!(
            names(&files, temp_dir.path()),
            vec!["src/index.ts", "src/nested/view.TSX", "src/util.mjs"]
        );
    }

    #[test]
    fn test_custom_extensions() {
        let temp_dir = layout();
        let files = collect_source_files(temp_dir.path(), &[".MJS".to_string()]).unwrap();
        assert_eq!(names(&files, temp_dir.path()), vec!["src/util.mjs"]);
    }
}
