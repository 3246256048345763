use crate::discover;
use crate::errors::{Error, Result};
use crate::outcome::FileScanResult;
use crate::rules::ReplacementRule;
use ignore::WalkBuilder;
use rayon::prelude::*;
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::NamedTempFile;
use tracing::{error, info, warn};

/// Rewrites source text so it no longer needs a module.
pub trait Codemod: Send + Sync {
    /// Returns the rewritten text. May fail for a particular input.
    fn transform(&self, module_name: &str, source: &str) -> Result<String>;
}

/// A codemod built from a rule's `fix` steps.
pub struct RuleCodemod {
    steps: Vec<(Regex, String)>,
}

impl RuleCodemod {
    /// Compiles the rule's fix steps. Returns `None` for rules without any.
    pub fn from_rule(rule: &ReplacementRule) -> Result<Option<Self>> {
        if rule.fix.is_empty() {
            return Ok(None);
        }
        let steps = rule
            .fix
            .iter()
            .map(|step| Ok((Regex::new(&step.pattern)?, step.replacement.clone())))
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(Self { steps }))
    }
}

impl Codemod for RuleCodemod {
    fn transform(&self, _module_name: &str, source: &str) -> Result<String> {
        let mut text = source.to_string();
        for (regex, replacement) in &self.steps {
            if regex.is_match(&text) {
                text = regex.replace_all(&text, replacement.as_str()).into_owned();
            }
        }
        Ok(text)
    }
}

/// Codemods keyed by module name, built once per fix run.
#[derive(Default)]
pub struct CodemodCatalog {
    codemods: HashMap<String, Box<dyn Codemod>>,
}

impl CodemodCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds codemods for every rule that matched in `results`.
    ///
    /// A rule whose fix steps do not compile is logged and left without a codemod.
    pub fn from_results(results: &[FileScanResult]) -> Self {
        let mut catalog = Self::new();
        for rule in results.iter().flat_map(|r| r.matches.iter().map(|m| &m.rule)) {
            if catalog.codemods.contains_key(&rule.module_name) {
                continue;
            }
            match RuleCodemod::from_rule(rule) {
                Ok(Some(codemod)) => catalog.insert(&rule.module_name, Box::new(codemod)),
                Ok(None) => {}
                Err(e) => warn!(module = %rule.module_name, error = %e, "invalid fix steps, skipping codemod"),
            }
        }
        catalog
    }

    pub fn insert(&mut self, module_name: &str, codemod: Box<dyn Codemod>) {
        self.codemods.insert(module_name.to_string(), codemod);
    }

    pub fn get(&self, module_name: &str) -> Option<&dyn Codemod> {
        self.codemods.get(module_name).map(|c| c.as_ref())
    }
}

/// Options for fixing a file.
#[derive(Debug, Clone)]
pub struct FixOptions {
    /// If `true`, a `.bak` file will be created before modifying a file.
    pub create_backup: bool,
    /// If `true`, changes will be calculated but not written to disk.
    pub dry_run: bool,
}

/// The result of fixing a single file.
#[derive(Debug, Default)]
pub struct FileFix {
    /// Codemods that changed the text.
    pub applied: usize,
    /// Codemods that failed.
    pub errors: usize,
    /// `true` if the text changed.
    pub modified: bool,
}

/// Totals for a fix run.
#[derive(Debug, Default)]
pub struct FixStats {
    pub files_changed: usize,
    pub transforms_applied: usize,
    pub transform_errors: usize,
    pub files_failed: usize,
}

/// Statistics from an `undo` operation.
pub struct UndoStats {
    /// The number of backup files found.
    pub found: usize,
    /// The number of files successfully restored from backups.
    pub restored: usize,
}

/// Applies every available codemod to one scanned file.
///
/// Codemods run in the order the rules matched; each sees the output of the
/// previous one. A failing codemod is logged and skipped. The file is only
/// written when its text changed.
pub fn fix_file(result: &FileScanResult, catalog: &CodemodCatalog, options: &FixOptions) -> Result<FileFix> {
    let original = match &result.contents {
        Some(text) => text.clone(),
        None => fs::read_to_string(&result.path)?,
    };
    let mut new_content = original.clone();
    let mut fix = FileFix::default();

    for rule_match in &result.matches {
        let module = rule_match.rule.module_name.as_str();
        let Some(codemod) = catalog.get(module) else {
            continue;
        };
        match codemod.transform(module, &new_content) {
            Ok(text) => {
                if text != new_content {
                    info!(module, path = %result.path.display(), "applying codemod");
                    fix.applied += 1;
                    new_content = text;
                }
            }
            Err(e) => {
                error!(module, path = %result.path.display(), error = %e, "codemod failed");
                fix.errors += 1;
            }
        }
    }

    fix.modified = new_content != original;
    if fix.modified && !options.dry_run {
        write_atomically(&result.path, &new_content, options.create_backup).map_err(|e| {
            Error::Processing {
                path: result.path.clone(),
                source: Box::new(e),
            }
        })?;
    }
    Ok(fix)
}

/// Writes `content` to `path` through a temp file, keeping permissions.
fn write_atomically(path: &Path, content: &str, create_backup: bool) -> Result<()> {
    if create_backup {
        let backup_path = format!("{}.bak", path.display());
        fs::copy(path, &backup_path)?;
    }

    let Some(parent) = path.parent() else {
        return Err(format!("Could not get parent directory for {}", path.display()).into());
    };
    let mut temp_file = NamedTempFile::new_in(parent)?;
    temp_file.write_all(content.as_bytes())?;

    let perms = fs::metadata(path)?.permissions();
    fs::set_permissions(temp_file.path(), perms)?;

    temp_file.persist(path)?;
    Ok(())
}

/// Fixes all scanned files in parallel.
///
/// # Arguments
///
/// * `results` - Files with matches, ideally carrying their scanned text.
/// * `options` - Backup and dry-run behaviour.
/// * `workers` - The number of threads. If `None`, it defaults to the number
///   of logical CPU cores.
pub fn fix_results(
    results: &[FileScanResult],
    options: &FixOptions,
    workers: Option<usize>,
) -> Result<FixStats> {
    let catalog = CodemodCatalog::from_results(results);

    let changed = AtomicUsize::new(0);
    let applied = AtomicUsize::new(0);
    let errors = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.unwrap_or_else(num_cpus::get))
        .build()?;

    pool.install(|| {
        results.par_iter().for_each(|result| match fix_file(result, &catalog, options) {
            Ok(fix) => {
                applied.fetch_add(fix.applied, Ordering::Relaxed);
                errors.fetch_add(fix.errors, Ordering::Relaxed);
                if fix.modified {
                    changed.fetch_add(1, Ordering::Relaxed);
                    if options.dry_run {
                        println!("DRY Fixed {}", result.path.display());
                    } else {
                        println!("Fixed {}", result.path.display());
                    }
                }
            }
            Err(e) => {
                failed.fetch_add(1, Ordering::Relaxed);
                error!(path = %result.path.display(), error = %e, "could not fix file");
            }
        });
    });

    Ok(FixStats {
        files_changed: changed.into_inner(),
        transforms_applied: applied.into_inner(),
        transform_errors: errors.into_inner(),
        files_failed: failed.into_inner(),
    })
}

/// Scans a directory for backups written by the fix stage and restores them.
///
/// Only `<name>.<ext>.bak` files whose `<ext>` is one of the scanned source
/// extensions are restored. Hidden and ignore-listed backups are included;
/// `node_modules` is never entered.
///
/// # Arguments
///
/// * `dir` - The directory to scan for backup files.
/// * `extensions` - Source extensions to restore. Empty means the defaults.
/// * `keep_backups` - If `false`, the `.bak` files will be deleted after being restored.
pub fn undo(dir: &Path, extensions: &[String], keep_backups: bool) -> Result<UndoStats> {
    let exts = discover::normalize_extensions(extensions);
    let mut found = 0;
    let mut restored = 0;

    let mut walker = WalkBuilder::new(dir);
    walker
        .standard_filters(false)
        .filter_entry(|entry| entry.file_name() != "node_modules" && entry.file_name() != ".git");

    for entry in walker.build() {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type().is_some_and(|ft| ft.is_file())
            || path.extension().and_then(|s| s.to_str()) != Some("bak")
        {
            continue;
        }
        let original_path: PathBuf = path.with_extension("");
        if !discover::should_process_file(&original_path, &exts) {
            continue;
        }

        found += 1;
        fs::copy(path, &original_path)?;
        if !keep_backups {
            fs::remove_file(path)?;
        }
        restored += 1;
        println!("Restored {}", original_path.display());
    }

    Ok(UndoStats { found, restored })
}

/// The main entry point for the `undo` command.
pub fn run_undo(dir: PathBuf, extensions: Vec<String>, keep_backups: bool) -> Result<()> {
    let stats = undo(&dir, &extensions, keep_backups)?;
    println!(
        "\nBackups found: {}, restored: {}",
        stats.found, stats.restored
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::EsImportMatcher;
    use crate::rules::RuleCatalog;
    use crate::scanner::scan_file;
    use tempfile::TempDir;

    struct FailingCodemod;

    impl Codemod for FailingCodemod {
        fn transform(&self, module_name: &str, _source: &str) -> Result<String> {
            Err(format!("no transform for {module_name}").into())
        }
    }

    fn scanned(path: &Path, retain: bool) -> FileScanResult {
        let rules = RuleCatalog::builtin()
            .unwrap()
            .select(&["native", "micro-utilities", "preferred"])
            .unwrap();
        scan_file(path, &rules, &EsImportMatcher::new(), retain).unwrap().unwrap()
    }

    #[test]
    fn test_rule_codemod_rewrites_imports() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("index.js");
        fs::write(
            &path,
            "const isArray = require('is-array');\nimport assign from 'object-assign';\n",
        )
        .unwrap();

        let result = scanned(&path, true);
        let catalog = CodemodCatalog::from_results(std::slice::from_ref(&result));
        let options = FixOptions {
            create_backup: true,
            dry_run: false,
        };
        let fix = fix_file(&result, &catalog, &options).unwrap();

        assert!(fix.modified);
        assert_eq!(fix.applied, 2);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "const isArray = Array.isArray;\nconst assign = Object.assign;\n"
        );
        assert!(temp_dir.path().join("index.js.bak").exists());
    }

    #[test]
    fn test_dry_run_leaves_file_untouched() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.js");
        let original = "var nan = require(\"is-nan\");\n";
        fs::write(&path, original).unwrap();

        let result = scanned(&path, false);
        let catalog = CodemodCatalog::from_results(std::slice::from_ref(&result));
        let options = FixOptions {
            create_backup: true,
            dry_run: true,
        };
        let fix = fix_file(&result, &catalog, &options).unwrap();

        assert!(fix.modified);
        assert_eq!(fs::read_to_string(&path).unwrap(), original);
        assert!(!temp_dir.path().join("a.js.bak").exists());
    }

    #[test]
    fn test_failing_codemod_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("b.js");
        fs::write(&path, "import m from 'moment';\nconst isArray = require('is-array');\n").unwrap();

        let result = scanned(&path, true);
        let mut catalog = CodemodCatalog::from_results(std::slice::from_ref(&result));
        catalog.insert("moment", Box::new(FailingCodemod));
        let options = FixOptions {
            create_backup: false,
            dry_run: false,
        };
        let fix = fix_file(&result, &catalog, &options).unwrap();

        assert_eq!(fix.errors, 1);
        assert_eq!(fix.applied, 1);
        assert!(fs::read_to_string(&path).unwrap().contains("Array.isArray"));
    }

    #[test]
    fn test_fix_results_then_undo() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("c.ts");
        let original = "import isArray from 'isarray';\n";
        fs::write(&path, original).unwrap();

        let results = vec![scanned(&path, true)];
        let options = FixOptions {
            create_backup: true,
            dry_run: false,
        };
        let stats = fix_results(&results, &options, Some(2)).unwrap();
        assert_eq!(stats.files_changed, 1);
        assert_ne!(fs::read_to_string(&path).unwrap(), original);

        let undo_stats = undo(temp_dir.path(), &[], false).unwrap();
        assert_eq!(undo_stats.restored, 1);
        assert_eq!(fs::read_to_string(&path).unwrap(), original);
        assert!(!temp_dir.path().join("c.ts.bak").exists());
    }

    #[test]
    fn test_undo_restores_ignored_backups_only_for_sources() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::create_dir_all(root.join("node_modules/chalk")).unwrap();
        fs::write(root.join(".gitignore"), "*.bak\n").unwrap();

        fs::write(root.join("src/app.js"), "changed\n").unwrap();
        fs::write(root.join("src/app.js.bak"), "before\n").unwrap();
        fs::write(root.join("notes"), "mine\n").unwrap();
        fs::write(root.join("notes.bak"), "older\n").unwrap();
        fs::write(root.join("node_modules/chalk/index.js"), "vendored\n").unwrap();
        fs::write(root.join("node_modules/chalk/index.js.bak"), "stale\n").unwrap();

        let stats = undo(root, &[], false).unwrap();

        assert_eq!(stats.found, 1);
        assert_eq!(stats.restored, 1);
        assert_eq!(fs::read_to_string(root.join("src/app.js")).unwrap(), "before\n");
        assert!(!root.join("src/app.js.bak").exists());
        assert_eq!(fs::read_to_string(root.join("notes")).unwrap(), "mine\n");
        assert!(root.join("notes.bak").exists());
        assert_eq!(
            fs::read_to_string(root.join("node_modules/chalk/index.js")).unwrap(),
            "vendored\n"
        );
    }
}
