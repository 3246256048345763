use crate::cli::ScanArgs;
use crate::config::ConfigLoader;
use crate::coordinator::{CoordinatorConfig, ProgressEvent, ScanCoordinator};
use crate::deps::{self, DependencyFinding, DependencySource};
use crate::discover;
use crate::errors::Result;
use crate::fixer::{self, FixOptions};
use crate::matcher::ImportMatcher;
use crate::outcome::{FileScanResult, RuleMatch};
use crate::output_formatter::{OutputFormat, OutputFormatter, Report};
use crate::package_manager::PackageManager;
use crate::rules::ReplacementRule;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Scans a single file against every rule.
///
/// Returns `Ok(None)` when no rule matched. Read errors and matcher errors are
/// returned as-is; the worker turns them into a per-file failure.
pub fn scan_file(
    path: &Path,
    rules: &[ReplacementRule],
    matcher: &dyn ImportMatcher,
    retain_contents: bool,
) -> Result<Option<FileScanResult>> {
    let contents = fs::read_to_string(path)?;
    let mut matches = Vec::new();

    for rule in rules {
        let occurrences = matcher.find_imports(&contents, &rule.module_name)?;
        if !occurrences.is_empty() {
            matches.push(RuleMatch {
                rule: rule.clone(),
                occurrences,
            });
        }
    }

    if matches.is_empty() {
        return Ok(None);
    }

    Ok(Some(FileScanResult {
        path: path.to_path_buf(),
        matches,
        contents: retain_contents.then_some(contents),
    }))
}

/// The main entry point for the `scan` command.
///
/// This function handles:
/// 1. Loading the rule catalog and selecting the requested manifests.
/// 2. Checking `package.json` dependencies against the rules.
/// 3. Discovering source files and scanning them on the worker pool.
/// 4. Writing the report, then optionally uninstalling and fixing.
pub fn run_scan(args: ScanArgs) -> Result<()> {
    let catalog = ConfigLoader::resolve_catalog(args.catalog.as_deref(), &args.dir)?;
    let rules = catalog.select(&args.manifests)?;

    // Dependencies
    let mut dependencies: Vec<DependencyFinding> = Vec::new();
    let mut package_dir = None;
    if !args.no_deps {
        match deps::find_package(&args.dir)? {
            Some(manifest) => {
                dependencies.extend(deps::scan_dependencies(
                    &manifest.dependencies,
                    &rules,
                    DependencySource::Dependencies,
                ));
                if args.include_dev {
                    dependencies.extend(deps::scan_dependencies(
                        &manifest.dev_dependencies,
                        &rules,
                        DependencySource::DevDependencies,
                    ));
                }
                package_dir = manifest.path.parent().map(Path::to_path_buf);
            }
            None => warn!(dir = %args.dir.display(), "could not find package.json, skipping dependency scan"),
        }
    }

    // Files
    let files = discover::collect_source_files(&args.dir, &args.extensions)?;
    info!(files = files.len(), "discovered source files");

    let config = CoordinatorConfig {
        concurrency: args.workers.unwrap_or_else(num_cpus::get).max(1),
        job_timeout: args.job_timeout.map(Duration::from_secs),
        retain_contents: args.fix,
    };

    let pb = if args.no_progress {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(files.len() as u64)
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .map_err(|e| format!("Invalid progress template: {e}"))?
            .progress_chars("##-"),
    );

    let outcome = ScanCoordinator::new(config).scan(files, rules, |event| match event {
        ProgressEvent::Started { path, .. } => pb.set_message(format!("Scanning: {}", path.display())),
        ProgressEvent::Finished { .. } => pb.inc(1),
    })?;
    pb.finish_and_clear();

    // Report
    let mut writer: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(std::io::stdout()),
    };
    let formatter = OutputFormatter::new(OutputFormat::from(args.format.as_str()), args.include_summary);
    formatter.write_output(
        &mut writer,
        &Report {
            dependencies: &dependencies,
            outcome: &outcome,
        },
    )?;
    writer.flush()?;

    // Uninstall
    if args.uninstall && !dependencies.is_empty() {
        match &package_dir {
            Some(dir) => {
                let pm = PackageManager::new(&args.package_manager, dir);
                pm.uninstall(&dependencies, args.dry_run)?;
            }
            None => warn!("no package directory known, skipping uninstall"),
        }
    }

    // Fix
    if args.fix && !outcome.results.is_empty() {
        let options = FixOptions {
            create_backup: !args.no_backup,
            dry_run: args.dry_run,
        };
        let stats = fixer::fix_results(&outcome.results, &options, args.workers)?;
        println!("\n{}", "-".repeat(50));
        println!("Files fixed   : {}", stats.files_changed);
        println!("Codemods run  : {}", stats.transforms_applied);
        println!("Codemod errors: {}", stats.transform_errors);
        if stats.files_failed > 0 {
            println!("Files failed  : {}", stats.files_failed);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::EsImportMatcher;
    use crate::rules::RuleCatalog;
    use tempfile::TempDir;

    #[test]
    fn test_zero_match_file_is_omitted() {
        let rules = RuleCatalog::builtin().unwrap().select(&["preferred"]).unwrap();
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("plain.ts");
        fs::write(&path, "export const answer = 42;\n").unwrap();

        let result = scan_file(&path, &rules, &EsImportMatcher::new(), false).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_matches_keep_rule_order() {
        let rules = RuleCatalog::builtin().unwrap().select(&["preferred"]).unwrap();
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("app.ts");
        fs::write(&path, "import chalk from 'chalk';\nimport moment from 'moment';\n").unwrap();

        let result = scan_file(&path, &rules, &EsImportMatcher::new(), false)
            .unwrap()
            .unwrap();

        let names: Vec<&str> = result.matches.iter().map(|m| m.rule.module_name.as_str()).collect();
        let expected: Vec<&str> = rules
            .iter()
            .map(|r| r.module_name.as_str())
            .filter(|n| *n == "chalk" || *n == "moment")
            .collect();
        assert_eq!(names, expected);
        assert!(result.contents.is_none());
    }

    #[test]
    fn test_invalid_utf8_is_an_error() {
        let rules = RuleCatalog::builtin().unwrap().select(&["preferred"]).unwrap();
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("binary.js");
        fs::write(&path, [0xff, 0xfe, 0x00, 0x41]).unwrap();

        assert!(scan_file(&path, &rules, &EsImportMatcher::new(), false).is_err());
    }
}
