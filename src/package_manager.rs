use crate::deps::{DependencyFinding, DependencySource};
use crate::errors::Result;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::info;

/// Removes flagged dependencies through the project's package manager.
pub struct PackageManager {
    program: String,
    dir: PathBuf,
}

impl PackageManager {
    /// `program` is the package manager executable, e.g. `npm`.
    /// Commands run with `dir` as their working directory.
    pub fn new(program: &str, dir: &Path) -> Self {
        Self {
            program: program.to_string(),
            dir: dir.to_path_buf(),
        }
    }

    /// The argument lists needed to remove `findings`, one per section.
    pub fn uninstall_commands(&self, findings: &[DependencyFinding]) -> Vec<Vec<String>> {
        [
            (DependencySource::Dependencies, "-S"),
            (DependencySource::DevDependencies, "-D"),
        ]
        .into_iter()
        .filter_map(|(source, flag)| {
            let mut names: Vec<String> = findings
                .iter()
                .filter(|f| f.source == source)
                .map(|f| f.name.clone())
                .collect();
            if names.is_empty() {
                return None;
            }
            names.dedup();
            let mut args = vec!["rm".to_string(), flag.to_string()];
            args.extend(names);
            Some(args)
        })
        .collect()
    }

    /// Runs the uninstall commands, or prints them when `dry_run` is set.
    ///
    /// A non-zero exit status is an error; later commands are not run.
    pub fn uninstall(&self, findings: &[DependencyFinding], dry_run: bool) -> Result<()> {
        for args in self.uninstall_commands(findings) {
            let shown = format!("{} {}", self.program, args.join(" "));
            if dry_run {
                println!("DRY {shown}");
                continue;
            }

            info!(command = %shown, dir = %self.dir.display(), "uninstalling dependencies");
            let status = Command::new(&self.program)
                .args(&args)
                .current_dir(&self.dir)
                .status()?;
            if !status.success() {
                return Err(format!("'{shown}' failed with {status}").into());
            }
            println!("Removed: {}", args[2..].join(", "));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{ReplacementKind, ReplacementRule};

    fn finding(name: &str, source: DependencySource) -> DependencyFinding {
        DependencyFinding {
            name: name.to_string(),
            source,
            rule: ReplacementRule {
                module_name: name.to_string(),
                kind: ReplacementKind::None,
                fix: vec![],
            },
        }
    }

    #[test]
    fn test_commands_split_by_section() {
        let pm = PackageManager::new("npm", Path::new("."));
        let findings = vec![
            finding("moment", DependencySource::Dependencies),
            finding("chalk", DependencySource::DevDependencies),
            finding("lodash", DependencySource::Dependencies),
        ];

        let commands = pm.uninstall_commands(&findings);
        assert_eq!(
            commands,
            vec![
                vec!["rm", "-S", "moment", "lodash"],
                vec!["rm", "-D", "chalk"],
            ]
        );
    }

    #[test]
    fn test_no_findings_no_commands() {
        let pm = PackageManager::new("npm", Path::new("."));
        assert!(pm.uninstall_commands(&[]).is_empty());
        assert!(pm.uninstall(&[], false).is_ok());
    }

    #[test]
    fn test_failing_command_is_an_error() {
        let pm = PackageManager::new("modswap-no-such-package-manager", Path::new("."));
        let findings = vec![finding("moment", DependencySource::Dependencies)];
        assert!(pm.uninstall(&findings, false).is_err());
        assert!(pm.uninstall(&findings, true).is_ok());
    }
}
