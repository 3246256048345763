use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// Finds JavaScript dependencies that have native or lighter replacements.
///
/// `modswap` scans a project's `package.json` and source files for modules
/// listed in its replacement catalog, reports where they are imported, and can
/// optionally uninstall them or rewrite the imports.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Find replaceable JavaScript modules in a project",
    long_about = "modswap - Find JavaScript modules with native or lighter replacements.

QUICK EXAMPLES:
  modswap scan .                          # Scan current project with all manifests
  modswap scan -m native --no-deps src/   # Only native replacements, skip package.json
  modswap scan --fix --dry-run .          # Preview codemods
  modswap rules -m preferred              # List catalog entries
  modswap undo -d .                       # Restore files from backups

For detailed help on any command, use: modswap <command> --help"
)]
pub struct Args {
    /// Increase log verbosity (-v info, -vv debug). `RUST_LOG` takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// The set of available commands for the `modswap` CLI.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan a project for replaceable modules
    ///
    /// EXAMPLES:
    ///   modswap scan .                              # Scan with every manifest
    ///   modswap scan -m native,preferred src/       # Pick manifests
    ///   modswap scan -f sarif -o modswap.sarif .    # Write SARIF for code scanning
    ///   modswap scan --catalog house-rules.yaml .   # Use a custom catalog
    ///
    /// Catalog files use YAML format:
    ///   manifests:
    ///     house:
    ///       - module_name: left-pad
    ///         kind: simple
    ///         replacement: "Use String.prototype.padStart."
    Scan(ScanArgs),

    /// List the replacement rules in the selected manifests
    ///
    /// EXAMPLES:
    ///   modswap rules                   # Every built-in manifest
    ///   modswap rules -m native         # One manifest
    Rules {
        /// Manifests to list.
        #[arg(
            short,
            long = "manifest",
            value_delimiter = ',',
            default_values_t = default_manifests()
        )]
        manifests: Vec<String>,

        /// Path to a YAML rule catalog that replaces the built-in one.
        #[arg(long)]
        catalog: Option<PathBuf>,
    },

    /// Restore files from backups (undo fixes)
    ///
    /// EXAMPLES:
    ///   modswap undo -d .                    # Restore all files in current dir
    ///   modswap undo -d src/ --keep-backups  # Restore but keep .bak files
    Undo {
        /// The directory where the fix was run.
        #[arg(short, long, required = true)]
        dir: PathBuf,

        /// A comma-separated list of source extensions whose backups are restored.
        #[arg(short = 'x', long = "ext", value_delimiter = ',')]
        extensions: Vec<String>,

        /// Keep the backup files after restoring the original files.
        #[arg(long)]
        keep_backups: bool,
    },
}

/// Options for the `scan` command.
#[derive(clap::Args, Debug)]
pub struct ScanArgs {
    /// The project directory to scan.
    #[arg(default_value = ".")]
    pub dir: PathBuf,

    /// Manifests to check against, as a comma-separated list or repeated flag.
    #[arg(
        short,
        long = "manifest",
        value_delimiter = ',',
        default_values_t = default_manifests()
    )]
    pub manifests: Vec<String>,

    /// Path to a YAML rule catalog that replaces the built-in one.
    #[arg(long)]
    pub catalog: Option<PathBuf>,

    /// Also check `devDependencies`.
    #[arg(long)]
    pub include_dev: bool,

    /// Skip the `package.json` dependency check.
    #[arg(long)]
    pub no_deps: bool,

    /// A comma-separated list of file extensions to scan.
    #[arg(short = 'x', long = "ext", value_delimiter = ',')]
    pub extensions: Vec<String>,

    /// The number of parallel scan workers. Defaults to the number of logical CPU cores.
    #[arg(short = 'w', long = "workers", env = "MODSWAP_WORKERS")]
    pub workers: Option<usize>,

    /// Give up on a single file after this many seconds.
    #[arg(long = "job-timeout", value_name = "SECS")]
    pub job_timeout: Option<u64>,

    /// The output format for the report (`text`, `json`, `csv`, `sarif`).
    #[arg(short = 'f', long = "format", default_value = "text")]
    pub format: String,

    /// Path to the output file. If omitted, the report is written to standard output.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Include a summary of scan statistics in the output.
    #[arg(long = "summary")]
    pub include_summary: bool,

    /// Hide the progress bar.
    #[arg(long)]
    pub no_progress: bool,

    /// Rewrite imports that have an automatic codemod.
    #[arg(long)]
    pub fix: bool,

    /// Show what `--fix` and `--uninstall` would do without changing anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Disable the creation of backup files (`.bak`) when fixing.
    #[arg(long)]
    pub no_backup: bool,

    /// Uninstall flagged dependencies through the package manager.
    #[arg(long)]
    pub uninstall: bool,

    /// The package manager executable used by `--uninstall`.
    #[arg(long, default_value = "npm")]
    pub package_manager: String,
}

fn default_manifests() -> Vec<String> {
    crate::rules::DEFAULT_MANIFESTS.iter().map(|s| s.to_string()).collect()
}

/// Parses command-line arguments and returns the populated `Args` struct.
pub fn parse_args() -> Args {
    Args::parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_scan_defaults() {
        let args = Args::try_parse_from(["modswap", "scan"]).unwrap();
        let Commands::Scan(scan) = args.command else {
            panic!("expected scan");
        };
        assert_eq!(scan.dir, PathBuf::from("."));
        assert_eq!(scan.manifests, vec!["native", "micro-utilities", "preferred"]);
        assert_eq!(scan.format, "text");
        assert_eq!(scan.package_manager, "npm");
        assert!(scan.job_timeout.is_none());
    }

    #[test]
    fn test_scan_options() {
        let args = Args::try_parse_from([
            "modswap", "-vv", "scan", "web", "-m", "native,preferred", "-x", "ts,tsx",
            "-w", "3", "--job-timeout", "10", "--fix", "--no-backup",
        ])
        .unwrap();
        assert_eq!(args.verbose, 2);
        let Commands::Scan(scan) = args.command else {
            panic!("expected scan");
        };
        assert_eq!(scan.dir, PathBuf::from("web"));
        assert_eq!(scan.manifests, vec!["native", "preferred"]);
        assert_eq!(scan.extensions, vec!["ts", "tsx"]);
        assert_eq!(scan.workers, Some(3));
        assert_eq!(scan.job_timeout, Some(10));
        assert!(scan.fix && scan.no_backup);
    }
}
