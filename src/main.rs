//! The main entry point for the `modswap` command-line application.
//!
//! This file is responsible for parsing command-line arguments, setting up
//! logging and dispatching to the appropriate subcommand handler in the
//! `modswap` library.

use anyhow::Context;
use modswap::cli::{self, Commands};
use modswap::{fixer, rules, scanner};
use std::env;
use std::process;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Logs go to stderr so reports on stdout stay machine readable.
fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run() -> anyhow::Result<()> {
    let args = cli::parse_args();
    init_tracing(args.verbose);

    match args.command {
        Commands::Scan(scan) => {
            let dir = scan.dir.clone();
            scanner::run_scan(scan).with_context(|| format!("scan of {} failed", dir.display()))
        }
        Commands::Rules { manifests, catalog } => {
            rules::run_rules(manifests, catalog).context("could not list rules")
        }
        Commands::Undo {
            dir,
            extensions,
            keep_backups,
        } => fixer::run_undo(dir, extensions, keep_backups).context("undo failed"),
    }
}

fn main() {
    if env::args().len() == 1 {
        println!("Find JavaScript modules with native or lighter replacements\n");
        println!("QUICK START EXAMPLES:");
        println!("  modswap scan .                  # Scan current project");
        println!("  modswap scan --fix --dry-run .  # Preview codemods");
        println!("  modswap rules                   # List replacement rules");
        println!("  modswap undo -d .               # Restore from backups\n");
        println!("Run 'modswap --help' for full command list");
        process::exit(0);
    }

    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
