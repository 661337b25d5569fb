use std::io;

use clap::Parser;
use log::{debug, error, info, warn};
use zentify_purge::{is_elevated, load_config, pause, run_cleanup, CleanupPlan, Config, Outcome};

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_DESCRIBE"),
    " ",
    env!("GIT_COMMIT"),
    ", ",
    env!("BUILD_TARGET"),
    ")"
);

fn main() {
    if !cfg!(windows) {
        eprintln!("Zentify Purge supports Windows 10/11 only. Exiting.");
        std::process::exit(2);
    }
    run(Cli::parse());
}

fn run(cli: Cli) {
    // CLI > Env > Config
    let loaded = load_config();
    let mut cfg = loaded.config.clone();
    cfg.apply_env();
    apply_cli(&mut cfg, &cli);

    init_logging(cfg.quiet, cfg.verbose);
    match &loaded.source {
        Some(p) => debug!("Loaded config from {}", p.display()),
        None => debug!("No config file found, using defaults"),
    }
    for r in &loaded.rejected { warn!("Ignoring config file {}", r); }

    let plan = CleanupPlan::from_env();
    let elevated = is_elevated();
    debug!("Elevated: {}", elevated);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match run_cleanup(&plan, elevated, &cfg, &mut out) {
        Ok(Outcome::NotElevated) => info!("Nothing was deleted"),
        Ok(Outcome::Completed(summary)) => info!(
            "Finished in {:?}: {} files, {} dirs, {} links removed, {} failures",
            summary.elapsed,
            summary.stats.files_deleted,
            summary.stats.dirs_deleted,
            summary.stats.links_removed,
            summary.stats.failed
        ),
        Err(e) => error!("Console output failed: {}", e),
    }

    if cfg.pause {
        let _ = pause(&mut io::stdin().lock(), &mut out);
    }
}

// ---------- CLI ----------

#[derive(Debug, Parser)]
#[command(
    name = "zentify-purge",
    version,
    long_version = LONG_VERSION,
    about = "Removes temp, prefetch and recent-items clutter from Windows 10/11 (run as Administrator)"
)]
struct Cli {
    /// Increase verbosity (overrides quiet)
    #[arg(long)]
    verbose: bool,

    /// Silence most output
    #[arg(long)]
    quiet: bool,

    /// Compute exact freed byte counts (slower)
    #[arg(long)]
    exact_stats: bool,

    /// Exit without waiting for Enter
    #[arg(long)]
    no_pause: bool,
}

fn apply_cli(cfg: &mut Config, cli: &Cli) {
    if cli.verbose { cfg.verbose = true; cfg.quiet = false; }
    if cli.quiet { cfg.quiet = true; cfg.verbose = false; }
    if cli.exact_stats { cfg.exact_stats = true; }
    if cli.no_pause { cfg.pause = false; }
}

fn init_logging(quiet: bool, verbose: bool) {
    let default_level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    let env = env_logger::Env::default().default_filter_or(default_level);
    let _ = env_logger::Builder::from_env(env).is_test(false).try_init();
    debug!("Logger initialized with level: {}", default_level);
    info!("Starting Zentify Purge");
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn cli_rejects_positional_arguments() {
        assert!(Cli::try_parse_from(["zentify-purge", "C:\\Users"]).is_err());
    }

    #[test]
    fn cli_flags_override_config() {
        let cli = Cli::try_parse_from(["zentify-purge", "--quiet", "--exact-stats", "--no-pause"]).unwrap();
        let mut cfg = Config { verbose: true, ..Config::default() };
        apply_cli(&mut cfg, &cli);
        assert!(cfg.quiet);
        assert!(!cfg.verbose);
        assert!(cfg.exact_stats);
        assert!(!cfg.pause);
    }

    #[test]
    fn no_flags_keep_config() {
        let cli = Cli::try_parse_from(["zentify-purge"]).unwrap();
        let mut cfg = Config { exact_stats: true, pause: false, ..Config::default() };
        let before = cfg.clone();
        apply_cli(&mut cfg, &cli);
        assert_eq!(cfg, before);
    }
}
