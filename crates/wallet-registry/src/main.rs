use clap::{Parser, Subcommand};
use eyre::Context as _;
use std::io::Write as _;
use tracing_subscriber::prelude::*;
use wallet_registry::{config::ConfigStore, doctor, paths::RegistryPaths};

#[derive(Parser, Debug)]
#[command(name = "wallet-registry", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print resolved paths (useful for debugging).
    Paths,

    /// Print the effective default network settings, creating config.toml if it is missing.
    Config,

    /// Validate the local configuration (safe to paste; contains no secrets).
    Doctor {
        /// Emit JSON to stdout (machine-readable).
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn init_logging(paths: &RegistryPaths) -> tracing_appender::non_blocking::WorkerGuard {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let file_name = paths
        .log_file
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("wallet-registry.log.jsonl");
    let file_appender = tracing_appender::rolling::never(&paths.data_dir, file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_filter(env_filter.clone());
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

fn print_json(v: &impl serde::Serialize, what: &str) -> eyre::Result<()> {
    let s = serde_json::to_string_pretty(v).with_context(|| format!("serialize {what}"))?;
    writeln!(std::io::stdout().lock(), "{s}").with_context(|| format!("write {what}"))
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let paths = RegistryPaths::discover()?;
    paths.ensure_private_dirs().context("prepare registry dirs")?;
    let _log_guard = init_logging(&paths);

    match cli.cmd {
        Command::Paths => print_json(&paths, "paths"),
        Command::Config => {
            let store = ConfigStore::new(&paths);
            let cfg = store.load_or_init_default().context("load config")?;
            tracing::debug!(path = %store.path().display(), "configuration loaded");
            print_json(
                &serde_json::json!({
                  "path": store.path(),
                  "defaults": cfg.network_defaults(),
                  "cache": cfg.cache,
                }),
                "config",
            )
        }
        Command::Doctor { json } => doctor::run(json).context("doctor failed"),
    }
}
