use clap::Parser;
use majdata_control::config::{self, Config};
use majdata_control::signals::shutdown_signal;
use majdata_control::{CommandLoader, ControlFileWatcher, LogLoader, ProjectLoader, WatcherState};
use std::path::PathBuf;
use std::sync::Arc;

/// Watch for the HachimiDX → Majdata control file and open the requested
/// project: wait for writes to settle, parse folder/maidata/track, delete the
/// file, and hand the request to the configured loader.
#[derive(Parser, Debug)]
#[command(name = "majdata-control", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "majdata-control.toml")]
    config: PathBuf,

    /// Directory to watch (overrides config)
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Debounce interval in milliseconds (overrides config)
    #[arg(long)]
    debounce_ms: Option<u64>,

    /// Command to run for each accepted control file (overrides config)
    #[arg(long)]
    command: Option<String>,

    /// Validate config and print resolved settings, don't watch
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (every filesystem event, dispatcher state)
    #[arg(short, long)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    /// Apply command-line overrides on top of the loaded config.
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(dir) = &self.dir {
            config.watch.dir = dir.clone();
        }
        if let Some(ms) = self.debounce_ms {
            config.watch.debounce_ms = ms;
        }
        if let Some(command) = &self.command {
            config.loader.command = Some(command.clone());
        }
    }

    fn default_filter(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "warn"
        } else {
            "info"
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.default_filter())),
        )
        .with_target(true)
        .with_thread_ids(false)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    let mut config = match config::load_config(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };
    cli.apply_overrides(&mut config);

    if cli.dry_run {
        print_config(&cli, &config);
        return;
    }

    let loader: Arc<dyn ProjectLoader> = match CommandLoader::from_config(&config.loader) {
        Some(command) => Arc::new(command),
        None => {
            tracing::info!("no loader command configured, requests will only be logged");
            Arc::new(LogLoader)
        }
    };

    let mut watcher = ControlFileWatcher::with_config(loader, &config.watch);
    watcher.start_watching();
    if watcher.state() != WatcherState::Watching {
        eprintln!(
            "error: could not watch {}",
            watcher.control_path().display()
        );
        std::process::exit(1);
    }

    shutdown_signal().await;
    watcher.stop_watching();
}

fn print_config(cli: &Cli, config: &Config) {
    println!("majdata-control v{}", env!("CARGO_PKG_VERSION"));
    println!("Config file: {}", cli.config.display());
    println!("Watch dir: {}", config.watch.dir.display());
    println!("Control file: {}", config.watch.control_file);
    println!("Debounce: {}ms", config.watch.debounce_ms);
    match &config.loader.command {
        Some(command) => println!("Loader: {} {}", command, config.loader.args.join(" ")),
        None => println!("Loader: log only"),
    }
    println!("Dry run mode, config validated, not watching.");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_replace_config_values() {
        let cli = Cli::parse_from([
            "majdata-control",
            "--dir",
            "/songs",
            "--debounce-ms",
            "50",
            "--command",
            "majdata-edit",
        ]);
        let mut config = Config::default();
        cli.apply_overrides(&mut config);

        assert_eq!(config.watch.dir, PathBuf::from("/songs"));
        assert_eq!(config.watch.debounce_ms, 50);
        assert_eq!(config.loader.command.as_deref(), Some("majdata-edit"));
    }

    #[test]
    fn test_no_overrides_keeps_config() {
        let cli = Cli::parse_from(["majdata-control"]);
        let mut config = Config::default();
        config.watch.debounce_ms = 900;
        cli.apply_overrides(&mut config);

        assert_eq!(config.watch.debounce_ms, 900);
        assert_eq!(cli.config, PathBuf::from("majdata-control.toml"));
        assert_eq!(cli.default_filter(), "info");
    }

    #[test]
    fn test_verbose_and_quiet_filters() {
        assert_eq!(
            Cli::parse_from(["majdata-control", "-v"]).default_filter(),
            "debug"
        );
        assert_eq!(
            Cli::parse_from(["majdata-control", "-q"]).default_filter(),
            "warn"
        );
    }
}
