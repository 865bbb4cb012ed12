use clap::Parser;
use tracing::{error, info};
use w3gs_host::{Config, Game, Host};

#[derive(Parser)]
#[command(name = "w3gs-host")]
#[command(about = "Headless lobby and action-relay host for a W3GS-compatible game session")]
struct Cli {
    /// Path to a `key = value` config file; defaults are used for anything missing.
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Overrides `map_path` from the config file.
    #[arg(long)]
    map: Option<String>,

    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,

    #[arg(short = 'q')]
    quiet: bool,
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        tracing::Level::WARN
    } else {
        match verbose {
            0 => tracing::Level::INFO,
            1 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let mut config = match &cli.config {
        Some(path) => match Config::from_file(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                error!(error = %e, path = %path.display(), "failed to load config");
                return std::process::ExitCode::FAILURE;
            }
        },
        None => {
            info!("no --config given, running with defaults");
            Config::default()
        }
    };

    if let Some(map) = cli.map {
        config.map_path = map;
    }

    let map = match config.build_map_descriptor() {
        Ok(m) => m,
        Err(e) => {
            error!(error = %e, "invalid map configuration");
            return std::process::ExitCode::FAILURE;
        }
    };

    let now_ms = 0;
    let random_seed: u32 = rand::random();
    let entry_key: u32 = rand::random();
    let game = Game::new(
        map,
        config.bot_defaultgamename.clone(),
        config.bot_virtualhostname.clone(),
        random_seed,
        0,
        entry_key,
        config.bot_hostport,
        config.bot_latency,
        config.bot_autostart,
        config.lan_war3version,
        now_ms,
    );

    let host = match Host::bind(game, config.bot_hostport).await {
        Ok(h) => h,
        Err(e) => {
            error!(error = %e, port = config.bot_hostport, "failed to bind listener");
            return std::process::ExitCode::FAILURE;
        }
    };

    match host.run().await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "host loop exited with an error");
            std::process::ExitCode::FAILURE
        }
    }
}
