mod account_commands;
mod pairing_commands;
mod serve;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
    volery_config::VoleryConfig,
};

#[derive(Parser)]
#[command(name = "volery", about = "Volery — multi-channel assistant dispatch")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path (overrides discovery).
    #[arg(long, global = true, env = "VOLERY_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the config value.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Directory for pairing and account state files (overrides config).
    #[arg(long, global = true, env = "VOLERY_STATE_DIR")]
    state_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server (default when no subcommand is provided).
    Serve,
    /// Sender pairing management.
    Pairing {
        #[command(subcommand)]
        action: pairing_commands::PairingAction,
    },
    /// Channel account management.
    Accounts {
        #[command(subcommand)]
        action: account_commands::AccountAction,
    },
    /// Run the reply chunker on a piece of text (debug helper).
    Chunk {
        /// Maximum characters per chunk.
        #[arg(long, default_value_t = 4000)]
        limit: usize,
        /// Text to chunk; read from stdin when omitted.
        text: Option<String>,
    },
}

/// Precedence: `RUST_LOG`, then `--log-level`, then the config file.
fn init_telemetry(cli: &Cli, config: &VoleryConfig) {
    let level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.logging.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs || config.logging.json {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Explicit `--config` wins; otherwise standard discovery.
fn load_config(cli: &Cli) -> anyhow::Result<VoleryConfig> {
    match &cli.config {
        Some(path) => volery_config::load_config(path),
        None => Ok(volery_config::discover_and_load()),
    }
}

/// State directory resolution: CLI flag, then config, then platform data dir.
fn resolve_state_dir(cli: &Cli, config: &VoleryConfig) -> PathBuf {
    if let Some(dir) = &cli.state_dir {
        return expand_home(dir.clone());
    }
    if let Some(dir) = &config.storage.state_dir {
        return expand_home(PathBuf::from(dir));
    }
    volery_config::loader::data_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Expand a leading `~/` so config values like `~/.volery` work.
fn expand_home(path: PathBuf) -> PathBuf {
    let Ok(stripped) = path.strip_prefix("~") else {
        return path;
    };
    match directories::BaseDirs::new() {
        Some(dirs) => dirs.home_dir().join(stripped),
        None => path,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_telemetry(&cli, &config);
    let state_dir = resolve_state_dir(&cli, &config);

    match cli.command {
        None | Some(Commands::Serve) => {
            info!(version = env!("CARGO_PKG_VERSION"), "volery starting");
            serve::run(config, state_dir).await
        },
        Some(Commands::Pairing { ref action }) => {
            pairing_commands::handle(&state_dir, action).await
        },
        Some(Commands::Accounts { ref action }) => {
            account_commands::handle(&state_dir, action).await
        },
        Some(Commands::Chunk { limit, text }) => {
            let text = match text {
                Some(text) => text,
                None => {
                    use std::io::Read;
                    let mut buf = String::new();
                    std::io::stdin().read_to_string(&mut buf)?;
                    buf
                },
            };
            let chunks = volery_dispatch::chunk_text(&text, limit);
            for (i, chunk) in chunks.iter().enumerate() {
                println!("── chunk {}/{} ({} chars)", i + 1, chunks.len(), chunk.chars().count());
                println!("{chunk}");
            }
            Ok(())
        },
    }
}
