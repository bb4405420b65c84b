use clap::{Parser, Subcommand};
use lib::config::TransportMode;

#[derive(Parser)]
#[command(name = "hush")]
#[command(about = "Hush — anonymous relay between Telegram users and an operator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config.json.
    Init {
        /// Config file path (default: HUSH_CONFIG_PATH or ~/.hush/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Run the relay. Identities and the bot token may come from the environment or a .env file.
    Run {
        /// Config file path (default: HUSH_CONFIG_PATH or ~/.hush/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Ingestion mode: "pull" (getUpdates long poll) or "push" (webhook). Overrides config.
        #[arg(long, short, value_name = "MODE")]
        mode: Option<TransportMode>,

        /// Webhook listen port (push mode). Overrides config.
        #[arg(long, short)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() {
    // A missing .env is fine; variables may come from the real environment.
    let _ = dotenvy::dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("hush {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Run { config, mode, port }) => {
            if let Err(e) = run_relay(config, mode, port).await {
                log::error!("relay failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(lib::config::default_config_path);
    let dir = lib::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_relay(
    config_path: Option<std::path::PathBuf>,
    mode: Option<TransportMode>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (mut config, path) = lib::config::load_config(config_path)?;
    if let Some(m) = mode {
        config.gateway.mode = m;
    }
    if let Some(p) = port {
        config.gateway.port = p;
    }
    log::info!(
        "starting relay in {} mode (config {})",
        config.gateway.mode.as_str(),
        path.display()
    );
    lib::gateway::run_gateway(config).await
}
