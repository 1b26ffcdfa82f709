// Grid Executor - CLI entry point
// Runs the reconciliation loop and inspects persisted runtime state

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use grid_executor::{Config, ConfigError, LoggingConfig};

#[path = "../cli/engine_commands.rs"]
mod engine_commands;

#[derive(Parser)]
#[command(name = "grid-executor")]
#[command(version)]
#[command(about = "Multi-symbol grid trading execution engine", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create config.toml and the data directories
    Init,

    /// Run the reconciliation loop
    Run {
        /// Sweep every symbol once and exit
        #[arg(long)]
        once: bool,

        /// Paper broker with in-memory state
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Show persisted per-symbol state
    Status {
        /// Only this symbol
        #[arg(short, long)]
        symbol: Option<String>,
    },

    /// Validate the configuration file
    CheckConfig,
}

fn init_logging(logging: &LoggingConfig, verbose: bool) {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    if logging.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logging comes first so config errors are visible; a broken file falls back to defaults
    let logging = Config::from_file(&cli.config)
        .map(|c| c.logging)
        .unwrap_or_default();
    init_logging(&logging, cli.verbose);

    info!("🚀 Grid Executor v{}", env!("CARGO_PKG_VERSION"));
    info!("📁 Config: {}", cli.config);

    match cli.command {
        Commands::Init => {
            init_workspace(&cli.config)?;
        }
        Commands::Run { once, dry_run } => {
            let config = load_config_or_exit(&cli.config);
            if let Err(e) = engine_commands::run_engine(config, &cli.config, once, dry_run).await {
                error!("❌ {}", e.user_message());
                std::process::exit(1);
            }
        }
        Commands::Status { symbol } => {
            let config = load_config_or_exit(&cli.config);
            engine_commands::show_status(&config, symbol.as_deref())?;
        }
        Commands::CheckConfig => {
            let config = load_config_or_exit(&cli.config);
            engine_commands::check_config(&config);
        }
    }

    Ok(())
}

/// Load config or exit with helpful error message
fn load_config_or_exit(path: &str) -> Config {
    match Config::from_file(path) {
        Ok(config) => config,
        Err(e) => {
            error!("❌ Configuration Error");
            error!("{}", e);

            if matches!(e, ConfigError::NotFound(_)) {
                error!("");
                error!("💡 Quick fix:");
                error!("   1. Run: grid-executor init");
                error!("   2. Edit config.toml: instruments, symbols and broker");
                error!("   3. Try again");
            }

            std::process::exit(1);
        }
    }
}

fn init_workspace(config_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    use std::fs;

    info!("🔧 Initializing workspace...");

    if !std::path::Path::new(config_path).exists() {
        let default_config = include_str!("../../config.toml.example");
        fs::write(config_path, default_config)?;
        info!("📝 Created {}", config_path);
    } else {
        warn!("⚠️  {} already exists, skipping", config_path);
    }

    let config = Config::from_file(config_path)?;
    fs::create_dir_all(&config.engine.state_dir)?;
    if let Some(parent) = std::path::Path::new(&config.engine.db_path).parent() {
        fs::create_dir_all(parent)?;
    }

    info!("✅ Workspace initialized successfully!");
    info!("💡 Next steps:");
    info!("   1. Edit {} with your instruments and symbols", config_path);
    info!("   2. Run: grid-executor check-config");
    info!("   3. Run: grid-executor run --dry-run --once");

    Ok(())
}
