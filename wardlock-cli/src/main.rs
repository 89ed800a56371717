mod check;
mod handlers;
mod server;

#[cfg(test)]
mod check_test;
#[cfg(test)]
mod handlers_test;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use wardlock_core::clock::{Clock, SystemClock};
use wardlock_core::collision::CollisionDetector;
use wardlock_core::config::CoreConfig;

#[derive(Parser)]
#[command(
    name = "wardlock",
    about = "Wardlock: record locks, collision checks and patient queues for clinics",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the wardlock HTTP server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3100")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Storage backend: "memory" or "sqlite:<path>"
        #[arg(long, default_value = "memory", env = "WARDLOCK_STORAGE")]
        storage: String,

        /// TOML file with queue, collision and notify settings
        #[arg(long, env = "WARDLOCK_CONFIG")]
        config: Option<PathBuf>,

        /// Shared bearer token required on every route except /health
        #[arg(long, env = "WARDLOCK_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
    },

    /// Evaluate one collision check from a JSON document on stdin
    Check {
        /// TOML file whose [collision] rules replace the built-in tables
        #[arg(long, env = "WARDLOCK_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Print version information
    Version,
}

fn load_config(path: Option<&Path>) -> Result<CoreConfig, String> {
    let Some(path) = path else {
        return Ok(CoreConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read config {}: {}", path.display(), e))?;
    toml::from_str(&raw).map_err(|e| format!("invalid config {}: {}", path.display(), e))
}

fn run_check(config: CoreConfig) -> Result<(), String> {
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .map_err(|e| format!("failed to read stdin: {}", e))?;

    let check: check::CheckInput =
        serde_json::from_str(&input).map_err(|e| format!("invalid check document: {}", e))?;

    let detector = CollisionDetector::new(config.collision);
    let conflict = check.evaluate(&detector, SystemClock.now_ms());

    let verdict = serde_json::json!({
        "conflict": conflict.is_some(),
        "detail": conflict,
    });
    let out = serde_json::to_string_pretty(&verdict).map_err(|e| e.to_string())?;
    println!("{}", out);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve {
            port,
            host,
            storage,
            config,
            api_key,
        } => match load_config(config.as_deref()) {
            Ok(config) => {
                server::run(server::ServeOptions {
                    host,
                    port,
                    storage,
                    config,
                    api_key,
                })
                .await
            }
            Err(e) => Err(e),
        },
        Commands::Check { config } => load_config(config.as_deref()).and_then(run_check),
        Commands::Version => {
            println!("wardlock {}", env!("CARGO_PKG_VERSION"));
            println!("Concurrency core for multi-tenant clinic operations");
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "wardlock failed");
            ExitCode::FAILURE
        }
    }
}
