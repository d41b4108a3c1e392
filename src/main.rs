mod agent;
mod ai_sdk;
mod config;
mod decoder;
mod error;
mod protocol;
mod search;
mod server;
mod session;
mod tools;
mod ui;

use clap::{Parser, Subcommand};
use config::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "seeker", about = "Chat with Claude, backed by web search")]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive terminal chat (default).
    Chat,
    /// Serve chat sessions over HTTP.
    Serve {
        #[arg(long, env = "SEEKER_LISTEN", default_value = "127.0.0.1:3000")]
        listen: String,
        #[arg(long, env = "SEEKER_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },
}

const DEFAULT_FILTER: &str = "seeker=info";

fn init_file_logging() -> std::io::Result<std::path::PathBuf> {
    // The TUI owns the terminal, so logs go to a file.
    let log_path = std::env::temp_dir().join("seeker.log");
    let file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&log_path)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_FILTER.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file)),
        )
        .init();

    Ok(log_path)
}

fn init_stdout_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let agent = cli.config.build_agent()?;

    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => {
            let log_path = init_file_logging()?;
            eprintln!("Logs written to: {}", log_path.display());
            ui::run_tui(agent)
        }
        Command::Serve { listen, token } => {
            init_stdout_logging();
            let auth_token = server::resolve_token(token)?;
            server::run(server::ServerConfig { listen, auth_token }, agent).await
        }
    }
}
