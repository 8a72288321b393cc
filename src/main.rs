use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::io::BufReader;
use tracing::info;

use hama::config::Settings;
use hama::constants;
use hama::{chat, web_server};

// Define the command-line interface structure using clap
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

// Define the available subcommands
#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the chat web UI.
    Serve {
        #[arg(long, env = "HAMA_PORT", default_value_t = constants::DEFAULT_PORT, help = "Port for the web server.")]
        port: u16,
        #[arg(long, default_value = "templates", help = "Directory holding the page templates.")]
        templates_dir: PathBuf,
        #[arg(long, default_value = "static", help = "Directory served under /static.")]
        static_dir: PathBuf,
        #[arg(long, default_value = constants::DEFAULT_PAGE_TITLE, help = "Page title.")]
        title: String,
        #[command(flatten)]
        settings: Settings,
    },
    /// Chat with HAMA from the terminal.
    Chat {
        #[command(flatten)]
        settings: Settings,
    },
}

// The main entry point of the application, using tokio's async runtime
#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (for OPENAI_API_KEY and relay overrides)
    dotenvy::dotenv().ok();

    // Reads log level from RUST_LOG environment variable (e.g., RUST_LOG=info,hama=debug)
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    info!("HAMA starting with command: {:?}", cli.command);

    match cli.command {
        Commands::Serve {
            port,
            templates_dir,
            static_dir,
            title,
            settings,
        } => {
            let handler = settings
                .build_turn_handler()
                .context("Failed to configure the turn handler")?;
            let config = web_server::WebConfig {
                port,
                templates_dir,
                static_dir,
                title,
            };
            web_server::start_web_server(config, handler).await?;
            info!("Shutdown complete.");
        }
        Commands::Chat { settings } => {
            let handler = settings
                .build_turn_handler()
                .context("Failed to configure the turn handler")?;
            let stdin = BufReader::new(tokio::io::stdin());
            chat::run_chat(&handler, stdin, tokio::io::stdout())
                .await
                .context("Chat session failed")?;
        }
    }

    Ok(())
}
