//! Choir CLI: the main entry point.
//!
//! Commands:
//! - `ask`: Run one Chorus Cycle on a prompt
//! - `serve`: Start the HTTP/WebSocket gateway
//! - `config`: Print the default configuration
//! - `doctor`: Diagnose configuration and service health

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "choir",
    about = "Choir — multi-stage reasoning over your conversation history",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the Chorus Cycle on a single prompt
    Ask {
        /// The prompt to reason about
        prompt: String,

        /// Thread to attach persisted messages to (generated if omitted)
        #[arg(short, long)]
        thread: Option<String>,

        /// Override the maximum number of Action→Update passes
        #[arg(long)]
        max_loops: Option<u32>,

        /// Print every effect as JSON instead of progress output
        #[arg(long)]
        json: bool,
    },

    /// Start the HTTP/WebSocket gateway
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print the default configuration file
    Config,

    /// Diagnose system health
    Doctor,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.log_json {
        builder.json().init();
    } else {
        builder.init();
    }

    match cli.command {
        Commands::Ask {
            prompt,
            thread,
            max_loops,
            json,
        } => {
            commands::ask::run(commands::ask::AskOptions {
                prompt,
                thread,
                max_loops,
                json,
            })
            .await?
        }
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Config => commands::config_cmd::run()?,
        Commands::Doctor => commands::doctor::run().await?,
    }

    Ok(())
}
