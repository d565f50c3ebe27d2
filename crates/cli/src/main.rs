//! FieldSage CLI: the main entry point.
//!
//! Commands:
//! - `serve`: Start the HTTP gateway
//! - `ask`: Answer one request file and stream the answer to stdout
//! - `schema`: Print the JSON Schema for an output shape
//! - `config`: Print, locate or validate configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use fieldsage_core::schema::SchemaKind;

mod commands;

#[derive(Parser)]
#[command(
    name = "fieldsage",
    about = "FieldSage — streaming, schema-validated answers for loan application fields",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file to load instead of ~/.fieldsage/config.toml
    #[arg(short, long, global = true, env = "FIELDSAGE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Answer a request read from a JSON file (`-` for stdin)
    Ask {
        /// Path to an AnswerRequest JSON document
        request: PathBuf,

        /// Print structured events as JSON lines instead of plain text
        #[arg(long)]
        events: bool,

        /// Override the request's output schema
        #[arg(long)]
        schema: Option<SchemaKind>,
    },

    /// Print the JSON Schema sent to providers for an output shape
    Schema {
        /// `plain` or `with_assumptions`
        #[arg(default_value = "plain")]
        kind: SchemaKind,
    },

    /// Configuration management (prints the default config when no action is given)
    Config {
        #[command(subcommand)]
        action: Option<commands::config_cmd::ConfigAction>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout carries only answers.
    let filter = if cli.verbose { "debug" } else { "info" };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Serve { port } => commands::serve::run(config_path, port).await?,
        Commands::Ask {
            request,
            events,
            schema,
        } => commands::ask::run(config_path, &request, events, schema).await?,
        Commands::Schema { kind } => commands::schema::run(kind)?,
        Commands::Config { action } => commands::config_cmd::run(config_path, action).await?,
    }

    Ok(())
}
