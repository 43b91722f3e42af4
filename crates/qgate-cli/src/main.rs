//! qgate - query gateway entrypoint
//!
//! `serve` runs the HTTP API with an embedded job consumer; `worker` runs only
//! the consumer against shared queue and job backends.

mod commands;
mod config;
mod gateway;

use clap::{Parser, Subcommand};
use commands::{ServeCommand, WorkerCommand};
use tracing_subscriber::{layer::SubscriberExt, Layer};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "QGATE_LOG_LEVEL", global = true)]
    log_level: String,

    /// Log format: compact, full
    #[arg(
        long,
        default_value = "compact",
        env = "QGATE_LOG_FORMAT",
        global = true
    )]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve(ServeCommand),
    /// Consume queued jobs without serving HTTP
    Worker(WorkerCommand),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG takes full control when set
    let filter = match std::env::var("RUST_LOG") {
        Ok(_) => tracing_subscriber::EnvFilter::try_from_default_env()?,
        Err(_) => tracing_subscriber::EnvFilter::try_new(format!(
            "qgate={level},\
             qgate_cli={level},\
             qgate_core={level},\
             qgate_query={level},\
             qgate_query_postgres={level},\
             qgate_queue={level},\
             qgate_jobs={level},\
             qgate_api={level},\
             tower_http={level},\
             tokio_postgres=warn,\
             redis=warn,\
             h2=warn,\
             tower=warn,\
             hyper=warn",
            level = cli.log_level
        ))?,
    };

    let fmt_layer = match cli.log_format.as_str() {
        "full" => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
        _ => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
    };

    let subscriber = tracing_subscriber::registry().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Serve(serve_cmd) => serve_cmd.execute(),
        Commands::Worker(worker_cmd) => worker_cmd.execute(),
    }
}
