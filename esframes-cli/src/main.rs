use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "esframes")]
#[command(about = "Elasticsearch aggregation query compiler and response decoder")]
#[command(version)]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value = "pretty", env = "LOG_FORMAT", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the multi-search NDJSON body for a set of queries
    Build {
        /// JSON array of queries
        #[arg(short, long)]
        queries: PathBuf,

        /// Range start (epoch ms or RFC 3339), overrides the queries' timeRange
        #[arg(long)]
        from: Option<String>,

        /// Range end (epoch ms or RFC 3339)
        #[arg(long)]
        to: Option<String>,

        /// Datasource configuration (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Reconstruct bucket and metric lists from a raw DSL request body
    ParseRaw {
        /// Raw request body (JSON)
        #[arg(short, long)]
        dsl: PathBuf,
    },

    /// Run queries against a recorded multi-search response and print frames
    Replay {
        /// JSON array of queries
        #[arg(short, long)]
        queries: PathBuf,

        /// Recorded multi-search response body
        #[arg(short, long)]
        response: PathBuf,

        /// Range start (epoch ms or RFC 3339)
        #[arg(long)]
        from: Option<String>,

        /// Range end (epoch ms or RFC 3339)
        #[arg(long)]
        to: Option<String>,

        /// Datasource configuration (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Keep bucket labels on series instead of folding them into names
        #[arg(long)]
        keep_labels: bool,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
    );
    let registry = tracing_subscriber::registry().with(filter);

    // stdout carries command output
    match format {
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::Build {
            queries,
            from,
            to,
            config,
        } => {
            let range = commands::TimeRangeArgs::new(from, to);
            commands::run_build(&queries, &range, config.as_deref())?;
        }
        Commands::ParseRaw { dsl } => {
            commands::run_parse_raw(&dsl)?;
        }
        Commands::Replay {
            queries,
            response,
            from,
            to,
            config,
            keep_labels,
        } => {
            let range = commands::TimeRangeArgs::new(from, to);
            commands::run_replay(&queries, &response, &range, config.as_deref(), keep_labels).await?;
        }
    }

    Ok(())
}
