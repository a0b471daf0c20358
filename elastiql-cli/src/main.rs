use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "elastiql")]
#[command(about = "Translate Elasticsearch requests into PartiQL and engine results back into Elasticsearch JSON")]
#[command(version)]
struct Cli {
    /// Log level, overridden by RUST_LOG
    #[arg(long, global = true, env = "ELASTIQL_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format: pretty or json
    #[arg(long, global = true, env = "ELASTIQL_LOG_FORMAT")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the SQL statement for a _search body
    Translate {
        #[arg(short, long)]
        config: PathBuf,

        /// Index (tenant) name from the config
        #[arg(short, long)]
        index: String,

        /// Request body; stdin when omitted
        #[arg(long)]
        input: Option<PathBuf>,

        /// Single-line output
        #[arg(long)]
        compact: bool,
    },

    /// Rebuild the Elasticsearch response from an engine result
    Convert {
        #[arg(short, long)]
        config: PathBuf,

        #[arg(short, long)]
        index: String,

        /// The _search body the result answers
        #[arg(long)]
        request: PathBuf,

        /// Engine result as JSON
        #[arg(long)]
        result: PathBuf,
    },

    /// Print the SQL statement for a _count body
    Count {
        #[arg(short, long)]
        config: PathBuf,

        #[arg(short, long)]
        index: String,

        #[arg(long)]
        input: Option<PathBuf>,

        #[arg(long)]
        compact: bool,
    },

    /// Validate a config file and list its indices
    CheckConfig {
        #[arg(short, long)]
        config: PathBuf,
    },
}

impl Commands {
    fn config_path(&self) -> &PathBuf {
        match self {
            Commands::Translate { config, .. }
            | Commands::Convert { config, .. }
            | Commands::Count { config, .. }
            | Commands::CheckConfig { config } => config,
        }
    }
}

fn init_logging(level: &str, format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);
    if format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = commands::load_config(cli.command.config_path())?;

    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    let format = cli.log_format.as_deref().unwrap_or(&config.logging.format);
    init_logging(level, format);

    match cli.command {
        Commands::Translate {
            index,
            input,
            compact,
            ..
        } => commands::run_translate(&config, &index, input.as_deref(), !compact),
        Commands::Convert {
            index,
            request,
            result,
            ..
        } => commands::run_convert(&config, &index, &request, &result),
        Commands::Count {
            index,
            input,
            compact,
            ..
        } => commands::run_count(&config, &index, input.as_deref(), !compact),
        Commands::CheckConfig { config: path } => commands::run_check(&config, &path),
    }
}
