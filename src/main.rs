use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;
use log::debug;
use mimalloc::MiMalloc;

use lazyrows::error::ConfigurationError;
use lazyrows::params::Configurables;
use lazyrows::repo::{DataSource, PgSource, SqliteSource};

mod commands;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "lazyrows")]
#[command(version, about = "Guarded, retried, cached and batched reads over SQL databases", long_about = None)]
struct Cli {
    /// Database url (`sqlite://...` or `postgres://...`), overrides `DATABASE_URL`
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Rows per window, overrides `LAZYROWS_BATCH_SIZE`
    #[arg(long, global = true)]
    batch_size: Option<usize>,

    /// Retries after a failed query, overrides `LAZYROWS_MAX_RETRIES`
    #[arg(long, global = true)]
    max_retries: Option<u32>,

    /// Delay between attempts in milliseconds, overrides `LAZYROWS_RETRY_DELAY_MS`
    #[arg(long, global = true)]
    retry_delay_ms: Option<u64>,

    /// Print rows as JSON lines
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the `user_data` table and fill it with sample users
    Seed {
        /// CSV file (`name,email,age` header) or JSON array of users to insert instead of the samples
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Stream users one row at a time
    Stream {
        /// Stop after this many users
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Stream users in batches, keeping the ones older than `min_age`
    Batches {
        #[arg(long, default_value_t = 25)]
        min_age: i64,
    },
    /// Read users one page (and one connection) at a time
    Paginate,
    /// Average user age, streaming one row at a time
    AverageAge,
    /// Run a query twice (or more) through the result cache
    Fetch {
        /// Statement to execute
        sql: String,
        /// Positional parameter, can be repeated
        #[arg(long = "param")]
        params: Vec<String>,
        #[arg(long, default_value_t = 2)]
        repeat: usize,
    },
    /// Fetch all users and older users concurrently
    Concurrent {
        #[arg(long, default_value_t = 40)]
        min_age: i64,
    },
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), commands::CliError> {
    let mut configurables = Configurables::from_env()?;

    if let Some(batch_size) = cli.batch_size {
        configurables.config = configurables.config.with_batch_size(batch_size)?;
    }
    if let Some(max_retries) = cli.max_retries {
        configurables.config = configurables.config.with_max_retries(max_retries);
    }
    if let Some(delay) = cli.retry_delay_ms {
        configurables.config = configurables
            .config
            .with_retry_delay(Duration::from_millis(delay));
    }
    if let Some(url) = cli.database_url {
        configurables.database_url = url;
    }

    debug!("{:?}", configurables.config);

    let url = configurables.database_url.clone();
    if url.starts_with("sqlite:") {
        dispatch(SqliteSource::from_url(&url)?, &configurables, cli.json, cli.command).await
    } else if url.starts_with("postgres:") || url.starts_with("postgresql:") {
        dispatch(PgSource::from_url(&url)?, &configurables, cli.json, cli.command).await
    } else {
        Err(ConfigurationError::UnsupportedUrl(url).into())
    }
}

async fn dispatch<S: DataSource>(
    source: S,
    configurables: &Configurables,
    json: bool,
    command: Commands,
) -> Result<(), commands::CliError> {
    let out = commands::Output { json };

    match command {
        Commands::Seed { file } => commands::seed_database(&source, file.as_deref()).await,
        Commands::Stream { limit } => {
            let facade = commands::facade(source, configurables)?;
            commands::stream(&facade, limit, &out).await.map(|_| ())
        }
        Commands::Batches { min_age } => {
            let facade = commands::facade(source, configurables)?;
            commands::batches(&facade, min_age, &out).await
        }
        Commands::Paginate => {
            let facade = commands::facade(source, configurables)?;
            commands::paginate(&facade, &out).await
        }
        Commands::AverageAge => {
            let facade = commands::facade(source, configurables)?;
            commands::average_age(&facade, &out).await
        }
        Commands::Fetch {
            sql,
            params,
            repeat,
        } => {
            let facade = commands::facade(source, configurables)?;
            commands::fetch(&facade, &sql, &params, repeat, &out).await
        }
        Commands::Concurrent { min_age } => {
            let facade = commands::facade(source, configurables)?;
            commands::concurrent(&facade, min_age, &out).await
        }
    }
}
