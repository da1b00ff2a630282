use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::info;

use trainwatch::api::{
    self, ConfigWriteRequest, ErrorResponse, PurgeRequest, QueryRequest,
};
use trainwatch::args::CommonArgs;
use trainwatch::dynconfig::{ConfigFileState, DynConfigStore};
use trainwatch::store::{MetricStore, SqliteMetricStore};
use trainwatch::stream::StreamRequest;
use trainwatch::{TrainwatchError, logging};

#[derive(Parser, Debug)]
#[command(author, version, about = "Observe training metrics and retune running jobs", long_about = None)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Query a window of metrics and print the reshaped series as JSON
    Query {
        /// Training job identifier
        #[arg(short, long)]
        job: String,

        /// Metric type to query
        #[arg(short = 't', long, default_value = "loss")]
        metric_type: String,

        /// Maximum rows to fetch (rows, not steps)
        #[arg(short, long, default_value_t = 1000)]
        limit: u32,

        /// Lower step bound (inclusive)
        #[arg(long, default_value_t = 0)]
        from_step: i64,

        /// Upper step bound (inclusive)
        #[arg(long)]
        to_step: Option<i64>,
    },

    /// Delete metric rows for a job, by age or entirely
    Purge {
        /// Training job identifier
        #[arg(short, long)]
        job: String,

        /// Delete rows older than this many days
        #[arg(long, default_value_t = 30, conflicts_with = "all")]
        older_than_days: u32,

        /// Delete every row for the job
        #[arg(long)]
        all: bool,
    },

    /// Follow a job's metrics live, printing one event per line
    Watch {
        /// Training job identifier
        #[arg(short, long)]
        job: String,

        /// Metric type to follow
        #[arg(short = 't', long, default_value = "loss")]
        metric_type: String,

        /// Starting cursor: highest step already seen
        #[arg(long, default_value_t = 0)]
        from_step: i64,
    },

    /// Inspect or update per-job dynamic configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// List jobs under the training root and whether each has a config
    List,

    /// Show a job's current dynamic config
    Get {
        /// Training job name
        job: String,
    },

    /// Set one config key (positive integer, or "none" to unset)
    Set {
        /// Training job name
        job: String,

        /// One of: sample_every, save_every, log_every
        key: String,

        /// Positive integer, or "none"/"unset" to defer to static config
        value: String,
    },
}

fn main() -> Result<()> {
    logging::init_dual_logging();

    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Query {
            job,
            metric_type,
            limit,
            from_step,
            to_step,
        } => {
            let store = SqliteMetricStore::open(&cli.common.db).await?;
            let request = QueryRequest {
                job_id: job,
                metric_type,
                limit,
                step_start: from_step,
                step_end: to_step,
            };
            print_outcome(api::handle_query(&store, &request).await)
        }

        Command::Purge {
            job,
            older_than_days,
            all,
        } => {
            let store = SqliteMetricStore::open(&cli.common.db).await?;
            let request = PurgeRequest {
                job_id: job,
                older_than_days: Some(older_than_days),
                all,
            };
            print_outcome(api::handle_purge(&store, &request).await)
        }

        Command::Watch {
            job,
            metric_type,
            from_step,
        } => {
            let store: Arc<dyn MetricStore> =
                Arc::new(SqliteMetricStore::open(&cli.common.db).await?);
            let request = StreamRequest {
                job_id: job.clone(),
                metric_type,
                last_step: from_step,
            };
            let mut events = api::handle_stream(store, request)?;
            info!("Watching job '{}', Ctrl-C to stop", job);

            loop {
                tokio::select! {
                    _ = signal::ctrl_c() => break,
                    event = events.recv() => match event {
                        Some(event) => println!("{}", serde_json::to_string(&event)?),
                        None => break,
                    },
                }
            }
            Ok(())
        }

        Command::Config { command } => {
            let config_store = DynConfigStore::new(&cli.common.training_root);
            run_config(&config_store, command).await
        }
    }
}

async fn run_config(config_store: &DynConfigStore, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::List => {
            let jobs = config_store.list_jobs()?;
            if jobs.is_empty() {
                println!("No training jobs found under {}", config_store.root().display());
                return Ok(());
            }
            for (name, has_config) in jobs {
                let status = if has_config { "has config" } else { "no config" };
                println!("{name:<30} {status}");
            }
            Ok(())
        }

        ConfigCommand::Get { job } => {
            let response = api::handle_config_read(config_store, &job)?;
            if response.state == ConfigFileState::Unreadable {
                eprintln!("warning: config file exists but is unreadable, showing defaults");
            }
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }

        ConfigCommand::Set { job, key, value } => {
            const VALID_KEYS: [&str; 3] = ["sample_every", "save_every", "log_every"];
            if !VALID_KEYS.contains(&key.as_str()) {
                anyhow::bail!(
                    "invalid config key '{}', valid keys: {}",
                    key,
                    VALID_KEYS.join(", ")
                );
            }

            // The patch deserializer handles integers and the unset spellings
            let mut body = serde_json::Map::new();
            body.insert("job_name".to_string(), serde_json::Value::String(job));
            body.insert(key, serde_json::Value::String(value));
            let request: ConfigWriteRequest =
                serde_json::from_value(serde_json::Value::Object(body))?;
            print_outcome(api::handle_config_write(config_store, &request).await)
        }
    }
}

/// Print the structured success or failure response and set the exit status
fn print_outcome<T: serde::Serialize>(
    outcome: Result<T, TrainwatchError>,
) -> Result<()> {
    match outcome {
        Ok(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Err(err) => {
            let response = ErrorResponse::from(&err);
            println!("{}", serde_json::to_string_pretty(&response)?);
            Err(err.into())
        }
    }
}
