use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info, warn};

use conductor_core::config::AppConfig;
use conductor_core::logging::init_logging;
use conductor_domain::entities::NewTask;

mod app;
mod shutdown;

use app::Application;
use shutdown::ShutdownManager;

#[derive(Parser)]
#[command(
    name = "conductor",
    version,
    about = "Resilient multi-agent task orchestration with tiered provider routing"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(short = 'l', long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the agent fleet and the recovery monitor (the default)
    Run {
        /// Number of agent loops, overriding the configured count
        #[arg(long)]
        agents: Option<usize>,

        /// Database URL, overriding the configured one
        #[arg(long, value_name = "URL")]
        database_url: Option<String>,
    },
    /// Insert a task into the queue
    Enqueue {
        #[arg(long)]
        title: String,

        #[arg(long)]
        prompt: String,

        /// Task type hint for tier-1 provider affinity
        #[arg(long)]
        task_type: Option<String>,

        /// Priority rank; lower runs first
        #[arg(long, default_value_t = 100)]
        rank: i32,
    },
    /// Print agent, queue and provider-tier status
    Status {
        /// Number of recent events to include
        #[arg(long, default_value_t = 20)]
        events: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config =
        AppConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.json_logs {
        config.logging.json = true;
    }
    init_logging(&config.logging)?;

    match cli.command.unwrap_or(Command::Run {
        agents: None,
        database_url: None,
    }) {
        Command::Run {
            agents,
            database_url,
        } => {
            if let Some(agents) = agents {
                config.worker.agents = agents;
            }
            if let Some(url) = database_url {
                config.database.url = url;
            }
            config.validate().map_err(anyhow::Error::from)?;
            run(config).await
        }
        Command::Enqueue {
            title,
            prompt,
            task_type,
            rank,
        } => {
            let app = Application::new(config).await?;
            let mut task = NewTask::new(title, prompt, rank);
            if let Some(task_type) = task_type {
                task = task.with_task_type(task_type);
            }
            let task = app.enqueue(task).await?;
            println!("{}", serde_json::to_string_pretty(&task)?);
            Ok(())
        }
        Command::Status { events } => {
            let app = Application::new(config).await?;
            let service = app.status_service();
            let overview = service.overview().await?;
            let recent = service.recent_events(events).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "overview": overview,
                    "events": recent,
                }))?
            );
            Ok(())
        }
    }
}

async fn run(config: AppConfig) -> Result<()> {
    info!("starting conductor");

    let app = Application::new(config).await?;
    let shutdown_manager = ShutdownManager::new();

    let app_handle = {
        let app = Arc::new(app);
        let shutdown_rx = shutdown_manager.subscribe().await;

        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown_rx).await {
                error!(error = %e, "application run failed");
            }
        })
    };

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping components");
    shutdown_manager.shutdown().await;

    match tokio::time::timeout(Duration::from_secs(30), app_handle).await {
        Ok(result) => {
            if let Err(e) = result {
                error!(error = %e, "error during shutdown");
            } else {
                info!("conductor stopped cleanly");
            }
        }
        Err(_) => {
            warn!("shutdown timed out, exiting anyway");
        }
    }

    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received Ctrl+C");
        },
        _ = terminate => {
            info!("received SIGTERM");
        },
    }
}
