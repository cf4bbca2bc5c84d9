//! IKON Queue Admin
//!
//! Operator tool for the pipeline job queues: inspect lengths, peek at jobs,
//! review the dead letter queue, enqueue by hand, and serve the health/admin
//! HTTP endpoints.

pub mod cli;

use axum::Router;
use cli::{Cli, Commands};
use core_config::server::ServerConfig;
use core_config::{app_info, Environment, FromEnv};
use eyre::{bail, eyre, Result, WrapErr};
use job_queue::{full_admin_router, HealthState, JobQueue, QueueConfig, DEAD_LETTER_QUEUE};
use serde_json::{Map, Value};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};

/// Run one CLI command.
pub async fn run(cli: Cli) -> Result<()> {
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    let config = QueueConfig::from_env().wrap_err("Failed to load queue configuration")?;
    let queue = JobQueue::connect(&config)
        .await
        .wrap_err("Failed to connect to the job queue")?;

    match cli.command {
        Commands::Stats => {
            let stats = queue.get_stats().await?;
            print_json(&serde_json::to_value(stats)?)?;
        }
        Commands::Length { queue: name } => {
            println!("{}", queue.length(&name).await?);
        }
        Commands::Peek { queue: name, count } => {
            let jobs = queue.peek(&name, count).await?;
            print_json(&serde_json::to_value(jobs)?)?;
        }
        Commands::Dlq { count } => {
            let jobs = queue.peek(DEAD_LETTER_QUEUE, count).await?;
            print_json(&serde_json::to_value(jobs)?)?;
        }
        Commands::Clear { queue: name, yes } => {
            if !yes {
                bail!("Refusing to clear '{}' without --yes", name);
            }
            let cleared = queue.clear_queue(&name).await?;
            println!("Cleared {} jobs from {}", cleared, queue.key(&name));
        }
        Commands::Enqueue {
            queue: name,
            idea_id,
            payload,
            dedupe_key,
            max_attempts,
        } => {
            let payload = parse_payload(&payload)?;
            let mut job = queue.create_job(idea_id, payload, dedupe_key);
            if let Some(max_attempts) = max_attempts {
                job = job.with_max_attempts(max_attempts);
            }
            queue.enqueue(&name, &job).await?;
            println!("{}", job.job_id);
        }
        Commands::Health => {
            if !queue.healthcheck().await {
                bail!("Redis at {} is not healthy", config.redis.url);
            }
            println!("ok");
        }
        Commands::Serve { port } => {
            let mut server = ServerConfig::from_env().wrap_err("Failed to load server configuration")?;
            if let Some(port) = port {
                server.port = port;
            }
            serve(queue, &server).await?;
        }
    }

    Ok(())
}

/// Serve health, queue monitoring and admin endpoints until SIGINT/SIGTERM.
async fn serve(queue: JobQueue, server: &ServerConfig) -> Result<()> {
    job_queue::init_metrics().wrap_err("Failed to install Prometheus recorder")?;

    let app_info = app_info!();
    info!(name = %app_info.name, version = %app_info.version, "Starting queue admin server");

    let state = HealthState::new(queue, app_info.name, app_info.version);
    let app: Router = full_admin_router(state);

    let addr = server.address();
    let listener = TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("Failed to bind admin server to {}", addr))?;

    info!(address = %addr, "Health and admin server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .wrap_err("Admin server failed")?;

    info!("Queue admin server stopped");
    Ok(())
}

fn parse_payload(raw: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw).wrap_err("Payload is not valid JSON")? {
        Value::Object(map) => Ok(map),
        other => Err(eyre!("Payload must be a JSON object, got {}", other)),
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        },
    }
}
