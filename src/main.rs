//! outreach-controller: scheduled, rate-limited outreach dispatch
//!
//! Runs the scheduler loop and operator API (`serve`), or a single batch,
//! stats dump, or lead import from the command line.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use uuid::Uuid;

use outreach_controller::api::{create_router, ApiState};
use outreach_controller::config::ControllerConfig;
use outreach_controller::dispatch::mock::MockTransport;
use outreach_controller::dispatch::{
    Admission, DispatchRequest, DispatchRunner, RelayClient, ReplyPoller, TemplateDrafter,
    Transport, Trigger,
};
use outreach_controller::queue::Lead;
use outreach_controller::store::DataDirLock;
use outreach_controller::{
    Clock, FileScheduleProvider, Ledger, RecipientQueue, ScheduleProvider, SchedulerLoop,
    SendHistory, SystemClock,
};

#[derive(Parser)]
#[command(name = "outreach-controller")]
#[command(about = "Scheduled outreach dispatch with an append-only send ledger")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "outreach-controller.toml")]
    config: String,

    /// Data directory (overrides config file)
    #[arg(short, long, env = "OUTREACH_DATA_DIR")]
    data_dir: Option<String>,

    /// Operator API port (overrides config file)
    #[arg(long, env = "OUTREACH_HTTP_PORT")]
    port: Option<u16>,

    /// Record TEST entries instead of sending
    #[arg(long, global = true)]
    test: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler loop and operator API (default)
    Serve,

    /// Send one batch now and exit
    Dispatch {
        /// Maximum successful sends
        #[arg(long, default_value_t = 5)]
        limit: u32,

        /// Seconds between sends (defaults to the schedule's delay)
        #[arg(long)]
        delay: Option<u64>,

        /// Ignore business hours
        #[arg(long)]
        force: bool,

        /// Skip polling for replies first
        #[arg(long)]
        skip_reply_check: bool,
    },

    /// Print ledger statistics and follow-ups
    Stats {
        /// Age in days before a sent message needs a follow-up
        #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(i64).range(0..=3650))]
        follow_up_days: i64,
    },

    /// Import leads from a JSON array file
    Import { file: PathBuf },
}

/// Stores and collaborators shared by every subcommand.
struct Components {
    clock: Arc<dyn Clock>,
    ledger: Arc<Ledger>,
    queue: Arc<RecipientQueue>,
    schedule: Arc<dyn ScheduleProvider>,
    runner: Arc<DispatchRunner>,
    test_mode: bool,
}

fn build(config: &ControllerConfig, force_test: bool) -> anyhow::Result<Components> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let ledger = Arc::new(
        Ledger::open(
            config.storage.ledger_path(),
            clock.clone(),
            config.dispatch.bypass_recipients.clone(),
        )
        .context("Failed to open ledger")?,
    );
    let queue = Arc::new(RecipientQueue::new(config.storage.queue_path(), clock.clone()));
    let schedule: Arc<dyn ScheduleProvider> =
        Arc::new(FileScheduleProvider::new(config.storage.schedule_path()));

    let relay = RelayClient::from_config(&config.transport).context("Failed to build relay client")?;
    let mut test_mode = force_test || config.dispatch.test_mode;

    let (transport, poller): (Arc<dyn Transport>, Option<Arc<dyn ReplyPoller>>) = match relay {
        Some(client) => {
            info!(relay = ?config.transport.relay_url, "Using mail relay");
            let transport: Arc<dyn Transport> = Arc::new(client.clone());
            let poller: Arc<dyn ReplyPoller> = Arc::new(client);
            (transport, Some(poller))
        }
        None => {
            warn!("No relay_url configured, running in test mode");
            test_mode = true;
            (Arc::new(MockTransport::new()), None)
        }
    };

    let mut runner = DispatchRunner::new(
        ledger.clone(),
        queue.clone(),
        Arc::new(TemplateDrafter::new(&config.drafting)),
        transport,
        schedule.clone(),
        clock.clone(),
    )
    .with_queue(queue.clone());
    if let Some(poller) = poller {
        runner = runner.with_reply_poller(poller);
    }

    Ok(Components {
        clock,
        ledger,
        queue,
        schedule,
        runner: Arc::new(runner),
        test_mode,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("outreach_controller=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    info!("Config file: {}", cli.config);
    let mut config = ControllerConfig::load(std::path::Path::new(&cli.config))?;

    // Apply CLI overrides
    if let Some(data_dir) = cli.data_dir {
        config.storage.data_dir = PathBuf::from(data_dir);
    }
    if let Some(port) = cli.port {
        config.api.http_port = port;
    }
    info!("Data dir: {}", config.storage.data_dir.display());

    let command = cli.command.unwrap_or(Command::Serve);

    // Only one process may write the ledger and queue at a time
    let _lock = match command {
        Command::Stats { .. } => None,
        _ => Some(DataDirLock::acquire(&config.storage.data_dir).with_context(|| {
            format!(
                "Another outreach-controller is using {}; stop it or use its operator API",
                config.storage.data_dir.display()
            )
        })?),
    };

    let components = build(&config, cli.test)?;

    match command {
        Command::Serve => serve(config, components).await,
        Command::Dispatch {
            limit,
            delay,
            force,
            skip_reply_check,
        } => {
            let schedule = components.schedule.load()?;
            let request = DispatchRequest::new(limit)
                .with_delay(Duration::from_secs(delay.unwrap_or(schedule.delay_seconds)))
                .with_force(force)
                .with_reply_check(!skip_reply_check)
                .with_test_mode(components.test_mode);

            let report = components
                .runner
                .run(Uuid::new_v4(), Trigger::Cli, request)
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Stats { follow_up_days } => {
            let output = serde_json::json!({
                "stats": components.ledger.stats().await,
                "templates": components.ledger.template_stats().await,
                "follow_ups": components.ledger.pending_follow_ups(follow_up_days).await,
                "queue": components.queue.stats().await?,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Command::Import { file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let leads: Vec<Lead> = serde_json::from_str(&content)
                .with_context(|| format!("Expected a JSON array of leads in {}", file.display()))?;
            let summary = components.queue.import_many(leads).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
    }
}

async fn serve(config: ControllerConfig, components: Components) -> anyhow::Result<()> {
    let reconciled = components.queue.reconcile(&components.ledger).await?;
    if reconciled > 0 {
        info!(reconciled, "Queue reconciled from ledger");
    }

    let admission = Arc::new(Admission::new(components.runner.clone()));

    let scheduler = Arc::new(
        SchedulerLoop::new(
            components.schedule.clone(),
            components.ledger.clone(),
            admission.clone(),
            components.clock.clone(),
            config.scheduler.clone(),
        )
        .with_test_mode(components.test_mode),
    );
    let status = scheduler.status_handle();
    let scheduler_handle = scheduler.spawn();

    let mut dispatch_config = config.dispatch.clone();
    dispatch_config.test_mode = components.test_mode;

    let state = Arc::new(ApiState {
        ledger: components.ledger.clone(),
        queue: components.queue.clone(),
        schedule: components.schedule.clone(),
        admission: admission.clone(),
        history: Arc::new(SendHistory::new(
            config.storage.history_path(),
            components.clock.clone(),
        )),
        scheduler: status,
        clock: components.clock.clone(),
        dispatch: dispatch_config,
    });
    let app = create_router(state);

    let ip: std::net::IpAddr = config
        .api
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.api.bind))?;
    let addr = SocketAddr::new(ip, config.api.http_port);
    info!("Operator API listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    scheduler_handle.stop().await;
    let grace = Duration::from_secs(config.scheduler.shutdown_grace_secs);
    if admission.shutdown(grace).await {
        warn!("Active dispatch was aborted; its remaining recipients stay pending");
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
