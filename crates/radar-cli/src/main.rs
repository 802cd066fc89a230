use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use radar_engine::{RadarConfig, RadarEngine, RunState, Shutdown, TickOutcome};
use radar_storage::PgStore;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "radar-cli")]
#[command(about = "Talent Radar & Auto-Apply engine")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one full scan of every active alert and auto-apply candidate.
    Scan,
    /// Run scans on the configured interval or cron until interrupted.
    Schedule,
    /// Apply database migrations.
    Migrate,
    /// Serve the JSON API; also runs the scheduler when RADAR_SCHEDULER_ENABLED is set.
    Serve,
    /// Recompute cached match counts from the match table.
    Reconcile,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = RadarConfig::from_env().context("loading configuration")?;

    match cli.command.unwrap_or(Commands::Scan) {
        Commands::Scan => {
            let engine = RadarEngine::from_config(&config).await?;
            match engine.scheduler.tick().await {
                TickOutcome::Ran(summary) => {
                    println!(
                        "scan {}: run_id={} alerts={}/{} candidates={}/{} matches={} applications={} unit_failures={}",
                        match summary.state {
                            RunState::Aborted => "aborted",
                            _ => "complete",
                        },
                        summary.run_id,
                        summary.alerts_scanned,
                        summary.alerts_total,
                        summary.candidates_scanned,
                        summary.candidates_total,
                        summary.new_matches,
                        summary.new_applications,
                        summary.unit_failures.len()
                    );
                    if summary.state == RunState::Aborted {
                        anyhow::bail!(
                            "scan aborted: {}",
                            summary.abort_reason.unwrap_or_else(|| "unknown".into())
                        );
                    }
                }
                TickOutcome::Skipped => println!("scan skipped; another run is in progress"),
            }
        }
        Commands::Schedule => {
            let engine = RadarEngine::from_config(&config).await?;
            forward_shutdown(engine.shutdown.clone());
            engine
                .scheduler
                .clone()
                .run_until_shutdown(config.scan_interval, config.scan_cron.clone())
                .await?;
        }
        Commands::Migrate => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL is required for migrate")?;
            let store = PgStore::connect(url, 2).await.context("connecting to postgres")?;
            store.migrate().await.context("running migrations")?;
            println!("migrations applied");
        }
        Commands::Serve => {
            let engine = RadarEngine::from_config(&config).await?;
            forward_shutdown(engine.shutdown.clone());

            let scheduler = if config.scheduler_enabled {
                let scheduler = engine.scheduler.clone();
                let interval = config.scan_interval;
                let cron = config.scan_cron.clone();
                Some(tokio::spawn(async move { scheduler.run_until_shutdown(interval, cron).await }))
            } else {
                info!("scheduler disabled; scans run on demand only");
                None
            };

            radar_web::serve(engine, config.web_port).await?;
            if let Some(handle) = scheduler {
                handle.await.context("joining scheduler task")??;
            }
        }
        Commands::Reconcile => {
            let engine = RadarEngine::from_config(&config).await?;
            let corrections = engine.registry.reconcile_match_counts().await?;
            for c in &corrections {
                println!("alert {}: match_count {} -> {}", c.alert_id, c.recorded, c.actual);
            }
            println!("reconcile complete: corrected={}", corrections.len());
        }
    }

    Ok(())
}

/// Triggers `shutdown` on Ctrl-C or SIGTERM.
fn forward_shutdown(shutdown: Shutdown) {
    tokio::spawn(async move {
        let ctrl_c = async {
            let _ = tokio::signal::ctrl_c().await;
        };

        #[cfg(unix)]
        let terminate = async {
            use tokio::signal::unix::{signal, SignalKind};
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                let _ = sigterm.recv().await;
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
        warn!("shutdown signal received");
        shutdown.trigger();
    });
}
