use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveTime, Utc};
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use log::{info, warn};
use tokio::signal::unix::{signal, SignalKind};

use focusfence::{
    BlockedApp, Database, EnforcementController, EngineConfig, LogInterventionSink, LogStatusSink,
    RecentProcessProbe, SessionPhase, SettingsStore,
};

#[derive(Parser)]
#[command(name = "focusfence")]
#[command(about = "Time-boxed focus sessions that block distracting apps", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a focus session over the stored block list
    Run {
        /// Session length in minutes (defaults to the configured value)
        #[arg(short, long)]
        minutes: Option<u64>,
    },
    /// Add an app to the block list, or update its display name
    Add {
        package_id: String,
        /// Display name shown in listings; defaults to the package id
        app_name: Option<String>,
    },
    /// Remove an app from the block list
    Remove { package_id: String },
    /// Re-enable blocking for a listed app
    Enable { package_id: String },
    /// Keep an app listed but stop blocking it
    Disable { package_id: String },
    /// Show the stored block list
    List,
    /// Show focused time for the current week
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let cli = Cli::parse();

    let dirs = ProjectDirs::from("", "", "focusfence")
        .context("could not resolve a data directory for this user")?;
    let data_dir = dirs.data_dir().to_path_buf();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

    let db = Database::new(data_dir.join("focusfence.sqlite3"))?;
    let settings = SettingsStore::new(data_dir.join("settings.json"))?;

    // Close sessions a previous run left open; a restart is a fresh session.
    let closed = db.close_interrupted_sessions(Utc::now()).await?;
    if closed > 0 {
        warn!("closed {closed} interrupted session(s) from a previous run");
    }

    match cli.command {
        Commands::Run { minutes } => run_session(db, &settings, minutes).await,
        Commands::Add {
            package_id,
            app_name,
        } => {
            let app = BlockedApp {
                id: None,
                app_name: app_name.unwrap_or_else(|| package_id.clone()),
                package_id,
                is_active: true,
                created_at: Utc::now(),
            };
            db.upsert_blocked_app(&app).await?;
            println!("added {}", app.package_id);
            Ok(())
        }
        Commands::Remove { package_id } => {
            if db.remove_blocked_app(&package_id).await? {
                println!("removed {package_id}");
            } else {
                println!("{package_id} is not on the block list");
            }
            Ok(())
        }
        Commands::Enable { package_id } => {
            if db.set_blocked_app_active(&package_id, true).await? {
                println!("blocking enabled for {package_id}");
            } else {
                println!("{package_id} is not on the block list");
            }
            Ok(())
        }
        Commands::Disable { package_id } => {
            if db.set_blocked_app_active(&package_id, false).await? {
                println!("blocking disabled for {package_id}");
            } else {
                println!("{package_id} is not on the block list");
            }
            Ok(())
        }
        Commands::List => {
            let apps = db.list_blocked_apps().await?;
            if apps.is_empty() {
                println!("block list is empty");
            }
            for app in apps {
                let marker = if app.is_active { "blocked" } else { "inactive" };
                println!("{:<40} {:<24} {}", app.package_id, app.app_name, marker);
            }
            Ok(())
        }
        Commands::Stats => {
            let stats = db.weekly_focus_stats(week_start(Utc::now())).await?;
            println!(
                "focused {} min across {} finished session(s) since {}",
                stats.focused_ms / 60_000,
                stats.finished_sessions,
                stats.week_start.format("%Y-%m-%d"),
            );
            Ok(())
        }
    }
}

async fn run_session(db: Database, settings: &SettingsStore, minutes: Option<u64>) -> Result<()> {
    let engine = settings.engine();
    let target_ms = minutes.unwrap_or(engine.default_session_mins) * 60_000;
    let rules = db.blocked_apps_snapshot().await?;

    let controller = EnforcementController::new(
        db,
        Arc::new(RecentProcessProbe::new()),
        Arc::new(LogInterventionSink),
        Arc::new(LogStatusSink),
        EngineConfig::from(&engine),
    );
    controller.start_session(target_ms, rules).await?;

    // SIGUSR1 toggles pause/resume, SIGTERM or Ctrl-C stops: the stand-in
    // for the notification action buttons of the mobile build.
    let mut usr1 = signal(SignalKind::user_defined1())?;
    let mut term = signal(SignalKind::terminate())?;

    let summary = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break controller.stop().await,
            _ = term.recv() => break controller.stop().await,
            _ = usr1.recv() => {
                match controller.snapshot().await.phase {
                    SessionPhase::Running => controller.pause().await,
                    SessionPhase::Paused => controller.resume().await,
                    _ => {}
                }
            }
            summary = controller.wait() => break summary,
        }
    };

    match summary {
        Some(summary) => info!(
            "session {} {}: focused {}s of {}s, paused {}s",
            summary.session_id,
            summary.status.as_str(),
            summary.active_ms / 1_000,
            summary.target_ms / 1_000,
            summary.paused_ms / 1_000,
        ),
        None => warn!("session ended without a summary"),
    }

    Ok(())
}

fn week_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let days_from_monday = i64::from(now.weekday().num_days_from_monday());
    (now - ChronoDuration::days(days_from_monday))
        .date_naive()
        .and_time(NaiveTime::MIN)
        .and_utc()
}
