//! # Main — CLI Entry Point
//!
//! Routes CLI subcommands to the engine. `serve` runs the HTTP API plus the
//! periodic finalize-and-sweep loop; the remaining subcommands are one-shot
//! operator tools against the same database.
//!
//! ## Global Options
//!
//! - `--database-url` / `DATABASE_URL`: PostgreSQL connection.
//! - `--config`: optional TOML file overriding award amounts, the referral
//!   share, window cadence, and sweep policy.
//! - `LOG_FORMAT=json`: structured JSON logs for container deployments.

use anyhow::Result;
use beamline::achievements::AchievementKind;
use beamline::config::EngineConfig;
use beamline::ledger::PointsSource;
use beamline::notify::BufferedSink;
use beamline::orchestrator::Engine;
use beamline::{api, db, finalizer::SweepOutcome, Segment};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "beamline", about = "Points, leveling, leaderboard and achievement engine")]
struct Cli {
    /// PostgreSQL connection URL (or set DATABASE_URL env var)
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Path to a TOML config file (defaults apply when omitted)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API and the periodic finalize-and-sweep loop
    Serve {
        /// Bind address for the API server
        #[arg(long, default_value = "0.0.0.0:7410")]
        bind: String,
        /// Seconds between sweep passes
        #[arg(long, default_value_t = 300)]
        sweep_interval_secs: u64,
    },
    /// One-shot: finalize ended windows and run the achievement sweep
    Sweep {
        /// Restrict to one segment (default: all)
        #[arg(long)]
        segment: Option<String>,
    },
    /// Award beams to a user
    Award {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        points: i64,
        /// Grant source slug, e.g. content-completion
        #[arg(long)]
        source: String,
        #[arg(long)]
        description: String,
        #[arg(long, default_value = "general")]
        segment: String,
    },
    /// Show a user's balance, level, and recent history
    Balance {
        #[arg(long)]
        user: Uuid,
    },
    /// Print the current leaderboard window for a segment
    Leaderboard {
        #[arg(long, default_value = "general")]
        segment: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Print the achievement catalog
    Achievements,
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    // Initialize structured logging: LOG_FORMAT=json for K8s, human-readable otherwise
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt().json().with_target(false).init();
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    let rt = tokio::runtime::Runtime::new()?;
    match &cli.command {
        Commands::Serve {
            bind,
            sweep_interval_secs,
        } => {
            let interval = std::time::Duration::from_secs(*sweep_interval_secs);
            rt.block_on(async {
                let (engine, database, sink) = connect_engine(&cli, config).await?;
                let state = api::AppState::with_engine(engine, Some(database), sink);
                api::run(state, bind, interval).await
            })
        }
        Commands::Sweep { segment } => rt.block_on(async {
            let (engine, _, _) = connect_engine(&cli, config).await?;
            let segments = match segment {
                Some(s) => vec![Segment::from_str(s)?],
                None => Segment::ALL.to_vec(),
            };
            let now = Utc::now();
            for segment in segments {
                let finalized = engine.finalizer.finalize_due_windows(segment, now).await?;
                let outcome = engine.finalizer.sweep_achievements(segment, now).await?;
                match outcome {
                    SweepOutcome::Swept {
                        champions, top_ten, ..
                    } => println!(
                        "{}: finalized {}, granted {} champion + {} top-ten badges",
                        segment, finalized, champions, top_ten
                    ),
                    SweepOutcome::InsufficientParticipants { participants, .. } => println!(
                        "{}: finalized {}, sweep skipped ({} participants)",
                        segment, finalized, participants
                    ),
                    SweepOutcome::AlreadyCalculated { .. } => {
                        println!("{}: finalized {}, sweep already done", segment, finalized)
                    }
                    SweepOutcome::NothingToSweep => {
                        println!("{}: finalized {}, nothing to sweep", segment, finalized)
                    }
                }
            }
            Ok(())
        }),
        Commands::Award {
            user,
            points,
            source,
            description,
            segment,
        } => rt.block_on(async {
            let (engine, _, _) = connect_engine(&cli, config).await?;
            let outcome = engine
                .orchestrator
                .award_points(
                    *user,
                    *points,
                    PointsSource::from_str(source)?,
                    description,
                    Segment::from_str(segment)?,
                    Utc::now(),
                )
                .await?;
            println!(
                "{} now has {} beams (level {} {}{})",
                user,
                outcome.balance.total_points,
                outcome.new_level.level_number,
                outcome.new_level.name,
                if outcome.leveled_up { ", leveled up!" } else { "" }
            );
            Ok(())
        }),
        Commands::Balance { user } => rt.block_on(async {
            let (engine, _, _) = connect_engine(&cli, config).await?;
            match engine.balance.balance(*user).await? {
                Some(balance) => {
                    let level = engine.levels.get(balance.level_number);
                    println!(
                        "{}: {} beams, level {} ({})",
                        user,
                        balance.total_points,
                        balance.level_number,
                        level.map(|l| l.name.as_str()).unwrap_or("?"),
                    );
                    for entry in engine.ledger.history(*user, 10).await? {
                        println!(
                            "  {} {:>6} {} {}",
                            entry.created_at.format("%Y-%m-%d %H:%M"),
                            entry.points,
                            entry.source,
                            entry.description
                        );
                    }
                }
                None => println!("{}: no balance recorded", user),
            }
            Ok(())
        }),
        Commands::Leaderboard { segment, limit } => rt.block_on(async {
            let (engine, _, _) = connect_engine(&cli, config).await?;
            let segment = Segment::from_str(segment)?;
            let window = engine.board.current_window(Utc::now());
            println!(
                "{} leaderboard {} .. {}",
                segment,
                window.start.format("%Y-%m-%d"),
                window.end.format("%Y-%m-%d")
            );
            for entry in engine.board.top(&window, segment, *limit).await? {
                println!("  #{:<3} {} {} beams", entry.rank, entry.user_id, entry.points);
            }
            Ok(())
        }),
        Commands::Achievements => {
            for kind in AchievementKind::ALL {
                let spec = kind.spec();
                println!(
                    "{:<20} {:<18} target {:>3}, reward {:>4} beams — {}",
                    spec.slug, spec.title, spec.total_count, spec.beams_to_gain, spec.caption
                );
            }
            Ok(())
        }
    }
}

/// Connect to PostgreSQL, load the level ladder, and wire the engine.
async fn connect_engine(
    cli: &Cli,
    config: EngineConfig,
) -> Result<(Engine, db::Database, Arc<BufferedSink>)> {
    let database_url = cli.database_url.as_deref().ok_or_else(|| {
        anyhow::anyhow!("DATABASE_URL is required (set via --database-url or env)")
    })?;
    let database = db::Database::connect(database_url).await?;
    let levels = database.load_level_catalog().await?;
    let sink = Arc::new(BufferedSink::new());
    let engine = Engine::new(
        Arc::new(database.clone()),
        Arc::new(database.clone()),
        sink.clone(),
        levels,
        config,
    );
    Ok((engine, database, sink))
}
