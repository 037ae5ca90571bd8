//! # Jobsight CLI (`jobsight`)
//!
//! ## Usage
//!
//! ```bash
//! jobsight --config ./config/jobsight.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `jobsight init` | Create the local cache database |
//! | `jobsight classify <line>...` | Classify job text (no config needed) |
//! | `jobsight status get <id>` | Show a job's PMS status |
//! | `jobsight status set <id> yes\|no` | Mark a job manually |
//! | `jobsight detect <id> <line>...` | Detect and record a job's status |
//! | `jobsight images get\|set <id>` | Read or replace image attachments |
//! | `jobsight cache clear` | Empty the local cache |
//! | `jobsight serve` | Start the HTTP API |
//!
//! Logs go to stderr; set `RUST_LOG` to change the level (default `info`).

use std::io::Read;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};

use jobsight::classifier::JobText;
use jobsight::config;
use jobsight::migrate;
use jobsight::models::JobImage;
use jobsight::server;
use jobsight::service::{StatusService, StatusView, UpdateOutcome};
use jobsight::sync::PushOutcome;

/// Jobsight: PMS detection and status sync for print-shop jobs.
#[derive(Parser)]
#[command(name = "jobsight", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/jobsight.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the local cache database. Safe to run repeatedly.
    Init,

    /// Classify job text without recording anything.
    ///
    /// Each positional argument is one job line. With no lines and no
    /// comment, lines are read from stdin.
    Classify {
        lines: Vec<String>,

        /// Order comment, classified as one more unit.
        #[arg(long)]
        comment: Option<String>,

        /// Show which patterns matched for every unit.
        #[arg(long)]
        explain: bool,
    },

    /// Read or write a job's PMS status.
    Status {
        #[command(subcommand)]
        action: StatusAction,
    },

    /// Classify a job's text and record the result.
    ///
    /// Without `--auto` this is a passive scan and a manual mark is kept.
    Detect {
        /// Job id or job page URL.
        id: String,

        lines: Vec<String>,

        #[arg(long)]
        comment: Option<String>,

        /// Replace a manual mark with the detected value.
        #[arg(long)]
        auto: bool,
    },

    /// Read or replace a job's image attachments.
    Images {
        #[command(subcommand)]
        action: ImagesAction,
    },

    /// Manage the local cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Start the HTTP API.
    Serve,
}

#[derive(Subcommand)]
enum StatusAction {
    Get {
        id: String,

        /// Re-read the remote store even on a cache hit.
        #[arg(long)]
        refresh: bool,
    },
    Set {
        id: String,
        mark: Mark,

        /// Record as a detection rather than a manual override.
        #[arg(long)]
        detected: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Mark {
    Yes,
    No,
}

#[derive(Subcommand)]
enum ImagesAction {
    Get {
        id: String,
    },
    Set {
        id: String,

        /// JSON file holding an array of `{url, caption, assetTag}`; `-` for stdin.
        #[arg(long)]
        from: PathBuf,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Classification needs no state; without a config file it uses the
    // built-in patterns. A config file that exists must still be valid.
    if let Commands::Classify {
        lines,
        comment,
        explain,
    } = &cli.command
    {
        let cfg = if cli.config.exists() {
            config::load_config(&cli.config)?
        } else {
            config::Config::minimal()
        };
        return classify(&cfg, lines, comment.as_deref(), *explain);
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Classify { .. } => unreachable!("handled above"),
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Cache database ready at {}", cfg.cache.path.display());
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        command => {
            let service = StatusService::open(&cfg).await?;
            let result = run_command(&service, command).await;
            service.close().await;
            result?;
        }
    }

    Ok(())
}

async fn run_command(service: &StatusService, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Status {
            action: StatusAction::Get { id, refresh },
        } => {
            let view = if refresh {
                service.refresh_status(&id).await?
            } else {
                service.get_status(&id).await?
            };
            print_view(&view);
        }
        Commands::Status {
            action: StatusAction::Set { id, mark, detected },
        } => {
            let has_pms = matches!(mark, Mark::Yes);
            let outcome = service.set_status(&id, has_pms, !detected).await?;
            if let Some(note) = &outcome.note {
                println!("{}", note);
            }
            print_outcome(&outcome);
        }
        Commands::Detect {
            id,
            lines,
            comment,
            auto,
        } => {
            let job = job_text(lines, comment)?;
            let outcome = if auto {
                service.auto_detect(&id, &job).await?
            } else {
                service.scan(&id, &job).await?
            };
            println!("{}", outcome.comment);
            print_outcome(&outcome.update);
        }
        Commands::Images {
            action: ImagesAction::Get { id },
        } => match service.get_images(&id).await? {
            Some(images) => println!("{}", serde_json::to_string_pretty(&images)?),
            None => println!("No images recorded for job {}", id),
        },
        Commands::Images {
            action: ImagesAction::Set { id, from },
        } => {
            let raw = if from.as_os_str() == "-" {
                read_stdin()?
            } else {
                std::fs::read_to_string(&from)
                    .with_context(|| format!("Failed to read {}", from.display()))?
            };
            let images: Vec<JobImage> =
                serde_json::from_str(&raw).context("Images must be a JSON array")?;
            let count = images.len();
            let outcome = service.set_images(&id, images).await?;
            println!("Saved {} image(s) for job {}", count, id);
            print_sync(&outcome.push);
        }
        Commands::Cache {
            action: CacheAction::Clear,
        } => {
            let removed = service.clear_local_cache().await?;
            println!("Cleared {} cached job(s)", removed);
        }
        Commands::Init | Commands::Classify { .. } | Commands::Serve => {}
    }
    Ok(())
}

fn classify(
    cfg: &config::Config,
    lines: &[String],
    comment: Option<&str>,
    explain: bool,
) -> anyhow::Result<()> {
    let classifier = cfg.classifier.build()?;
    let job = job_text(lines.to_vec(), comment.map(str::to_string))?;

    if explain {
        for (i, line) in job.lines.iter().enumerate() {
            let verdict = classifier.explain(line);
            println!(
                "line {}: {} include={:?} exclude={:?}",
                i, verdict.classification, verdict.inclusion_hits, verdict.exclusion_hits
            );
        }
        if let Some(c) = &job.comment {
            let verdict = classifier.explain(c);
            println!(
                "comment: {} include={:?} exclude={:?}",
                verdict.classification, verdict.inclusion_hits, verdict.exclusion_hits
            );
        }
    }

    let detection = classifier.detect(&job);
    println!("{}", detection.classification);
    println!("{}", detection.comment());
    Ok(())
}

fn job_text(lines: Vec<String>, comment: Option<String>) -> anyhow::Result<JobText> {
    let lines = if lines.is_empty() && comment.is_none() {
        read_stdin()?
            .lines()
            .map(str::to_string)
            .filter(|l| !l.trim().is_empty())
            .collect()
    } else {
        lines
    };
    Ok(JobText { lines, comment })
}

fn read_stdin() -> anyhow::Result<String> {
    let mut buf = String::new();
    std::io::stdin()
        .read_to_string(&mut buf)
        .context("Failed to read stdin")?;
    Ok(buf)
}

fn print_view(view: &StatusView) {
    let source = view.source.map(|s| s.as_str()).unwrap_or("none");
    match view.updated_at {
        Some(at) => println!(
            "job {}: {} (source: {}, updated {})",
            view.job_id,
            view.classification,
            source,
            at.to_rfc3339()
        ),
        None => println!("job {}: {} (no data)", view.job_id, view.classification),
    }
    if view.needs_detection {
        println!("Run `jobsight detect {}` to classify it.", view.job_id);
    }
}

fn print_outcome(outcome: &UpdateOutcome) {
    print_view(&outcome.status);
    if outcome.suppressed {
        println!("Manual mark kept; detection not applied.");
    }
    print_sync(&outcome.push);
}

fn print_sync(push: &PushOutcome) {
    match push {
        PushOutcome::Synced => println!("Synced to remote."),
        PushOutcome::Failed(e) => println!("Saved locally; remote sync failed: {}", e),
        PushOutcome::Disabled => println!("Saved locally (no remote configured)."),
        PushOutcome::Skipped => {}
    }
}
