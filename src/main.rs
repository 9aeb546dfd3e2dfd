// src/main.rs

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use kinobot::application::{AppState, ErrorResponse, TerminalOperator};
use kinobot::db::{get_connection, get_database_stats};
use kinobot::domain::{MediaKind, Request};
use kinobot::integrations::TmdbClient;
use kinobot::parser::parse_request;
use kinobot::services::{ChamberMode, SubmitRequest};
use kinobot::Config;

#[derive(Parser)]
#[command(name = "kinobot", version, about = "Frame requests from a film library")]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = "kinobot.toml")]
    config: PathBuf,

    /// Debug logging for kinobot modules (RUST_LOG takes precedence)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and print its stats
    Init,

    /// Rescan the library roots
    Scan {
        /// Extract embedded subtitles for items that have none
        #[arg(long)]
        extract_subtitles: bool,

        /// Fetch movie metadata from TMDB
        #[arg(long)]
        enrich: bool,
    },

    /// Queue a request as if it came from a comment
    Submit {
        #[arg(long, default_value = "cli")]
        user_id: String,

        #[arg(long, default_value = "Operator")]
        user_name: String,

        comment: String,
    },

    /// Render a request without queueing it
    Render {
        comment: String,

        #[arg(long, default_value = "en")]
        language: String,
    },

    /// Review queued requests from the terminal
    Chamber {
        /// Operator id (own requests can't be verified)
        #[arg(long, default_value = "operator")]
        operator: String,

        /// Review the N oldest requests instead of random ones
        #[arg(long)]
        oldies: Option<u32>,
    },

    /// Run the scheduler until ctrl-c
    Run,

    /// Zero every daily limit counter
    ResetLimits,

    /// Badge points of a user
    Points { user_id: String },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "info,kinobot=debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::load_or_default(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let state = AppState::build(config).context("initializing kinobot")?;

    match cli.command {
        Commands::Init => {
            let conn = get_connection(&state.pool)?;
            println!("{:#?}", get_database_stats(&conn)?);
        }

        Commands::Scan {
            extract_subtitles,
            enrich,
        } => {
            let report = state.catalog.rescan_library()?;
            println!(
                "{} registered, {} updated, {} hidden",
                report.registered, report.updated, report.hidden
            );

            if extract_subtitles {
                let items = state
                    .catalog
                    .list_visible(&[MediaKind::Movie, MediaKind::Episode])?;
                for item in items.into_iter().filter(|i| i.subtitle_handle.is_none()) {
                    match state.subtitles.extract_embedded(&item).await {
                        Ok(path) => {
                            state
                                .catalog
                                .register(&item.with_subtitles(path.to_string_lossy()))?;
                        }
                        Err(e) => log::warn!("{}", e),
                    }
                }
            }

            if enrich {
                let client = TmdbClient::new(&state.config.tmdb)?;
                let enriched = state.catalog.enrich_metadata(&client).await?;
                println!("{} item(s) enriched", enriched);
            }
        }

        Commands::Submit {
            user_id,
            user_name,
            comment,
        } => match state
            .requests
            .enqueue(SubmitRequest::new(user_id, user_name, comment))
        {
            Ok(request) => println!("Queued {}", request.id),
            Err(e) if e.is_typed() => println!("{}", ErrorResponse::from_app_error(&e).reply()),
            Err(e) => return Err(e.into()),
        },

        Commands::Render { comment, language } => {
            let parsed = match parse_request(&comment) {
                Ok(parsed) => parsed,
                Err(e) => {
                    println!("{}", ErrorResponse::from_app_error(&e).reply());
                    return Ok(());
                }
            };
            let mut request = Request::new("cli".to_string(), comment, parsed.command);
            request.language = language;

            match state.handler.handle(&request, "Operator").await {
                Ok(handled) => {
                    println!("{}", handled.caption);
                    for image in handled.images {
                        println!("{}", image.display());
                    }
                }
                Err(e) if e.is_typed() => println!("{}", ErrorResponse::from_app_error(&e).reply()),
                Err(e) => return Err(e.into()),
            }
        }

        Commands::Chamber { operator, oldies } => {
            let operator = TerminalOperator::new(operator);
            let mode = oldies.map_or(ChamberMode::Random, ChamberMode::Oldies);
            let summary = state.chamber().run(&operator, mode).await?;
            println!("{:#?}", summary);
        }

        Commands::Run => {
            let scheduler = Arc::new(state.scheduler()?);
            scheduler.run().await?;
        }

        Commands::ResetLimits => {
            let rows = state.requests.reset_limits()?;
            println!("{} limit row(s) reset", rows);
        }

        Commands::Points { user_id } => {
            println!("{}: {} point(s)", user_id, state.badges.points(&user_id)?);
            for award in state.badges.awards(&user_id)? {
                println!("  {} ({})", award.badge.name(), award.created_at.format("%Y-%m-%d"));
            }
        }
    }

    Ok(())
}
