use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use flashcard_scheduler::config::Config;
use flashcard_scheduler::db::now_ms;
use flashcard_scheduler::logging::init_tracing;
use flashcard_scheduler::services::{due_cards, review, session};
use flashcard_scheduler::AppState;

#[derive(Parser)]
#[command(name = "flashcard-scheduler", about = "Spaced-repetition scheduling over a SQLite store")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema.
    Migrate,
    /// List the study queue for a deck or for all of a user's decks.
    Due {
        scope: ScopeKind,
        id: String,
        #[arg(short, long, default_value_t = 20)]
        limit: u32,
    },
    /// Rebuild a card from its review history and compare with the stored row.
    Replay { card_id: String, user_id: String },
    /// Current study streak in days.
    Streak { user_id: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum ScopeKind {
    Deck,
    User,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    DbInit(#[from] flashcard_scheduler::db::DbInitError),
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
    #[error(transparent)]
    Review(#[from] review::ReviewError),
    #[error("failed to encode output: {0}")]
    Json(#[from] serde_json::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();
    let _log_guard = init_tracing(&config);

    let cli = Cli::parse();
    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "command failed");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, config: Config) -> Result<(), CliError> {
    let state = AppState::from_config(config).await?;

    let result = match cli.command {
        Commands::Migrate => print_json(&serde_json::json!({
            "database": state.db.path().display().to_string(),
            "migrated": true,
        })),
        Commands::Due { scope, id, limit } => {
            let scope = match scope {
                ScopeKind::Deck => due_cards::DueScope::Deck(id),
                ScopeKind::User => due_cards::DueScope::User(id),
            };
            let limit = state.config.clamp_due_limit(limit);
            let cards = due_cards::get_due_cards(&state.db, &scope, limit, now_ms()).await?;
            print_json(&cards)
        }
        Commands::Replay { card_id, user_id } => {
            let report = review::replay_card_history(&state.db, &card_id, &user_id).await?;
            print_json(&report)
        }
        Commands::Streak { user_id } => {
            let streak_days = session::calculate_streak(&state.db, &user_id).await?;
            print_json(&serde_json::json!({ "userId": user_id, "streakDays": streak_days }))
        }
    };

    state.db.close().await;
    result
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
