//! chorus-api - contribution intake and synthesis service
//!
//! Subcommands:
//! - `serve` (default): run the HTTP service
//! - `issue-token`: create a profile if needed and print a session token

use anyhow::{Context, Result};
use chorus_api::config::ServiceConfig;
use chorus_api::llm::AnthropicClient;
use chorus_api::rate_limit::{spawn_sweeper, RateLimiter};
use chorus_api::safety::ClaudeSafetyGate;
use chorus_api::synthesis::ClaudeSynthesisGenerator;
use chorus_api::{build_router, db::profiles, AppState, ServiceOptions};
use chorus_common::api::auth::{create_session, load_internal_secret};
use chorus_common::config::{RootFolderInitializer, RootFolderResolver};
use chorus_common::db::init_database;
use clap::{Parser, Subcommand};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "chorus-api", version, about = "Contribution intake and synthesis service")]
struct Args {
    /// Root folder holding chorus.db
    #[arg(long, env = "CHORUS_ROOT_FOLDER", global = true)]
    root_folder: Option<PathBuf>,

    /// Explicit TOML configuration file
    #[arg(long, env = "CHORUS_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long, env = "CHORUS_BIND")]
    bind: Option<String>,

    /// Port to listen on
    #[arg(long, env = "CHORUS_PORT")]
    port: Option<u16>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service
    Serve,
    /// Issue a session token for a user
    IssueToken {
        /// Profile id
        #[arg(long)]
        user: Uuid,
        /// Grant admin rights to the profile
        #[arg(long)]
        admin: bool,
        /// Token lifetime in days (no expiry when omitted)
        #[arg(long)]
        days: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ServiceConfig::load(args.config.as_deref())?;
    config.apply_env(|key| std::env::var(key).ok())?;
    if let Some(bind) = &args.bind {
        config.bind = bind.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    config.validate()?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "chorus_api={level},chorus_common={level},tower_http={level}",
            level = config.logging.level
        ))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Build identification right after tracing init
    info!(
        "Starting Chorus API (chorus-api) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let root_folder = RootFolderResolver::new("chorus-api")
        .with_cli_arg(args.root_folder.clone().or_else(|| config.root_folder.clone()))
        .resolve();
    let initializer = RootFolderInitializer::new(root_folder);
    initializer.ensure_directory_exists()?;

    let db_path = initializer.database_path();
    info!("Database path: {}", db_path.display());
    let pool = init_database(&db_path).await?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(pool, config).await,
        Command::IssueToken { user, admin, days } => issue_token(&pool, user, admin, days).await,
    }
}

async fn serve(pool: SqlitePool, config: ServiceConfig) -> Result<()> {
    let internal_secret = match std::env::var("CHORUS_INTERNAL_SECRET") {
        Ok(secret) if !secret.trim().is_empty() => {
            info!("Using internal secret from CHORUS_INTERNAL_SECRET");
            secret
        }
        _ => load_internal_secret(&pool)
            .await
            .context("Failed to load internal secret")?,
    };

    let api_key = config
        .anthropic
        .api_key
        .clone()
        .context("No Anthropic API key: set ANTHROPIC_API_KEY or [anthropic] api_key")?;
    let client = AnthropicClient::new(api_key, config.anthropic.base_url.clone())?;

    let safety_gate = Arc::new(ClaudeSafetyGate::new(
        client.clone(),
        config.anthropic.safety_model.clone(),
        config.anthropic.safety_timeout(),
    ));
    let generator = Arc::new(ClaudeSynthesisGenerator::new(
        client,
        config.anthropic.synthesis_model.clone(),
        config.anthropic.synthesis_max_tokens,
        config.anthropic.synthesis_timeout(),
    ));

    let rate_limiter = Arc::new(RateLimiter::in_memory(config.rate_limits.to_policies()));
    spawn_sweeper(
        rate_limiter.clone(),
        Duration::from_secs(config.rate_limit_sweep_secs),
    );

    info!(policy = ?config.safety.on_failure, "Safety gate failure policy");

    let state = AppState::new(
        pool,
        safety_gate,
        generator,
        rate_limiter,
        ServiceOptions {
            safety_policy: config.safety.on_failure,
            generator_timeout: config.anthropic.synthesis_timeout(),
            default_threshold: config.problems.default_contribution_threshold,
            internal_secret,
        },
    );
    let app = build_router(state);

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("chorus-api listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

async fn issue_token(pool: &SqlitePool, user: Uuid, admin: bool, days: Option<i64>) -> Result<()> {
    profiles::ensure_profile(pool, user, None).await?;
    if admin {
        profiles::set_admin(pool, user, true).await?;
        warn!(user_id = %user, "Granted admin rights");
    }

    let expires_at = session_expiry(chrono::Utc::now(), days)?;
    let token = create_session(pool, user, expires_at).await?;

    println!("{}", token);
    Ok(())
}

/// Expiry `days` after `now`; `None` means the session never expires
fn session_expiry(
    now: chrono::DateTime<chrono::Utc>,
    days: Option<i64>,
) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
    let Some(days) = days else {
        return Ok(None);
    };
    if days < 1 {
        anyhow::bail!("--days must be at least 1, got {}", days);
    }

    chrono::Duration::try_days(days)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .map(Some)
        .with_context(|| format!("--days {} is out of range", days))
}
