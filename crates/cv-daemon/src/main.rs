// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use anyhow::{Context, Result};
use clap::Parser;
use cv_config::load_config;
use cv_creds::{CredentialResolver, Credentials, UnsealKey};
use cv_daemon::{AppState, build_app};
use cv_engine::{EngineConfig, Orchestrator, PoolFetcher, ProgressBus};
use cv_forge::ForgeClient;
use cv_store::MemoryStore;
use cv_transport::{ApiPool, CliPool};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "confvaultd", version, about = "Network configuration backup daemon")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bind address override.
    #[arg(long)]
    bind: Option<String>,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref()).context("load configuration")?;
    if let Some(bind) = args.bind {
        config.bind = bind;
    }

    let level = if args.debug {
        "debug".to_string()
    } else {
        config.log_level.clone().unwrap_or_else(|| "info".into())
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level))
        .init();

    let warnings = config.validate().context("validate configuration")?;
    for warning in &warnings {
        warn!(%warning, "configuration warning");
    }

    let key = UnsealKey::from_base64(&config.unseal_key).context("decode unseal key")?;
    let fallback = config.fallback_username.clone().map(|username| Credentials {
        username,
        password: config.fallback_password.clone().unwrap_or_default(),
    });
    let resolver = CredentialResolver::new(key, fallback);

    let forge = ForgeClient::new(
        config.forge_url.clone(),
        config.forge_token.clone(),
        config.forge_org.clone(),
    )
    .context("build forge client")?;

    let engine_config = EngineConfig {
        cli_workers: config.cli_workers,
        api_workers: config.api_workers,
        cli_timeout: Duration::from_secs(config.cli_timeout_secs),
        api_timeout: Duration::from_secs(config.api_timeout_secs),
        api_tls_verify: config.api_tls_verify,
        max_concurrent_jobs: config.max_concurrent_jobs,
    };
    let fetcher = PoolFetcher::new(
        CliPool::new(engine_config.cli_workers, engine_config.cli_timeout),
        ApiPool::new(
            engine_config.api_workers,
            engine_config.api_timeout,
            engine_config.api_tls_verify,
        )
        .context("build API pool")?,
    );

    let store = Arc::new(MemoryStore::new());
    let bus = ProgressBus::with_grace(Duration::from_secs(config.bus_grace_secs));
    let orchestrator = Orchestrator::new(
        store.clone(),
        store.clone(),
        forge.clone(),
        resolver,
        Arc::new(fetcher),
        bus,
        engine_config,
    );

    let state = Arc::new(AppState {
        orchestrator,
        store: store.clone(),
        inventory: store,
        forge,
    });
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("bind {}", config.bind))?;
    info!(bind = %config.bind, org = %config.forge_org, "confvaultd listening");

    axum::serve(listener, app).await.context("serve")
}
