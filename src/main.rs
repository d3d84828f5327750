//! Proxer gateway — binds the HTTP control/proxy surface, loads any
//! persisted snapshot, and periodically checkpoints state to the
//! configured storage driver.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use proxer_api::{ApiServer, ApiServerConfig};
use proxer_proxy::{ProxyPath, ProxyPathConfig};
use proxer_relay_db::{MemoryAdapter, PersistenceAdapter, SqliteAdapter};
use proxer_session_hub::{SessionHub, SessionHubConfig};
use proxer_store::{ConnectorStore, IncidentStore, PlanStore, RateLimiter, RuleStore, SnapshotPayload};

#[derive(Parser, Debug)]
#[command(name = "proxer")]
#[command(about = "Proxer - expose private-network HTTP services through a connector agent")]
#[command(version)]
struct Cli {
    /// HTTP listen address
    #[arg(long, env = "PROXER_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    listen_addr: SocketAddr,

    /// HTTPS listen address (requires --tls-cert-path and --tls-key-path)
    #[arg(long, env = "PROXER_TLS_LISTEN_ADDR")]
    tls_listen_addr: Option<SocketAddr>,

    #[arg(long, env = "PROXER_TLS_CERT_PATH")]
    tls_cert_path: Option<String>,

    #[arg(long, env = "PROXER_TLS_KEY_PATH")]
    tls_key_path: Option<String>,

    /// Base URL handed back to agents for constructing public tunnel URLs
    #[arg(long, env = "PROXER_PUBLIC_BASE_URL", default_value = "http://localhost:8080")]
    public_base_url: String,

    /// Shared token legacy agents present on /api/agent/register
    #[arg(long, env = "PROXER_AGENT_TOKEN")]
    agent_token: Option<String>,

    #[arg(long, env = "PROXER_SUPER_ADMIN_USERNAME", default_value = "admin")]
    super_admin_username: String,

    #[arg(long, env = "PROXER_SUPER_ADMIN_PASSWORD")]
    super_admin_password: Option<String>,

    /// Seconds of inactivity before an agent session is evicted
    #[arg(long, env = "PROXER_SESSION_TTL_SECS", default_value = "90")]
    session_ttl_secs: u64,

    /// Minutes a connector pair token stays valid
    #[arg(long, env = "PROXER_PAIR_TOKEN_TTL_MINUTES", default_value = "10")]
    pair_token_ttl_minutes: i64,

    /// Seconds to wait for an agent to answer a dispatched request
    #[arg(long, env = "PROXER_REQUEST_TIMEOUT_SECS", default_value = "30")]
    request_timeout_secs: u64,

    #[arg(long, env = "PROXER_MAX_REQUEST_BODY_BYTES", default_value_t = 10 * (1 << 20))]
    max_request_body_bytes: usize,

    #[arg(long, env = "PROXER_MAX_RESPONSE_BODY_BYTES", default_value_t = 20 * (1 << 20))]
    max_response_body_bytes: usize,

    #[arg(long, env = "PROXER_MAX_PENDING_PER_SESSION", default_value_t = 1024)]
    max_pending_per_session: usize,

    #[arg(long, env = "PROXER_MAX_PENDING_GLOBAL", default_value_t = 10_000)]
    max_pending_global: usize,

    /// `memory` keeps state in-process only; `sqlite` persists to sqlite_path
    #[arg(long, env = "PROXER_STORAGE_DRIVER", default_value = "memory")]
    storage_driver: String,

    #[arg(long, env = "PROXER_SQLITE_PATH", default_value = "proxer.sqlite")]
    sqlite_path: String,

    /// Allows CORS from any origin and disables mandatory super-admin
    /// password configuration (a random password is generated instead)
    #[arg(long, env = "PROXER_DEV_MODE")]
    dev_mode: bool,

    /// Seconds between automatic persistence snapshots
    #[arg(long, env = "PROXER_SNAPSHOT_INTERVAL_SECS", default_value = "2")]
    snapshot_interval_secs: u64,

    #[arg(short, long, global = true)]
    verbose: bool,
}

fn setup_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

fn take_snapshot(
    rule_store: &RuleStore,
    connector_store: &ConnectorStore,
    plan_store: &PlanStore,
    incident_store: &IncidentStore,
) -> SnapshotPayload {
    let (tenants, environments, routes) = rule_store.snapshot();
    let (connectors, credentials, pair_tokens) = connector_store.snapshot();
    let (plans, plan_assignments, usage) = plan_store.snapshot();
    let incidents = incident_store.snapshot();
    SnapshotPayload {
        version: 1,
        saved_at: Some(chrono::Utc::now()),
        users: serde_json::Value::Null,
        tenants,
        environments,
        routes,
        connectors,
        credentials,
        pair_tokens,
        plans,
        plan_assignments,
        usage,
        incidents,
        tls_records: serde_json::Value::Null,
    }
}

async fn save_snapshot(
    persistence: &dyn PersistenceAdapter,
    rule_store: &RuleStore,
    connector_store: &ConnectorStore,
    plan_store: &PlanStore,
    incident_store: &IncidentStore,
) {
    let snapshot = take_snapshot(rule_store, connector_store, plan_store, incident_store);
    match serde_json::to_vec(&snapshot) {
        Ok(bytes) => {
            if let Err(e) = persistence.save(&bytes).await {
                error!("failed to persist snapshot: {e:#}");
            }
        }
        Err(e) => error!("failed to serialize snapshot: {e:#}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    info!("Proxer gateway starting...");

    let rule_store = Arc::new(RuleStore::new());
    let connector_store = Arc::new(ConnectorStore::new());
    let plan_store = Arc::new(PlanStore::new());
    let incident_store = Arc::new(IncidentStore::new());
    let rate_limiter = Arc::new(RateLimiter::new());

    let persistence: Arc<dyn PersistenceAdapter> = match cli.storage_driver.as_str() {
        "sqlite" => {
            let url = format!("sqlite://{}?mode=rwc", cli.sqlite_path);
            let db = proxer_relay_db::connect(&url)
                .await
                .context("failed to open sqlite storage")?;
            proxer_relay_db::migrate(&db)
                .await
                .context("failed to apply sqlite migrations")?;
            info!(path = %cli.sqlite_path, "using sqlite persistence");
            Arc::new(SqliteAdapter::new(db))
        }
        "memory" => {
            info!("using in-memory persistence (state is lost on restart)");
            Arc::new(MemoryAdapter::new())
        }
        other => anyhow::bail!("unknown storage_driver '{other}', expected 'memory' or 'sqlite'"),
    };

    if let Some(bytes) = persistence.load().await.context("failed to load persisted snapshot")? {
        match serde_json::from_slice::<SnapshotPayload>(&bytes) {
            Ok(snapshot) => {
                rule_store.restore(snapshot.tenants, snapshot.environments, snapshot.routes);
                connector_store.restore(snapshot.connectors, snapshot.credentials, snapshot.pair_tokens);
                plan_store.restore(snapshot.plans, snapshot.plan_assignments, snapshot.usage);
                incident_store.restore(snapshot.incidents);
                info!("restored persisted snapshot");
            }
            Err(e) => {
                warn!("discarding unreadable persisted snapshot: {e:#}");
            }
        }
    }

    let session_hub = Arc::new(SessionHub::new(SessionHubConfig {
        agent_token: cli.agent_token.clone(),
        public_base_url: cli.public_base_url.clone(),
        session_ttl: Duration::from_secs(cli.session_ttl_secs),
        max_pending_per_session: cli.max_pending_per_session,
        max_pending_global: cli.max_pending_global,
    }));

    let proxy_path = Arc::new(ProxyPath::new(
        rule_store.clone(),
        connector_store.clone(),
        plan_store.clone(),
        incident_store.clone(),
        rate_limiter.clone(),
        session_hub.clone(),
        ProxyPathConfig {
            max_request_body_bytes: cli.max_request_body_bytes,
            max_response_body_bytes: cli.max_response_body_bytes,
            proxy_request_timeout: Duration::from_secs(cli.request_timeout_secs),
        },
    ));

    let (super_admin_password, generated) = match cli.super_admin_password.clone() {
        Some(password) => (password, false),
        None if cli.dev_mode => (proxer_auth::generate_secret(), true),
        None => anyhow::bail!("--super-admin-password is required outside --dev-mode"),
    };
    if generated {
        warn!(password = %super_admin_password, "dev_mode: generated a random super-admin password");
    }
    let super_admin_password_hash =
        proxer_auth::hash_password(&super_admin_password).context("failed to hash super-admin password")?;

    let api_config = ApiServerConfig {
        http_addr: Some(cli.listen_addr),
        https_addr: cli.tls_listen_addr,
        enable_cors: cli.dev_mode,
        cors_origins: None,
        tls_cert_path: cli.tls_cert_path.clone(),
        tls_key_path: cli.tls_key_path.clone(),
        super_admin_username: cli.super_admin_username.clone(),
        super_admin_password_hash,
    };

    let server = ApiServer::new(
        api_config,
        rule_store.clone(),
        connector_store.clone(),
        plan_store.clone(),
        incident_store.clone(),
        session_hub.clone(),
        proxy_path,
        persistence.clone(),
        cli.public_base_url.clone(),
        Duration::from_secs((cli.pair_token_ttl_minutes.max(0) as u64) * 60),
    );

    let snapshot_rule_store = rule_store.clone();
    let snapshot_connector_store = connector_store.clone();
    let snapshot_plan_store = plan_store.clone();
    let snapshot_incident_store = incident_store.clone();
    let snapshot_persistence = persistence.clone();
    let snapshot_interval = Duration::from_secs(cli.snapshot_interval_secs.max(1));
    let snapshot_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(snapshot_interval);
        loop {
            ticker.tick().await;
            save_snapshot(
                snapshot_persistence.as_ref(),
                &snapshot_rule_store,
                &snapshot_connector_store,
                &snapshot_plan_store,
                &snapshot_incident_store,
            )
            .await;
        }
    });

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("failed to install SIGTERM handler")?;
    #[cfg(unix)]
    let sigterm_recv = sigterm.recv();
    #[cfg(unix)]
    tokio::pin!(sigterm_recv);
    #[cfg(not(unix))]
    let sigterm_recv = std::future::pending::<Option<()>>();
    #[cfg(not(unix))]
    tokio::pin!(sigterm_recv);

    tokio::select! {
        result = server.start() => {
            if let Err(e) = result {
                error!("API server error: {e:#}");
                snapshot_task.abort();
                return Err(e);
            }
        }
        _ = &mut ctrl_c => {
            info!("received Ctrl+C, shutting down...");
        }
        _ = &mut sigterm_recv => {
            info!("received SIGTERM, shutting down...");
        }
    }

    snapshot_task.abort();
    save_snapshot(persistence.as_ref(), &rule_store, &connector_store, &plan_store, &incident_store).await;
    info!("final snapshot saved, Proxer gateway stopped");
    Ok(())
}
