//! # Mailcast — campaign scheduling & dispatch server
//!
//! Loads config, opens the campaign store, reconciles schedules from
//! durable state, and serves the HTTP gateway.
//!
//! Usage:
//!   mailcast                          # Start with ~/.mailcast/config.toml
//!   mailcast --port 9090              # Custom gateway port
//!   mailcast --db-path ./dev.db       # Custom store location

mod sources;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use mailcast_core::MailcastConfig;
use mailcast_core::traits::{CampaignStore, RecipientSource, ResourceResolver};
use mailcast_engine::{Dispatcher, JobRegistry, Scheduler};
use mailcast_gateway::AppState;
use mailcast_smtp::{DirResolver, HttpResolver, SmtpTransportFactory};
use mailcast_store::SqliteCampaignStore;

#[derive(Parser)]
#[command(
    name = "mailcast",
    version,
    about = "📬 Mailcast — email-campaign scheduling & dispatch engine"
)]
struct Cli {
    /// Config file path (default: ~/.mailcast/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Gateway port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Campaign database path (overrides config)
    #[arg(long)]
    db_path: Option<String>,

    /// Directory resolved against relative recipient-source paths
    #[arg(long, default_value = "~/.mailcast/recipients")]
    recipients_dir: String,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn expand_path(p: &str) -> String {
    shellexpand::tilde(p).to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "mailcast=debug,mailcast_engine=debug,tower_http=debug"
    } else {
        "mailcast=info,mailcast_engine=info,mailcast_gateway=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let mut config = match &cli.config {
        Some(path) => MailcastConfig::load_from(std::path::Path::new(&expand_path(path)))?,
        None => MailcastConfig::load()?,
    };
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }
    if let Some(db_path) = &cli.db_path {
        config.store.db_path = db_path.clone();
    }

    let db_path = config.store.expanded_db_path();
    let store: Arc<dyn CampaignStore> = Arc::new(SqliteCampaignStore::open(&db_path)?);

    let resolver: Arc<dyn ResourceResolver> = match &config.assets.base_url {
        Some(base) => Arc::new(HttpResolver::new(base.clone())),
        None => Arc::new(DirResolver::new(config.assets.expanded_dir())),
    };
    let recipients: Arc<dyn RecipientSource> = Arc::new(sources::JsonFileSource::new(
        expand_path(&cli.recipients_dir).into(),
    ));

    let registry = Arc::new(JobRegistry::new());
    let dispatcher = Dispatcher {
        registry: Arc::clone(&registry),
        store: Arc::clone(&store),
        resolver,
        transports: Arc::new(SmtpTransportFactory::new(config.smtp.clone())),
        tracking_base_url: config.engine.tracking_base_url.clone(),
        flush_every: config.engine.flush_every,
    };
    let scheduler = Scheduler::new(store, registry, recipients, dispatcher);

    // Re-arm triggers from durable state; stale one-shot schedules are
    // cleared here, never fired retroactively.
    let armed = scheduler.reconcile_on_startup()?;

    println!("📬 Mailcast v{}", env!("CARGO_PKG_VERSION"));
    println!("   🌐 Gateway:   http://{}:{}", config.gateway.host, config.gateway.port);
    println!("   🗄️  Database:  {}", db_path.display());
    println!("   ✉️  SMTP:      {}:{}", config.smtp.host, config.smtp.port);
    println!("   ⏰ Triggers:  {armed} re-armed");
    println!();

    let state = Arc::new(AppState::new(Arc::clone(&scheduler)));
    tokio::select! {
        result = mailcast_gateway::serve(state, &config.gateway.host, config.gateway.port) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("👋 Shutting down");
        }
    }
    scheduler.shutdown();

    Ok(())
}
