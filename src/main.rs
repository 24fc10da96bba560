//! metacog server binary.

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use metacog::ai::{AiConfig, Embedder, Generator, OpenAiEmbedder, OpenAiGenerator};
use metacog::config::{env_bool, DreamConfig, SearchConfig};
use metacog::db::MemoryDB;
use metacog::dream::{DreamEngine, DreamOutcome};
use metacog::store::MemoryStore;
use metacog::{api, AppState, SharedDB};

#[derive(Parser)]
#[command(name = "metacog", version, about = "Long-term memory and dream consolidation for conversational agents")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "3917", env = "METACOG_PORT")]
    port: u16,

    /// SQLite database path
    #[arg(short, long, default_value = "metacog.db", env = "METACOG_DB")]
    db: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    let shared: SharedDB = match MemoryDB::open(&args.db) {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!(db = %args.db, error = %e, "failed to open database");
            std::process::exit(1);
        }
    };

    let ai_cfg = AiConfig::from_env();
    let embedder: Option<Arc<dyn Embedder>> = ai_cfg
        .as_ref()
        .filter(|c| c.has_embed())
        .map(|c| Arc::new(OpenAiEmbedder::new(c.clone())) as Arc<dyn Embedder>);
    let generator: Option<Arc<dyn Generator>> = ai_cfg
        .as_ref()
        .filter(|c| c.has_llm())
        .map(|c| Arc::new(OpenAiGenerator::new(c.clone())) as Arc<dyn Generator>);
    let ai_status = match &ai_cfg {
        Some(cfg) => {
            let mut parts = vec![];
            if cfg.has_llm() {
                parts.push(format!("llm={}", cfg.llm_model));
            }
            if cfg.has_embed() {
                parts.push(format!("embed={}", cfg.embed_model));
            }
            parts.join(", ")
        }
        None => "disabled (lexical search only, dreams fail)".into(),
    };

    let api_key = std::env::var("METACOG_API_KEY").ok().filter(|k| !k.is_empty());
    let auth_status = if api_key.is_some() { "enabled" } else { "disabled" };

    let dream_cfg = DreamConfig::from_env();
    let store = Arc::new(MemoryStore::sqlite(shared, embedder, SearchConfig::from_env()));
    let dreamer = Arc::new(DreamEngine::new(store.clone(), generator, dream_cfg.clone()));

    let state = AppState {
        store,
        dreamer: dreamer.clone(),
        api_key,
        auto_save_exchange: env_bool("METACOG_AUTO_SAVE_EXCHANGE", true),
        started_at: std::time::Instant::now(),
    };
    let app = api::router(state);

    if dream_cfg.auto_trigger {
        let interval = dream_cfg.check_interval;
        tokio::spawn(async move {
            // let startup settle before the first check
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            loop {
                match dreamer.dream_if_due().await {
                    Some(DreamOutcome::Completed(r)) => info!(
                        archived = r.memories_archived,
                        insights = r.insights_generated,
                        "auto-dream"
                    ),
                    Some(DreamOutcome::Failed { reason }) => warn!(reason = %reason, "auto-dream failed"),
                    _ => {}
                }
                tokio::time::sleep(interval).await;
            }
        });
        info!(
            every_secs = dream_cfg.check_interval.as_secs(),
            threshold = dream_cfg.memory_threshold,
            "automatic dreaming enabled"
        );
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = args.port,
        db = %args.db,
        ai = %ai_status,
        auth = auth_status,
        "metacog starting"
    );

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(addr = %addr, error = %e, "failed to bind address");
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "server error");
        std::process::exit(1);
    }
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable, ctrl-c only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
    info!("shutting down");
}
