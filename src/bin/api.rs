use cerebro_agent::{
    api::start_server,
    config::EngineConfig,
    engine::Engine,
    ledger::{InMemoryLedgerStore, LedgerStore, PgLedgerStore},
    memory::ConversationMemory,
    mirror::{Mirror, MirrorSink, NullMirror, SheetsMirror},
    producer::GeminiProducer,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    let config = EngineConfig::from_env();

    let gemini_api_key = std::env::var("GEMINI_API_KEY").unwrap_or_else(|_| {
        warn!("GEMINI_API_KEY not set; intent production falls back to the deterministic parser");
        String::new()
    });

    let api_port: u16 = std::env::var("PORT")
        .or_else(|_| std::env::var("API_PORT"))
        .unwrap_or_else(|_| "8080".to_string())
        .parse()?;

    info!("Budget assistant engine - API server");
    info!("Port: {}", api_port);

    // Storage backends: Postgres when a database URL is configured,
    // in-memory otherwise.
    let database_url = std::env::var("DATABASE_URL")
        .or_else(|_| std::env::var("POSTGRES_URL"))
        .ok()
        .filter(|v| !v.is_empty());

    let (ledger, memory): (Arc<dyn LedgerStore>, Arc<ConversationMemory>) = match database_url {
        Some(url) => {
            info!("Ledger backend: postgres");
            let pool = PgPoolOptions::new().max_connections(5).connect_lazy(&url)?;
            (
                Arc::new(PgLedgerStore::new(pool.clone())),
                Arc::new(ConversationMemory::postgres(pool)),
            )
        }
        None => {
            warn!("No DATABASE_URL configured; running on in-memory storage");
            (
                Arc::new(InMemoryLedgerStore::new()),
                Arc::new(ConversationMemory::in_memory()),
            )
        }
    };

    let sink: Arc<dyn MirrorSink> = match config.mirror_base_url.as_deref() {
        Some(base_url) => {
            info!("Mirror bridge: {}", base_url);
            Arc::new(SheetsMirror::new(base_url, config.service_token.clone())?)
        }
        None => {
            info!("Mirror disabled");
            Arc::new(NullMirror)
        }
    };
    let mirror = Mirror::spawn(sink, &config);

    let engine = Arc::new(Engine::new(ledger, memory, mirror, config));
    let producer = Arc::new(GeminiProducer::new(gemini_api_key));

    info!("Engine initialized");
    info!("Starting API server...");

    start_server(engine, producer, api_port).await?;

    Ok(())
}
