use std::sync::Arc;
use tokio::net::TcpListener;

use relay_server::config::{generate_config_template, Config};
use relay_server::jobs::scraper::HttpProfileScraper;
use relay_server::jobs::{JobBridge, JobSettings};
use relay_server::state::AppState;
use relay_server::ws::heartbeat::HeartbeatMonitor;
use relay_server::ws::{ClientId, ConnectionRegistry};
use relay_server::routes;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("relay_server=info"));
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(env_filter)
            .init();
    }

    tracing::info!("Relay server v{} starting", env!("CARGO_PKG_VERSION"));

    let receiver_id = ClientId::parse(&config.receiver_id)
        .ok_or("receiver_id must be a non-empty client id")?;

    let registry = ConnectionRegistry::new();

    // The scraper's own HTTP timeout matches the job budget; the bridge enforces it too
    let scraper = HttpProfileScraper::new(&config.scraper_url, config.job_timeout())?;
    let jobs = JobBridge::new(
        registry.clone(),
        Arc::new(scraper),
        JobSettings {
            receiver_id: receiver_id.clone(),
            timeout: config.job_timeout(),
            default_username: config.default_username.clone(),
        },
    );

    // Spawn the heartbeat monitor
    let heartbeat = HeartbeatMonitor::new(registry.clone(), config.heartbeat_interval());
    tokio::spawn(heartbeat.run());
    tracing::info!(
        interval_secs = config.heartbeat_interval_secs,
        receiver_id = %receiver_id,
        scraper_url = %config.scraper_url,
        "Relay configured"
    );

    let app_state = AppState {
        registry,
        jobs,
        debug_username: config.debug_username.clone(),
    };

    // Build router
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
