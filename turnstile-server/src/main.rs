use anyhow::Result;
use std::sync::Arc;
use tokio::task::JoinSet;

use turnstile_server::admission::AdmissionService;
use turnstile_server::config::Config;
use turnstile_server::metrics::Metrics;
use turnstile_server::store;
use turnstile_server::transport::{Transport, http::HttpTransport};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse configuration from environment variables and CLI arguments
    let config = Config::from_env_and_args()?;

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(format!("turnstile={}", config.log_level).parse()?)
        .add_directive(format!("turnstile_server={}", config.log_level).parse()?);
    if config.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    // Build the shared admission service over the configured store
    let store = store::create_store(&config.store)?;
    let metrics = Arc::new(Metrics::new(
        config.policies.iter().map(|policy| policy.purpose.clone()),
    ));
    let service = AdmissionService::new(store, &config.policies, metrics)?;

    for policy in service.policies() {
        tracing::info!(
            purpose = %policy.purpose,
            limit_per_minute = policy.limit_per_minute,
            burst = policy.burst,
            identity = ?policy.identity,
            "Policy configured"
        );
    }

    // Create a set to manage transport tasks
    let mut transport_tasks = JoinSet::new();

    let transport = HttpTransport::new(&config.http.host, config.http.port)?;
    let http_service = service.clone();
    let host = config.http.host.clone();
    let port = config.http.port;
    transport_tasks.spawn(async move {
        tracing::info!("Starting HTTP transport on {}:{}", host, port);
        transport.start(http_service).await
    });

    tracing::info!(
        "Turnstile server started with store type: {:?}",
        config.store.store_type
    );
    tracing::info!(
        "Store timeout: {}ms, policies: {}",
        config.store.timeout_ms,
        config.policies.len()
    );

    // Wait for all transport tasks to complete (they run indefinitely)
    while let Some(result) = transport_tasks.join_next().await {
        match result {
            Ok(Ok(())) => {
                tracing::info!("Transport task completed successfully");
            }
            Ok(Err(e)) => {
                tracing::error!("Transport task failed: {}", e);
                return Err(e);
            }
            Err(e) => {
                tracing::error!("Transport task panicked: {}", e);
                return Err(anyhow::anyhow!("Transport task panicked"));
            }
        }
    }

    Ok(())
}
