use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use stylizer::{
    api::routes::{router, AppState},
    config::Config,
    Orchestrator, ProxyClient, RateGovernor, TemplateLibrary,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    Config::dotenv_load();
    let config = Config::new().expect("Failed to load configuration");
    config.log_summary();

    let generator = Arc::new(ProxyClient::from_config(&config));
    let governor = Arc::new(RateGovernor::new());
    governor.spawn_ticker();

    let templates = TemplateLibrary::load(&config.templates_dir).await.unwrap_or_else(|e| {
        tracing::warn!("Failed to load templates from '{}': {}", config.templates_dir, e);
        TemplateLibrary::new()
    });
    let orchestrator = Orchestrator::from_config(&config, generator, governor);
    let app = router(Arc::new(AppState::new(orchestrator, templates)));

    // Run our application with safe parsing
    let host_str = config.api_host.clone();
    let port_str = config.api_port.clone();
    let ip: std::net::IpAddr = host_str.parse().unwrap_or_else(|_| {
        tracing::warn!("Invalid API_HOST '{}', falling back to 127.0.0.1", host_str);
        std::net::IpAddr::from([127, 0, 0, 1])
    });
    let port: u16 = port_str.parse().unwrap_or_else(|_| {
        tracing::warn!("Invalid API_PORT '{}', falling back to 8190", port_str);
        8190
    });
    let socket_address = SocketAddr::new(ip, port);
    tracing::info!("listening on {}", socket_address);
    axum::Server::bind(&socket_address)
        .serve(app.into_make_service())
        .await
        .unwrap();
}
