use anyhow::Result;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Use JSON logs in production (HUDDLE_LOG_JSON=1), human-readable otherwise
    let json_logs = std::env::var("HUDDLE_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::from_default_env().add_directive("huddle_server=info".parse()?);
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .init();
    }

    let config = huddle_server::config::ServerConfig::load();
    tracing::info!("Starting chat server on {}", config.listen_addr);
    if let Some(ref dir) = config.web_static_dir {
        tracing::info!("Static web client directory: {dir}");
    }

    let server = huddle_server::server::Server::new(config);
    server.run().await
}
