use anyhow::Result;
use clap::Parser;
use floodgate::config::{Cli, Config};
use floodgate::config_validator::ConfigValidator;
use floodgate::policy_config::PolicyConfig;
use floodgate::server::Server;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    // Load configuration from environment, then apply command line overrides
    let config = Config::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?
        .merge_cli(cli);

    ConfigValidator::validate(&config)
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("floodgate={},tower_http=debug", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let policy = match &config.policy_file {
        Some(path) => PolicyConfig::from_file(path)
            .map_err(|e| anyhow::anyhow!("Failed to load policy file: {}", e))?,
        None => PolicyConfig::default(),
    };

    tracing::info!("Starting floodgate service");
    tracing::info!(
        "Configuration: bind_addr={}, redis={}, policy_file={:?}",
        config.bind_addr,
        config.redis_url.as_deref().unwrap_or("disabled"),
        config.policy_file
    );

    // Create and run the server
    let server = Server::new(&config, policy)
        .map_err(|e| anyhow::anyhow!("Failed to create server: {}", e))?;

    server
        .run()
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
