//! `choir serve`: Start the HTTP/WebSocket gateway.

use choir_config::AppConfig;

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| choir_core::Error::Config {
        message: e.to_string(),
    })?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("Choir Gateway");
    println!("   Listening:    {}:{}", config.gateway.host, config.gateway.port);
    println!("   Model:        {}", config.chat_model);
    println!("   Vector store: {} ({})", config.vector_store.backend, config.vector_store.url);

    choir_gateway::start(config).await?;

    Ok(())
}
