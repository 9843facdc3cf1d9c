//! `deepdive serve`: Start the gateway.

use deepdive_config::AppConfig;

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("DeepDive Gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!(
        "   Sessions:  ws://{}:{}/v1/sessions/<id>/ws",
        config.gateway.host, config.gateway.port
    );
    println!("   Model:     {}", config.default_model);
    if config.search.api_key.is_none() {
        println!("   Warning:   no search API key, webSearch will return no results");
    }

    deepdive_gateway::start(config).await?;

    Ok(())
}
