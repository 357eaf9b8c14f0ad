//! `deskpilot serve`: Start the HTTP API server.

use deskpilot_config::AppConfig;

pub async fn run(port_override: Option<u16>, mock_backend: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("deskpilot gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Sessions:  {}", config.sessions.backend);
    println!(
        "   Backend:   {}",
        if mock_backend {
            "in-process mock"
        } else {
            config.backend.api_url.as_deref().unwrap_or("(API_URL not set)")
        }
    );

    deskpilot_gateway::start(config, mock_backend).await?;

    Ok(())
}
