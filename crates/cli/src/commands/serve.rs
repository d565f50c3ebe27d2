//! `fieldsage serve`: Start the HTTP gateway.

use std::path::Path;

pub async fn run(
    config_path: Option<&Path>,
    port_override: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = super::load_config(config_path)?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("FieldSage Gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Provider:  {}", config.default_provider);
    println!("   Model:     {}", config.effective_model());
    println!("   Schema:    {}", config.answer.default_schema);

    fieldsage_gateway::start(config).await?;

    Ok(())
}
