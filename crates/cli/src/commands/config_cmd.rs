//! `fieldsage config`: Configuration management commands.

use std::path::Path;

use clap::Subcommand;
use fieldsage_config::AppConfig;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration (file + environment), secrets redacted
    Show,
    /// Print the default config file path
    Path,
    /// Load and validate the configuration
    Validate {
        /// Also check that the default provider is reachable
        #[arg(long)]
        ping: bool,
    },
}

pub async fn run(
    config_path: Option<&Path>,
    action: Option<ConfigAction>,
) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        None => print!("{}", AppConfig::default_toml()),
        Some(ConfigAction::Show) => show(config_path)?,
        Some(ConfigAction::Path) => {
            let path = match config_path {
                Some(path) => path.to_path_buf(),
                None => AppConfig::config_dir().join("config.toml"),
            };
            println!("{}", path.display());
        }
        Some(ConfigAction::Validate { ping }) => validate(config_path, ping).await?,
    }
    Ok(())
}

fn show(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = super::load_config(config_path)?;
    redact(&mut config);
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

fn redact(config: &mut AppConfig) {
    if config.api_key.is_some() {
        config.api_key = Some("***".into());
    }
    for provider in config.providers.values_mut() {
        if provider.api_key.is_some() {
            provider.api_key = Some("***".into());
        }
    }
}

async fn validate(config_path: Option<&Path>, ping: bool) -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating configuration...");

    let config = match super::load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            println!("   Config error: {e}");
            return Err(e);
        }
    };
    println!("   Config parsed successfully");

    let warnings = warnings(&config);
    if warnings.is_empty() {
        println!("   All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   warning: {w}");
        }
    }

    println!();
    println!("   Provider:  {}", config.default_provider);
    println!("   Model:     {}", config.effective_model());
    println!("   Gateway:   {}:{}", config.gateway.host, config.gateway.port);
    println!("   Schema:    {}", config.answer.default_schema);
    println!("   History:   {} turns", config.answer.history_turns);

    let router = fieldsage_providers::router::build_from_config(&config);
    println!("   Providers: {}", router.list().join(", "));

    if ping {
        let provider = router.default().ok_or("No default provider configured")?;
        match provider.health_check().await {
            Ok(true) => println!("   Reachable: yes"),
            Ok(false) => println!("   Reachable: responded with an error (check the API key)"),
            Err(e) => println!("   Reachable: no ({e})"),
        }
    }

    Ok(())
}

fn warnings(config: &AppConfig) -> Vec<&'static str> {
    let mut warnings = Vec::new();
    if !config.has_api_key() {
        warnings.push("No API key set (set FIELDSAGE_API_KEY, OPENAI_API_KEY or ANTHROPIC_API_KEY)");
    }
    if config.gateway.host == "0.0.0.0" {
        warnings.push("Gateway bound to all interfaces; the answer endpoint has no authentication");
    }
    if config.gateway.cors_origins.is_empty() {
        warnings.push("No CORS origins configured; browsers on other origins cannot call the gateway");
    }
    warnings
}
