//! `deepdive config`: Configuration management commands.

use deepdive_config::AppConfig;

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   Config parsed successfully");

            let warnings = warnings(&config);
            if warnings.is_empty() {
                println!("   All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   Warning: {w}");
                }
            }

            println!();
            let router = deepdive_providers::build_from_config(&config);
            println!("   Provider:  {}", config.default_provider);
            println!("   Available: {}", router.list().join(", "));
            println!("   Model:     {}", config.default_model);
            println!("   Max steps: {}", config.agent.max_steps);
            println!(
                "   Gateway:   {}:{}",
                config.gateway.host, config.gateway.port
            );
        }
        Err(e) => {
            println!("   Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

/// Problems that don't stop startup but degrade answers.
fn warnings(config: &AppConfig) -> Vec<&'static str> {
    let mut warnings = Vec::new();
    if config.api_key.is_none() {
        warnings.push("No model API key set (set OPENROUTER_API_KEY or DEEPDIVE_API_KEY)");
    }
    if config.search.api_key.is_none() {
        warnings.push("No search API key set (set TAVILY_API_KEY), webSearch will return no results");
    }
    if config.gateway.host == "0.0.0.0" {
        warnings.push("Gateway bound to 0.0.0.0 is reachable from the network");
    }
    warnings
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    println!("{}", redacted_toml(config)?);
    Ok(())
}

fn redacted_toml(mut config: AppConfig) -> Result<String, toml::ser::Error> {
    let mask = |key: &mut Option<String>| {
        if key.is_some() {
            *key = Some("***".into());
        }
    };
    mask(&mut config.api_key);
    mask(&mut config.search.api_key);
    for provider in config.providers.values_mut() {
        mask(&mut provider.api_key);
    }
    toml::to_string_pretty(&config)
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}

pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let dir = AppConfig::config_dir();
    let config_path = dir.join("config.toml");
    if config_path.exists() {
        println!("Config already exists at {}", config_path.display());
        return Ok(());
    }
    std::fs::create_dir_all(&dir)?;
    std::fs::write(&config_path, AppConfig::default_toml())?;
    println!("Wrote default config to {}", config_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_is_valid() {
        let path = AppConfig::config_dir().join("config.toml");
        assert!(path.to_str().unwrap().contains("config.toml"));
    }

    #[test]
    fn show_masks_secrets() {
        let mut config = AppConfig::default();
        config.api_key = Some("sk-or-secret".into());
        config.search.api_key = Some("tvly-secret".into());
        let out = redacted_toml(config).unwrap();
        assert!(!out.contains("secret"));
        assert!(out.contains("***"));
    }

    #[test]
    fn missing_keys_are_warned_about() {
        let config = AppConfig::default();
        assert_eq!(warnings(&config).len(), 2);
    }
}
