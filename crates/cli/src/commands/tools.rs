//! `deepdive tools`: Print the tool declarations sent to the model.

use deepdive_config::AppConfig;
use deepdive_core::provider::{ExecutionMode, ToolDefinition};

pub async fn run(json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let registry = deepdive_tools::build_registry(&config)?;
    let definitions = registry.describe();

    if json {
        println!("{}", serde_json::to_string_pretty(&definitions)?);
    } else {
        for line in render(&definitions) {
            println!("{line}");
        }
    }
    Ok(())
}

fn render(definitions: &[ToolDefinition]) -> Vec<String> {
    let mut lines = Vec::new();
    for def in definitions {
        let runs_on = match def.execution {
            ExecutionMode::Server => "server",
            ExecutionMode::Client => "client",
        };
        let approval = if def.requires_approval {
            ", needs approval"
        } else {
            ""
        };
        lines.push(format!("  {} ({runs_on}{approval})", def.name));
        lines.push(format!("      {}", def.description));
    }
    lines
}
