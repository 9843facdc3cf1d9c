//! Built-in tool implementations for DeepDive.
//!
//! The research assistant has exactly two tools: `webSearch`, executed on
//! the server, and `getUserTimezone`, whose result comes from the client.

pub mod user_timezone;
pub mod web_search;

use deepdive_config::{AppConfig, SearchConfig};
use deepdive_core::tool::ToolRegistry;

pub use user_timezone::{TimezoneAnswer, UserTimezoneTool};
pub use web_search::{SearchHit, WebSearchTool};

/// Create a registry holding a handler for every tool kind.
pub fn default_registry(search: &SearchConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(WebSearchTool::new(search.clone())));
    registry.register(Box::new(UserTimezoneTool));
    registry
}

/// Build the registry for `config` and check it is complete.
///
/// Startup fails here rather than on the first tool call the model makes.
pub fn build_registry(config: &AppConfig) -> deepdive_core::Result<ToolRegistry> {
    let mut registry = default_registry(&config.search);
    let kinds = config
        .agent
        .approval_kinds()
        .map_err(|e| deepdive_core::Error::Config {
            message: e.to_string(),
        })?;
    for kind in kinds {
        registry.require_approval(kind);
    }
    registry.validate()?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_is_complete() {
        let registry = default_registry(&SearchConfig::default());
        assert!(registry.validate().is_ok());
        assert_eq!(registry.names(), vec!["webSearch", "getUserTimezone"]);
    }

    #[test]
    fn build_registry_applies_approvals() {
        let mut config = AppConfig::default();
        config.agent.require_approval = vec!["webSearch".into()];
        let registry = build_registry(&config).unwrap();
        assert!(registry.needs_approval(deepdive_core::tool::ToolKind::WebSearch));
        assert!(!registry.needs_approval(deepdive_core::tool::ToolKind::GetUserTimezone));
    }

    #[test]
    fn build_registry_rejects_unknown_approval() {
        let mut config = AppConfig::default();
        config.agent.require_approval = vec!["shell".into()];
        assert!(build_registry(&config).is_err());
    }
}
