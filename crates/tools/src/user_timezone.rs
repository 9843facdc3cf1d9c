//! `getUserTimezone`: declared to the model, answered by the client.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use deepdive_core::error::ToolError;
use deepdive_core::provider::ExecutionMode;
use deepdive_core::tool::{Tool, ToolKind};
use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};

/// `getUserTimezone` takes no arguments.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct TimezoneInput {}

/// What a client sends back for a `getUserTimezone` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimezoneAnswer {
    pub timezone: String,
    pub local_time: String,
}

impl TimezoneAnswer {
    pub fn new(timezone: impl Into<String>, now: DateTime<FixedOffset>) -> Self {
        Self {
            timezone: timezone.into(),
            local_time: now.to_rfc3339(),
        }
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub struct UserTimezoneTool;

#[async_trait]
impl Tool for UserTimezoneTool {
    fn kind(&self) -> ToolKind {
        ToolKind::GetUserTimezone
    }

    fn description(&self) -> &str {
        "Get the user's timezone and current local time. Use when the answer depends on the user's date, time or region."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::to_value(schema_for!(TimezoneInput)).unwrap_or_default()
    }

    fn execution(&self) -> ExecutionMode {
        ExecutionMode::Client
    }

    fn validate(&self, input: &serde_json::Value) -> Result<(), ToolError> {
        serde_json::from_value::<TimezoneInput>(input.clone())
            .map(|_| ())
            .map_err(|e| ToolError::InvalidInput {
                tool_name: ToolKind::GetUserTimezone.name().into(),
                reason: e.to_string(),
            })
    }

    async fn execute(&self, _input: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        Err(ToolError::ClientFulfilled(ToolKind::GetUserTimezone.name().into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_as_client_tool() {
        let tool = UserTimezoneTool;
        assert_eq!(tool.kind().name(), "getUserTimezone");
        assert_eq!(tool.execution(), ExecutionMode::Client);
        assert_eq!(tool.parameters_schema()["type"], "object");
    }

    #[test]
    fn accepts_empty_object_only() {
        let tool = UserTimezoneTool;
        assert!(tool.validate(&serde_json::json!({})).is_ok());
        assert!(tool.validate(&serde_json::json!("Europe/Paris")).is_err());
    }

    #[tokio::test]
    async fn has_no_server_body() {
        let err = UserTimezoneTool.execute(serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::ClientFulfilled(_)));
    }

    #[test]
    fn answer_uses_camel_case() {
        let now = DateTime::parse_from_rfc3339("2026-03-01T09:30:00+01:00").unwrap();
        let answer = TimezoneAnswer::new("Europe/Paris", now);
        let value = answer.to_value();
        assert_eq!(value["timezone"], "Europe/Paris");
        assert_eq!(value["localTime"], "2026-03-01T09:30:00+01:00");
    }
}
