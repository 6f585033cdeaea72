//! Current time tool.

use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
use serde_json::{Value, json};
use wardline_core::error::ToolError;
use wardline_core::tool::{ParamType, Tool, ToolArgs, ToolParam};

pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Get the current date and time, optionally shifted to a UTC offset."
    }

    fn parameters(&self) -> Vec<ToolParam> {
        vec![
            ToolParam::optional("utc_offset_hours", ParamType::Integer)
                .describe("Hours east of UTC, between -12 and 14")
                .with_default(0),
            ToolParam::optional("format", ParamType::String)
                .describe("Output format")
                .with_default("rfc3339")
                .one_of(["rfc3339", "unix"]),
        ]
    }

    async fn execute(&self, args: ToolArgs) -> Result<Value, ToolError> {
        let hours = args.i64("utc_offset_hours").unwrap_or(0);
        let offset = i32::try_from(hours)
            .ok()
            .filter(|h| (-12..=14).contains(h))
            .and_then(|h| FixedOffset::east_opt(h * 3600))
            .ok_or_else(|| ToolError::InvalidArguments {
                tool_name: self.name().to_string(),
                reason: format!("utc_offset_hours out of range: {hours}"),
            })?;

        let now = Utc::now().with_timezone(&offset);
        match args.str("format").unwrap_or("rfc3339") {
            "unix" => Ok(json!(now.timestamp())),
            _ => Ok(json!(now.to_rfc3339())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rfc3339_with_offset() {
        let out = CurrentTimeTool
            .execute(ToolArgs::new().with("utc_offset_hours", 2).with("format", "rfc3339"))
            .await
            .unwrap();
        let text = out.as_str().unwrap();
        assert!(text.ends_with("+02:00"), "got {text}");
        assert!(chrono::DateTime::parse_from_rfc3339(text).is_ok());
    }

    #[tokio::test]
    async fn unix_timestamp() {
        let out = CurrentTimeTool
            .execute(ToolArgs::new().with("format", "unix"))
            .await
            .unwrap();
        assert!(out.as_i64().unwrap() > 1_600_000_000);
    }

    #[tokio::test]
    async fn offset_out_of_range() {
        let err = CurrentTimeTool
            .execute(ToolArgs::new().with("utc_offset_hours", 40))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }
}
