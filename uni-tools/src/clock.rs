use crate::error::{Result, ToolError};
use crate::traits::{ToolSpec, TypedTool};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClockInput {
    /// strftime pattern applied to the local time.
    pub format: Option<String>,
    pub utc_offset_minutes: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct ClockOutput {
    pub utc: String,
    pub unix_seconds: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local: Option<String>,
}

/// Current time. Register with `TypedToolAdapter::new(ClockTool::new())`.
#[derive(Debug, Default)]
pub struct ClockTool;

impl ClockTool {
    pub fn new() -> Self {
        Self
    }

    fn render(now: DateTime<Utc>, input: &ClockInput) -> Result<ClockOutput> {
        let local = match (input.utc_offset_minutes, input.format.as_deref()) {
            (None, None) => None,
            (minutes, format) => {
                let minutes = minutes.unwrap_or(0);
                let offset = minutes
                    .checked_mul(60)
                    .and_then(FixedOffset::east_opt)
                    .ok_or_else(|| {
                        ToolError::InvalidArguments(format!(
                            "utc_offset_minutes out of range: {minutes}"
                        ))
                    })?;
                let shifted = now.with_timezone(&offset);
                match format {
                    Some(pattern) => {
                        let mut out = String::new();
                        write!(out, "{}", shifted.format(pattern)).map_err(|_| {
                            ToolError::InvalidArguments(format!("invalid format: {pattern}"))
                        })?;
                        Some(out)
                    }
                    None => Some(shifted.to_rfc3339_opts(SecondsFormat::Secs, false)),
                }
            }
        };

        Ok(ClockOutput {
            utc: now.to_rfc3339_opts(SecondsFormat::Secs, true),
            unix_seconds: now.timestamp(),
            local,
        })
    }
}

#[async_trait]
impl TypedTool for ClockTool {
    type Input = ClockInput;
    type Output = ClockOutput;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "clock".to_string(),
            description: "Get the current date and time.".to_string(),
            parameters_schema: serde_json::json!({
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "format": {
                        "type": "string",
                        "description": "Optional strftime pattern, e.g. %Y-%m-%d %H:%M"
                    },
                    "utc_offset_minutes": {
                        "type": "integer",
                        "description": "Optional offset from UTC for the local rendering"
                    }
                }
            }),
        }
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn call(&self, input: ClockInput, _cancel: &CancellationToken) -> Result<ClockOutput> {
        Self::render(Utc::now(), &input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{Tool, TypedToolAdapter};
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 0)
            .single()
            .expect("valid timestamp")
    }

    #[test]
    fn renders_utc_and_unix_seconds() {
        let out = ClockTool::render(fixed_now(), &ClockInput::default()).expect("render");
        assert_eq!(out.utc, "2024-03-09T14:05:00Z");
        assert_eq!(out.unix_seconds, 1_709_993_100);
        assert!(out.local.is_none());
    }

    #[test]
    fn applies_offset_and_format() {
        let input = ClockInput {
            format: Some("%Y-%m-%d %H:%M".to_string()),
            utc_offset_minutes: Some(-300),
        };
        let out = ClockTool::render(fixed_now(), &input).expect("render");
        assert_eq!(out.local.as_deref(), Some("2024-03-09 09:05"));

        let input = ClockInput {
            format: None,
            utc_offset_minutes: Some(60),
        };
        let out = ClockTool::render(fixed_now(), &input).expect("render");
        assert_eq!(out.local.as_deref(), Some("2024-03-09T15:05:00+01:00"));
    }

    #[test]
    fn rejects_out_of_range_offset() {
        let input = ClockInput {
            format: None,
            utc_offset_minutes: Some(24 * 60),
        };
        let err = ClockTool::render(fixed_now(), &input).expect_err("offset");
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn executes_through_adapter_with_empty_arguments() {
        let tool = TypedToolAdapter::new(ClockTool::new());
        let out = tool
            .execute(&serde_json::json!({}), &CancellationToken::new())
            .await
            .expect("execute");
        let body: serde_json::Value = serde_json::from_str(&out).expect("json");
        assert!(body["utc"].as_str().is_some_and(|s| s.ends_with('Z')));
        assert!(body["unix_seconds"].as_i64().is_some());
        assert!(body.get("local").is_none());
    }
}
