use anyhow::Result;
use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use serde_json::{Value, json};

use crate::tools::{Tool, parse_params};

pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Return the current UTC time, optionally shifted by offset_seconds"
    }

    async fn invoke(&self, params: &str) -> Result<Value> {
        let params = parse_params(params, &[])?;
        let offset = params
            .get("offset_seconds")
            .and_then(|v| v.as_i64())
            .unwrap_or(0);

        let delta = TimeDelta::try_seconds(offset)
            .ok_or_else(|| anyhow::anyhow!("offset_seconds out of range: {}", offset))?;
        let at = Utc::now()
            .checked_add_signed(delta)
            .ok_or_else(|| anyhow::anyhow!("offset_seconds out of range: {}", offset))?;

        Ok(json!({
            "now": at.to_rfc3339(),
            "timestamp": at.timestamp(),
        }))
    }
}
