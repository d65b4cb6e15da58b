use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::tools::{Tool, parse_params};

/// Stub weather lookup. Always reports sunny weather.
pub struct GetWeatherTool;

#[async_trait]
impl Tool for GetWeatherTool {
    fn name(&self) -> &str {
        "get_weather"
    }

    fn description(&self) -> &str {
        "Get the current weather for a location"
    }

    async fn invoke(&self, params: &str) -> Result<Value> {
        let params = parse_params(params, &[])?;
        let location = params
            .get("location")
            .and_then(|v| v.as_str())
            .filter(|l| !l.is_empty() && !l.eq_ignore_ascii_case("default"))
            .unwrap_or("default location");

        info!(location = %location, "Weather tool called");
        Ok(Value::String("sunny".to_string()))
    }
}
