use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};
use tracing::info;

use crate::tools::{Tool, parse_params};

pub const DEFAULT_IMAGE_API_URL: &str = "http://localhost:9080";

/// Generate an image through an HTTP image generation API.
///
/// The API receives `{"image_description": ...}` and must answer with
/// `{"base64_image": ...}`.
pub struct GenerateImageTool {
    endpoint: String,
}

impl GenerateImageTool {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Tool for GenerateImageTool {
    fn name(&self) -> &str {
        "generate_image"
    }

    fn description(&self) -> &str {
        "Generate an image from a text description via the image API"
    }

    fn required_params(&self) -> &[&'static str] {
        &["description"]
    }

    async fn invoke(&self, params: &str) -> Result<Value> {
        let params = parse_params(params, self.required_params())?;
        let description = params
            .get("description")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("generate_image requires 'description' string"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;

        let response = client
            .post(&self.endpoint)
            .json(&json!({ "image_description": description }))
            .send()
            .await
            .with_context(|| format!("Image API request to {} failed", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Image generation API returned status {}", status.as_u16());
        }

        let body: Value = response.json().await?;
        let encoded = body
            .get("base64_image")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("No base64 image data in response"))?;

        let bytes = STANDARD
            .decode(encoded)
            .context("Image API returned invalid base64 data")?;

        info!(bytes = bytes.len(), "Generated image");

        Ok(json!({
            "image_base64": encoded,
            "bytes": bytes.len(),
            "success": true,
        }))
    }
}
