use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{Value, json};

use crate::tools::{Tool, parse_params};

pub struct HttpRequestTool;

#[async_trait]
impl Tool for HttpRequestTool {
    fn name(&self) -> &str {
        "http_request"
    }

    fn description(&self) -> &str {
        "Generic HTTP request with configurable method, headers and JSON body"
    }

    fn required_params(&self) -> &[&'static str] {
        &["url"]
    }

    async fn invoke(&self, params: &str) -> Result<Value> {
        let params = parse_params(params, self.required_params())?;

        let url = params
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("http_request requires 'url' string"))?;

        let method = params
            .get("method")
            .and_then(|v| v.as_str())
            .unwrap_or("GET")
            .to_uppercase();

        let timeout_s = params
            .get("timeout")
            .and_then(|v| v.as_f64())
            .unwrap_or(30.0);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs_f64(timeout_s))
            .build()?;

        let mut request = match method.as_str() {
            "GET" => client.get(url),
            "POST" => client.post(url),
            "PUT" => client.put(url),
            "DELETE" => client.delete(url),
            "PATCH" => client.patch(url),
            _ => anyhow::bail!("Unsupported HTTP method: {}", method),
        };

        if let Some(headers) = params.get("headers").and_then(|v| v.as_object()) {
            let mut header_map = HeaderMap::new();
            for (k, v) in headers {
                if let Some(val) = v.as_str() {
                    header_map.insert(
                        HeaderName::from_bytes(k.as_bytes())?,
                        HeaderValue::from_str(val)?,
                    );
                }
            }
            request = request.headers(header_map);
        }

        if let Some(token) = params.get("bearer_token").and_then(|v| v.as_str()) {
            request = request.bearer_auth(token);
        }

        if let Some(body) = params.get("body").filter(|b| !b.is_null()) {
            request = request.json(body);
        }

        let response = request.send().await?;

        let status = response.status().as_u16();
        let success = response.status().is_success();
        let resp_headers: serde_json::Map<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.to_string(),
                    Value::String(v.to_str().unwrap_or("").to_string()),
                )
            })
            .collect();

        let body_text = response.text().await?;

        // Try to parse as JSON, fall back to string
        let data: Value = serde_json::from_str(&body_text).unwrap_or(Value::String(body_text));

        if !success {
            anyhow::bail!("HTTP {} {} returned status {}", method, url, status);
        }

        Ok(json!({
            "status": status,
            "success": success,
            "data": data,
            "headers": resp_headers,
        }))
    }
}
