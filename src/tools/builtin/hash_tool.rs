use anyhow::Result;
use async_trait::async_trait;
use md5::Md5;
use serde_json::{Value, json};
use sha2::{Digest, Sha256, Sha512};

use crate::tools::{Tool, parse_params};

pub struct HashTool;

#[async_trait]
impl Tool for HashTool {
    fn name(&self) -> &str {
        "hash"
    }

    fn description(&self) -> &str {
        "Compute a hash (SHA-256, SHA-512, MD5) of a value"
    }

    fn required_params(&self) -> &[&'static str] {
        &["input"]
    }

    async fn invoke(&self, params: &str) -> Result<Value> {
        let params = parse_params(params, self.required_params())?;

        let algorithm = params
            .get("algorithm")
            .and_then(|v| v.as_str())
            .unwrap_or("sha256")
            .to_lowercase();

        let input = match params.get("input") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => serde_json::to_string(other)?,
            None => anyhow::bail!("hash requires 'input'"),
        };

        let digest = match algorithm.as_str() {
            "sha256" | "sha-256" => hex::encode(Sha256::digest(input.as_bytes())),
            "sha512" | "sha-512" => hex::encode(Sha512::digest(input.as_bytes())),
            "md5" => hex::encode(Md5::digest(input.as_bytes())),
            _ => anyhow::bail!(
                "Unsupported hash algorithm '{}'. Use: sha256, sha512, md5",
                algorithm
            ),
        };

        Ok(json!({ "hash": digest, "algorithm": algorithm }))
    }
}
