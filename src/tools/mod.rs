pub mod builtin;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::storage::RecordStore;

/// Trait that all tools must implement.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name as referenced by `call_tool` steps (e.g., "get_weather").
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// Parameter keys the tool cannot run without.
    fn required_params(&self) -> &[&'static str] {
        &[]
    }

    /// Invoke the tool with its parameters serialized as a JSON object.
    /// Returns JSON, or a bare string for text-only tools.
    async fn invoke(&self, params: &str) -> Result<Value>;
}

/// Registry of available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Create a registry with all stateless built-in tools registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register_all(&mut registry);
        registry
    }

    /// Built-ins plus the record tools bound to `records`.
    pub fn with_store(records: Arc<dyn RecordStore>) -> Self {
        let mut registry = Self::with_builtins();
        builtin::register_store_tools(&mut registry, records);
        registry
    }

    /// Register a tool, replacing any existing tool of the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Create a clone of this registry (all tools are Arc-shared).
    pub fn snapshot(&self) -> Self {
        Self {
            tools: self.tools.clone(),
        }
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Names from `required` that are not registered, in input order.
    pub fn missing<'a>(&self, required: &'a [String]) -> Vec<&'a str> {
        required
            .iter()
            .filter(|name| !self.contains(name))
            .map(String::as_str)
            .collect()
    }

    /// Invoke a tool by name.
    pub async fn invoke(&self, name: &str, params: &str) -> Result<Value> {
        let tool = self
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("Unknown tool: {}", name))?;
        tool.invoke(params).await
    }

    /// List all registered tools with descriptions, sorted by name.
    pub fn list(&self) -> Vec<(&str, &str)> {
        let mut entries: Vec<(&str, &str)> = self
            .tools
            .values()
            .map(|t| (t.name(), t.description()))
            .collect();
        entries.sort_by_key(|(name, _)| *name);
        entries
    }
}

/// Parse a tool's JSON parameter text into an object and check required keys.
/// A `null` parameter counts as missing.
pub fn parse_params(params: &str, required: &[&str]) -> Result<Map<String, Value>> {
    let value: Value = if params.trim().is_empty() {
        Value::Object(Map::new())
    } else {
        serde_json::from_str(params)
            .map_err(|e| anyhow::anyhow!("Tool parameters are not valid JSON: {}", e))?
    };

    let map = match value {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => anyhow::bail!("Tool parameters must be a JSON object, got: {}", other),
    };

    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|key| map.get(*key).is_none_or(Value::is_null))
        .collect();
    if !missing.is_empty() {
        anyhow::bail!("Missing required parameter(s): {}", missing.join(", "));
    }

    Ok(map)
}
