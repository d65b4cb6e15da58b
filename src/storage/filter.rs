use serde_json::Value;

use crate::storage::Record;

/// A single field condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq { field: String, value: Value },
    In { field: String, values: Vec<Value> },
}

impl Condition {
    fn matches(&self, record: &Record) -> bool {
        match self {
            Condition::Eq { field, value } => record
                .get(field)
                .is_some_and(|actual| values_match(actual, value)),
            Condition::In { field, values } => record
                .get(field)
                .is_some_and(|actual| values.iter().any(|v| values_match(actual, v))),
        }
    }
}

/// Conjunction of field conditions. An empty filter matches every record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Eq {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn any_of<V: Into<Value>>(
        mut self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.conditions.push(Condition::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.conditions.iter().all(|c| c.matches(record))
    }

    /// Build a filter from `{ "field": value, "other": [a, b] }`.
    /// Array values mean "any of".
    pub fn from_json(raw: &Value) -> Result<Self, String> {
        let map = match raw {
            Value::Null => return Ok(Self::new()),
            Value::Object(map) => map,
            other => return Err(format!("filter must be an object, got: {}", other)),
        };

        Ok(map.iter().fold(Self::new(), |filter, (field, value)| match value {
            Value::Array(values) => filter.any_of(field.clone(), values.clone()),
            other => filter.eq(field.clone(), other.clone()),
        }))
    }
}

/// Renders as a NocoDB-style where clause, e.g. `(agent_name,eq,a)~and(status,in,Running,Waiting)`.
impl std::fmt::Display for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let clauses: Vec<String> = self
            .conditions
            .iter()
            .map(|c| match c {
                Condition::Eq { field, value } => format!("({},eq,{})", field, as_text(value)),
                Condition::In { field, values } => format!(
                    "({},in,{})",
                    field,
                    values.iter().map(as_text).collect::<Vec<_>>().join(",")
                ),
            })
            .collect();
        f.write_str(&clauses.join("~and"))
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Stores may hand back numbers as text and vice versa; compare loosely.
fn values_match(actual: &Value, expected: &Value) -> bool {
    actual == expected
        || (!actual.is_object()
            && !actual.is_array()
            && !actual.is_null()
            && as_text(actual) == as_text(expected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_eq_and_in() {
        let filter = Filter::new()
            .eq("agent_name", "scout")
            .any_of("status", ["Running", "Waiting"]);

        assert!(filter.matches(&record(json!({"agent_name": "scout", "status": "Waiting"}))));
        assert!(!filter.matches(&record(json!({"agent_name": "scout", "status": "Completed"}))));
        assert!(!filter.matches(&record(json!({"agent_name": "other", "status": "Running"}))));
        assert!(!filter.matches(&record(json!({"status": "Running"}))));
    }

    #[test]
    fn test_number_text_lenience() {
        let filter = Filter::new().eq("priority", 3);
        assert!(filter.matches(&record(json!({"priority": "3"}))));
    }

    #[test]
    fn test_from_json() {
        let filter = Filter::from_json(&json!({"agent_name": "a", "status": ["Running"]})).unwrap();
        assert_eq!(filter.conditions().len(), 2);
        assert!(Filter::from_json(&json!("nope")).is_err());
    }

    #[test]
    fn test_where_clause_display() {
        let filter = Filter::new()
            .eq("agent_name", "scout")
            .any_of("status", ["Running", "Paused"]);
        assert_eq!(
            filter.to_string(),
            "(agent_name,eq,scout)~and(status,in,Running,Paused)"
        );
    }
}
