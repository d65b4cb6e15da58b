use serde_json::Value;

use crate::engine::types::Environment;

/// Substitute `{{environment.key}}` and `{{env.key}}` placeholders.
///
/// A key is first looked up verbatim (keys may contain dots), then as a dotted
/// path into nested objects. Placeholders that resolve to nothing are left as-is.
pub fn render_template(template: &str, env: &Environment) -> String {
    let mut result = template.to_string();
    let mut start = 0;

    loop {
        let open = match result[start..].find("{{") {
            Some(pos) => start + pos,
            None => break,
        };

        let close = match result[open..].find("}}") {
            Some(pos) => open + pos,
            None => break,
        };

        let inner = result[open + 2..close].trim();
        let key = inner
            .strip_prefix("environment.")
            .or_else(|| inner.strip_prefix("env."));

        match key.and_then(|k| lookup(k, env)) {
            Some(value) => {
                let rendered = display_value(value);
                result.replace_range(open..close + 2, &rendered);
                start = open + rendered.len();
            }
            None => start = close + 2,
        }
    }

    result
}

fn lookup<'a>(key: &str, env: &'a Environment) -> Option<&'a Value> {
    if let Some(value) = env.get(key) {
        return Some(value);
    }

    let mut parts = key.split('.');
    let mut current = env.get(parts.next()?)?;
    for part in parts {
        current = current.get(part)?;
    }
    Some(current)
}

/// Strings render bare; everything else as compact JSON.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env(pairs: &[(&str, Value)]) -> Environment {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_both_prefixes() {
        let env = env(&[("name", json!("Alice")), ("count", json!(3))]);
        assert_eq!(
            render_template("{{environment.name}} has {{env.count}} items", &env),
            "Alice has 3 items"
        );
    }

    #[test]
    fn test_nested_path() {
        let env = env(&[("user", json!({"email": "alice@example.com"}))]);
        assert_eq!(
            render_template("Email: {{env.user.email}}", &env),
            "Email: alice@example.com"
        );
    }

    #[test]
    fn test_dotted_key_wins_over_path() {
        let env = env(&[("a.b", json!("flat")), ("a", json!({"b": "nested"}))]);
        assert_eq!(render_template("{{env.a.b}}", &env), "flat");
    }

    #[test]
    fn test_missing_key_left_in_place() {
        let env = env(&[("x", json!(1))]);
        assert_eq!(
            render_template("{{env.missing}} and {{env.x}}", &env),
            "{{env.missing}} and 1"
        );
    }

    #[test]
    fn test_other_placeholders_untouched() {
        let env = env(&[("x", json!(1))]);
        assert_eq!(render_template("{{ctx.x}} {{ env.x }}", &env), "{{ctx.x}} 1");
    }

    #[test]
    fn test_non_string_values_render_as_json() {
        let env = env(&[("list", json!([1, 2])), ("flag", json!(true)), ("none", Value::Null)]);
        assert_eq!(
            render_template("{{env.list}} {{env.flag}} {{env.none}}", &env),
            "[1,2] true null"
        );
    }

    #[test]
    fn test_no_placeholders() {
        assert_eq!(render_template("plain text", &Environment::new()), "plain text");
    }
}
