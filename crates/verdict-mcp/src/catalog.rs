use std::collections::BTreeMap;

use serde_json::{json, Value};

/// Per-run map of tool descriptors keyed by name.
///
/// Rebuilt from the `tools/list` response at the start of every evaluation
/// case; the server may be restarted or reconfigured between cases, so
/// nothing is cached across runs.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    tools: BTreeMap<String, Value>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingests descriptors from a `tools/list` result. Entries without a
    /// usable name are skipped; duplicate names are last-write-wins.
    pub fn register(&mut self, tools: &[Value]) {
        for tool in tools {
            let Some(name) = tool
                .get("name")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|name| !name.is_empty())
            else {
                continue;
            };
            self.tools.insert(name.to_string(), tool.clone());
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.tools.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn clear(&mut self) {
        self.tools.clear();
    }

    /// Projects every descriptor into the model function-calling format.
    pub fn to_model_schema(&self) -> Vec<Value> {
        self.tools
            .iter()
            .map(|(name, tool)| {
                json!({
                    "type": "function",
                    "function": {
                        "name": name,
                        "description": tool
                            .get("description")
                            .and_then(Value::as_str)
                            .unwrap_or_default(),
                        "parameters": normalize_input_schema(tool.get("inputSchema")),
                    },
                })
            })
            .collect()
    }

    /// Checks a proposed call against the registered descriptor: the tool
    /// must exist and every field its schema marks required must be present
    /// in the arguments.
    pub fn validate_tool_call(&self, name: &str, arguments: &Value) -> Result<(), String> {
        let Some(tool) = self.tools.get(name) else {
            return Err(format!("Tool '{name}' not found in catalog"));
        };
        let required = tool
            .get("inputSchema")
            .and_then(|schema| schema.get("required"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for field in required.iter().filter_map(Value::as_str) {
            let present = arguments
                .as_object()
                .is_some_and(|map| map.contains_key(field));
            if !present {
                return Err(format!("Required field '{field}' missing from arguments"));
            }
        }
        Ok(())
    }
}

/// Normalizes a tool's native input schema into the model's parameter
/// schema. Always produces a valid object-typed schema; a missing or
/// malformed input schema becomes an empty one.
fn normalize_input_schema(schema: Option<&Value>) -> Value {
    let empty = || json!({"type": "object", "properties": {}, "required": []});
    let Some(Value::Object(map)) = schema else {
        return empty();
    };
    if map.get("type").and_then(Value::as_str) == Some("object") {
        return Value::Object(map.clone());
    }
    if let Some(properties) = map.get("properties") {
        return json!({
            "type": "object",
            "properties": properties,
            "required": map.get("required").cloned().unwrap_or_else(|| json!([])),
        });
    }
    empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str, schema: Value) -> Value {
        json!({
            "name": name,
            "description": format!("{name} tool"),
            "inputSchema": schema,
        })
    }

    #[test]
    fn unit_register_is_keyed_by_name_last_write_wins() {
        let mut catalog = ToolCatalog::new();
        catalog.register(&[
            descriptor("search", json!({"type": "object"})),
            json!({"description": "nameless, skipped"}),
            json!({
                "name": "search",
                "description": "replacement",
                "inputSchema": {"type": "object"},
            }),
        ]);
        assert_eq!(catalog.len(), 1);
        assert_eq!(
            catalog.get("search").and_then(|tool| tool["description"].as_str()),
            Some("replacement")
        );
    }

    #[test]
    fn unit_clear_then_register_empty_yields_empty_projection() {
        let mut catalog = ToolCatalog::new();
        catalog.register(&[descriptor("search", json!({"type": "object"}))]);
        catalog.clear();
        catalog.register(&[]);
        assert!(catalog.is_empty());
        assert!(catalog.to_model_schema().is_empty());
    }

    #[test]
    fn functional_object_schema_round_trips_through_projection() {
        let mut catalog = ToolCatalog::new();
        catalog.register(&[descriptor(
            "search",
            json!({
                "properties": {"x": {"type": "string"}},
                "required": ["x"],
            }),
        )]);

        let schema = catalog.to_model_schema();
        assert_eq!(schema.len(), 1);
        assert_eq!(schema[0]["type"], "function");
        assert_eq!(schema[0]["function"]["name"], "search");
        let parameters = &schema[0]["function"]["parameters"];
        assert_eq!(parameters["type"], "object");
        assert_eq!(parameters["properties"]["x"]["type"], "string");
        assert_eq!(parameters["required"], json!(["x"]));
    }

    #[test]
    fn unit_missing_or_malformed_schema_defaults_to_empty_object() {
        let mut catalog = ToolCatalog::new();
        catalog.register(&[
            json!({"name": "bare"}),
            descriptor("scalar", json!("not a schema")),
        ]);

        for projected in catalog.to_model_schema() {
            let parameters = &projected["function"]["parameters"];
            assert_eq!(parameters["type"], "object");
            assert_eq!(parameters["properties"], json!({}));
            assert_eq!(parameters["required"], json!([]));
        }
    }

    #[test]
    fn unit_explicit_object_schema_passes_through_unchanged() {
        let input = json!({
            "type": "object",
            "properties": {"q": {"type": "string"}},
            "required": ["q"],
            "additionalProperties": false,
        });
        let mut catalog = ToolCatalog::new();
        catalog.register(&[descriptor("search", input.clone())]);
        assert_eq!(catalog.to_model_schema()[0]["function"]["parameters"], input);
    }

    #[test]
    fn functional_validate_tool_call_checks_declared_required_fields() {
        let mut catalog = ToolCatalog::new();
        catalog.register(&[descriptor(
            "search",
            json!({
                "type": "object",
                "properties": {"query": {"type": "string"}},
                "required": ["query"],
            }),
        )]);

        assert!(catalog
            .validate_tool_call("search", &json!({"query": "cats"}))
            .is_ok());
        let missing = catalog
            .validate_tool_call("search", &json!({}))
            .expect_err("missing field");
        assert!(missing.contains("query"));
        let unknown = catalog
            .validate_tool_call("lookup", &json!({}))
            .expect_err("unknown tool");
        assert!(unknown.contains("lookup"));
    }
}
