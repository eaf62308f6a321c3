//! Operation extraction and the verb shape tables
//!
//! Every verb on the allow-list maps to a canonical input shape, a canonical
//! output shape and a footprint overhead. Downstream callers depend on these
//! shapes, so changes here are wire changes.

use nf_core::{NodeDescriptor, Verb};
use serde_json::{json, Value};

/// Upper bound on operation tools per node
pub const MAX_OPERATIONS_PER_NODE: usize = 5;

/// Properties whose option values name a node's operations
const OPERATION_PROPERTIES: [&str; 3] = ["operation", "resource", "method"];

/// Operations a node exposes as dedicated tools.
///
/// Option values of `operation`/`resource`/`method` properties are filtered
/// through the verb allow-list. When nothing survives, the category defaults
/// apply. Declaration order is kept and the result is capped.
pub fn extract_operations(node: &NodeDescriptor) -> Vec<Verb> {
    let mut verbs = Vec::new();
    for value in declared_operation_values(node) {
        if let Some(verb) = Verb::parse(&value) {
            if !verbs.contains(&verb) {
                verbs.push(verb);
            }
        }
    }

    if verbs.is_empty() {
        verbs = default_verbs(node.primary_category());
    }
    verbs.truncate(MAX_OPERATIONS_PER_NODE);
    verbs
}

/// Raw option values of the operation-shaped properties, allow-listed or not
pub fn declared_operation_values(node: &NodeDescriptor) -> Vec<String> {
    let properties: Vec<&Value> = match &node.properties {
        Value::Array(items) => items
            .iter()
            .filter(|property| {
                property
                    .get("name")
                    .and_then(Value::as_str)
                    .map_or(false, |name| OPERATION_PROPERTIES.contains(&name))
            })
            .collect(),
        Value::Object(map) => map
            .iter()
            .filter(|(key, _)| OPERATION_PROPERTIES.contains(&key.as_str()))
            .map(|(_, def)| def)
            .collect(),
        _ => Vec::new(),
    };

    properties
        .into_iter()
        .filter_map(|property| property.get("options").and_then(Value::as_array))
        .flatten()
        .filter_map(|option| option.get("value").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

/// Default verbs for a node that declares none of its own
pub fn default_verbs(category: &str) -> Vec<Verb> {
    let category = category.to_lowercase();
    if category.contains("trigger") {
        vec![Verb::Trigger, Verb::Webhook, Verb::Poll]
    } else if category.contains("communication") {
        vec![Verb::Send, Verb::List]
    } else if category.contains("storage") || category.contains("database") {
        vec![
            Verb::Create,
            Verb::Read,
            Verb::Update,
            Verb::Delete,
            Verb::List,
        ]
    } else {
        vec![Verb::Execute]
    }
}

fn id_param() -> Value {
    json!({"type": "string", "description": "Identifier of the target record"})
}

fn data_param() -> Value {
    json!({"type": "object", "description": "Record fields"})
}

fn destination_param() -> Value {
    json!({"type": "string", "description": "Where to store the file"})
}

/// Free-form parameter bag used by verbs without a dedicated shape
pub fn parameter_bag() -> Value {
    json!({
        "type": "object",
        "properties": {
            "parameters": {"type": "object", "description": "Node parameters"}
        }
    })
}

/// Canonical input shape of a verb
pub fn input_shape(verb: Verb) -> Value {
    match verb {
        Verb::Create => json!({
            "type": "object",
            "properties": {"data": data_param()},
            "required": ["data"]
        }),
        Verb::Read | Verb::Get => json!({
            "type": "object",
            "properties": {"id": id_param()},
            "required": ["id"]
        }),
        Verb::Update => json!({
            "type": "object",
            "properties": {"id": id_param(), "data": data_param()},
            "required": ["id", "data"]
        }),
        Verb::Delete => json!({
            "type": "object",
            "properties": {"id": id_param()},
            "required": ["id"]
        }),
        Verb::List => json!({
            "type": "object",
            "properties": {
                "limit": {"type": "number", "default": 50},
                "offset": {"type": "number", "default": 0},
                "filters": {"type": "object"}
            }
        }),
        Verb::Search => json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Search query"},
                "limit": {"type": "number", "default": 50},
                "filters": {"type": "object"}
            },
            "required": ["query"]
        }),
        Verb::Send => json!({
            "type": "object",
            "properties": {
                "message": {"type": "string", "description": "Message content"},
                "to": {"type": "string", "description": "Recipient"},
                "options": {"type": "object"}
            },
            "required": ["message"]
        }),
        Verb::Upload => json!({
            "type": "object",
            "properties": {
                "file": {"type": "string", "description": "File content or binary property name"},
                "destination": destination_param()
            },
            "required": ["file"]
        }),
        Verb::Download => json!({
            "type": "object",
            "properties": {"id": id_param(), "destination": destination_param()},
            "required": ["id"]
        }),
        Verb::Execute => json!({
            "type": "object",
            "properties": {
                "parameters": {"type": "object", "description": "Node parameters"},
                "inputData": {"type": "array", "items": {"type": "object"}}
            }
        }),
        Verb::Trigger => json!({
            "type": "object",
            "properties": {
                "event": {"type": "string", "description": "Event name"},
                "payload": {"type": "object"}
            }
        }),
        Verb::Webhook | Verb::Poll => parameter_bag(),
    }
}

/// Canonical output shape of a verb
pub fn output_shape(verb: Verb) -> Value {
    match verb {
        Verb::List => json!({
            "type": "object",
            "properties": {
                "items": {"type": "array", "items": {"type": "object"}},
                "count": {"type": "number"},
                "hasMore": {"type": "boolean"}
            }
        }),
        Verb::Search => json!({
            "type": "object",
            "properties": {
                "results": {"type": "array", "items": {"type": "object"}},
                "count": {"type": "number"}
            }
        }),
        Verb::Create | Verb::Update => json!({
            "type": "object",
            "properties": {
                "id": {"type": "string"},
                "data": {"type": "object"},
                "success": {"type": "boolean"}
            }
        }),
        Verb::Read | Verb::Get => json!({
            "type": "object",
            "properties": {
                "id": {"type": "string"},
                "data": {"type": "object"}
            }
        }),
        Verb::Delete => json!({
            "type": "object",
            "properties": {
                "id": {"type": "string"},
                "deleted": {"type": "boolean"}
            }
        }),
        Verb::Send => json!({
            "type": "object",
            "properties": {
                "success": {"type": "boolean"},
                "messageId": {"type": "string"}
            }
        }),
        Verb::Upload => json!({
            "type": "object",
            "properties": {
                "success": {"type": "boolean"},
                "fileId": {"type": "string"},
                "url": {"type": "string"}
            }
        }),
        Verb::Download => json!({
            "type": "object",
            "properties": {
                "data": {"type": "string"},
                "mimeType": {"type": "string"},
                "fileName": {"type": "string"}
            }
        }),
        Verb::Execute | Verb::Trigger | Verb::Webhook | Verb::Poll => generic_output(),
    }
}

/// Output of general tools and verbs without a dedicated shape
pub fn generic_output() -> Value {
    json!({
        "type": "object",
        "properties": {
            "success": {"type": "boolean"},
            "data": {}
        }
    })
}

/// Footprint overhead, in estimated bytes, of materializing a verb's tool
pub fn overhead(verb: Verb) -> usize {
    match verb {
        Verb::Delete => 50,
        Verb::Read | Verb::Get => 100,
        Verb::Trigger | Verb::Webhook | Verb::Poll => 100,
        Verb::Create | Verb::Update | Verb::Send => 150,
        Verb::List | Verb::Execute => 200,
        Verb::Search => 250,
        Verb::Upload | Verb::Download => 300,
    }
}

/// Input of an operation tool: the verb shape with the node's own parameters nested
pub fn operation_input_schema(verb: Verb, node_shape: Option<&Value>) -> Value {
    let mut shape = input_shape(verb);
    let node_parameters = node_shape
        .cloned()
        .unwrap_or_else(|| json!({"type": "object"}));
    if let Some(properties) = shape.get_mut("properties").and_then(Value::as_object_mut) {
        properties.insert("nodeParameters".to_string(), node_parameters);
    }
    shape
}

/// Input of a general tool: node parameters plus optional input data and credentials
pub fn general_input_schema(node_shape: Option<&Value>) -> Value {
    json!({
        "type": "object",
        "properties": {
            "parameters": node_shape.cloned().unwrap_or_else(|| json!({"type": "object"})),
            "inputData": {"type": "array", "items": {"type": "object"}},
            "credentials": {"type": "string", "description": "Credential to use"}
        }
    })
}

/// Aggregate actions a category tool offers
pub const CATEGORY_ACTIONS: [&str; 4] = ["list", "search", "recommend", "compare"];

pub fn category_input_schema(category: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "action": {"type": "string", "enum": CATEGORY_ACTIONS},
            "query": {"type": "string", "description": format!("Filter within {}", category)},
            "nodes": {"type": "array", "items": {"type": "string"}, "description": "Nodes to compare"},
            "limit": {"type": "number", "default": 10}
        },
        "required": ["action"]
    })
}

pub fn category_output_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "nodes": {"type": "array", "items": {"type": "object"}},
            "count": {"type": "number"}
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_verbs_are_filtered() {
        let node = NodeDescriptor::new("n8n-nodes-base.crm", "CRM").with_properties(json!([{
            "name": "operation",
            "type": "options",
            "options": [
                {"name": "Create", "value": "create"},
                {"name": "Read", "value": "read"},
                {"name": "Other", "value": "unknownVerb"}
            ]
        }]));
        assert_eq!(extract_operations(&node), vec![Verb::Create, Verb::Read]);
    }

    #[test]
    fn test_operations_are_capped() {
        let options: Vec<Value> = ["create", "read", "update", "delete", "list", "get", "search"]
            .iter()
            .map(|v| json!({"value": v}))
            .collect();
        let node = NodeDescriptor::new("big", "Big")
            .with_properties(json!([{"name": "operation", "type": "options", "options": options}]));
        let verbs = extract_operations(&node);
        assert_eq!(verbs.len(), MAX_OPERATIONS_PER_NODE);
        assert_eq!(verbs[0], Verb::Create);
    }

    #[test]
    fn test_category_defaults() {
        let trigger = NodeDescriptor::new("t", "T").with_category("Trigger Nodes");
        assert_eq!(
            extract_operations(&trigger),
            vec![Verb::Trigger, Verb::Webhook, Verb::Poll]
        );

        let chat = NodeDescriptor::new("c", "C").with_category("Communication");
        assert_eq!(extract_operations(&chat), vec![Verb::Send, Verb::List]);

        let plain = NodeDescriptor::new("p", "P");
        assert_eq!(extract_operations(&plain), vec![Verb::Execute]);
    }

    #[test]
    fn test_only_unknown_verbs_fall_back_to_defaults() {
        let node = NodeDescriptor::new("db", "DB")
            .with_category("Data & Storage")
            .with_properties(json!([{
                "name": "operation",
                "type": "options",
                "options": [{"value": "executeQuery"}, {"value": "upsert"}]
            }]));
        assert_eq!(extract_operations(&node).len(), 5);
        assert_eq!(
            declared_operation_values(&node),
            vec!["executeQuery", "upsert"]
        );
    }

    #[test]
    fn test_verb_shapes() {
        assert_eq!(input_shape(Verb::Update)["required"], json!(["id", "data"]));
        assert!(input_shape(Verb::List)["properties"].get("offset").is_some());
        assert!(output_shape(Verb::List)["properties"].get("hasMore").is_some());
        assert_eq!(input_shape(Verb::Poll), parameter_bag());
        assert_eq!(output_shape(Verb::Webhook), generic_output());
        assert_eq!(overhead(Verb::Search), 250);
    }

    #[test]
    fn test_operation_input_nests_node_parameters() {
        let node_shape = json!({"type": "object", "properties": {"channel": {"type": "string"}}});
        let shape = operation_input_schema(Verb::Send, Some(&node_shape));
        assert_eq!(shape["properties"]["nodeParameters"], node_shape);
        assert_eq!(shape["required"], json!(["message"]));
    }
}
