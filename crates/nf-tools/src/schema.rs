//! Schema Generator
//!
//! Converts node descriptors into typed parameter schemas. Property trees are
//! parsed defensively: a node whose properties cannot be understood is skipped
//! and reported, the rest of the batch still succeeds.

use nf_core::config::SchemaSettings;
use nf_core::hashing::stable_hash_of;
use nf_core::{Error, GeneratedSchema, NodeDescriptor, Result};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Schema generation options
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaOptions {
    /// Drop descriptions and defaults to shrink the payload
    pub token_optimized: bool,
    /// Include optional properties in the shape
    pub include_optional: bool,
    /// Nesting depth at which collections collapse to a bare object
    pub max_depth: usize,
}

impl Default for SchemaOptions {
    fn default() -> Self {
        Self::from(&SchemaSettings::default())
    }
}

impl From<&SchemaSettings> for SchemaOptions {
    fn from(settings: &SchemaSettings) -> Self {
        Self {
            token_optimized: settings.token_optimized,
            include_optional: settings.include_optional,
            max_depth: settings.max_depth,
        }
    }
}

/// A node that could not be converted
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedNode {
    pub node: String,
    pub reason: String,
}

/// Output of one generation pass
#[derive(Debug, Clone, Default)]
pub struct SchemaBatch {
    pub schemas: BTreeMap<String, GeneratedSchema>,
    pub skipped: Vec<SkippedNode>,
}

impl SchemaBatch {
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

/// Result of expanding one property list
struct ObjectShape {
    shape: Value,
    required: Vec<String>,
    optional: Vec<String>,
}

pub struct SchemaGenerator {
    options: SchemaOptions,
}

impl SchemaGenerator {
    pub fn new(options: SchemaOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SchemaOptions {
        &self.options
    }

    /// Generate schemas for a batch of nodes; never fails as a whole
    pub fn generate(&self, nodes: &[NodeDescriptor]) -> SchemaBatch {
        let mut batch = SchemaBatch::default();

        for node in nodes {
            match self.generate_one(node) {
                Ok(schema) => {
                    batch.schemas.insert(node.name.clone(), schema);
                }
                Err(e) => {
                    warn!("Skipping schema for {}: {}", node.name, e);
                    batch.skipped.push(SkippedNode {
                        node: node.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Generated {} schemas ({} skipped)",
            batch.schemas.len(),
            batch.skipped.len()
        );
        batch
    }

    /// Generate the schema of a single node
    pub fn generate_one(&self, node: &NodeDescriptor) -> Result<GeneratedSchema> {
        let properties = property_list(node)?;
        let object = self.expand(&node.name, &properties, 0)?;
        let fingerprint = stable_hash_of(node)?;

        debug!(
            "Schema for {}: {} required, {} optional",
            node.name,
            object.required.len(),
            object.optional.len()
        );

        Ok(GeneratedSchema {
            node_name: node.name.clone(),
            documentation: self.documentation(node, &object),
            required: object.required,
            optional: object.optional,
            shape: object.shape,
            fingerprint,
        })
    }

    fn documentation(&self, node: &NodeDescriptor, object: &ObjectShape) -> String {
        if self.options.token_optimized {
            return node.label().to_string();
        }

        let mut doc = node.label().to_string();
        if !node.description.is_empty() {
            doc.push_str(": ");
            doc.push_str(&node.description);
        }
        if !object.required.is_empty() {
            doc.push_str(&format!("\nRequired: {}", object.required.join(", ")));
        }
        if !object.optional.is_empty() {
            doc.push_str(&format!("\nOptional: {}", object.optional.join(", ")));
        }
        doc
    }

    fn expand(
        &self,
        node: &str,
        properties: &[Map<String, Value>],
        depth: usize,
    ) -> Result<ObjectShape> {
        if depth >= self.options.max_depth {
            return Ok(ObjectShape {
                shape: json!({"type": "object"}),
                required: Vec::new(),
                optional: Vec::new(),
            });
        }

        let mut shape_properties = Map::new();
        let mut required: Vec<String> = Vec::new();
        let mut optional: Vec<String> = Vec::new();

        for property in properties {
            let name = property_name(node, property)?;
            let kind = property.get("type").and_then(Value::as_str).unwrap_or("");
            if matches!(kind, "notice" | "hidden") {
                continue;
            }

            let is_required = property
                .get("required")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if is_required {
                optional.retain(|o| o != name);
                if !required.iter().any(|r| r == name) {
                    required.push(name.to_string());
                }
            } else if !required.iter().any(|r| r == name) && !optional.iter().any(|o| o == name) {
                optional.push(name.to_string());
            }

            if !is_required && !self.options.include_optional {
                continue;
            }

            let schema = self.property_schema(node, property, kind, depth)?;
            match shape_properties.get_mut(name) {
                // Nodes declare one property per resource under the same name
                Some(existing) => merge_enums(existing, &schema),
                None => {
                    shape_properties.insert(name.to_string(), schema);
                }
            }
        }

        let mut shape = json!({
            "type": "object",
            "properties": Value::Object(shape_properties),
        });
        if !required.is_empty() {
            shape["required"] = json!(required);
        }

        Ok(ObjectShape {
            shape,
            required,
            optional,
        })
    }

    fn property_schema(
        &self,
        node: &str,
        property: &Map<String, Value>,
        kind: &str,
        depth: usize,
    ) -> Result<Value> {
        let mut schema = match kind {
            "string" | "color" => json!({"type": "string"}),
            "dateTime" => json!({"type": "string", "format": "date-time"}),
            "number" => json!({"type": "number"}),
            "boolean" => json!({"type": "boolean"}),
            "options" => json!({"type": "string", "enum": option_values(property)}),
            "multiOptions" => json!({
                "type": "array",
                "items": {"type": "string", "enum": option_values(property)},
            }),
            "json" => json!({"type": "object"}),
            "collection" => {
                let nested = nested_list(node, property.get("options"))?;
                self.expand(node, &nested, depth + 1)?.shape
            }
            "fixedCollection" => self.fixed_collection(node, property, depth)?,
            _ => json!({}),
        };

        if !self.options.token_optimized {
            if let Some(description) = property
                .get("description")
                .and_then(Value::as_str)
                .filter(|d| !d.is_empty())
            {
                schema["description"] = json!(description);
            }
            if let Some(default) = property.get("default").filter(|d| !is_empty_default(d)) {
                schema["default"] = default.clone();
            }
        }

        Ok(schema)
    }

    fn fixed_collection(
        &self,
        node: &str,
        property: &Map<String, Value>,
        depth: usize,
    ) -> Result<Value> {
        if depth + 1 >= self.options.max_depth {
            return Ok(json!({"type": "object"}));
        }

        let groups = nested_list(node, property.get("options"))?;
        let mut group_schemas = Map::new();
        for group in &groups {
            let name = property_name(node, group)?;
            let values = nested_list(node, group.get("values"))?;
            group_schemas.insert(name.to_string(), self.expand(node, &values, depth + 2)?.shape);
        }

        Ok(json!({"type": "object", "properties": Value::Object(group_schemas)}))
    }
}

impl Default for SchemaGenerator {
    fn default() -> Self {
        Self::new(SchemaOptions::default())
    }
}

/// Top-level property list of a node.
///
/// Engines report an array of definitions; a name-keyed map is accepted too.
fn property_list(node: &NodeDescriptor) -> Result<Vec<Map<String, Value>>> {
    match &node.properties {
        Value::Null => Ok(Vec::new()),
        Value::Array(_) => nested_list(&node.name, Some(&node.properties)),
        Value::Object(map) => map
            .iter()
            .map(|(key, definition)| match definition {
                Value::Object(def) => {
                    let mut def = def.clone();
                    def.entry("name").or_insert_with(|| json!(key));
                    Ok(def)
                }
                _ => Err(Error::malformed(
                    &node.name,
                    format!("property '{}' is not an object", key),
                )),
            })
            .collect(),
        other => Err(Error::malformed(
            &node.name,
            format!("properties must be a list, got {}", json_kind(other)),
        )),
    }
}

fn nested_list(node: &str, value: Option<&Value>) -> Result<Vec<Map<String, Value>>> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(index, item)| match item {
                Value::Object(map) => Ok(map.clone()),
                other => Err(Error::malformed(
                    node,
                    format!("entry {} is {}, expected an object", index, json_kind(other)),
                )),
            })
            .collect(),
        Some(other) => Err(Error::malformed(
            node,
            format!("expected a list, got {}", json_kind(other)),
        )),
    }
}

fn property_name<'a>(node: &str, property: &'a Map<String, Value>) -> Result<&'a str> {
    property
        .get("name")
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| Error::malformed(node, "property without a name"))
}

/// Values of an options/multiOptions property, in declaration order
pub(crate) fn option_values(property: &Map<String, Value>) -> Vec<Value> {
    property
        .get("options")
        .and_then(Value::as_array)
        .map(|options| {
            options
                .iter()
                .filter_map(|option| option.get("value").cloned())
                .collect()
        })
        .unwrap_or_default()
}

fn merge_enums(existing: &mut Value, incoming: &Value) {
    let Some(extra) = incoming.get("enum").and_then(Value::as_array) else {
        return;
    };
    if let Some(values) = existing.get_mut("enum").and_then(Value::as_array_mut) {
        for value in extra {
            if !values.contains(value) {
                values.push(value.clone());
            }
        }
    }
}

fn is_empty_default(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
