//! Translation between the tool host's catalog and the model's calling convention.
//!
//! The host declares each tool with a flat parameter map. The model is shown
//! the same tool as a JSON Schema object, and its calls are checked against
//! the declaration before anything reaches the host.

use std::collections::HashMap;

use serde_json::{Map, Value, json};
use thiserror::Error;
use toolhost::ToolDescriptor;

use crate::model::{ToolCall, ToolSpec};

/// A model's tool call that cannot be forwarded to the host.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedCall {
    #[error("unknown tool `{0}`")]
    UnknownTool(String),

    #[error("arguments for `{tool}` must be an object, got {found}")]
    NotAnObject { tool: String, found: &'static str },

    #[error("`{tool}` has no parameter `{argument}`")]
    UnknownArgument { tool: String, argument: String },

    #[error("`{tool}` is missing required parameter `{argument}`")]
    MissingArgument { tool: String, argument: String },
}

/// Why a host catalog was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("tool with empty name")]
    EmptyName,

    #[error("tool `{0}` declared more than once")]
    DuplicateTool(String),

    #[error("parameter `{parameter}` of `{tool}` has no type")]
    UntypedParameter { tool: String, parameter: String },
}

/// Immutable snapshot of a host's tools, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    tools: Vec<ToolDescriptor>,
    index: HashMap<String, usize>,
}

impl Catalog {
    /// Validate and index a catalog as returned by the host.
    pub fn new(tools: Vec<ToolDescriptor>) -> Result<Self, CatalogError> {
        let mut index = HashMap::with_capacity(tools.len());
        for (position, tool) in tools.iter().enumerate() {
            if tool.name.trim().is_empty() {
                return Err(CatalogError::EmptyName);
            }
            if let Some((parameter, _)) = tool
                .parameters
                .iter()
                .find(|(_, spec)| spec.kind.trim().is_empty())
            {
                return Err(CatalogError::UntypedParameter {
                    tool: tool.name.clone(),
                    parameter: parameter.clone(),
                });
            }
            if index.insert(tool.name.clone(), position).is_some() {
                return Err(CatalogError::DuplicateTool(tool.name.clone()));
            }
        }
        Ok(Self { tools, index })
    }

    /// Tools in the order the host declared them.
    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// The whole catalog in the model's calling convention.
    pub fn to_model_format(&self) -> Vec<ToolSpec> {
        to_model_format(&self.tools)
    }

    /// Check a model's call against its declaration and produce the host's
    /// argument map.
    pub fn to_host_arguments(&self, call: &ToolCall) -> Result<Map<String, Value>, MalformedCall> {
        let tool = self
            .get(&call.name)
            .ok_or_else(|| MalformedCall::UnknownTool(call.name.clone()))?;

        let arguments = match &call.input {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                return Err(MalformedCall::NotAnObject {
                    tool: tool.name.clone(),
                    found: json_type_name(other),
                });
            }
        };

        if let Some(unknown) = arguments
            .keys()
            .find(|name| !tool.parameters.contains_key(name.as_str()))
        {
            return Err(MalformedCall::UnknownArgument {
                tool: tool.name.clone(),
                argument: unknown.clone(),
            });
        }

        if let Some(missing) = tool
            .required_parameters()
            .find(|name| !arguments.contains_key(*name))
        {
            return Err(MalformedCall::MissingArgument {
                tool: tool.name.clone(),
                argument: missing.to_string(),
            });
        }

        Ok(arguments)
    }
}

/// Map host descriptors to model tool specs, one for one and in order.
pub fn to_model_format(descriptors: &[ToolDescriptor]) -> Vec<ToolSpec> {
    descriptors.iter().map(model_spec).collect()
}

fn model_spec(tool: &ToolDescriptor) -> ToolSpec {
    let properties: Map<String, Value> = tool
        .parameters
        .iter()
        .map(|(name, spec)| {
            let mut property = Map::new();
            property.insert("type".into(), Value::String(spec.kind.clone()));
            if let Some(description) = &spec.description {
                property.insert("description".into(), Value::String(description.clone()));
            }
            (name.clone(), Value::Object(property))
        })
        .collect();

    let required: Vec<&str> = tool.required_parameters().collect();

    ToolSpec {
        name: tool.name.clone(),
        description: tool.description.clone(),
        schema: json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        }),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
