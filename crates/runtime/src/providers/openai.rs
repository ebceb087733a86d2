//! OpenAI Chat Completions backend.
//!
//! Also works with compatible services through [`OpenAiBackend::base_url`].

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::model::{
    Backend, Message, ModelError, ModelReply, ModelRequest, ModelResponse, Part, Role, ToolCall,
    ToolSpec, Usage,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI Chat Completions backend.
pub struct OpenAiBackend {
    client: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: Option<u32>,
    base_url: String,
}

impl OpenAiBackend {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            max_tokens: None,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn build_request_body(&self, request: &ModelRequest<'_>) -> Value {
        let messages: Vec<Value> = request.messages.iter().flat_map(messages_to_openai).collect();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
        });

        if let Some(obj) = body.as_object_mut() {
            if let Some(max) = self.max_tokens {
                obj.insert("max_tokens".into(), max.into());
            }
            if !request.tools.is_empty() {
                let tools: Vec<Value> = request.tools.iter().map(tool_to_openai).collect();
                obj.insert("tools".into(), tools.into());
            }
        }

        body
    }
}

impl std::fmt::Display for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "openai({})", self.model)
    }
}

impl Backend for OpenAiBackend {
    async fn call(&self, request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
        let body = self.build_request_body(&request);
        let url = format!("{}/chat/completions", self.base_url);

        debug!(model = %self.model, messages = request.messages.len(), "openai request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Api(format!("{status}: {body}")));
        }

        let data: OpenAiChatResponse = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;

        let choice = data
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::InvalidResponse("no choices in response".into()))?;

        let calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCall {
                id: tc.id,
                name: tc.function.name,
                input: parse_arguments(tc.function.arguments),
            })
            .collect();

        let reply = ModelReply::from_parts(choice.message.content.unwrap_or_default(), calls)?;
        let usage = data
            .usage
            .map(|u| Usage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        Ok(ModelResponse { reply, usage })
    }
}

/// Blank arguments mean no arguments. Unparseable ones are kept as text so
/// the catalog rejects them with a message the model can act on.
fn parse_arguments(arguments: String) -> Value {
    if arguments.trim().is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(&arguments).unwrap_or(Value::String(arguments))
}

fn tool_to_openai(spec: &ToolSpec) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": spec.name,
            "description": spec.description,
            "parameters": spec.schema,
        }
    })
}

/// One message may expand to several: each tool result is its own `tool`
/// message.
fn messages_to_openai(msg: &Message) -> Vec<Value> {
    let role = match msg.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    };

    let results: Vec<Value> = msg
        .tool_results()
        .into_iter()
        .map(|result| {
            json!({
                "role": "tool",
                "tool_call_id": result.tool_call_id,
                "content": result.content,
            })
        })
        .collect();
    if !results.is_empty() {
        return results;
    }

    let text = msg.text();
    let calls: Vec<Value> = msg
        .parts
        .iter()
        .filter_map(|part| match part {
            Part::ToolCall(tc) => Some(json!({
                "id": tc.id,
                "type": "function",
                "function": {
                    "name": tc.name,
                    "arguments": tc.input.to_string(),
                }
            })),
            _ => None,
        })
        .collect();

    if calls.is_empty() {
        return vec![json!({ "role": role, "content": text })];
    }

    vec![json!({
        "role": role,
        "content": if text.is_empty() { Value::Null } else { Value::String(text) },
        "tool_calls": calls,
    })]
}

// OpenAI API response types (internal)

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Deserialize)]
struct OpenAiToolCall {
    id: String,
    function: OpenAiFunction,
}

#[derive(Deserialize)]
struct OpenAiFunction {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
