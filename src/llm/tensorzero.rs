//! Minimal client for a TensorZero gateway's `/inference` endpoint.

use crate::http::build_client;
use reqwest::Client;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub gateway_url: String,
    pub api_key: Option<String>,
    /// Overrides the function name every caller asks for.
    pub function_override: Option<String>,
    pub model: Option<String>,
}

impl LlmConfig {
    /// `None` unless `TENSORZERO_GATEWAY_URL` is set; callers then use their offline fallback.
    pub fn from_env() -> Option<Self> {
        let gateway_url = std::env::var("TENSORZERO_GATEWAY_URL")
            .ok()
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())?;
        Some(Self {
            gateway_url,
            api_key: std::env::var("TENSORZERO_API_KEY").ok(),
            function_override: std::env::var("TENSORZERO_FUNCTION").ok(),
            model: std::env::var("TENSORZERO_MODEL").ok(),
        })
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("gateway request failed: {0}")]
    Http(String),
    #[error("invalid gateway reply: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct LlmMessage {
    pub role: &'static str,
    pub content: String,
}

impl LlmMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

#[derive(Serialize)]
struct InferenceRequest<'a> {
    function_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    model_name: Option<&'a str>,
    input: InferenceInput<'a>,
}

#[derive(Serialize)]
struct InferenceInput<'a> {
    messages: &'a [LlmMessage],
}

#[derive(Deserialize)]
struct InferenceReply {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}

pub struct LlmClient {
    http: Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            http: build_client(),
            config,
        }
    }

    /// Returns the first text block of the reply.
    pub async fn chat(&self, function_name: &str, messages: &[LlmMessage]) -> Result<String, LlmError> {
        let function_name = self
            .config
            .function_override
            .as_deref()
            .unwrap_or(function_name);
        let body = InferenceRequest {
            function_name,
            model_name: self.config.model.as_deref(),
            input: InferenceInput { messages },
        };

        let mut request = self
            .http
            .post(format!("{}/inference", self.config.gateway_url))
            .json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.header("X-API-Key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| LlmError::Http(err.to_string()))?;
        if !response.status().is_success() {
            return Err(LlmError::Http(format!("HTTP {}", response.status())));
        }
        let reply: InferenceReply = response
            .json()
            .await
            .map_err(|err| LlmError::InvalidResponse(err.to_string()))?;

        if let Some(usage) = &reply.usage {
            debug!(
                target = "pricectx.estimate",
                function = function_name,
                input_tokens = usage.input_tokens.unwrap_or(0),
                output_tokens = usage.output_tokens.unwrap_or(0),
                "llm inference finished"
            );
        }
        reply
            .content
            .into_iter()
            .find(|block| block.kind == "text")
            .map(|block| block.text)
            .ok_or_else(|| LlmError::InvalidResponse("no text block".into()))
    }

    /// Chat and decode the first JSON object found in the reply text.
    pub async fn chat_json<T: DeserializeOwned>(
        &self,
        function_name: &str,
        messages: &[LlmMessage],
    ) -> Result<T, LlmError> {
        let text = self.chat(function_name, messages).await?;
        extract_json(&text)
    }
}

/// Models wrap JSON in prose or code fences; take the outermost `{...}`.
pub fn extract_json<T: DeserializeOwned>(text: &str) -> Result<T, LlmError> {
    let start = text
        .find('{')
        .ok_or_else(|| LlmError::InvalidResponse("no json object in reply".into()))?;
    let end = text
        .rfind('}')
        .filter(|end| *end > start)
        .ok_or_else(|| LlmError::InvalidResponse("unterminated json object".into()))?;
    serde_json::from_str(&text[start..=end])
        .map_err(|err| LlmError::InvalidResponse(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Reply {
        brand: String,
    }

    #[test]
    fn extract_json_skips_prose_around_object() {
        let reply: Reply =
            extract_json("Sure! Here you go:\n```json\n{\"brand\": \"Agilent\"}\n```").expect("json");
        assert_eq!(reply.brand, "Agilent");
    }

    #[test]
    fn extract_json_rejects_plain_text() {
        let err = extract_json::<Reply>("no idea").expect_err("should fail");
        assert!(matches!(err, LlmError::InvalidResponse(_)));
    }

    #[test]
    fn request_body_omits_missing_model() {
        let messages = [LlmMessage::system("be terse"), LlmMessage::user("price?")];
        let body = InferenceRequest {
            function_name: "equipment_price_estimate",
            model_name: None,
            input: InferenceInput {
                messages: &messages,
            },
        };
        let value = serde_json::to_value(&body).expect("json");
        assert!(value.get("model_name").is_none());
        assert_eq!(value["input"]["messages"][1]["role"], "user");
    }
}
