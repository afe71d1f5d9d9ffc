use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use async_openai::{
    config::OpenAIConfig,
    types::{
        chat::{
            ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
            ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContent,
            CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
            CreateChatCompletionResponse,
        },
        embeddings::{CreateEmbeddingRequestArgs, EmbeddingInput},
    },
    Client,
};

use crate::config::{Config, DEFAULT_CHAT_MODEL};
use crate::error::{PlanoraError, Result};
use crate::interfaces::providers::LlmProvider;

enum ChatCreateResult {
    Parsed(CreateChatCompletionResponse),
    Raw(Value),
}

#[derive(Clone)]
pub struct OpenAiProvider {
    model: String,
    client: Client<OpenAIConfig>,
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: Option<String>, base_url: Option<String>) -> Self {
        let model = model.unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string());
        let base_url = base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        let config = OpenAIConfig::new()
            .with_api_key(api_key.clone())
            .with_api_base(base_url.clone());
        Self {
            model,
            client: Client::with_config(config),
            http: reqwest::Client::new(),
            api_key,
            base_url,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = config.openai_api_key()?;
        let openai = config.openai.clone().unwrap_or_default();
        Ok(Self::new(api_key, openai.model, openai.base_url))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn raw_chat_completion(&self, request: &CreateChatCompletionRequest) -> Result<Value> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        for attempt in 0..3 {
            let response = self
                .http
                .post(url.clone())
                .bearer_auth(&self.api_key)
                .json(request)
                .send()
                .await
                .map_err(|e| {
                    PlanoraError::Http(format!("Chat completion transport failed: {e}"))
                })?;
            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| PlanoraError::Http(format!("Chat completion read failed: {e}")))?;

            if status == StatusCode::OK {
                return serde_json::from_str(&body).map_err(|e| {
                    PlanoraError::Serialization(format!("Chat completion decode failed: {e}"))
                });
            }

            if is_truncated_json_error(status, &body) && attempt < 2 {
                debug!(attempt, %status, "Retrying truncated chat completion");
                tokio::time::sleep(Duration::from_millis(150 * (attempt + 1) as u64)).await;
                continue;
            }

            return Err(PlanoraError::Http(format!(
                "Chat completion failed ({status}): {body}"
            )));
        }

        Err(PlanoraError::Http(
            "Chat completion failed after retries".to_string(),
        ))
    }

    async fn chat_create_with_fallback(
        &self,
        request: CreateChatCompletionRequest,
    ) -> Result<ChatCreateResult> {
        match self.raw_chat_completion(&request).await {
            Ok(raw) => return Ok(ChatCreateResult::Raw(raw)),
            Err(PlanoraError::Http(message)) if message.starts_with("Chat completion failed (") => {
                return Err(PlanoraError::Http(message));
            }
            Err(err) => {
                debug!("Raw chat completion failed, falling back to typed client: {err}");
            }
        }

        match self.client.chat().create(request).await {
            Ok(response) => Ok(ChatCreateResult::Parsed(response)),
            Err(err) => Err(PlanoraError::Http(err.to_string())),
        }
    }

    fn extract_text_from_value(response: &Value) -> Option<String> {
        response
            .get("choices")
            .and_then(|v| v.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .map(|text| text.to_string())
    }

    fn extract_text_from_response(response: &CreateChatCompletionResponse) -> Result<String> {
        let message = response
            .choices
            .first()
            .ok_or_else(|| PlanoraError::Http("No choices returned".to_string()))?
            .message
            .content
            .clone()
            .unwrap_or_default();
        Ok(message)
    }

    fn build_system_message(system_prompt: &str) -> Result<Option<ChatCompletionRequestMessage>> {
        if system_prompt.is_empty() {
            return Ok(None);
        }
        let message = ChatCompletionRequestSystemMessageArgs::default()
            .content(system_prompt)
            .build()
            .map_err(|e| PlanoraError::Runtime(e.to_string()))?;
        Ok(Some(ChatCompletionRequestMessage::System(message)))
    }

    fn build_user_text_message(prompt: &str) -> Result<ChatCompletionRequestMessage> {
        let message = ChatCompletionRequestUserMessageArgs::default()
            .content(ChatCompletionRequestUserMessageContent::Text(
                prompt.to_string(),
            ))
            .build()
            .map_err(|e| PlanoraError::Runtime(e.to_string()))?;
        Ok(ChatCompletionRequestMessage::User(message))
    }

    fn build_chat_request(
        &self,
        prompt: &str,
        system_prompt: &str,
        temperature: Option<f32>,
    ) -> Result<CreateChatCompletionRequest> {
        let mut messages = Vec::new();
        if let Some(system) = Self::build_system_message(system_prompt)? {
            messages.push(system);
        }
        messages.push(Self::build_user_text_message(prompt)?);

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder.model(self.model.clone());
        builder.messages(messages);
        if let Some(temperature) = temperature {
            builder.temperature(temperature);
        }
        builder
            .build()
            .map_err(|e| PlanoraError::Runtime(e.to_string()))
    }
}

fn is_truncated_json_error(status: StatusCode, body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    status.is_server_error()
        && (lower.contains("unexpected end of json input")
            || lower.contains("unexpected end of json")
            || lower.contains("unexpected end of input")
            || lower.contains("unexpected eof"))
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn generate_text(
        &self,
        prompt: &str,
        system_prompt: &str,
        temperature: Option<f32>,
    ) -> Result<String> {
        let request = self.build_chat_request(prompt, system_prompt, temperature)?;
        let response = self.chat_create_with_fallback(request).await?;
        match response {
            ChatCreateResult::Parsed(parsed) => Self::extract_text_from_response(&parsed),
            ChatCreateResult::Raw(raw) => Self::extract_text_from_value(&raw)
                .ok_or_else(|| PlanoraError::Http("Empty chat response".to_string())),
        }
    }

    async fn embed(&self, inputs: Vec<String>, model: Option<&str>) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let expected = inputs.len();
        let model = model.unwrap_or(&self.model).to_string();
        let request = CreateEmbeddingRequestArgs::default()
            .model(model)
            .input(EmbeddingInput::StringArray(inputs))
            .build()
            .map_err(|e| PlanoraError::Runtime(e.to_string()))?;
        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| PlanoraError::Http(e.to_string()))?;
        let mut data = response.data;
        data.sort_by_key(|item| item.index);
        if data.len() != expected {
            return Err(PlanoraError::Http(format!(
                "Embedding response returned {} vectors for {expected} inputs",
                data.len()
            )));
        }
        Ok(data.into_iter().map(|item| item.embedding).collect())
    }
}
