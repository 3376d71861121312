//! OpenAI-compatible chat completion provider (OpenAI, Ollama, local proxies)

use async_trait::async_trait;
use reqwest::Client;

use super::provider::{IntentService, ProviderError};
use crate::config::IntentConfig;

pub struct OpenAiCompatibleService {
    client: Client,
    api_key: Option<String>,
    endpoint: String,
    model: String,
    temperature: f32,
}

impl OpenAiCompatibleService {
    pub fn from_config(config: &IntentConfig) -> Self {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());

        if api_key.is_some() {
            tracing::info!("[INTENT] Provider initialized with API key for {}", config.endpoint);
        } else {
            tracing::debug!(
                "[INTENT] {} not set, calling {} without authorization",
                config.api_key_env,
                config.endpoint
            );
        }

        Self {
            client: Client::new(),
            api_key,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
        }
    }

    fn payload(&self, system_prompt: &str, user_prompt: &str) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_prompt }
            ]
        })
    }
}

/// Extract the assistant message text from a chat completion body
pub(crate) fn parse_completion(json: &serde_json::Value) -> Result<String, ProviderError> {
    json["choices"][0]["message"]["content"]
        .as_str()
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
        .ok_or_else(|| ProviderError::ParseError("completion has no message content".to_string()))
}

#[async_trait]
impl IntentService for OpenAiCompatibleService {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    async fn recognize(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, ProviderError> {
        let payload = self.payload(system_prompt, user_prompt);

        tracing::debug!(
            "[INTENT] Sending request: model={}, endpoint={}",
            self.model,
            self.endpoint
        );

        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request
            .json(&payload)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();

            if status.as_u16() == 429 {
                return Err(ProviderError::RateLimited {
                    retry_after_ms: None,
                });
            }
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(ProviderError::AuthError(body));
            }

            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                message: body,
            });
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        parse_completion(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_completion() {
        let body = json!({
            "choices": [{ "message": { "role": "assistant", "content": " {\"toolName\": \"read_file\"} " } }]
        });
        assert_eq!(
            parse_completion(&body).unwrap(),
            "{\"toolName\": \"read_file\"}"
        );
    }

    #[test]
    fn test_parse_completion_without_content() {
        let body = json!({ "choices": [] });
        assert!(matches!(
            parse_completion(&body),
            Err(ProviderError::ParseError(_))
        ));
    }

    #[test]
    fn test_payload_requests_json() {
        let service = OpenAiCompatibleService::from_config(&IntentConfig::default());
        let payload = service.payload("system", "user");
        assert_eq!(payload["model"], "llama3.1");
        assert_eq!(payload["response_format"]["type"], "json_object");
        assert_eq!(payload["messages"][1]["content"], "user");
    }
}
