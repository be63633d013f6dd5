//! OpenAI-compatible chat-completions generator
//!
//! # Authentication
//!
//! The provider loads the API key from the `OPENAI_API_KEY` environment
//! variable. `OPENAI_BASE_URL` and `OPENAI_MODEL` optionally override the
//! endpoint and model, so any OpenAI-compatible server can be used.
//!
//! # Example
//!
//! ```ignore
//! use loctable_mt::{GenerationRequest, Generator, OpenAiGenerator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = OpenAiGenerator::from_env()?;
//!     let request = GenerationRequest::translate("Hello", "Hello", "en", "fr-FR", "", None);
//!     println!("{}", provider.generate(&request).await?);
//!     Ok(())
//! }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;

use crate::error::{MtError, MtResult};
use crate::generator::{GenerationRequest, Generator, validate_locale};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Chat-completions provider
#[derive(Clone)]
pub struct OpenAiGenerator {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
    model: String,
    timeout_secs: u64,
}

impl OpenAiGenerator {
    /// Maximum characters per prompt text
    const MAX_CHARS_PER_STRING: usize = 30_000;

    /// Create a generator with an explicit API key
    ///
    /// # Returns
    ///
    /// * `Ok(Self)` - New provider instance
    /// * `Err(MtError)` - If the API key is empty or the HTTP client cannot be built
    pub fn new(api_key: String, timeout_secs: u64) -> MtResult<Self> {
        if api_key.trim().is_empty() {
            return Err(MtError::Config("API key cannot be empty".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| MtError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_key,
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout_secs,
        })
    }

    /// Create a generator from `OPENAI_API_KEY` (plus optional `OPENAI_BASE_URL`
    /// and `OPENAI_MODEL`)
    pub fn from_env() -> MtResult<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            MtError::Config("OPENAI_API_KEY environment variable not set".to_string())
        })?;

        let mut generator = Self::new(api_key, 30)?;
        if let Ok(base_url) = std::env::var("OPENAI_BASE_URL") {
            generator = generator.with_base_url(&base_url);
        }
        if let Ok(model) = std::env::var("OPENAI_MODEL") {
            generator = generator.with_model(&model);
        }
        Ok(generator)
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        if !base_url.trim().is_empty() {
            self.base_url = base_url.trim().to_string();
        }
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        if !model.trim().is_empty() {
            self.model = model.trim().to_string();
        }
        self
    }

    fn request_body(&self, request: &GenerationRequest) -> serde_json::Value {
        json!({
            "model": self.model,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "messages": [
                {
                    "role": "system",
                    "content": format!(
                        "You are a localization model. Follow task constraints strictly. Task: {}.",
                        request.task.as_str()
                    ),
                },
                {"role": "user", "content": request.prompt},
            ],
        })
    }

    fn map_status(status: StatusCode, body: &str) -> MtError {
        let detail: String = if body.trim().is_empty() {
            "no response body".to_string()
        } else {
            body.trim().chars().take(300).collect()
        };
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            MtError::GeneratorUnavailable(format!("HTTP {}: {}", status, detail))
        } else {
            MtError::Config(format!("API client error ({}): {}", status, detail))
        }
    }

    fn map_transport(&self, error: reqwest::Error) -> MtError {
        if error.is_timeout() {
            MtError::GeneratorTimeout(self.timeout_secs)
        } else if error.is_connect() {
            MtError::GeneratorUnavailable(format!("Connection failed: {}", error))
        } else {
            MtError::Network(error.to_string())
        }
    }

    fn extract_content(json: &serde_json::Value) -> MtResult<String> {
        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                MtError::Translation(
                    "Invalid API response: missing 'choices[0].message.content'".to_string(),
                )
            })?;
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(MtError::Translation(
                "API response did not include text content".to_string(),
            ));
        }
        Ok(trimmed.to_string())
    }
}

impl std::fmt::Debug for OpenAiGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiGenerator")
            .field("api_key", &"***")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn generate(&self, request: &GenerationRequest) -> MtResult<String> {
        validate_locale(&request.target_locale)?;

        if request.prompt.chars().count() > Self::MAX_CHARS_PER_STRING {
            return Err(MtError::Translation(format!(
                "Prompt exceeds maximum length of {} characters",
                Self::MAX_CHARS_PER_STRING
            )));
        }

        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(request))
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_status(status, &body));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| MtError::Translation(format!("Failed to parse API response: {}", e)))?;
        Self::extract_content(&json)
    }

    fn provider_name(&self) -> &str {
        "OpenAI"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_with_empty_key() {
        match OpenAiGenerator::new("   ".to_string(), 30) {
            Err(MtError::Config(msg)) => assert!(msg.contains("empty")),
            other => panic!("Expected Config error, got {other:?}"),
        }
    }

    #[test]
    fn test_overrides_ignore_blank_values() {
        let provider = OpenAiGenerator::new("test-key".to_string(), 30)
            .unwrap()
            .with_model(" ")
            .with_base_url("http://localhost:8080/v1/chat/completions");
        assert_eq!(provider.model, DEFAULT_MODEL);
        assert_eq!(provider.base_url, "http://localhost:8080/v1/chat/completions");
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            OpenAiGenerator::map_status(StatusCode::TOO_MANY_REQUESTS, ""),
            MtError::GeneratorUnavailable(_)
        ));
        assert!(matches!(
            OpenAiGenerator::map_status(StatusCode::BAD_GATEWAY, "upstream"),
            MtError::GeneratorUnavailable(_)
        ));
        assert!(matches!(
            OpenAiGenerator::map_status(StatusCode::UNAUTHORIZED, "bad key"),
            MtError::Config(_)
        ));
    }

    #[test]
    fn test_request_body() {
        let provider = OpenAiGenerator::new("test-key".to_string(), 30).unwrap();
        let request = GenerationRequest::translate("Hi", "Hi", "en", "de-DE", "", None);
        let body = provider.request_body(&request);
        assert_eq!(body["model"], DEFAULT_MODEL);
        assert_eq!(body["messages"][1]["content"], request.prompt.as_str());
        assert!(
            body["messages"][0]["content"]
                .as_str()
                .unwrap()
                .contains("Task: translator")
        );
    }

    #[test]
    fn test_extract_content() {
        let ok = json!({"choices": [{"message": {"content": "  Hallo  "}}]});
        assert_eq!(OpenAiGenerator::extract_content(&ok).unwrap(), "Hallo");

        let empty = json!({"choices": [{"message": {"content": " "}}]});
        assert!(OpenAiGenerator::extract_content(&empty).is_err());
        assert!(OpenAiGenerator::extract_content(&json!({})).is_err());
    }

    #[tokio::test]
    async fn test_invalid_target_locale_fails_before_request() {
        let provider = OpenAiGenerator::new("test-key".to_string(), 30).unwrap();
        let request = GenerationRequest::translate("Hi", "Hi", "en", "invalid#code", "", None);
        assert!(matches!(
            provider.generate(&request).await,
            Err(MtError::InvalidLocale(_))
        ));
    }

    #[test]
    fn test_debug_output() {
        let provider = OpenAiGenerator::new("test-key".to_string(), 30).unwrap();
        let debug_str = format!("{:?}", provider);
        assert!(debug_str.contains("***"));
        assert!(!debug_str.contains("test-key"));
    }

    #[tokio::test]
    #[ignore] // Run with: cargo test --ignored
    async fn test_real_api_preserves_markers() {
        if std::env::var("OPENAI_API_KEY").is_err() {
            eprintln!("Skipping: OPENAI_API_KEY not set");
            return;
        }

        let provider = OpenAiGenerator::from_env().unwrap();
        let request = GenerationRequest::translate(
            "Deal {0} DMG",
            "Deal ⟦PH_1⟧ ⟦TERM_1⟧",
            "en",
            "de-DE",
            "",
            None,
        );
        let result = provider.generate(&request).await.unwrap();
        assert!(result.contains("⟦PH_1⟧"));
        assert!(result.contains("⟦TERM_1⟧"));
    }
}
