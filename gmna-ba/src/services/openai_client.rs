//! OpenAI-compatible chat completion auditor
//!
//! Sends one chat completion per business and parses the JSON completion
//! into scoring fields. No retries and no rate limiting: the batch controller
//! paces requests.

use async_trait::async_trait;
use gmna_common::config::OpenAiSettings;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::auditor::{parse_completion, render_prompt, AuditError, Auditor, SYSTEM_PROMPT};
use crate::models::{AuditResult, BusinessRecord};

const USER_AGENT: &str = concat!("gmna-ba/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// Auditor backed by the `/chat/completions` endpoint
pub struct OpenAiAuditor {
    http_client: reqwest::Client,
    api_key: Option<String>,
    settings: OpenAiSettings,
}

impl OpenAiAuditor {
    /// Build the client; a missing key is allowed and reported per call
    pub fn new(api_key: Option<String>, settings: OpenAiSettings) -> Result<Self, AuditError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(settings.timeout_secs.max(1)))
            .build()
            .map_err(|e| AuditError::Network(e.to_string()))?;

        let api_key = api_key.filter(|k| !k.trim().is_empty());

        Ok(Self {
            http_client,
            api_key,
            settings,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl Auditor for OpenAiAuditor {
    async fn audit(&self, business: &BusinessRecord) -> Result<AuditResult, AuditError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AuditError::Configuration("OpenAI API key not configured".to_string()))?;

        let prompt = render_prompt(business);
        let request = ChatRequest {
            model: &self.settings.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };

        tracing::debug!(
            business = %business.name,
            model = %self.settings.model,
            "Requesting audit completion"
        );

        let response = self
            .http_client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AuditError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                business = %business.name,
                status = status.as_u16(),
                "Analysis provider rejected request"
            );
            return Err(AuditError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let completion: ChatResponse = response
            .json()
            .await
            .map_err(|e| AuditError::Parse(format!("Invalid response body: {}", e)))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .ok_or_else(|| AuditError::Parse("No content received from provider".to_string()))?;

        parse_completion(business, &content)
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(server: &MockServer) -> OpenAiSettings {
        OpenAiSettings {
            base_url: server.uri(),
            ..Default::default()
        }
    }

    fn completion(content: &str) -> serde_json::Value {
        json!({
            "id": "chatcmpl-1",
            "choices": [{ "index": 0, "message": { "role": "assistant", "content": content } }]
        })
    }

    #[tokio::test]
    async fn test_audit_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({ "model": "gpt-4o-mini", "max_tokens": 1500 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(
                "```json\n{\"has_gmn_profile\": true, \"overall_score\": 77, \"seo_score\": 70}\n```",
            )))
            .expect(1)
            .mount(&server)
            .await;

        let auditor = OpenAiAuditor::new(Some("sk-test".into()), settings(&server)).unwrap();
        let business = BusinessRecord::new("Padaria X", "São Paulo");

        let result = auditor.audit(&business).await.unwrap();
        assert_eq!(result.business.name, "Padaria X");
        assert_eq!(result.scores.overall_score, 77.0);
        assert_eq!(result.scores.seo_score, 70.0);
    }

    #[tokio::test]
    async fn test_missing_key_is_configuration_error() {
        let server = MockServer::start().await;
        let auditor = OpenAiAuditor::new(Some("   ".into()), settings(&server)).unwrap();

        assert!(!auditor.is_configured());
        let err = auditor
            .audit(&BusinessRecord::new("A", "B"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_non_success_status_is_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let auditor = OpenAiAuditor::new(Some("sk-test".into()), settings(&server)).unwrap();
        match auditor.audit(&BusinessRecord::new("A", "B")).await {
            Err(AuditError::Upstream { status, body }) => {
                assert_eq!(status, 429);
                assert_eq!(body, "rate limited");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_content_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&server)
            .await;

        let auditor = OpenAiAuditor::new(Some("sk-test".into()), settings(&server)).unwrap();
        let err = auditor
            .audit(&BusinessRecord::new("A", "B"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::Parse(_)));
    }

    #[tokio::test]
    async fn test_unreachable_provider_is_network_error() {
        let auditor = OpenAiAuditor::new(
            Some("sk-test".into()),
            OpenAiSettings {
                base_url: "http://127.0.0.1:9".to_string(),
                timeout_secs: 2,
                ..Default::default()
            },
        )
        .unwrap();

        let err = auditor
            .audit(&BusinessRecord::new("A", "B"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::Network(_)));
    }
}
