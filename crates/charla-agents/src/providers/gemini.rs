use std::time::Duration;

use async_trait::async_trait;
use charla_common::{Error, Result};
use reqwest::Client;
use serde_json::json;

use super::{ContextTurn, LlmProvider};

const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Google Gemini `generateContent` client.
pub struct GeminiProvider {
    api_key: String,
    model: String,
    client: Client,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(api_key: String, model: String) -> Self {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            api_key,
            model,
            client,
            base_url: GEMINI_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = Client::builder().timeout(timeout).build().unwrap_or_default();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    fn request_body(turns: &[ContextTurn]) -> serde_json::Value {
        let contents: Vec<serde_json::Value> = turns
            .iter()
            .map(|turn| {
                json!({
                    "role": turn.role.as_str(),
                    "parts": [{ "text": turn.text }],
                })
            })
            .collect();
        json!({ "contents": contents })
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn provider_id(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, turns: &[ContextTurn]) -> Result<String> {
        let body = Self::request_body(turns);

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("network error: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 || error_text.contains("RESOURCE_EXHAUSTED") {
                return Err(Error::RateLimited(format!("Gemini API quota: {error_text}")));
            }
            return Err(Error::Provider(format!(
                "Gemini API error (HTTP {status}): {error_text}"
            )));
        }

        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("invalid Gemini response: {e}")))?;

        let text = raw["candidates"][0]["content"]["parts"]
            .as_array()
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|part| part["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.is_empty() {
            return Err(Error::Provider("Gemini returned no text candidates".into()));
        }
        Ok(text)
    }

    async fn health_check(&self) -> Result<bool> {
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": "ping" }] }],
            "generationConfig": { "maxOutputTokens": 1 },
        });

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await;

        match response {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> GeminiProvider {
        GeminiProvider::new("test-key".to_string(), "gemini-2.5-flash".to_string())
            .with_base_url(server.uri())
    }

    #[tokio::test]
    async fn generate_parses_candidate_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-2.5-flash:generateContent"))
            .and(header("x-goog-api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": {
                        "role": "model",
                        "parts": [{ "text": "Hola, " }, { "text": "alice." }]
                    }
                }]
            })))
            .mount(&server)
            .await;

        let reply = provider(&server)
            .generate(&[ContextTurn::user("Hola")])
            .await
            .expect("generate should succeed");
        assert_eq!(reply, "Hola, alice.");
    }

    #[tokio::test]
    async fn quota_errors_map_to_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": { "status": "RESOURCE_EXHAUSTED" }
            })))
            .mount(&server)
            .await;

        let err = provider(&server)
            .generate(&[ContextTurn::user("Hola")])
            .await
            .expect_err("should fail");
        assert!(matches!(err, Error::RateLimited(_)));
    }

    #[tokio::test]
    async fn server_errors_map_to_provider() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = provider(&server)
            .generate(&[ContextTurn::user("Hola")])
            .await
            .expect_err("should fail");
        assert!(matches!(err, Error::Provider(_)));
    }

    #[tokio::test]
    async fn empty_candidates_are_a_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "candidates": [] })))
            .mount(&server)
            .await;

        let err = provider(&server)
            .generate(&[ContextTurn::user("Hola")])
            .await
            .expect_err("should fail");
        assert!(matches!(err, Error::Provider(_)));
    }

    #[test]
    fn request_body_tags_roles() {
        let body = GeminiProvider::request_body(&[
            ContextTurn::user("instrucciones"),
            ContextTurn::model("Entendido."),
            ContextTurn::user("Hola"),
        ]);
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["contents"][2]["parts"][0]["text"], "Hola");
    }
}
