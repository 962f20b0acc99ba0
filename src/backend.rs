use std::sync::OnceLock;

use log::debug;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request to backend failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{endpoint} returned status {status}")]
    Status {
        endpoint: &'static str,
        status: StatusCode,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatRequest {
    pub message: String,
    pub model_name: String,
}

#[derive(Serialize)]
struct SetModelRequest<'a> {
    model_name: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    response: String,
}

#[derive(Deserialize)]
struct ModelsResponse {
    models: Vec<String>,
}

/// Client for the local chat backend.
#[derive(Clone)]
pub struct BackendClient {
    client: Client,
    base_url: String,
    strip_think_tags: bool,
}

impl BackendClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            strip_think_tags: false,
        }
    }

    /// Remove `<think>` blocks from chat replies.
    pub fn with_think_stripping(mut self, enabled: bool) -> Self {
        self.strip_think_tags = enabled;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        const ENDPOINT: &str = "/api/models";
        let url = format!("{}{}", self.base_url, ENDPOINT);

        let response = self.client.get(&url).send().await?;
        check_status(ENDPOINT, response.status())?;

        let models: ModelsResponse = response.json().await?;
        debug!("backend listed {} models", models.models.len());
        Ok(models.models)
    }

    pub async fn set_model(&self, model: &str) -> Result<(), BackendError> {
        const ENDPOINT: &str = "/api/set_model";
        let url = format!("{}{}", self.base_url, ENDPOINT);

        let response = self
            .client
            .post(&url)
            .json(&SetModelRequest { model_name: model })
            .send()
            .await?;
        check_status(ENDPOINT, response.status())
    }

    pub async fn chat(&self, request: &ChatRequest) -> Result<String, BackendError> {
        const ENDPOINT: &str = "/api/chat";
        let url = format!("{}{}", self.base_url, ENDPOINT);

        let response = self.client.post(&url).json(request).send().await?;
        check_status(ENDPOINT, response.status())?;

        let chat: ChatResponse = response.json().await?;
        if self.strip_think_tags {
            Ok(strip_think_blocks(&chat.response))
        } else {
            Ok(chat.response)
        }
    }
}

fn check_status(endpoint: &'static str, status: StatusCode) -> Result<(), BackendError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(BackendError::Status { endpoint, status })
    }
}

/// Drop reasoning traces some local models wrap in `<think>...</think>`.
pub fn strip_think_blocks(text: &str) -> String {
    static THINK: OnceLock<Regex> = OnceLock::new();
    let re = THINK.get_or_init(|| {
        Regex::new(r"(?s)<think>.*?</think>").expect("valid think pattern")
    });

    if !re.is_match(text) {
        return text.to_string();
    }
    re.replace_all(text, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_strip_think_blocks() {
        let raw = "<think>\nweighing options\n</think>\n\nHello there";
        assert_eq!(strip_think_blocks(raw), "Hello there");
    }

    #[test]
    fn test_strip_think_blocks_leaves_plain_text() {
        assert_eq!(strip_think_blocks("  keep spacing "), "  keep spacing ");
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = BackendClient::new("http://localhost:8000/");
        assert_eq!(client.base_url(), "http://localhost:8000");
    }

    #[tokio::test]
    async fn test_list_models() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/models"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "models": ["llama3", "mistral"] })),
            )
            .mount(&server)
            .await;

        let client = BackendClient::new(&server.uri());
        let models = client.list_models().await.unwrap();
        assert_eq!(models, vec!["llama3", "mistral"]);
    }

    #[tokio::test]
    async fn test_list_models_ignores_error_field() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/models"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "models": [], "error": "connection refused" })),
            )
            .mount(&server)
            .await;

        let client = BackendClient::new(&server.uri());
        assert!(client.list_models().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_models_bad_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/models"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = BackendClient::new(&server.uri());
        assert!(matches!(
            client.list_models().await,
            Err(BackendError::Http(_))
        ));
    }

    #[tokio::test]
    async fn test_set_model_sends_name() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/set_model"))
            .and(body_json(json!({ "model_name": "mistral" })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = BackendClient::new(&server.uri());
        client.set_model("mistral").await.unwrap();
    }

    #[tokio::test]
    async fn test_chat_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_json(json!({ "message": "Hi", "model_name": "mistral" })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "response": "Hello back" })),
            )
            .mount(&server)
            .await;

        let client = BackendClient::new(&server.uri());
        let request = ChatRequest {
            message: "Hi".to_string(),
            model_name: "mistral".to_string(),
        };
        assert_eq!(client.chat(&request).await.unwrap(), "Hello back");
    }

    #[tokio::test]
    async fn test_chat_strips_think_when_enabled() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "response": "<think>hmm</think> Sure." })),
            )
            .mount(&server)
            .await;

        let request = ChatRequest {
            message: "Hi".to_string(),
            model_name: "deepseek-r1:7b".to_string(),
        };
        let raw = BackendClient::new(&server.uri());
        assert_eq!(raw.chat(&request).await.unwrap(), "<think>hmm</think> Sure.");

        let stripped = BackendClient::new(&server.uri()).with_think_stripping(true);
        assert_eq!(stripped.chat(&request).await.unwrap(), "Sure.");
    }

    #[tokio::test]
    async fn test_chat_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = BackendClient::new(&server.uri());
        let request = ChatRequest {
            message: "Hi".to_string(),
            model_name: "mistral".to_string(),
        };
        match client.chat(&request).await {
            Err(BackendError::Status { endpoint, status }) => {
                assert_eq!(endpoint, "/api/chat");
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            }
            other => panic!("expected status error, got {:?}", other),
        }
    }
}
