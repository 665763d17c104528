use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::limiter::Limiter;

/// One turn of the exchange sent to a completion backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub const fn label(self) -> &'static str {
        match self {
            MessageRole::System => "System",
            MessageRole::User => "User",
            MessageRole::Assistant => "Assistant",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("completion request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("completion endpoint returned {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("completion response carried no text")]
    EmptyResponse,
}

/// Abstract completion capability; exactly one backend answers each call.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError>;

    /// Short name used in logs when the fallback policy switches backends.
    fn label(&self) -> &'static str;
}

/// Direct vendor chat-completions call.
pub struct DirectChatBackend {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl DirectChatBackend {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[async_trait]
impl CompletionBackend for DirectChatBackend {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&ChatRequest {
                model: &self.model,
                messages,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(CompletionError::Status {
                status: status.as_u16(),
                detail,
            });
        }

        let body: ChatResponse = response.json().await?;
        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.is_empty())
            .ok_or(CompletionError::EmptyResponse)
    }

    fn label(&self) -> &'static str {
        "direct"
    }
}

/// Server-mediated completion call. The route owns its own authentication
/// and may enrich the exchange with third-party applicant data before the
/// model sees it; the returned text is treated as opaque here.
pub struct RoutedChatBackend {
    http: reqwest::Client,
    endpoint: String,
    access_token: String,
}

impl RoutedChatBackend {
    pub fn new(endpoint: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            access_token: access_token.into(),
        }
    }
}

#[derive(Serialize)]
struct RoutedRequest<'a> {
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct RoutedResponse {
    text: Option<String>,
}

#[async_trait]
impl CompletionBackend for RoutedChatBackend {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.access_token)
            .json(&RoutedRequest { messages })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(CompletionError::Status {
                status: status.as_u16(),
                detail,
            });
        }

        let body: RoutedResponse = response.json().await?;
        body.text
            .filter(|text| !text.is_empty())
            .ok_or(CompletionError::EmptyResponse)
    }

    fn label(&self) -> &'static str {
        "routed"
    }
}

/// Decides whether a failed primary call may be re-issued against the
/// configured fallback backend. Hosts can await an operator prompt here.
#[async_trait]
pub trait FallbackPolicy: Send + Sync {
    async fn approve_fallback(&self, error: &CompletionError) -> bool;
}

/// Default policy: headless runs fail fast instead of silently switching.
pub struct NeverFallBack;

#[async_trait]
impl FallbackPolicy for NeverFallBack {
    async fn approve_fallback(&self, _error: &CompletionError) -> bool {
        false
    }
}

struct FallbackRoute {
    backend: Arc<dyn CompletionBackend>,
    policy: Arc<dyn FallbackPolicy>,
}

/// Completion capability handed to the evaluator: one primary backend, an
/// optional fallback pair, and the shared concurrency limiter.
pub struct CompletionProvider {
    backend: Arc<dyn CompletionBackend>,
    fallback: Option<FallbackRoute>,
    limiter: Limiter,
}

impl CompletionProvider {
    pub fn new(backend: Arc<dyn CompletionBackend>, concurrency: usize) -> Self {
        Self {
            backend,
            fallback: None,
            limiter: Limiter::new(concurrency),
        }
    }

    pub fn with_fallback(
        mut self,
        backend: Arc<dyn CompletionBackend>,
        policy: Arc<dyn FallbackPolicy>,
    ) -> Self {
        self.fallback = Some(FallbackRoute { backend, policy });
        self
    }

    /// Refresh the limiter from live configuration; in-flight calls keep
    /// draining against the old bound.
    pub fn set_concurrency(&self, concurrency: usize) {
        self.limiter.resize(concurrency);
    }

    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError> {
        let _permit = self.limiter.acquire().await;
        match self.backend.complete(messages).await {
            Ok(text) => Ok(text),
            Err(err) => {
                let Some(route) = &self.fallback else {
                    return Err(err);
                };
                if route.policy.approve_fallback(&err).await {
                    tracing::warn!(
                        primary = self.backend.label(),
                        fallback = route.backend.label(),
                        error = %err,
                        "primary backend failed, switching"
                    );
                    route.backend.complete(messages).await
                } else {
                    Err(err)
                }
            }
        }
    }
}
