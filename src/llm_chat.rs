// src/llm_chat.rs

use crate::config::{LlmBackend, LlmSection, credential};
use crate::error::InvoiceError;
use crate::invoice::InvoiceExtraction;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

const VISION_PROMPT: &str = "You are a helpful assistant that can see all provided invoice images and answer questions based on them and the extracted text.";

const GROUNDED_PROMPT: &str = "You are a helpful assistant answering questions strictly based on the provided invoice data.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

impl ChatMessage {
    fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(text.into()),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Auth {
    /// Azure's `api-key` header.
    ApiKey(String),
    Bearer(String),
}

/// Resolved endpoint configuration ready to make API calls.
#[derive(Debug, Clone)]
pub struct ResolvedEndpoint {
    url: String,
    model: String,
    auth: Auth,
}

/// Resolve the LLM config section into a concrete endpoint.
pub fn resolve_endpoint(llm: &LlmSection) -> Result<ResolvedEndpoint, InvoiceError> {
    match llm.backend {
        LlmBackend::Azure => {
            let azure = &llm.azure;
            if azure.endpoint.is_empty() {
                return Err(InvoiceError::Config(
                    "llm.azure.endpoint is not set (or AZURE_OPENAI_ENDPOINT)".to_string(),
                ));
            }
            let api_key = credential("AZURE_OPENAI_API_KEY")?;
            info!(url = %azure.endpoint, deployment = %azure.deployment, "Using Azure OpenAI backend");
            Ok(ResolvedEndpoint {
                url: format!(
                    "{}/openai/deployments/{}/chat/completions?api-version={}",
                    azure.endpoint.trim_end_matches('/'),
                    azure.deployment,
                    azure.api_version
                ),
                model: azure.deployment.clone(),
                auth: Auth::ApiKey(api_key),
            })
        }
        LlmBackend::Remote => {
            let api_key = credential("LLM_API_KEY")?;
            info!(url = %llm.remote.base_url, model = %llm.remote.model, "Using remote API backend");
            Ok(ResolvedEndpoint {
                url: completions_url(&llm.remote.base_url),
                model: llm.remote.model.clone(),
                auth: Auth::Bearer(api_key),
            })
        }
        LlmBackend::Ollama => {
            info!(url = %llm.ollama.base_url, model = %llm.ollama.model, "Using Ollama (local) backend");
            Ok(ResolvedEndpoint {
                url: completions_url(&llm.ollama.base_url),
                model: llm.ollama.model.clone(),
                auth: Auth::Bearer("ollama".to_string()), // required by API but ignored
            })
        }
    }
}

fn completions_url(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}

/// Check if the Ollama server is reachable.
pub async fn check_ollama_health(client: &Client, base_url: &str) -> bool {
    // Ollama's health endpoint is at the root (not under /v1)
    let health_url = base_url.trim_end_matches('/').trim_end_matches("/v1");

    match client
        .get(health_url)
        .timeout(std::time::Duration::from_secs(3))
        .send()
        .await
    {
        Ok(resp) if resp.status().is_success() => {
            info!("Ollama server is reachable");
            true
        }
        Ok(resp) => {
            warn!(status = %resp.status(), "Ollama server returned non-OK status");
            false
        }
        Err(e) => {
            warn!(error = %e, "Ollama server not reachable");
            false
        }
    }
}

/// Multi-turn chat grounded on one document's extraction.
pub struct ChatSession {
    client: Client,
    endpoint: ResolvedEndpoint,
    extraction: InvoiceExtraction,
    history: Vec<ChatMessage>,
}

impl ChatSession {
    pub async fn connect(llm: &LlmSection, extraction: InvoiceExtraction) -> Result<Self, InvoiceError> {
        let endpoint = resolve_endpoint(llm)?;
        let client = Client::new();

        if llm.backend == LlmBackend::Ollama && !check_ollama_health(&client, &llm.ollama.base_url).await {
            return Err(InvoiceError::Chat(format!(
                "Ollama is not running at {}. Start it with: ollama serve",
                llm.ollama.base_url
            )));
        }

        Ok(Self::with_endpoint(client, endpoint, extraction))
    }

    pub fn with_endpoint(client: Client, endpoint: ResolvedEndpoint, extraction: InvoiceExtraction) -> Self {
        let history = seed_history(&extraction.text);
        Self {
            client,
            endpoint,
            extraction,
            history,
        }
    }

    pub fn extraction(&self) -> &InvoiceExtraction {
        &self.extraction
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Drop the conversation and start over on the same document.
    pub fn reset(&mut self) {
        self.history = seed_history(&self.extraction.text);
    }

    /// Swap in a new document; the conversation restarts.
    pub fn replace_document(&mut self, extraction: InvoiceExtraction) {
        self.extraction = extraction;
        self.reset();
    }

    /// Full message list for the next request: grounding context, then history.
    pub fn messages(&self) -> Vec<ChatMessage> {
        let mut messages = base_context(&self.extraction);
        messages.extend(self.history.iter().cloned());
        messages
    }

    pub async fn ask(&mut self, question: &str) -> Result<String, InvoiceError> {
        self.history.push(ChatMessage::text(Role::User, question));
        let messages = self.messages();

        for (i, m) in messages.iter().enumerate() {
            debug!(idx = i, role = ?m.role, summary = %summarize(&m.content), "Outgoing message");
        }

        let reply = match complete(&self.client, &self.endpoint, &messages).await {
            Ok(reply) => reply,
            Err(e) => {
                // Keep history consistent: the unanswered question is dropped.
                self.history.pop();
                return Err(e);
            }
        };

        self.history.push(ChatMessage::text(Role::Assistant, reply.clone()));
        Ok(reply)
    }
}

fn seed_history(invoice_text: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::text(Role::System, GROUNDED_PROMPT),
        ChatMessage::text(Role::User, invoice_text),
    ]
}

fn base_context(extraction: &InvoiceExtraction) -> Vec<ChatMessage> {
    let mut parts = vec![ContentPart::Text {
        text: extraction.text.clone(),
    }];
    parts.extend(extraction.images.iter().map(|image| ContentPart::ImageUrl {
        image_url: ImageUrl {
            url: format!("data:{};base64,{}", image.mime, STANDARD.encode(&image.bytes)),
        },
    }));

    vec![
        ChatMessage::text(Role::System, VISION_PROMPT),
        ChatMessage {
            role: Role::User,
            content: MessageContent::Parts(parts),
        },
    ]
}

fn summarize(content: &MessageContent) -> String {
    match content {
        MessageContent::Text(text) => format!("{} chars", text.len()),
        MessageContent::Parts(parts) => {
            let images = parts
                .iter()
                .filter(|p| matches!(p, ContentPart::ImageUrl { .. }))
                .count();
            format!("{} parts, {images} images", parts.len())
        }
    }
}

async fn complete(
    client: &Client,
    endpoint: &ResolvedEndpoint,
    messages: &[ChatMessage],
) -> Result<String, InvoiceError> {
    let request = ChatRequest {
        model: &endpoint.model,
        messages,
        stream: false,
    };

    let builder = client.post(&endpoint.url).json(&request);
    let builder = match &endpoint.auth {
        Auth::ApiKey(key) => builder.header("api-key", key),
        Auth::Bearer(token) => builder.bearer_auth(token),
    };

    let response = builder.send().await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(InvoiceError::Chat(format!("LLM API error {status}: {body}")));
    }

    let chat_response: ChatResponse = response.json().await?;
    let reply = chat_response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| InvoiceError::Chat("Empty response from LLM".to_string()))?;

    info!(chars = reply.len(), "LLM reply received");
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AzureOpenAiConfig;
    use crate::pdf_pages::PageImage;
    use crate::tables::{DocumentTables, TableIdMode};
    use serde_json::json;

    fn extraction() -> InvoiceExtraction {
        InvoiceExtraction {
            fingerprint: "f".repeat(64),
            text: "\n\n--- Page 1 ---\nTable 1 (headers):\n[]".to_string(),
            tables: DocumentTables::new(TableIdMode::Namespaced),
            images: vec![PageImage {
                page: 1,
                mime: "image/png",
                bytes: b"png".to_vec(),
            }],
            failed_pages: vec![],
        }
    }

    fn session() -> ChatSession {
        let endpoint = ResolvedEndpoint {
            url: "http://localhost:0/chat/completions".to_string(),
            model: "test".to_string(),
            auth: Auth::Bearer("t".to_string()),
        };
        ChatSession::with_endpoint(Client::new(), endpoint, extraction())
    }

    #[test]
    fn grounding_context_carries_text_and_images() {
        let messages = session().messages();
        assert_eq!(messages.len(), 4);

        let value = serde_json::to_value(&messages[1]).unwrap();
        assert_eq!(
            value,
            json!({
                "role": "user",
                "content": [
                    {"type": "text", "text": "\n\n--- Page 1 ---\nTable 1 (headers):\n[]"},
                    {"type": "image_url", "image_url": {"url": "data:image/png;base64,cG5n"}}
                ]
            })
        );
        assert_eq!(
            serde_json::to_value(&messages[2]).unwrap(),
            json!({"role": "system", "content": GROUNDED_PROMPT})
        );
    }

    #[test]
    fn reset_restores_seed_history() {
        let mut chat = session();
        chat.history.push(ChatMessage::text(Role::User, "What is the total?"));
        chat.history.push(ChatMessage::text(Role::Assistant, "9.99"));
        chat.reset();
        assert_eq!(chat.history(), seed_history(&chat.extraction().text).as_slice());
    }

    #[tokio::test]
    async fn failed_request_drops_question() {
        let mut chat = session();
        assert!(chat.ask("hello?").await.is_err());
        assert_eq!(chat.history().len(), 2);
    }

    #[test]
    fn azure_without_endpoint_is_config_error() {
        let llm = LlmSection {
            backend: LlmBackend::Azure,
            azure: AzureOpenAiConfig::default(),
            ..LlmSection::default()
        };
        assert!(matches!(resolve_endpoint(&llm), Err(InvoiceError::Config(_))));
    }

    #[test]
    fn ollama_needs_no_key() {
        let mut llm = LlmSection::default();
        llm.backend = LlmBackend::Ollama;
        llm.ollama.base_url = "http://localhost:11434/v1/".to_string();
        llm.ollama.model = "qwen3:8b".to_string();

        let endpoint = resolve_endpoint(&llm).unwrap();
        assert_eq!(endpoint.url, "http://localhost:11434/v1/chat/completions");
        assert_eq!(endpoint.model, "qwen3:8b");
    }
}
