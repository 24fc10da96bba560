//! Talks to OpenAI-compatible APIs for embeddings and chat completions.
//! Both are optional; see AiConfig::from_env().
//!
//! The store and the dream engine only see the [`Embedder`] and
//! [`Generator`] traits, so tests run against in-process fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::CollaboratorError;

fn backend_err(msg: impl Into<String>) -> CollaboratorError {
    CollaboratorError::Backend(msg.into())
}

/// Local models can take minutes on a long dream prompt.
const DEFAULT_TIMEOUT_SECS: u64 = 600;

#[derive(Clone)]
pub struct AiConfig {
    pub llm_url: String,
    pub llm_key: String,
    pub llm_model: String,
    pub embed_url: String,
    pub embed_key: String,
    pub embed_model: String,
    /// Prepend `passage: ` / `query: ` for asymmetric embedders (e5 family).
    pub embed_prefixes: bool,
    pub timeout_secs: u64,
    pub client: reqwest::Client,
}

impl AiConfig {
    /// Returns `None` if neither `METACOG_LLM_URL` nor `METACOG_EMBED_URL` is set.
    pub fn from_env() -> Option<Self> {
        let llm_url = std::env::var("METACOG_LLM_URL").unwrap_or_default();
        let embed_url = std::env::var("METACOG_EMBED_URL").unwrap_or_else(|_| {
            if llm_url.is_empty() {
                String::new()
            } else if llm_url.contains("/chat/completions") {
                // Only rewrite if this looks like a chat completions endpoint
                llm_url.replace("/chat/completions", "/embeddings")
            } else {
                format!("{}/embeddings", llm_url.trim_end_matches('/'))
            }
        });
        if llm_url.is_empty() && embed_url.is_empty() {
            return None;
        }

        let llm_key = std::env::var("METACOG_LLM_KEY").unwrap_or_default();
        let llm_model = std::env::var("METACOG_LLM_MODEL").unwrap_or_else(|_| "local-model".into());
        let embed_key = std::env::var("METACOG_EMBED_KEY").unwrap_or_else(|_| llm_key.clone());
        let embed_model = std::env::var("METACOG_EMBED_MODEL")
            .unwrap_or_else(|_| "text-embedding-multilingual-e5-small".into());
        let timeout_secs = std::env::var("METACOG_LLM_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .ok()?;

        Some(Self {
            llm_url,
            llm_key,
            llm_model,
            embed_url,
            embed_key,
            embed_model,
            embed_prefixes: crate::config::env_bool("METACOG_EMBED_PREFIXES", false),
            timeout_secs,
            client,
        })
    }

    pub fn has_llm(&self) -> bool {
        !self.llm_url.is_empty()
    }

    pub fn has_embed(&self) -> bool {
        !self.embed_url.is_empty()
    }
}

/// How a text is about to be used. Asymmetric embedders encode stored
/// passages and search queries differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Passage,
    Query,
}

impl Framing {
    pub fn prefix(self) -> &'static str {
        match self {
            Framing::Passage => "passage: ",
            Framing::Query => "query: ",
        }
    }
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str, framing: Framing) -> Result<Vec<f32>, CollaboratorError>;
}

#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub temperature: f64,
    pub max_tokens: Option<u32>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self { temperature: 0.7, max_tokens: None }
    }
}

#[async_trait]
pub trait Generator: Send + Sync {
    /// One completion, no tool loop.
    async fn generate(&self, prompt: &str, system: &str, opts: &GenerateOptions) -> Result<String, CollaboratorError>;
}

/// Replies some local servers return as text instead of an HTTP error.
pub fn is_error_sentinel(reply: &str) -> bool {
    let t = reply.trim();
    t.is_empty() || t.starts_with("Error") || t.starts_with("API Error") || t.starts_with("Request timed out")
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize, Deserialize, Clone)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

fn send_err(cfg: &AiConfig, what: &str, e: reqwest::Error) -> CollaboratorError {
    if e.is_timeout() {
        CollaboratorError::Timeout(cfg.timeout_secs)
    } else if e.is_connect() {
        CollaboratorError::Unavailable(format!("{what}: {e}"))
    } else {
        backend_err(format!("{what} request failed: {e}"))
    }
}

/// Send a chat completion request, return the response text.
pub async fn llm_chat(
    cfg: &AiConfig,
    system: &str,
    user: &str,
    opts: &GenerateOptions,
) -> Result<String, CollaboratorError> {
    if !cfg.has_llm() {
        return Err(CollaboratorError::Unavailable("no LLM endpoint configured".into()));
    }
    let req = ChatRequest {
        model: cfg.llm_model.clone(),
        messages: vec![
            ChatMessage { role: "system".into(), content: system.into() },
            ChatMessage { role: "user".into(), content: user.into() },
        ],
        temperature: opts.temperature,
        max_tokens: opts.max_tokens,
    };

    let mut builder = cfg.client.post(&cfg.llm_url).json(&req);
    if !cfg.llm_key.is_empty() {
        builder = builder.header("Authorization", format!("Bearer {}", cfg.llm_key));
    }

    let start = std::time::Instant::now();
    let resp = builder.send().await.map_err(|e| send_err(cfg, "LLM", e))?;
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(backend_err(format!("LLM returned {status}: {body}")));
    }

    let chat: ChatResponse = resp
        .json()
        .await
        .map_err(|e| backend_err(format!("LLM response parse failed: {e}")))?;
    let content = chat
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default();
    debug!(model = %cfg.llm_model, ms = start.elapsed().as_millis() as u64, chars = content.len(), "llm reply");
    Ok(content)
}

#[derive(Serialize)]
struct EmbedRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedData>,
}

#[derive(Deserialize)]
struct EmbedData {
    embedding: Vec<f32>,
}

/// Generate embeddings for one or more texts.
pub async fn get_embeddings(cfg: &AiConfig, texts: &[String]) -> Result<Vec<Vec<f32>>, CollaboratorError> {
    if texts.is_empty() {
        return Ok(vec![]);
    }
    if !cfg.has_embed() {
        return Err(CollaboratorError::Unavailable("no embedding endpoint configured".into()));
    }

    let req = EmbedRequest {
        model: cfg.embed_model.clone(),
        input: texts.to_vec(),
    };

    let mut builder = cfg.client.post(&cfg.embed_url).json(&req);
    if !cfg.embed_key.is_empty() {
        builder = builder.header("Authorization", format!("Bearer {}", cfg.embed_key));
    }

    let resp = builder.send().await.map_err(|e| send_err(cfg, "embedding", e))?;
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(backend_err(format!("embedding API returned {status}: {body}")));
    }

    let embed_resp: EmbedResponse = resp
        .json()
        .await
        .map_err(|e| backend_err(format!("embedding response parse failed: {e}")))?;

    let embeddings: Vec<Vec<f32>> = embed_resp.data.into_iter().map(|d| d.embedding).collect();
    if embeddings.len() != texts.len() {
        return Err(backend_err(format!(
            "embedding count mismatch: sent {} texts, got {} embeddings",
            texts.len(),
            embeddings.len()
        )));
    }
    Ok(embeddings)
}

/// [`Embedder`] over an OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiEmbedder {
    cfg: AiConfig,
}

impl OpenAiEmbedder {
    pub fn new(cfg: AiConfig) -> Self {
        Self { cfg }
    }

    fn framed(&self, text: &str, framing: Framing) -> String {
        if self.cfg.embed_prefixes {
            format!("{}{text}", framing.prefix())
        } else {
            text.to_string()
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str, framing: Framing) -> Result<Vec<f32>, CollaboratorError> {
        let input = vec![self.framed(text, framing)];
        get_embeddings(&self.cfg, &input)
            .await?
            .pop()
            .ok_or_else(|| backend_err("empty embedding response"))
    }
}

/// [`Generator`] over an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiGenerator {
    cfg: AiConfig,
}

impl OpenAiGenerator {
    pub fn new(cfg: AiConfig) -> Self {
        Self { cfg }
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn generate(&self, prompt: &str, system: &str, opts: &GenerateOptions) -> Result<String, CollaboratorError> {
        llm_chat(&self.cfg, system, prompt, opts).await
    }
}

/// Cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut na, mut nb) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    let denom = na.sqrt() * nb.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

/// Serialize an f32 vector to bytes (little-endian) for SQLite BLOB storage.
pub fn embedding_to_bytes(v: &[f32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(v.len() * 4);
    for &f in v {
        buf.extend_from_slice(&f.to_le_bytes());
    }
    buf
}

/// Deserialize bytes back to an f32 vector. A trailing partial chunk is dropped.
pub fn bytes_to_embedding(b: &[u8]) -> Vec<f32> {
    b.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
