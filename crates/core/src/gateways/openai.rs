use crate::chunking::char_prefix;
use crate::error::GatewayError;
use crate::models::Usage;
use crate::traits::{Completion, CompletionStream, LanguageModel, StreamUnit};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::header;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";
pub const PLACEHOLDER_API_KEY: &str = "your_openai_api_key_here";

const SNIPPET_CHARS: usize = 300;
const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

impl OpenAiConfig {
    pub fn usable_api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty() && *key != PLACEHOLDER_API_KEY)
    }
}

#[derive(Debug)]
pub struct OpenAiGateway {
    client: reqwest::Client,
    url_chat: String,
}

impl OpenAiGateway {
    pub fn from_config(config: &OpenAiConfig) -> Result<Option<Self>, GatewayError> {
        match config.usable_api_key() {
            Some(api_key) => Self::new(api_key, &config.base_url, config.timeout).map(Some),
            None => Ok(None),
        }
    }

    pub fn new(api_key: &str, base_url: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let base = base_url.trim();
        let parsed = Url::parse(base).map_err(|error| {
            GatewayError::Config(format!("invalid base url {base_url}: {error}"))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(GatewayError::Config(format!("invalid base url: {base_url}")));
        }

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!("Bearer {api_key}"))
                .map_err(|error| GatewayError::Config(format!("invalid API key header: {error}")))?,
        );
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;
        let url_chat = format!("{}/v1/chat/completions", base.trim_end_matches('/'));

        info!(
            endpoint = %url_chat,
            timeout_secs = timeout.as_secs(),
            "language model gateway initialized"
        );

        Ok(Self { client, url_chat })
    }

    async fn post(&self, body: &ChatRequest<'_>) -> Result<reqwest::Response, GatewayError> {
        let started = Instant::now();
        debug!(
            model = body.model,
            stream = body.stream,
            prompt_len = body.messages[0].content.len(),
            "POST {}",
            self.url_chat
        );

        let response = self.client.post(&self.url_chat).json(body).send().await?;
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let snippet = char_prefix(&text, SNIPPET_CHARS).to_string();
        error!(
            %status,
            url = %self.url_chat,
            %snippet,
            model = body.model,
            latency_ms = started.elapsed().as_millis(),
            "chat completions returned non-success status"
        );
        Err(GatewayError::Status {
            status,
            url: self.url_chat.clone(),
            snippet,
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAiGateway {
    async fn complete(&self, prompt: &str, model: &str) -> Result<Completion, GatewayError> {
        let body = ChatRequest::new(prompt, model, false, false);
        let response = self.post(&body).await?;

        let out: ChatResponse = response
            .json()
            .await
            .map_err(|error| GatewayError::Decode(format!("chat completion body: {error}")))?;
        let text = out
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.unwrap_or_default())
            .ok_or_else(|| GatewayError::Decode("response has no choices".to_string()))?;

        Ok(Completion {
            text,
            usage: out.usage.map(Usage::from),
        })
    }

    async fn stream_complete(
        &self,
        prompt: &str,
        model: &str,
        include_usage: bool,
    ) -> Result<CompletionStream, GatewayError> {
        let body = ChatRequest::new(prompt, model, true, include_usage);
        let response = self.post(&body).await?;

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(GatewayError::from))
            .boxed();
        Ok(completion_units(bytes))
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [RequestMessage<'a>; 1],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

impl<'a> ChatRequest<'a> {
    fn new(prompt: &'a str, model: &'a str, stream: bool, include_usage: bool) -> Self {
        Self {
            model,
            messages: [RequestMessage {
                role: "user",
                content: prompt,
            }],
            stream,
            stream_options: (stream && include_usage).then_some(StreamOptions {
                include_usage: true,
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct RequestMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ResponseChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ResponseChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkResponse {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl From<ApiUsage> for Usage {
    fn from(usage: ApiUsage) -> Self {
        Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        }
    }
}

#[derive(Debug, Default)]
struct EventLineDecoder {
    buffer: Vec<u8>,
}

impl EventLineDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut payloads = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            payloads.extend(data_payload(&line[..newline]));
        }
        payloads
    }

    fn finish(&mut self) -> Vec<String> {
        let rest = std::mem::take(&mut self.buffer);
        data_payload(&rest).into_iter().collect()
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let payload = line.trim_end_matches('\r').strip_prefix("data:")?.trim();
    (!payload.is_empty()).then(|| payload.to_string())
}

fn decode_chunk(payload: &str) -> Result<StreamUnit, GatewayError> {
    let chunk: ChunkResponse = serde_json::from_str(payload).map_err(|error| {
        GatewayError::Decode(format!("stream chunk ({error}): {}", char_prefix(payload, 120)))
    })?;
    let delta = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content);
    Ok(StreamUnit {
        delta,
        usage: chunk.usage.map(Usage::from),
    })
}

struct UnitStream {
    bytes: BoxStream<'static, Result<Vec<u8>, GatewayError>>,
    decoder: EventLineDecoder,
    pending: VecDeque<Result<StreamUnit, GatewayError>>,
    finished: bool,
}

impl UnitStream {
    fn queue(&mut self, payloads: Vec<String>) {
        for payload in payloads {
            if self.finished {
                return;
            }
            if payload == DONE_SENTINEL {
                self.finished = true;
                return;
            }
            match decode_chunk(&payload) {
                Ok(unit) if unit.delta.is_none() && unit.usage.is_none() => {}
                Ok(unit) => self.pending.push_back(Ok(unit)),
                Err(error) => {
                    self.finished = true;
                    self.pending.push_back(Err(error));
                }
            }
        }
    }
}

fn completion_units(bytes: BoxStream<'static, Result<Vec<u8>, GatewayError>>) -> CompletionStream {
    let state = UnitStream {
        bytes,
        decoder: EventLineDecoder::default(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(unit) = state.pending.pop_front() {
                return Some((unit, state));
            }
            if state.finished {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let payloads = state.decoder.push(&chunk);
                    state.queue(payloads);
                }
                Some(Err(error)) => {
                    state.finished = true;
                    state.pending.push_back(Err(error));
                }
                None => {
                    let payloads = state.decoder.finish();
                    state.queue(payloads);
                    state.finished = true;
                }
            }
        }
    })
    .boxed()
}
