use crate::error::{LlmError, Result};
use crate::model::{CallOptions, GenerateResult, LanguageModel};
use crate::sse::read_events;
use crate::stream::{ChunkStream, StreamDecoder, decode_chunks};
use async_trait::async_trait;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Request/response mapping for one provider's HTTP API.
///
/// Adapters are pure translation: no I/O, no retries. [`HttpModel`] owns the transport.
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    fn endpoint(&self) -> String;

    fn authorize(&self, request: reqwest::RequestBuilder, api_key: &str)
    -> reqwest::RequestBuilder;

    fn build_request(
        &self,
        model: &str,
        options: &CallOptions,
        stream: bool,
    ) -> Result<serde_json::Value>;

    fn parse_response(&self, body: &str) -> Result<GenerateResult>;

    /// A fresh decoder for one streamed response.
    fn stream_decoder(&self) -> Box<dyn StreamDecoder>;

    fn supports_streaming(&self) -> bool {
        true
    }
}

#[derive(Clone)]
pub struct HttpModel<A> {
    http: reqwest::Client,
    adapter: A,
    api_key: String,
    model: String,
}

impl<A: ProviderAdapter> HttpModel<A> {
    pub fn new(http: reqwest::Client, adapter: A, api_key: &str, model: &str) -> Self {
        Self {
            http,
            adapter,
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(provider = self.adapter.name(), model = %self.model, stream = stream)
    )]
    async fn send(
        &self,
        options: &CallOptions,
        stream: bool,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response> {
        if cancel.is_cancelled() {
            return Err(LlmError::Cancelled);
        }
        let body = self.adapter.build_request(&self.model, options, stream)?;
        let request = self
            .adapter
            .authorize(self.http.post(self.adapter.endpoint()), &self.api_key)
            .json(&body);

        let started = Instant::now();
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            response = request.send() => response?,
        };

        let status = response.status();
        tracing::debug!(
            status = status.as_u16(),
            latency_ms = started.elapsed().as_millis() as u64,
            "provider responded"
        );
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Provider {
                provider: self.adapter.name().to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl<A: ProviderAdapter + 'static> LanguageModel for HttpModel<A> {
    fn provider(&self) -> &str {
        self.adapter.name()
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn supports_streaming(&self) -> bool {
        self.adapter.supports_streaming()
    }

    async fn generate(
        &self,
        options: &CallOptions,
        cancel: &CancellationToken,
    ) -> Result<GenerateResult> {
        let response = self.send(options, false, cancel).await?;
        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            body = response.text() => body?,
        };
        self.adapter.parse_response(&body)
    }

    async fn stream(
        &self,
        options: &CallOptions,
        cancel: &CancellationToken,
    ) -> Result<ChunkStream> {
        if !self.adapter.supports_streaming() {
            return Err(LlmError::InvalidInput(format!(
                "{} does not support streaming",
                self.adapter.name()
            )));
        }
        let response = self.send(options, true, cancel).await?;
        let events = read_events(Box::pin(response.bytes_stream()), cancel.clone());
        Ok(decode_chunks(
            events,
            self.adapter.stream_decoder(),
            cancel.clone(),
        ))
    }
}
