//! Chat transport - issues one streaming request

use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use chat_core::{ChatConfig, Message, StreamProtocol};
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// Everything the transport needs to issue one request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub model: Option<String>,
    pub stream_protocol: StreamProtocol,
    pub headers: HashMap<String, String>,
    /// Extra JSON fields merged into the request body
    pub body: Map<String, Value>,
    /// Id of the assistant message being continued
    pub continuation: Option<String>,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>, config: &ChatConfig) -> Self {
        Self {
            messages,
            model: config.model.clone(),
            stream_protocol: config.stream_protocol,
            headers: config.headers.clone(),
            body: config.body.clone(),
            continuation: None,
        }
    }

    pub fn with_continuation(mut self, message_id: impl Into<String>) -> Self {
        self.continuation = Some(message_id.into());
        self
    }

    /// JSON request body. Extra body fields never override the core fields.
    pub fn to_body(&self) -> Value {
        let mut body = self.body.clone();
        body.insert("messages".to_string(), json!(self.messages));
        body.insert("streamProtocol".to_string(), json!(self.stream_protocol));
        if let Some(model) = &self.model {
            body.insert("model".to_string(), json!(model));
        }
        Value::Object(body)
    }
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Open the response stream. Implementations should give up promptly
    /// once `cancel` fires.
    async fn open(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ByteStream, TransportError>;
}

/// POSTs the request as JSON and streams the response body.
pub struct HttpTransport {
    client: Client,
    api: String,
    continuation_header: String,
}

impl HttpTransport {
    pub fn new(api: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api: api.into(),
            continuation_header: chat_core::config::DEFAULT_CONTINUATION_HEADER.to_string(),
        }
    }

    pub fn from_config(config: &ChatConfig) -> Self {
        Self::new(config.api.clone()).with_continuation_header(config.continuation_header.clone())
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_continuation_header(mut self, header: impl Into<String>) -> Self {
        self.continuation_header = header.into();
        self
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn open(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ByteStream, TransportError> {
        let mut builder = self.client.post(&self.api).json(&request.to_body());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(message_id) = &request.continuation {
            builder = builder.header(self.continuation_header.as_str(), message_id.as_str());
        }

        tracing::debug!(
            api = %self.api,
            message_count = request.messages.len(),
            continuation = ?request.continuation,
            "HttpTransport: sending request"
        );

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            response = builder.send() => response?,
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(TransportError::from));
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn collect(mut stream: ByteStream) -> String {
        let mut body = Vec::new();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk.expect("chunk"));
        }
        String::from_utf8(body).expect("utf-8 body")
    }

    #[test]
    fn body_carries_core_fields() {
        let mut config = ChatConfig::default();
        config.model = Some("gpt-4o".to_string());
        config
            .body
            .insert("temperature".to_string(), json!(0.2));
        config.body.insert("messages".to_string(), json!("ignored"));

        let request = ChatRequest::new(vec![Message::user("Hi")], &config);
        let body = request.to_body();
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["streamProtocol"], "data");
        assert_eq!(body["temperature"], 0.2);
        assert_eq!(body["messages"][0]["content"], "Hi");
    }

    #[tokio::test]
    async fn http_transport_streams_body_and_sends_continuation() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(header("x-continue-message-id", "a1"))
            .and(header("x-team", "core"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("0:\"Hello\"\nd:{\"finishReason\":\"stop\"}\n"),
            )
            .mount(&mock_server)
            .await;

        let mut config = ChatConfig::default();
        config.api = format!("{}/api/chat", mock_server.uri());
        config
            .headers
            .insert("x-team".to_string(), "core".to_string());

        let transport = HttpTransport::from_config(&config);
        let request = ChatRequest::new(vec![Message::user("Hi")], &config).with_continuation("a1");
        let stream = transport
            .open(request, CancellationToken::new())
            .await
            .expect("stream");

        assert_eq!(collect(stream).await, "0:\"Hello\"\nd:{\"finishReason\":\"stop\"}\n");
    }

    #[tokio::test]
    async fn http_transport_maps_error_status() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&mock_server)
            .await;

        let transport = HttpTransport::new(format!("{}/api/chat", mock_server.uri()));
        let request = ChatRequest::new(vec![Message::user("Hi")], &ChatConfig::default());
        match transport.open(request, CancellationToken::new()).await {
            Err(TransportError::Status { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            Err(other) => panic!("expected status error, got {other:?}"),
            Ok(_) => panic!("expected status error"),
        }
    }

    #[tokio::test]
    async fn cancelled_before_response() {
        let token = CancellationToken::new();
        token.cancel();
        // Port 9 (discard) on localhost; the cancelled branch wins before any I/O.
        let transport = HttpTransport::new("http://127.0.0.1:9/api/chat");
        let request = ChatRequest::new(vec![], &ChatConfig::default());
        assert!(matches!(
            transport.open(request, token).await,
            Err(TransportError::Cancelled)
        ));
    }
}
