//! HTTP + WebSocket implementation of [`RemoteGateway`].
//!
//! - `GET/POST {api}/person`, `PUT/DELETE {api}/person/{id}` with bearer auth
//! - push events over a WebSocket that expects an authorization message first

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rolodex_core::Record;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::{GatewayError, PushSubscription, RemoteGateway};
use crate::types::{AuthToken, PushEvent, PushKind};

/// Endpoint configuration for [`HttpGateway`].
#[derive(Debug, Clone)]
pub struct HttpGatewayConfig {
    /// Base URL of the REST API, e.g. `http://localhost:3000`.
    pub api_url: String,
    /// WebSocket URL of the push channel, e.g. `ws://localhost:3000`.
    pub ws_url: String,
    /// Per-request timeout enforced by the HTTP client.
    pub request_timeout: Duration,
    /// Buffered push events before the socket reader waits on the engine.
    pub push_buffer: usize,
}

impl HttpGatewayConfig {
    pub fn new(api_url: impl Into<String>) -> Self {
        let api_url = api_url.into();
        let ws_url = derive_ws_url(&api_url);
        Self {
            api_url,
            ws_url,
            request_timeout: Duration::from_secs(10),
            push_buffer: 64,
        }
    }

    pub fn with_ws_url(mut self, ws_url: impl Into<String>) -> Self {
        self.ws_url = ws_url.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// `http://host` → `ws://host`, `https://host` → `wss://host`.
pub(crate) fn derive_ws_url(api_url: &str) -> String {
    let trimmed = api_url.trim_end_matches('/');
    if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        format!("ws://{trimmed}")
    }
}

/// Remote gateway speaking the person REST API.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    config: HttpGatewayConfig,
}

impl HttpGateway {
    pub fn new(config: HttpGatewayConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client, config })
    }

    fn collection_url(&self) -> String {
        format!("{}/person", self.config.api_url.trim_end_matches('/'))
    }

    fn item_url(&self, record: &Record) -> Result<String, GatewayError> {
        let id = record
            .id
            .as_ref()
            .ok_or_else(|| GatewayError::rejected(None, "record has no identifier"))?;
        Ok(format!("{}/{}", self.collection_url(), id))
    }

    async fn send(&self, req: reqwest::RequestBuilder, op: &str) -> Result<reqwest::Response, GatewayError> {
        tracing::debug!(op, "request started");
        let resp = req.send().await.map_err(|e| {
            tracing::debug!(op, "request failed: {e}");
            send_error(e)
        })?;

        let status = resp.status();
        if is_upstream_unavailable(status) {
            tracing::debug!(op, status = status.as_u16(), "upstream unavailable");
            return Err(GatewayError::disconnected(format!("upstream unavailable ({status})")));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::debug!(op, status = status.as_u16(), "request rejected");
            return Err(GatewayError::rejected(Some(status.as_u16()), body));
        }
        tracing::debug!(op, "request succeeded");
        Ok(resp)
    }
}

/// Gateway/proxy answers meaning the API itself was never reached.
fn is_upstream_unavailable(status: reqwest::StatusCode) -> bool {
    matches!(
        status,
        reqwest::StatusCode::BAD_GATEWAY | reqwest::StatusCode::SERVICE_UNAVAILABLE | reqwest::StatusCode::GATEWAY_TIMEOUT
    )
}

fn send_error(err: reqwest::Error) -> GatewayError {
    if err.is_builder() {
        GatewayError::rejected(None, err.to_string())
    } else {
        GatewayError::disconnected(err.to_string())
    }
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, GatewayError> {
    resp.json::<T>().await.map_err(|e| {
        if e.is_decode() {
            GatewayError::rejected(None, format!("unreadable response: {e}"))
        } else {
            GatewayError::disconnected(e.to_string())
        }
    })
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn fetch_all(&self, auth: &AuthToken) -> Result<Vec<Record>, GatewayError> {
        let req = self.client.get(self.collection_url()).bearer_auth(auth.as_str());
        let resp = self.send(req, "fetch_all").await?;
        decode(resp).await
    }

    async fn create(&self, auth: &AuthToken, record: &Record) -> Result<Record, GatewayError> {
        let req = self
            .client
            .post(self.collection_url())
            .bearer_auth(auth.as_str())
            .json(record);
        let resp = self.send(req, "create").await?;
        decode(resp).await
    }

    async fn update(&self, auth: &AuthToken, record: &Record) -> Result<Record, GatewayError> {
        let url = self.item_url(record)?;
        let req = self.client.put(url).bearer_auth(auth.as_str()).json(record);
        let resp = self.send(req, "update").await?;
        decode(resp).await
    }

    async fn delete(&self, auth: &AuthToken, record: &Record) -> Result<(), GatewayError> {
        let url = self.item_url(record)?;
        let req = self.client.delete(url).bearer_auth(auth.as_str());
        self.send(req, "delete").await?;
        Ok(())
    }

    async fn subscribe(&self, auth: &AuthToken) -> Result<PushSubscription, GatewayError> {
        let url = self.config.ws_url.clone();
        let connected = tokio::time::timeout(self.config.request_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| GatewayError::disconnected("push channel connect timed out"))?;
        let (ws, _resp) = connected.map_err(|e| GatewayError::disconnected(e.to_string()))?;
        tracing::info!(%url, "push channel open");

        let (mut write, mut read) = ws.split();
        let handshake = json!({
            "type": "authorization",
            "payload": { "token": auth.as_str() },
        });
        write
            .send(Message::Text(handshake.to_string().into()))
            .await
            .map_err(|e| GatewayError::disconnected(e.to_string()))?;

        let (tx, rx) = mpsc::channel(self.config.push_buffer.max(1));
        let feeder = tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        let Some(event) = parse_push_frame(text.as_str()) else {
                            continue;
                        };
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        tracing::info!("push channel closed by server");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("push channel error: {e}");
                        break;
                    }
                }
            }
            let _ = write.close().await;
            tracing::info!("push channel released");
        });

        Ok(PushSubscription::with_feeder(rx, feeder))
    }
}

#[derive(Debug, Deserialize)]
struct PushFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

/// Parse one push frame; unknown kinds and malformed frames yield `None`.
///
/// Accepts the record either directly as `payload` or wrapped as
/// `payload.person`.
pub(crate) fn parse_push_frame(text: &str) -> Option<PushEvent> {
    let frame: PushFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!("ignoring malformed push frame: {e}");
            return None;
        }
    };

    let kind = match frame.kind.as_str() {
        "created" => PushKind::Created,
        "updated" => PushKind::Updated,
        other => {
            tracing::debug!(kind = other, "ignoring push frame");
            return None;
        }
    };

    let payload = match frame.payload {
        Value::Object(mut map) if !map.contains_key("_id") && map.contains_key("person") => {
            map.remove("person").unwrap_or(Value::Null)
        }
        other => other,
    };

    match serde_json::from_value::<Record>(payload) {
        Ok(record) if record.id.is_some() => Some(PushEvent { kind, record }),
        Ok(_) => {
            tracing::warn!("ignoring push frame without record id");
            None
        }
        Err(e) => {
            tracing::warn!("ignoring push frame with unreadable record: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_follows_api_scheme() {
        assert_eq!(derive_ws_url("http://localhost:3000/"), "ws://localhost:3000");
        assert_eq!(derive_ws_url("https://api.example.com"), "wss://api.example.com");
        assert_eq!(derive_ws_url("localhost:3000"), "ws://localhost:3000");
    }

    #[test]
    fn proxy_failures_count_as_unreachable() {
        assert!(is_upstream_unavailable(reqwest::StatusCode::BAD_GATEWAY));
        assert!(is_upstream_unavailable(reqwest::StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_upstream_unavailable(reqwest::StatusCode::GATEWAY_TIMEOUT));
        assert!(!is_upstream_unavailable(reqwest::StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!is_upstream_unavailable(reqwest::StatusCode::UNPROCESSABLE_ENTITY));
    }

    #[test]
    fn push_frames_are_parsed() {
        let event = parse_push_frame(r#"{"type":"updated","payload":{"_id":"7","nume":"Bob"}}"#).unwrap();
        assert_eq!(event.kind, PushKind::Updated);
        assert_eq!(event.record.id.unwrap().as_str(), "7");

        let wrapped =
            parse_push_frame(r#"{"type":"created","payload":{"person":{"_id":"8","nume":"Ana"}}}"#).unwrap();
        assert_eq!(wrapped.kind, PushKind::Created);
        assert_eq!(wrapped.record.id.unwrap().as_str(), "8");
    }

    #[test]
    fn unknown_or_broken_frames_are_ignored() {
        assert!(parse_push_frame(r#"{"type":"deleted","payload":{"_id":"7"}}"#).is_none());
        assert!(parse_push_frame("not json").is_none());
        assert!(parse_push_frame(r#"{"type":"created","payload":{"nume":"x"}}"#).is_none());
    }
}
