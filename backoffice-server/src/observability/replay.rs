//! Outbound replay of a captured request

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Header marking a request issued by the replay engine; such requests are
/// never captured again.
pub const REPLAY_HEADER: &str = "x-replay-of";
pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

#[derive(Debug, Clone, PartialEq)]
pub struct ReplayCall {
    pub error_id: String,
    pub method: String,
    pub path: String,
    pub query: BTreeMap<String, String>,
    pub body: Value,
    pub idempotency_key: String,
    /// The retrying user's `Authorization` header, forwarded unchanged
    pub authorization: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplayReply {
    pub status_code: u16,
    pub body: Value,
}

#[async_trait]
pub trait Replayer: Send + Sync {
    /// Issue the call; `Err` only for transport failures
    async fn replay(&self, call: &ReplayCall) -> Result<ReplayReply, String>;
}

/// Replays over HTTP against the server's own listener
pub struct HttpReplayer {
    client: reqwest::Client,
    base_url: String,
}

impl HttpReplayer {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Replayer for HttpReplayer {
    async fn replay(&self, call: &ReplayCall) -> Result<ReplayReply, String> {
        let method = reqwest::Method::from_bytes(call.method.as_bytes()).map_err(|e| e.to_string())?;
        let url = format!("{}{}", self.base_url, call.path);

        let mut request = self
            .client
            .request(method, url)
            .query(&call.query)
            .header(IDEMPOTENCY_HEADER, &call.idempotency_key)
            .header(REPLAY_HEADER, &call.error_id);
        if let Some(auth) = &call.authorization {
            request = request.header(reqwest::header::AUTHORIZATION, auth);
        }
        if !call.body.is_null() {
            request = request.json(&call.body);
        }

        let response = request.send().await.map_err(|e| e.to_string())?;
        let status_code = response.status().as_u16();
        let bytes = response.bytes().await.map_err(|e| e.to_string())?;
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        Ok(ReplayReply { status_code, body })
    }
}
