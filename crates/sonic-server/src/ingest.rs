//! HTTP ingestion endpoints.
//!
//! | Endpoint | Method | Record |
//! |----------|--------|--------|
//! | `/log/{device_id}` | any | One record per request, fields taken from the request |
//! | `/api/log/batch[/{device_id}]` | POST | One record per event in a JSON (optionally gzip) payload |
//! | `/api/log/push/{device_id}` | any | One record from a JSON event or a raw text body |

use std::convert::Infallible;
use std::io::Read;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, Method, Uri, header};
use chrono::Local;
use flate2::read::GzDecoder;
use serde::Deserialize;
use sonic_logs::{LogRecord, time_local};
use tracing::debug;

use crate::context::PipelineContext;
use crate::error::{ServerError, ServerResult};

/// Method tag of batch records.
pub const BATCH_METHOD: &str = "BATCH";
/// Path of batch records.
pub const BATCH_PATH: &str = "/api/log/batch";
/// Method tag of pushed records.
pub const PUSH_METHOD: &str = "PUSH";
/// Path of pushed records.
pub const PUSH_PATH: &str = "/api/log/push";
/// Level given to pushed records that carry none.
pub const DEFAULT_PUSH_LEVEL: &str = "info";

/// Client address of the request, without the port.
///
/// Empty when the server was not started with connection info.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteAddr(pub String);

impl<S> FromRequestParts<S> for RemoteAddr
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ip = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_default();
        Ok(Self(ip))
    }
}

/// One event of a batch or a structured push.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IncomingLog {
    /// Severity level.
    pub level: String,
    /// Grouping label.
    pub tag: String,
    /// Free text.
    pub text: String,
    /// Event time; empty means "now".
    pub time: String,
    /// Structured payload: a string is kept as is, anything else as JSON.
    pub body: Option<serde_json::Value>,
}

impl IncomingLog {
    /// The payload as stored text.
    #[must_use]
    pub fn body_text(&self) -> String {
        match &self.body {
            None | Some(serde_json::Value::Null) => String::new(),
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }

    fn has_content(&self) -> bool {
        !self.text.is_empty() || !self.body_text().is_empty()
    }

    fn summary(&self) -> String {
        format!("[{}] {}: {}", self.level, self.tag, self.text)
    }
}

/// Batch payload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BatchRequest {
    /// Device identifier shared by every event.
    pub device_id: String,
    /// Events in order.
    pub logs: Vec<IncomingLog>,
}

/// `level` / `tag` query parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingParams {
    /// Severity level.
    pub level: String,
    /// Grouping label.
    pub tag: String,
}

impl RoutingParams {
    /// Picks the first `level` and `tag` out of decoded query pairs. Other
    /// keys and repeated keys are ignored.
    #[must_use]
    pub fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        let mut level = None;
        let mut tag = None;
        for (key, value) in pairs {
            match key.as_str() {
                "level" if level.is_none() => level = Some(value),
                "tag" if tag.is_none() => tag = Some(value),
                _ => {}
            }
        }
        Self {
            level: level.unwrap_or_default(),
            tag: tag.unwrap_or_default(),
        }
    }
}

/// Handle any request to `/log/` or `/log/{device_id}`.
pub async fn receive_event(
    State(ctx): State<Arc<PipelineContext>>,
    RemoteAddr(ip): RemoteAddr,
    device: Option<Path<String>>,
    Query(pairs): Query<Vec<(String, String)>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> &'static str {
    let params = RoutingParams::from_pairs(pairs);
    let query = uri.query().unwrap_or_default();
    let raw = if query.is_empty() {
        format!("{method} {}", uri.path())
    } else {
        format!("{method} {}?{query}", uri.path())
    };

    let mut record = LogRecord::new(raw);
    record.ip = ip;
    record.time = time_local(Local::now());
    record.method = method.to_string();
    record.path = uri.path().to_string();
    record.status = 200;
    record.device_id = device.map(|Path(id)| id).unwrap_or_default();
    record.level = params.level;
    record.tag = params.tag;
    record.query = query.to_string();
    record.ua = user_agent(&headers);
    ctx.enrich(&mut record);

    ctx.ingest(record).await;
    "ok"
}

/// Handle `POST /api/log/batch`.
pub async fn receive_batch(
    State(ctx): State<Arc<PipelineContext>>,
    RemoteAddr(ip): RemoteAddr,
    headers: HeaderMap,
    body: Bytes,
) -> ServerResult<String> {
    ingest_batch(&ctx, ip, String::new(), &headers, &body).await
}

/// Handle `POST /api/log/batch/{device_id}`.
pub async fn receive_batch_for_device(
    State(ctx): State<Arc<PipelineContext>>,
    RemoteAddr(ip): RemoteAddr,
    Path(device_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ServerResult<String> {
    ingest_batch(&ctx, ip, device_id, &headers, &body).await
}

/// Handle any request to `/api/log/push/` or `/api/log/push/{device_id}`.
pub async fn receive_push(
    State(ctx): State<Arc<PipelineContext>>,
    RemoteAddr(ip): RemoteAddr,
    device: Option<Path<String>>,
    Query(pairs): Query<Vec<(String, String)>>,
    headers: HeaderMap,
    body: Bytes,
) -> ServerResult<&'static str> {
    if body.is_empty() {
        return Err(ServerError::InvalidRequest("empty body".to_string()));
    }
    let params = RoutingParams::from_pairs(pairs);

    let structured = serde_json::from_slice::<IncomingLog>(&body)
        .ok()
        .filter(IncomingLog::has_content);

    let mut record = match structured {
        Some(mut event) => {
            if event.level.is_empty() {
                event.level = params.level;
            }
            if event.tag.is_empty() {
                event.tag = params.tag;
            }
            if event.level.is_empty() {
                event.level = DEFAULT_PUSH_LEVEL.to_string();
            }
            let mut record = LogRecord::new(event.summary());
            record.body = event.body_text();
            record.level = event.level;
            record.tag = event.tag;
            record.query = event.text;
            record
        }
        None => {
            let content = String::from_utf8_lossy(&body).into_owned();
            let mut record = LogRecord::new(content.clone());
            record.query = content;
            record.level = if params.level.is_empty() {
                DEFAULT_PUSH_LEVEL.to_string()
            } else {
                params.level
            };
            record.tag = params.tag;
            record
        }
    };

    record.ip = ip;
    record.time = time_local(Local::now());
    record.method = PUSH_METHOD.to_string();
    record.path = PUSH_PATH.to_string();
    record.status = 200;
    record.device_id = device.map(|Path(id)| id).unwrap_or_default();
    record.ua = user_agent(&headers);
    ctx.enrich(&mut record);

    ctx.ingest(record).await;
    Ok("ok")
}

async fn ingest_batch(
    ctx: &PipelineContext,
    ip: String,
    path_device: String,
    headers: &HeaderMap,
    body: &[u8],
) -> ServerResult<String> {
    let request = decode_batch(headers, body)?;
    let device_id = if request.device_id.is_empty() {
        path_device
    } else {
        request.device_id
    };

    let now = time_local(Local::now());
    let created_at = chrono::Utc::now().timestamp();
    let ua = user_agent(headers);

    let records: Vec<LogRecord> = request
        .logs
        .into_iter()
        .map(|event| {
            let mut record = LogRecord::new(event.summary());
            record.created_at = created_at;
            record.ip.clone_from(&ip);
            record.time = if event.time.is_empty() {
                now.clone()
            } else {
                event.time.clone()
            };
            record.method = BATCH_METHOD.to_string();
            record.path = BATCH_PATH.to_string();
            record.status = 200;
            record.device_id.clone_from(&device_id);
            record.body = event.body_text();
            record.level = event.level;
            record.tag = event.tag;
            record.query = event.text;
            record.ua.clone_from(&ua);
            ctx.enrich(&mut record);
            record
        })
        .collect();

    let count = records.len();
    debug!(count, device_id = %device_id, "batch received");
    ctx.ingest_batch(records).await;
    Ok(format!("Processed {count} logs"))
}

/// Largest batch payload accepted after gzip inflation.
pub const MAX_INFLATED_BATCH: u64 = 16 * 1024 * 1024;

/// Decodes a batch body, inflating it first if it is gzip-encoded.
pub fn decode_batch(headers: &HeaderMap, body: &[u8]) -> ServerResult<BatchRequest> {
    decode_batch_within(headers, body, MAX_INFLATED_BATCH)
}

fn decode_batch_within(headers: &HeaderMap, body: &[u8], limit: u64) -> ServerResult<BatchRequest> {
    let gzipped = headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("gzip"));

    if gzipped {
        let mut inflated = Vec::new();
        GzDecoder::new(body)
            .take(limit.saturating_add(1))
            .read_to_end(&mut inflated)
            .map_err(|e| ServerError::InvalidRequest(format!("invalid gzip body: {e}")))?;
        if inflated.len() as u64 > limit {
            return Err(ServerError::InvalidRequest(format!(
                "inflated batch exceeds {limit} bytes"
            )));
        }
        parse_batch(&inflated)
    } else {
        parse_batch(body)
    }
}

fn parse_batch(json: &[u8]) -> ServerResult<BatchRequest> {
    serde_json::from_slice(json)
        .map_err(|e| ServerError::InvalidRequest(format!("invalid JSON: {e}")))
}

fn user_agent(headers: &HeaderMap) -> String {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}
