//! Serverless gateway adapter.
//!
//! Reads one proxy-integration event as JSON, runs it through the same router
//! as the HTTP listener and writes one JSON response. Binary response bodies
//! are base64-encoded; `text/*` bodies are passed as strings.

use std::collections::HashMap;

use axum::body::Body;
use axum::http::{header, Request};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tower::ServiceExt;

use super::TransportError;

/// Upper bound on a response body handed back to the gateway.
const MAX_RESPONSE_SIZE: usize = 6 * 1024 * 1024;

/// One HTTP invocation as delivered by the gateway.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayEvent {
    pub http_method: String,
    pub path: String,
    #[serde(default)]
    pub query_string_parameters: Option<HashMap<String, String>>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub is_base64_encoded: bool,
}

/// The response returned to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayResponse {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
    pub is_base64_encoded: bool,
}

impl GatewayEvent {
    fn uri(&self) -> String {
        let mut uri = self.path.clone();
        let params = match &self.query_string_parameters {
            Some(params) if !params.is_empty() => params,
            _ => return uri,
        };
        let mut pairs: Vec<_> = params.iter().collect();
        pairs.sort();
        let query = pairs
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        uri.push('?');
        uri.push_str(&query);
        uri
    }

    fn body_bytes(&self) -> Result<Vec<u8>, TransportError> {
        match &self.body {
            None => Ok(Vec::new()),
            Some(body) if self.is_base64_encoded => STANDARD
                .decode(body)
                .map_err(|e| TransportError::GatewayRequest(format!("body is not base64: {}", e))),
            Some(body) => Ok(body.clone().into_bytes()),
        }
    }
}

/// Run `event` through `router`.
pub async fn dispatch(router: Router, event: GatewayEvent) -> Result<GatewayResponse, TransportError> {
    let request = Request::builder()
        .method(event.http_method.as_str())
        .uri(event.uri())
        .body(Body::from(event.body_bytes()?))
        .map_err(|e| TransportError::GatewayRequest(e.to_string()))?;

    let response = match router.oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    };

    let (parts, body) = response.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_RESPONSE_SIZE)
        .await
        .map_err(|e| TransportError::GatewayRequest(e.to_string()))?;

    let headers: HashMap<String, String> = parts
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    let textual = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/"));

    let (body, is_base64_encoded) = if textual {
        (String::from_utf8_lossy(&bytes).into_owned(), false)
    } else {
        (STANDARD.encode(&bytes), true)
    };

    Ok(GatewayResponse {
        status_code: parts.status.as_u16(),
        headers,
        body,
        is_base64_encoded,
    })
}

/// Read one event from `input`, dispatch it and write the response to `output`.
pub async fn run_once<R, W>(router: Router, mut input: R, mut output: W) -> Result<(), TransportError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut raw = Vec::new();
    input
        .read_to_end(&mut raw)
        .await
        .map_err(TransportError::GatewayIo)?;
    let event: GatewayEvent = serde_json::from_slice(&raw)?;
    tracing::debug!(method = %event.http_method, path = %event.path, "Gateway event");

    let response = dispatch(router, event).await?;
    tracing::debug!(status = response.status_code, "Gateway response");

    let mut encoded = serde_json::to_vec(&response)?;
    encoded.push(b'\n');
    output
        .write_all(&encoded)
        .await
        .map_err(TransportError::GatewayIo)?;
    output.flush().await.map_err(TransportError::GatewayIo)?;
    Ok(())
}
