//! `axum` request → `zerver_core::ParsedRequest`, and
//! `zerver_core::Response` → `axum` response — the one-way-and-back
//! bridge the rest of this crate builds on.

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::body::Bytes as AxumBytes;
use axum::extract::{ConnectInfo, Path, Query, Request};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::Response as AxumResponse;
use futures::StreamExt;

use zerver_core::context::HeaderEntry;
use zerver_core::{Body, ParsedRequest, Response};

/// Reads `req`'s body up to `max_body_bytes` and assembles a
/// `ParsedRequest`. The route's path/query extractors are pulled in ahead
/// of the axum `Request` itself, since `Request` consumes the body and
/// must be the last extractor in the chain.
pub async fn to_parsed_request(
    Path(path_params): Path<HashMap<String, String>>,
    Query(query_params): Query<HashMap<String, String>>,
    ConnectInfo(client_addr): ConnectInfo<SocketAddr>,
    req: Request,
    max_body_bytes: usize,
) -> Result<ParsedRequest, AxumResponse> {
    let method = req.method().as_str().to_string();
    let path = req.uri().path().to_string();
    let headers = req
        .headers()
        .iter()
        .map(|(name, value)| HeaderEntry {
            name: name.as_str().to_string(),
            value: value.to_str().unwrap_or_default().to_string(),
        })
        .collect();

    let body = axum::body::to_bytes(req.into_body(), max_body_bytes)
        .await
        .map_err(|_| {
            let mut response = AxumResponse::new(axum::body::Body::empty());
            *response.status_mut() = StatusCode::PAYLOAD_TOO_LARGE;
            response
        })?;

    Ok(ParsedRequest {
        method,
        path,
        headers,
        path_params,
        query_params,
        client_addr: Some(client_addr),
        body,
    })
}

/// Renders a `zerver_core::Response` into the axum response it represents,
/// preserving header order (repeated headers like `set-cookie` are never
/// collapsed) and streaming bodies chunk-by-chunk rather than buffering.
pub fn to_axum_response(response: Response) -> AxumResponse {
    let mut builder = AxumResponse::builder().status(
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
    );

    if let Some(headers) = builder.headers_mut() {
        for (name, value) in &response.headers {
            let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) else {
                tracing::warn!(header = %name, "dropping response header that isn't valid for the wire");
                continue;
            };
            headers.append(name, value);
        }
    }

    let body = match response.body {
        Body::Complete(bytes) => axum::body::Body::from(AxumBytes::from(bytes)),
        Body::Streaming(stream) => axum::body::Body::from_stream(stream.map(|chunk| {
            chunk.map_err(|err| Box::new(err) as Box<dyn std::error::Error + Send + Sync>)
        })),
    };

    builder
        .body(body)
        .unwrap_or_else(|_| AxumResponse::new(axum::body::Body::empty()))
}
