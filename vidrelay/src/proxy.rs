use std::time::Duration;

use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{RelayError, RelayResult};

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Request headers passed upstream: `Accept*`, `Range`, `User-Agent`
fn is_forwarded(name: &HeaderName) -> bool {
    let name = name.as_str();
    name.starts_with("accept") || name == "range" || name == "user-agent"
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/**
    Relay a GET to `target`, returning the upstream status, headers and body.

    A missing or empty target is answered with 400. The body stream ends
    early if `cancel` fires.
*/
pub async fn forward(
    client: &reqwest::Client,
    target: Option<&str>,
    inbound: &HeaderMap,
    cancel: CancellationToken,
) -> RelayResult<Response> {
    let Some(target) = target.filter(|t| !t.is_empty()) else {
        return Ok((StatusCode::BAD_REQUEST, "missing url parameter").into_response());
    };

    let mut upstream_headers = HeaderMap::new();
    for (name, value) in inbound {
        if is_forwarded(name) {
            upstream_headers.append(name.clone(), value.clone());
        }
    }

    debug!(%target, "proxying request");
    let upstream = client
        .get(target)
        .headers(upstream_headers)
        .send()
        .await
        .map_err(|e| RelayError::Proxy(e.to_string()))?;

    let status = upstream.status();
    let mut headers = HeaderMap::new();
    for (name, value) in upstream.headers() {
        if !is_hop_by_hop(name) {
            headers.append(name.clone(), value.clone());
        }
    }
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );

    info!(%target, status = status.as_u16(), "proxied upstream response");

    let stream = upstream
        .bytes_stream()
        .take_until(cancel.cancelled_owned());
    let mut response = Body::from_stream(stream).into_response();
    *response.status_mut() = status;
    *response.headers_mut() = headers;

    Ok(response)
}

/**
    Check whether the page could fetch `url` directly.

    True only if the upstream answers a HEAD in time, without a server
    error, and allows cross-origin reads.
*/
pub async fn probe_direct_access(client: &reqwest::Client, url: &str, timeout: Duration) -> bool {
    let result = client
        .head(url)
        .header(header::ORIGIN, "http://127.0.0.1")
        .timeout(timeout)
        .send()
        .await;

    match result {
        Ok(response) => {
            let allowed = !response.status().is_server_error()
                && response
                    .headers()
                    .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN);
            debug!(%url, status = response.status().as_u16(), allowed, "probed upstream");
            allowed
        }
        Err(e) => {
            debug!(%url, error = %e, "upstream probe failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::{Router, body::to_bytes, routing::get};
    use tokio::net::TcpListener;

    /// Spawn `router` on an ephemeral loopback port and return its base URL.
    async fn spawn_upstream(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn echo_router() -> Router {
        Router::new()
            .route(
                "/segment.m4s",
                get(|headers: HeaderMap| async move {
                    let range = headers
                        .get(header::RANGE)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("none")
                        .to_string();
                    let cookie = headers.contains_key(header::COOKIE);
                    (
                        StatusCode::PARTIAL_CONTENT,
                        [(header::CONTENT_TYPE, "video/iso.segment")],
                        format!("range={range} cookie={cookie}"),
                    )
                }),
            )
            .route(
                "/open.mpd",
                get(|| async { ([(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")], "mpd") }),
            )
            .route("/closed.mpd", get(|| async { "mpd" }))
    }

    #[tokio::test]
    async fn test_missing_url_is_bad_request() {
        let client = reqwest::Client::new();
        let response = forward(&client, None, &HeaderMap::new(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = forward(&client, Some(""), &HeaderMap::new(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_relays_status_headers_and_body() {
        let base = spawn_upstream(echo_router()).await;
        let client = reqwest::Client::new();

        let mut inbound = HeaderMap::new();
        inbound.insert(header::RANGE, HeaderValue::from_static("bytes=0-99"));
        inbound.insert(header::COOKIE, HeaderValue::from_static("session=secret"));

        let target = format!("{base}/segment.m4s");
        let response = forward(&client, Some(&target), &inbound, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "video/iso.segment");
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"range=bytes=0-99 cookie=false");
    }

    #[tokio::test]
    async fn test_upstream_failure_is_proxy_error() {
        let client = reqwest::Client::new();
        let err = forward(
            &client,
            Some("http://127.0.0.1:1/unreachable.mpd"),
            &HeaderMap::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, RelayError::Proxy(_)));
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_probe() {
        let base = spawn_upstream(echo_router()).await;
        let client = reqwest::Client::new();
        let timeout = Duration::from_secs(2);

        assert!(probe_direct_access(&client, &format!("{base}/open.mpd"), timeout).await);
        assert!(!probe_direct_access(&client, &format!("{base}/closed.mpd"), timeout).await);
        assert!(!probe_direct_access(&client, "http://127.0.0.1:1/x.mpd", timeout).await);
    }

    #[test]
    fn test_header_whitelist() {
        assert!(is_forwarded(&header::ACCEPT));
        assert!(is_forwarded(&header::ACCEPT_LANGUAGE));
        assert!(is_forwarded(&header::RANGE));
        assert!(is_forwarded(&header::USER_AGENT));
        assert!(!is_forwarded(&header::COOKIE));
        assert!(!is_forwarded(&header::HOST));
        assert!(is_hop_by_hop(&header::TRANSFER_ENCODING));
    }
}
