use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header},
    response::{Html, IntoResponse, Response},
};
use tower_http::catch_panic::CatchPanicLayer;
use tracing::{debug, error, info, warn};

use crate::assets::{PLAYER_SCRIPT_PATH, PLAYER_STYLE_PATH};
use crate::bridge::{BridgeEvent, DeliveryTag};
use crate::error::RelayResult;
use crate::proxy;
use crate::session::SessionShared;

/**
    Where a request path goes. First match wins.
*/
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Route {
    PlayerScript,
    PlayerStyle,
    Page,
    Proxy,
    Bridge(BridgeEvent),
    /// Any other path, looked up in the asset bundle
    Asset,
}

impl Route {
    pub fn resolve(path: &str) -> Self {
        match path {
            PLAYER_SCRIPT_PATH => Self::PlayerScript,
            PLAYER_STYLE_PATH => Self::PlayerStyle,
            "/" | "/index.html" | "/player.html" => Self::Page,
            _ if path.starts_with("/proxy") => Self::Proxy,
            _ => match BridgeEvent::from_path(path) {
                Some(event) => Self::Bridge(event),
                None => Self::Asset,
            },
        }
    }
}

/**
    Build the relay router for one session.
*/
pub(crate) fn router(shared: Arc<SessionShared>) -> Router {
    Router::new()
        .fallback(dispatch)
        .layer(CatchPanicLayer::custom(panic_response))
        .with_state(shared)
}

async fn dispatch(
    State(shared): State<Arc<SessionShared>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let path = uri.path();
    let route = Route::resolve(path);
    debug!(%method, path, ?route, "relay request");

    match handle(&shared, route, &uri, &headers).await {
        Ok(response) => response,
        Err(e) => {
            warn!(path, error = %e, "request failed");
            e.into_response()
        }
    }
}

async fn handle(
    shared: &SessionShared,
    route: Route,
    uri: &Uri,
    headers: &HeaderMap,
) -> RelayResult<Response> {
    let query = Query::<HashMap<String, String>>::try_from_uri(uri)
        .map(|Query(query)| query)
        .unwrap_or_default();

    let response = match route {
        Route::PlayerScript | Route::PlayerStyle | Route::Asset => {
            match shared.assets.resolve(uri.path()) {
                Some(asset) => asset.into_response(),
                None => {
                    info!(path = uri.path(), "asset not found");
                    not_found()
                }
            }
        }
        Route::Page => match shared.render_page() {
            Some(page) => {
                debug!("serving player page");
                let mut response = Html(page).into_response();
                response.headers_mut().insert(
                    header::CACHE_CONTROL,
                    HeaderValue::from_static("no-store"),
                );
                response
            }
            None => {
                info!("page requested before any stream was set");
                not_found()
            }
        },
        Route::Proxy => {
            let target = query.get("url").map(String::as_str);
            proxy::forward(&shared.client, target, headers, shared.cancel.clone()).await?
        }
        Route::Bridge(event) => {
            let tag = DeliveryTag::from_query(&query);
            shared.handle_bridge_event(event, &tag);
            StatusCode::OK.into_response()
        }
    };

    Ok(response)
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "not found").into_response()
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic"
    };
    error!(detail, "request handler panicked");
    (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::assets::AssetBundle;
    use crate::config::RelayConfig;
    use crate::events::{EventReceiver, PlayerEvent, event_channel};

    fn test_router() -> (Router, EventReceiver) {
        let (tx, rx) = event_channel();
        let shared = Arc::new(SessionShared::new(
            RelayConfig::default(),
            "http://127.0.0.1:8080".to_string(),
            AssetBundle::embedded(),
            reqwest::Client::new(),
            tx,
        ));
        (router(shared), rx)
    }

    async fn get(router: &Router, uri: &str) -> (StatusCode, String) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8_lossy(&body).into_owned())
    }

    #[test]
    fn test_route_table() {
        assert_eq!(Route::resolve("/relay-player.js"), Route::PlayerScript);
        assert_eq!(Route::resolve("/relay-player.css"), Route::PlayerStyle);
        assert_eq!(Route::resolve("/"), Route::Page);
        assert_eq!(Route::resolve("/index.html"), Route::Page);
        assert_eq!(Route::resolve("/player.html"), Route::Page);
        assert_eq!(Route::resolve("/proxy"), Route::Proxy);
        assert_eq!(Route::resolve("/proxy/segment"), Route::Proxy);
        assert_eq!(Route::resolve("/bridge/ready"), Route::Bridge(BridgeEvent::Ready));
        assert_eq!(
            Route::resolve("/bridge/error/bad%20codec"),
            Route::Bridge(BridgeEvent::Error("bad codec".to_string()))
        );
        assert_eq!(
            Route::resolve("/bridge/paused"),
            Route::Bridge(BridgeEvent::StateChanged("paused".to_string()))
        );
        assert_eq!(
            Route::resolve("/debug/hello"),
            Route::Bridge(BridgeEvent::Debug("hello".to_string()))
        );
        assert_eq!(Route::resolve("/favicon.ico"), Route::Asset);
    }

    #[tokio::test]
    async fn test_page_is_404_without_stream() {
        let (router, _events) = test_router();
        let (status, _) = get(&router, "/").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_serves_player_script() {
        let (router, _events) = test_router();
        let (status, body) = get(&router, "/relay-player.js").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("RelayPlayer"));

        let (status, full_name_body) = get(&router, "/player/relay-player.js").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, full_name_body);
    }

    #[tokio::test]
    async fn test_unknown_path_is_404() {
        let (router, _events) = test_router();
        let (status, _) = get(&router, "/nope.txt").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_proxy_without_url_is_400() {
        let (router, _events) = test_router();
        let (status, _) = get(&router, "/proxy").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = get(&router, "/proxy?other=1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_proxy_upstream_failure_is_500_with_detail() {
        let (router, _events) = test_router();
        let (status, body) = get(&router, "/proxy?url=http%3A%2F%2F127.0.0.1%3A1%2Fa.mpd").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.starts_with("proxy request failed"));
    }

    #[tokio::test]
    async fn test_bridge_routes_acknowledge_and_emit() {
        let (router, mut events) = test_router();

        let (status, _) = get(&router, "/bridge/playing").await;
        assert_eq!(status, StatusCode::OK);
        assert!(matches!(events.try_recv(), Ok(PlayerEvent::StateChanged(s)) if s == "playing"));

        let (status, _) = get(&router, "/debug/buffer%20low").await;
        assert_eq!(status, StatusCode::OK);
        assert!(matches!(events.try_recv(), Ok(PlayerEvent::Debug(s)) if s == "buffer low"));

        // Ready without a pending load still acknowledges
        let (status, _) = get(&router, "/bridge/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_duplicate_deliveries_emit_once() {
        let (router, mut events) = test_router();
        for _ in 0..3 {
            let (status, _) = get(&router, "/bridge/playing?g=0&p=abc&s=4").await;
            assert_eq!(status, StatusCode::OK);
        }
        assert!(events.try_recv().is_ok());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_panic_response() {
        let response = panic_response(Box::new("boom"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
