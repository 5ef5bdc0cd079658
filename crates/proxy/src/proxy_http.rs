// SPDX-License-Identifier: MIT

//! Reverse-proxy data path and HTTP listener.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use dynproxy_core::{Clock, WorkerId};
use futures::Stream;
use pin_project::pin_project;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::controller::Controller;
use crate::registry::Registry;

/// Binds `/lb-status`, `/health`, and the proxy fallback onto one router
/// The two internal endpoints are reserved and never proxied.
pub fn router<C: Clock>(controller: Arc<Controller<C>>) -> Router {
    Router::new()
        .route("/lb-status", get(lb_status_handler::<C>))
        .route("/health", get(health_handler::<C>))
        .fallback(proxy_handler::<C>)
        .with_state(controller)
        .layer(TraceLayer::new_for_http())
}

async fn lb_status_handler<C: Clock>(State(controller): State<Arc<Controller<C>>>) -> Json<serde_json::Value> {
    Json(controller.status())
}

async fn health_handler<C: Clock>(State(controller): State<Arc<Controller<C>>>) -> Json<serde_json::Value> {
    Json(controller.liveness())
}

/// The reverse-proxy data path itself.
async fn proxy_handler<C: Clock>(State(controller): State<Arc<Controller<C>>>, req: Request) -> Response {
    let worker = match controller.dispatcher().pick(controller.clock()) {
        Some(w) => w,
        None => {
            let snapshot = controller.registry().snapshot();
            let total = snapshot.len();
            let healthy = snapshot.iter().filter(|w| w.is_healthy_running()).count();
            return error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "No healthy backend servers available",
                json!({ "instances": total, "healthy": healthy }),
            );
        }
    };

    let method = req.method().clone();
    let mut headers = req.headers().clone();
    let path_and_query = req.uri().path_and_query().map(|p| p.as_str()).unwrap_or("/").to_string();
    let body = req.into_body();

    let target_url = format!("http://localhost:{}{path_and_query}", worker.port);
    headers.remove(axum::http::header::HOST);
    let host_value = HeaderValue::from_str(&format!("localhost:{}", worker.port))
        .unwrap_or_else(|_| HeaderValue::from_static("localhost"));
    headers.insert(axum::http::header::HOST, host_value);

    let body_stream = reqwest::Body::wrap_stream(body.into_data_stream());
    let t0 = controller.clock().now_ms();
    let send_fut = controller
        .http_client()
        .request(method, &target_url)
        .headers(headers)
        .timeout(controller.upstream_timeout())
        .body(body_stream)
        .send();

    // Connect/headers stage: 502/504 here happen before any client response
    // has been started, so the proxy's own error body can be emitted freely.
    let resp = match tokio::time::timeout(controller.upstream_timeout(), send_fut).await {
        Err(_elapsed) => {
            controller.registry().release(worker.id);
            return error_response(StatusCode::GATEWAY_TIMEOUT, "Gateway Timeout", json!({ "message": "Backend server timeout" }));
        }
        Ok(Err(_transport_error)) => {
            controller.registry().release(worker.id);
            return error_response(StatusCode::BAD_GATEWAY, "Bad Gateway", json!({ "message": "Backend server error" }));
        }
        Ok(Ok(resp)) => resp,
    };

    // reqwest only hands back a `Response` once a status line was parsed, so
    // `status()` is always present here; a malformed upstream instead fails
    // earlier as a transport error above.
    let status = resp.status();
    let resp_headers = resp.headers().clone();
    let counted = CountedBody {
        inner: resp.bytes_stream(),
        registry: controller.registry().clone(),
        worker_id: worker.id,
        clock: controller.clock().clone(),
        t0,
        done: false,
    };

    let mut builder = Response::builder().status(status.as_u16());
    if let Some(h) = builder.headers_mut() {
        *h = resp_headers;
    }
    builder.body(Body::from_stream(counted)).unwrap_or_else(|_| {
        // Header copy failed in a way axum's builder rejected; the upstream
        // already answered, so fall back to a bare success-status response.
        Response::builder().status(status.as_u16()).body(Body::empty()).unwrap_or_default()
    })
}

fn error_response(status: StatusCode, error: &str, extra: serde_json::Value) -> Response {
    let mut body = json!({ "error": error });
    if let Some(obj) = extra.as_object() {
        if let Some(body_obj) = body.as_object_mut() {
            for (k, v) in obj {
                body_obj.insert(k.clone(), v.clone());
            }
        }
    }
    (status, Json(body)).into_response()
}

/// Wraps the upstream response body stream so that `active_requests` is
/// released exactly once, on whichever exit path fires, and
/// `response_time_ms` is updated only on full successful completion
/// response_time_ms is only updated once the stream finishes cleanly.
#[pin_project]
struct CountedBody<S, C> {
    #[pin]
    inner: S,
    registry: Arc<Registry>,
    worker_id: WorkerId,
    clock: C,
    t0: u64,
    done: bool,
}

impl<S, C> Stream for CountedBody<S, C>
where
    S: Stream<Item = reqwest::Result<Bytes>>,
    C: Clock,
{
    type Item = Result<Bytes, axum::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        if *this.done {
            return Poll::Ready(None);
        }
        match this.inner.poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(bytes))) => Poll::Ready(Some(Ok(bytes))),
            Poll::Ready(Some(Err(e))) => {
                *this.done = true;
                // Client headers already went out; terminate without
                // altering status or response_time_ms.
                this.registry.release(*this.worker_id);
                Poll::Ready(Some(Err(axum::Error::new(e))))
            }
            Poll::Ready(None) => {
                *this.done = true;
                let elapsed = this.clock.now_ms().saturating_sub(*this.t0);
                this.registry.mutate(*this.worker_id, |w| w.response_time_ms = elapsed);
                this.registry.release(*this.worker_id);
                Poll::Ready(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::fake::FakeAdapter;
    use crate::config::{Backend, Config};
    use axum::body::to_bytes;
    use dynproxy_core::{FakeClock, ProcessConfig};
    use std::time::Duration;
    use tower::ServiceExt;
    use wiremock::matchers::{method as http_method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_port: u16) -> Config {
        Config {
            backend: Backend::Process(ProcessConfig::new("true", "")),
            listen_port: 0,
            base_port,
            min_instances: 1,
            max_instances: 4,
            check_interval: Duration::from_secs(3600),
            health_timeout: Duration::from_millis(500),
            scale_up_threshold: 3.0,
            scale_down_threshold: 0.5,
            idle_timeout: Duration::from_secs(3600),
        }
    }

    #[tokio::test]
    async fn no_healthy_workers_returns_503_with_instance_counts() {
        let controller = Arc::new(Controller::new(test_config(6100), FakeClock::new()));
        let app = router(controller);

        let req = Request::builder().uri("/anything").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "No healthy backend servers available");
        assert_eq!(body["instances"], 0);
        assert_eq!(body["healthy"], 0);
    }

    #[tokio::test]
    async fn proxies_to_chosen_worker_and_increments_total_requests() {
        let upstream = MockServer::start().await;
        Mock::given(http_method("GET"))
            .and(path("/ping"))
            .respond_with(ResponseTemplate::new(200).set_body_string("pong"))
            .mount(&upstream)
            .await;
        let upstream_port: u16 = upstream.uri().rsplit(':').next().unwrap().parse().unwrap();

        let controller = Arc::new(Controller::new(test_config(6200), FakeClock::new()));
        let id = dynproxy_core::WorkerId::new();
        controller.registry().insert(crate::registry::Worker {
            id,
            port: upstream_port,
            handle: crate::adapter::Handle::new("x", upstream_port),
            name: "w".into(),
            phase: dynproxy_core::Phase::Running,
            healthy: true,
            last_healthy_ms: 0,
            active_requests: 0,
            total_requests: 0,
            last_request_ms: 0,
            response_time_ms: 0,
            inserted_at: 0,
        });

        let app = router(controller.clone());
        let req = Request::builder().uri("/ping").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"pong");

        let worker = controller.registry().get(id).unwrap();
        assert_eq!(worker.total_requests, 1);
        assert_eq!(worker.active_requests, 0);
    }

    #[tokio::test]
    async fn lb_status_reports_pool_counts() {
        let controller = Arc::new(Controller::new(test_config(6300), FakeClock::new()));
        let app = router(controller);
        let req = Request::builder().uri("/lb-status").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[allow(dead_code)]
    fn assert_fake_adapter_is_send_sync() {
        fn is_send_sync<T: Send + Sync>() {}
        is_send_sync::<FakeAdapter>();
    }
}
