//! Per-call metrics as a tower layer.
//!
//! The layer wraps the whole router, so it sees every call (health and
//! reflection included). A call counts as failed when its response head
//! already carries a non-zero `grpc-status`: this covers rejected unary calls
//! and unbound methods. Failures reported in the trailers of a stream that
//! already sent messages are not visible at this level.

use super::telemetry::{
    add_calls_inflight, increment_call_errors, increment_calls, record_call_duration,
};
use futures::future::BoxFuture;
use portable_atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tonic::codegen::http;
use tower::{Layer, Service};

const GRPC_STATUS: &str = "grpc-status";

#[derive(Debug, Clone, Default)]
pub struct CallMetricsLayer {
    inflight: Arc<AtomicUsize>,
}

impl CallMetricsLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls currently in flight through every service this layer wraps.
    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Relaxed)
    }
}

impl<S> Layer<S> for CallMetricsLayer {
    type Service = CallMetrics<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CallMetrics {
            inner,
            inflight: Arc::clone(&self.inflight),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CallMetrics<S> {
    inner: S,
    inflight: Arc<AtomicUsize>,
}

/// Holds one in-flight slot until dropped, whether the call completes or the
/// client goes away first.
struct InflightGuard {
    inflight: Arc<AtomicUsize>,
}

impl InflightGuard {
    fn enter(inflight: Arc<AtomicUsize>) -> (Self, usize) {
        let current = inflight.fetch_add(1, Ordering::Relaxed) + 1;
        add_calls_inflight(1);
        (Self { inflight }, current)
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.inflight.fetch_sub(1, Ordering::Relaxed);
        add_calls_inflight(-1);
    }
}

/// Status code carried by a trailers-only response, if any.
fn head_status<B>(response: &http::Response<B>) -> Option<i32> {
    response
        .headers()
        .get(GRPC_STATUS)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

impl<S, ReqBody, ResBody> Service<http::Request<ReqBody>> for CallMetrics<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<ResBody>>,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: http::Request<ReqBody>) -> Self::Future {
        let method = request.uri().path().to_string();
        let (guard, _current) = InflightGuard::enter(Arc::clone(&self.inflight));
        increment_calls(&method);
        #[cfg(feature = "tracing")]
        tracing::debug!(%method, inflight = _current, "Call started");

        let started = Instant::now();
        let call = self.inner.call(request);

        Box::pin(async move {
            let result = call.await;
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

            drop(guard);
            record_call_duration(elapsed_ms);

            let failed = match &result {
                Ok(response) => head_status(response).filter(|code| *code != 0),
                Err(_) => Some(tonic::Code::Unknown as i32),
            };
            if let Some(code) = failed {
                increment_call_errors(&method, code);
                #[cfg(feature = "tracing")]
                tracing::debug!(%method, code, elapsed_ms, "Call failed");
            }
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::convert::Infallible;
    use tower::{ServiceExt, service_fn};

    async fn respond(
        request: http::Request<()>,
    ) -> Result<http::Response<()>, Infallible> {
        let mut response = http::Response::new(());
        if request.uri().path().ends_with("/Missing") {
            response
                .headers_mut()
                .insert(GRPC_STATUS, http::HeaderValue::from_static("12"));
        }
        Ok(response)
    }

    #[tokio::test]
    async fn passes_responses_through() {
        let layer = CallMetricsLayer::new();
        let service = layer.layer(service_fn(respond));

        let ok = service
            .clone()
            .oneshot(http::Request::get("/test.TestService/GetUser").body(()).unwrap())
            .await
            .unwrap();
        assert_eq!(head_status(&ok), None);

        let missing = service
            .oneshot(http::Request::get("/test.TestService/Missing").body(()).unwrap())
            .await
            .unwrap();
        assert_eq!(head_status(&missing), Some(12));
        assert_eq!(layer.inflight(), 0);
    }

    #[tokio::test]
    async fn abandoned_call_releases_its_slot() {
        let layer = CallMetricsLayer::new();
        let mut service = layer.layer(service_fn(|_: http::Request<()>| {
            futures::future::pending::<Result<http::Response<()>, Infallible>>()
        }));

        let mut call = service
            .ready()
            .await
            .unwrap()
            .call(http::Request::get("/test.TestService/ListUsers").body(()).unwrap());
        assert!((&mut call).now_or_never().is_none());
        assert_eq!(layer.inflight(), 1);

        drop(call);
        assert_eq!(layer.inflight(), 0);
    }
}
