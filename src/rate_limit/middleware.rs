use crate::error::QuotaError;
use crate::rate_limit::store::CounterStore;
use crate::rate_limit::{Decision, QuotaLimiter, RejectReason, Subject};
use http::header::{HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use http::{Request, Response, StatusCode};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

/// Header added to admitted responses.
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";

/// A layer that enforces per-identity quotas using a [`QuotaLimiter`].
///
/// The subject is read from the request extensions (a [`Subject`] inserted by upstream auth),
/// falling back to the headers named by the configured identity and rank key names.
#[derive(Debug)]
pub struct QuotaLayer<S> {
    limiter: Arc<QuotaLimiter<S>>,
}

impl<S> Clone for QuotaLayer<S> {
    fn clone(&self) -> Self {
        Self { limiter: Arc::clone(&self.limiter) }
    }
}

impl<S> QuotaLayer<S> {
    /// Create a new quota layer.
    pub fn new(limiter: QuotaLimiter<S>) -> Self {
        Self { limiter: Arc::new(limiter) }
    }

    /// Create a layer around a limiter that is also used elsewhere.
    pub fn from_shared(limiter: Arc<QuotaLimiter<S>>) -> Self {
        Self { limiter }
    }
}

impl<Inner, S> Layer<Inner> for QuotaLayer<S> {
    type Service = QuotaService<Inner, S>;

    fn layer(&self, inner: Inner) -> Self::Service {
        QuotaService { inner, limiter: Arc::clone(&self.limiter) }
    }
}

/// Middleware service that admits, denies or rejects each request.
#[derive(Debug)]
pub struct QuotaService<Inner, S> {
    inner: Inner,
    limiter: Arc<QuotaLimiter<S>>,
}

impl<Inner: Clone, S> Clone for QuotaService<Inner, S> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone(), limiter: Arc::clone(&self.limiter) }
    }
}

impl<Inner, S, B, RB> Service<Request<B>> for QuotaService<Inner, S>
where
    Inner: Service<Request<B>, Response = Response<RB>> + Clone + Send + 'static,
    Inner::Future: Send + 'static,
    S: CounterStore + 'static,
    B: Send + 'static,
    RB: From<String> + Send + 'static,
{
    type Response = Response<RB>;
    type Error = Inner::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let limiter = Arc::clone(&self.limiter);
        // The clone may not be ready; keep the one `poll_ready` was called on.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let config = limiter.config();
            let identity_key = config.identity_key_name();
            let rank_key = config.rank_key_name();
            let Some(subject) = subject_from_request(&req, identity_key, rank_key) else {
                tracing::debug!(
                    target: "quotagate::layer",
                    uri = %req.uri(),
                    "request carries no quota subject"
                );
                return Ok(missing_subject(identity_key, rank_key));
            };

            match limiter.decide(&subject).await {
                Ok(Decision::Allow { remaining }) => {
                    let mut response = inner.call(req).await?;
                    response.headers_mut().insert(X_RATELIMIT_REMAINING, HeaderValue::from(remaining));
                    Ok(response)
                }
                Ok(decision @ Decision::Deny { .. }) => {
                    let secs = decision.retry_after_secs().unwrap_or(1);
                    let mut response = json_response(StatusCode::TOO_MANY_REQUESTS, "quota exceeded");
                    response.headers_mut().insert(RETRY_AFTER, HeaderValue::from(secs));
                    Ok(response)
                }
                Ok(Decision::Reject(RejectReason::MissingIdentity)) => {
                    Ok(missing_subject(identity_key, rank_key))
                }
                Ok(Decision::Reject(RejectReason::UnknownRank(_))) => {
                    Ok(json_response(StatusCode::FORBIDDEN, "Invalid rank"))
                }
                Err(e) => Ok(error_response(&e)),
            }
        })
    }
}

/// Resolve the subject of a request.
///
/// A typed [`Subject`] extension wins; otherwise both headers must be present and valid UTF-8.
pub fn subject_from_request<B>(req: &Request<B>, identity_key: &str, rank_key: &str) -> Option<Subject> {
    if let Some(subject) = req.extensions().get::<Subject>() {
        return Some(subject.clone());
    }
    let headers = req.headers();
    let identity = headers.get(identity_key)?.to_str().ok()?;
    let rank = headers.get(rank_key)?.to_str().ok()?;
    Some(Subject::new(identity, rank))
}

fn missing_subject<RB: From<String>>(identity_key: &str, rank_key: &str) -> Response<RB> {
    json_response(StatusCode::BAD_REQUEST, format!("Missing {identity_key} or {rank_key}"))
}

fn error_response<RB: From<String>>(err: &QuotaError) -> Response<RB> {
    json_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

fn json_response<RB: From<String>>(status: StatusCode, message: impl Into<String>) -> Response<RB> {
    let body = serde_json::json!({ "message": message.into() }).to_string();
    let mut response = Response::new(RB::from(body));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
