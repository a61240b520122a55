use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use pin_project_lite::pin_project;
use tower::BoxError;
use tower::Service;

use shot_guard::Entry;
use shot_guard::GuardError;
use shot_guard::ResourceWrapper;
use shot_guard::Sentinel;

use crate::error::ServiceError;

/// Extracts the caller identity of a request.
///
/// The origin selects per-caller statistics and the flow rules whose
/// `limit_app` names that caller.
pub trait OriginParser<Req> {
    fn parse_origin(&self, req: &Req) -> Option<String>;
}

/// Treats every request as coming from an unknown caller.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOrigin;

impl<Req> OriginParser<Req> for NoOrigin {
    fn parse_origin(&self, _req: &Req) -> Option<String> {
        None
    }
}

impl<F, Req> OriginParser<Req> for F
where
    F: Fn(&Req) -> Option<String>,
{
    fn parse_origin(&self, req: &Req) -> Option<String> {
        self(req)
    }
}

#[derive(Clone, Debug)]
struct GuardServiceMetrics {
    passed: Counter<u64>,
    blocked: Counter<u64>,
}

/// Guards every request to `inner` with an entry of one resource.
///
/// Each request runs in its own context, so concurrent requests never
/// share an entry stack. The entry lives in the response future: it is
/// exited when the inner future completes or is dropped. Inner errors and
/// cancelled requests are traced as exceptions.
#[derive(Clone)]
pub struct GuardService<S, P = NoOrigin> {
    inner: S,
    sentinel: Arc<Sentinel>,
    resource: ResourceWrapper,
    context_name: Arc<str>,
    origin: P,
    instruments: GuardServiceMetrics,
}

pin_project! {
    /// A future that holds the request's entry until the inner service
    /// responds.
    pub struct ResponseFuture<F> {
        #[pin]
        inner: Option<F>,
        entry: Option<Entry>,
        rejected: Option<ServiceError>,
    }

    impl<F> PinnedDrop for ResponseFuture<F> {
        fn drop(this: Pin<&mut Self>) {
            // Dropped before the inner service answered
            if let Some(entry) = this.project().entry.take() {
                entry.trace_error(&"request cancelled");
            }
        }
    }
}

impl<F, T, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<T, E>>,
    E: From<BoxError> + fmt::Display,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let Some(inner) = this.inner.as_pin_mut() else {
            let err = this
                .rejected
                .take()
                .unwrap_or_else(|| ServiceError::Guard("response polled after completion".to_string()));
            return Poll::Ready(Err(E::from(BoxError::from(err))));
        };
        match inner.poll(cx) {
            Poll::Ready(result) => {
                if let Some(entry) = this.entry.take() {
                    if let Err(err) = &result {
                        entry.trace_error(err);
                    }
                    if let Err(err) = entry.exit() {
                        tracing::error!(%err, "request entry exited out of order");
                    }
                }
                Poll::Ready(result)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S, P, Req> Service<Req> for GuardService<S, P>
where
    S: Service<Req, Error = BoxError>,
    P: OriginParser<Req>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let origin = self.origin.parse_origin(&req).unwrap_or_default();
        let ctx = self.sentinel.new_context(&self.context_name, &origin);
        let attributes = [KeyValue::new("resource", self.resource.name().to_string())];

        match self
            .sentinel
            .entry_in(&ctx, self.resource.clone(), 1, Vec::new())
        {
            Ok(entry) => {
                self.instruments.passed.add(1, &attributes);
                ResponseFuture {
                    inner: Some(self.inner.call(req)),
                    entry: Some(entry),
                    rejected: None,
                }
            }
            Err(err) => {
                let rejected = match err {
                    GuardError::Blocked(block) => {
                        self.instruments.blocked.add(1, &attributes);
                        ServiceError::Blocked(block)
                    }
                    other => ServiceError::Guard(other.to_string()),
                };
                ResponseFuture {
                    inner: None,
                    entry: None,
                    rejected: Some(rejected),
                }
            }
        }
    }
}

impl<S> GuardService<S> {
    pub fn new(inner: S, sentinel: Arc<Sentinel>, resource: impl Into<ResourceWrapper>) -> Self {
        let meter = global::meter("guard_service");
        let instruments = GuardServiceMetrics {
            passed: meter.u64_counter("guard_passed").build(),
            blocked: meter.u64_counter("guard_blocked").build(),
        };
        let resource = resource.into();

        Self {
            inner,
            sentinel,
            context_name: Arc::from(resource.name()),
            resource,
            origin: NoOrigin,
            instruments,
        }
    }
}

impl<S, P> GuardService<S, P> {
    /// Name of the context each request runs in. Defaults to the resource
    /// name.
    pub fn with_context_name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.context_name = name.into();
        self
    }

    pub fn with_origin<Q>(self, origin: Q) -> GuardService<S, Q> {
        GuardService {
            inner: self.inner,
            sentinel: self.sentinel,
            resource: self.resource,
            context_name: self.context_name,
            origin,
            instruments: self.instruments,
        }
    }

    pub fn resource(&self) -> &ResourceWrapper {
        &self.resource
    }
}

impl<S: fmt::Debug, P> fmt::Debug for GuardService<S, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardService")
            .field("inner", &self.inner)
            .field("resource", &self.resource)
            .field("context_name", &self.context_name)
            .finish_non_exhaustive()
    }
}
