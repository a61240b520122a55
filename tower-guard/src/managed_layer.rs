use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use shot_guard::ResourceWrapper;
use shot_guard::Sentinel;
use tower::BoxError;
use tower::Layer;
use tower::Service;
use tower::timeout::Timeout;
use tower::util::BoxCloneSyncService;

use crate::GuardService;
use crate::ServiceError;
use crate::service::NoOrigin;
use crate::service::OriginParser;

/// A guarded stack with a hard deadline and a unified error domain.
///
/// ### Error Responsibilities:
/// - **Blocked (`ServiceError::Blocked`)**: A flow, degrade or system rule
///   rejected the request. The inner service is never called.
/// - **Timeout (`ServiceError::Timeout`)**: The inner service took longer than
///   `max_wait`. The deadline sits inside the guard, so a timed out call is
///   traced as an exception and counts toward the resource's breakers.
/// - **Inner (`ServiceError::Inner`)**: Anything the inner service failed with.
pub struct ManagedGuardLayer<Req, P = NoOrigin> {
    sentinel: Arc<Sentinel>,
    resource: ResourceWrapper,
    max_wait: Duration,
    origin: P,
    _phantom: PhantomData<fn(Req)>,
}

// Deriving Clone would require `Req: Clone`, which axum bodies are not.
impl<Req, P: Clone> Clone for ManagedGuardLayer<Req, P> {
    fn clone(&self) -> Self {
        Self {
            sentinel: Arc::clone(&self.sentinel),
            resource: self.resource.clone(),
            max_wait: self.max_wait,
            origin: self.origin.clone(),
            _phantom: PhantomData,
        }
    }
}

impl<S, P, Req> Layer<S> for ManagedGuardLayer<Req, P>
where
    S: Service<Req, Error = BoxError> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
    S::Response: 'static,
    P: OriginParser<Req> + Clone + Send + Sync + 'static,
    Req: Send + 'static,
{
    type Service = BoxCloneSyncService<Req, S::Response, BoxError>;

    fn layer(&self, inner: S) -> Self::Service {
        let timed = Timeout::new(inner, self.max_wait);
        let guarded = GuardService::new(timed, Arc::clone(&self.sentinel), self.resource.clone())
            .with_origin(self.origin.clone());

        let mapped_svc = tower::util::MapErr::new(guarded, |err: BoxError| {
            if err.is::<tower::timeout::error::Elapsed>() {
                BoxError::from(ServiceError::Timeout)
            } else if err.is::<ServiceError>() {
                err
            } else {
                Box::from(ServiceError::Inner(err.to_string()))
            }
        });

        BoxCloneSyncService::new(mapped_svc)
    }
}

impl<Req> ManagedGuardLayer<Req> {
    pub fn new(sentinel: Arc<Sentinel>, resource: impl Into<ResourceWrapper>, max_wait: Duration) -> Self {
        Self {
            sentinel,
            resource: resource.into(),
            max_wait,
            origin: NoOrigin,
            _phantom: PhantomData,
        }
    }
}

impl<Req, P> ManagedGuardLayer<Req, P> {
    pub fn with_origin<Q>(self, origin: Q) -> ManagedGuardLayer<Req, Q> {
        ManagedGuardLayer {
            sentinel: self.sentinel,
            resource: self.resource,
            max_wait: self.max_wait,
            origin,
            _phantom: PhantomData,
        }
    }
}
