use std::sync::Arc;

use shot_guard::ResourceWrapper;
use shot_guard::Sentinel;
use tower::Layer;

use crate::service::GuardService;
use crate::service::NoOrigin;

/// Guards requests as entries of a single resource.
#[derive(Debug)]
pub struct GuardLayer<P = NoOrigin> {
    sentinel: Arc<Sentinel>,
    resource: ResourceWrapper,
    context_name: Option<Arc<str>>,
    origin: P,
}

impl<P: Clone> Clone for GuardLayer<P> {
    fn clone(&self) -> Self {
        Self {
            sentinel: Arc::clone(&self.sentinel),
            resource: self.resource.clone(),
            context_name: self.context_name.clone(),
            origin: self.origin.clone(),
        }
    }
}

impl GuardLayer {
    /// Create a GuardLayer for `resource`.
    ///
    /// Requests are treated as inbound traffic unless an outbound
    /// [`ResourceWrapper`] is given.
    pub fn new(sentinel: Arc<Sentinel>, resource: impl Into<ResourceWrapper>) -> Self {
        GuardLayer {
            sentinel,
            resource: resource.into(),
            context_name: None,
            origin: NoOrigin,
        }
    }
}

impl<P> GuardLayer<P> {
    /// Set the name of the context each request runs in.
    ///
    /// Statistics are kept per context name, so layers sharing a name also
    /// share their per-context nodes.
    pub fn with_context_name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.context_name = Some(name.into());
        self
    }

    /// Set how the caller origin is read from a request.
    pub fn with_origin<Q>(self, origin: Q) -> GuardLayer<Q> {
        GuardLayer {
            sentinel: self.sentinel,
            resource: self.resource,
            context_name: self.context_name,
            origin,
        }
    }

    pub fn sentinel(&self) -> &Arc<Sentinel> {
        &self.sentinel
    }
}

impl<P, S> Layer<S> for GuardLayer<P>
where
    P: Clone,
{
    type Service = GuardService<S, P>;

    fn layer(&self, service: S) -> Self::Service {
        let mut svc = GuardService::new(service, Arc::clone(&self.sentinel), self.resource.clone());
        if let Some(name) = &self.context_name {
            svc = svc.with_context_name(Arc::clone(name));
        }
        svc.with_origin(self.origin.clone())
    }
}
