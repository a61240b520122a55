use std::sync::Arc;
use std::time::Duration;

use shot_guard::ResourceWrapper;
use shot_guard::Sentinel;
use tower::BoxError;
use tower::Layer;
use tower::Service;
use tower::ServiceBuilder;
use tower::layer::util::Stack;
use tower::util::BoxCloneSyncService;

use crate::GuardLayer;
use crate::ManagedGuardLayer;

/// Guard `svc` as `resource` with a single deadline on the whole call.
pub fn make_guarded_svc<V, Req, Resp>(
    sentinel: Arc<Sentinel>,
    resource: impl Into<ResourceWrapper>,
    timeout: Duration,
    svc: V,
) -> BoxCloneSyncService<Req, Resp, BoxError>
where
    Req: Send + 'static,
    Resp: 'static,
    V: Service<Req, Response = Resp, Error = BoxError> + Clone + Send + Sync + 'static,
    <V as Service<Req>>::Future: Send + 'static,
{
    ManagedGuardLayer::<Req>::new(sentinel, resource, timeout).layer(svc)
}

/// Service Builder Extension with additional useful functions for tower::ServiceBuilder.
pub trait ServiceBuilderExt<L> {
    /// Guard every request as an entry of `resource`.
    fn guard(
        self,
        sentinel: Arc<Sentinel>,
        resource: impl Into<ResourceWrapper>,
    ) -> ServiceBuilder<Stack<GuardLayer, L>>;
}

impl<L> ServiceBuilderExt<L> for ServiceBuilder<L> {
    fn guard(
        self,
        sentinel: Arc<Sentinel>,
        resource: impl Into<ResourceWrapper>,
    ) -> ServiceBuilder<Stack<GuardLayer, L>> {
        self.layer(GuardLayer::new(sentinel, resource))
    }
}
