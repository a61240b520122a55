use axum::{
    Router, error_handling::HandleErrorLayer, extract::Request, http::StatusCode,
    response::IntoResponse, routing::get,
};
use shot_guard::{FlowRule, Sentinel};
use std::sync::Arc;
use std::time::Duration;
use tower::BoxError;
use tower::ServiceBuilder;
use tower_guard::{ManagedGuardLayer, ServiceError};

fn caller(req: &Request) -> Option<String> {
    req.headers()
        .get("x-caller")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    // 1. Setup Rules: 10 QPS overall, 2 QPS for the "batch" caller
    let sentinel = Arc::new(Sentinel::new());
    sentinel.install_flow_rules(vec![
        FlowRule::new("hello", 10.0),
        FlowRule::new("hello", 2.0).with_limit_app("batch"),
    ]);

    // 2. Setup Managed Layer
    let managed_layer =
        ManagedGuardLayer::<Request>::new(sentinel, "hello", Duration::from_millis(500))
            .with_origin(caller as fn(&Request) -> Option<String>);
    // 3. Build the Router
    let app = Router::new()
        .route("/", get(|| async { "Hello, Guard!" }))
        .layer(
            ServiceBuilder::new()
                // 1. The outermost layer: catches BoxError and returns Response
                .layer(HandleErrorLayer::new(handle_guard_error))
                // 2. The middle layer: introduces BoxError
                .layer(managed_layer)
                // 3. Converts the Route's Infallible to BoxError
                // so that ManagedGuardLayer can wrap it.
                .map_err(BoxError::from),
        );

    // 4. Serve
    let listener = tokio::net::TcpListener::bind("127.0.0.1:3000")
        .await
        .unwrap();
    println!("📡 Listening on http://127.0.0.1:3000");

    axum::serve(listener, app).await.unwrap();
}

/// The signature must match BoxError -> IntoResponse
async fn handle_guard_error(err: tower::BoxError) -> impl IntoResponse {
    if let Some(guard_err) = err.downcast_ref::<ServiceError>() {
        guard_err.clone().into_response()
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal Service Error").into_response()
    }
}
