use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use shot_guard::DegradeGrade;
use shot_guard::DegradeRule;
use shot_guard::FlowRule;
use shot_guard::Sentinel;
use tokio::time::sleep;
use tower::Layer;
use tower::Service;
use tower::ServiceExt;
use tower_guard::ManagedGuardLayer;
use tower_guard::ServiceError;

/// Fire a burst of requests through a guarded service.
#[derive(Debug, Parser)]
struct Args {
    /// Passes allowed per second
    #[arg(long, default_value_t = 100.0)]
    qps: f64,

    /// Number of requests fired at once
    #[arg(long, default_value_t = 200)]
    requests: usize,

    /// Deadline of each request
    #[arg(long, default_value = "50ms", value_parser = humantime::parse_duration)]
    max_wait: Duration,

    /// Simulated processing time
    #[arg(long, default_value = "1ms", value_parser = humantime::parse_duration)]
    work: Duration,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    // 1. Setup rules: a QPS limit plus a response time breaker
    let sentinel = Arc::new(Sentinel::new());
    sentinel.install_flow_rules(vec![FlowRule::new("work", args.qps)]);
    sentinel.install_degrade_rules(vec![DegradeRule::new(
        "work",
        DegradeGrade::AvgRt,
        args.max_wait.as_millis() as f64,
        5,
    )]);

    // 2. Setup Managed Layer
    let layer = ManagedGuardLayer::new(Arc::clone(&sentinel), "work", args.max_wait);

    // 3. Define a "Work" service
    let work = args.work;
    let service = tower::service_fn(move |_: ()| async move {
        sleep(work).await;
        Ok::<&str, tower::BoxError>("Request Successful")
    });

    let managed_service = layer.layer(service);

    println!("🚀 Starting Stress Test...");
    println!("Rules: {} QPS, breaker at {:?} average rt", args.qps, args.max_wait);
    println!("Managed Budget: {} wait\n", humantime::format_duration(args.max_wait));

    // 4. Fire requests instantly
    let mut tasks = Vec::new();
    for i in 0..args.requests {
        let mut svc = managed_service.clone();
        tasks.push(tokio::spawn(async move {
            match svc.ready().await {
                Ok(ready_svc) => match ready_svc.call(()).await {
                    Ok(resp) => println!("[{i:03}] ✅ {resp}"),
                    Err(e) => {
                        if let Some(guard_err) = e.downcast_ref::<ServiceError>() {
                            println!("[{i:03}] ❌ Guard Rejected: {guard_err}");
                        } else {
                            println!("[{i:03}] 💥 Unexpected Error: {e}");
                        }
                    }
                },
                Err(e) => println!("[{i:03}] ⚠️ Service Unavailable: {e}"),
            }
        }));
    }

    // Wait for all requests to finish
    for task in tasks {
        let _ = task.await;
    }

    if let Some(node) = sentinel.cluster_node("work") {
        println!(
            "\npass {} / success {} / avg rt {:.1}ms",
            node.total_pass(),
            node.total_success(),
            node.avg_rt()
        );
    }
    println!("\n🏁 Stress test complete.");
}
