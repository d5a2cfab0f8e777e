//! Puts the quota layer in front of a tower service and exhausts a small quota.
use http::{Request, Response, StatusCode};
use quotagate::{InMemoryCounterStore, QuotaConfig, QuotaLayer, QuotaLimiter, Subject};
use std::convert::Infallible;
use std::time::Duration;
use tower::{service_fn, ServiceBuilder, ServiceExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).init();

    let config = QuotaConfig::builder()
        .quota("free", 3)
        .quota("pro", 100)
        .window(Duration::from_secs(60))
        .build()?;
    let limiter = QuotaLimiter::new(InMemoryCounterStore::new(), config);

    let svc = ServiceBuilder::new().layer(QuotaLayer::new(limiter)).service(service_fn(
        |_req: Request<String>| async { Ok::<_, Infallible>(Response::new("hello".to_string())) },
    ));

    for attempt in 1..=5 {
        let mut req = Request::new(String::new());
        req.extensions_mut().insert(Subject::new("alice", "free"));
        let response = svc.clone().oneshot(req).await?;
        match response.status() {
            StatusCode::OK => println!("attempt {attempt}: ok"),
            status => println!(
                "attempt {attempt}: {status}, retry after {:?}s: {}",
                response.headers().get(http::header::RETRY_AFTER),
                response.body()
            ),
        }
    }
    Ok(())
}
