//! HTTP API tests against a live listener.

use std::sync::Arc;
use std::time::Duration;

use autohealer::api::{create_router, AppState};
use autohealer::backend::mock::{
    sample, MockComputeControl, MockHealthProbe, MockMetricsStore, MockOracle,
};
use autohealer::backend::Backends;
use autohealer::{Config, Orchestrator};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;

const DEGRADED: [f64; 5] = [2100.0, 9200.0, 0.097, 0.89, 0.94];
const RECOVERED: [f64; 5] = [65.0, 120.0, 0.004, 0.41, 0.58];

fn fast_config() -> Config {
    let mut config = Config::default();
    config.executor.settle_delay_ms = 0;
    config.verifier.interval_ms = 0;
    config
}

fn backends(compute: MockComputeControl) -> Backends {
    Backends {
        metrics: Arc::new(
            MockMetricsStore::new()
                .with_samples("user-api", vec![sample("user-api", DEGRADED)])
                .with_samples("quiet-api", vec![sample("quiet-api", [40.0, 3.0, 0.0, 0.2, 0.3])]),
        ),
        oracle: Arc::new(MockOracle::new("test-model").with_reply(json!({
            "risk_score": 82,
            "recommended_action": "scale_up",
            "rationale": "saturated"
        }))),
        compute: Arc::new(compute),
        probe: Arc::new(MockHealthProbe::new().with_samples("user-api", vec![sample("user-api", RECOVERED)])),
    }
}

async fn spawn_server(compute: MockComputeControl) -> String {
    spawn_server_with(fast_config(), compute).await
}

async fn spawn_server_with(config: Config, compute: MockComputeControl) -> String {
    let orchestrator = Orchestrator::new(&config, backends(compute));
    let app = create_router(AppState::new(orchestrator));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}", addr)
}

#[tokio::test]
async fn test_heal_resolves_degraded_service() {
    let base = spawn_server(MockComputeControl::new()).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/heal", base))
        .json(&json!({"service": "user-api", "alert_message": "High latency spike"}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["final_state"], "RESOLVED");
    assert_eq!(body["assessment"]["risk_score"], 82.0);
    assert_eq!(body["remediations"][0]["parameters"]["new_bounds"]["max_instances"], 15);
    assert_eq!(body["verification"]["healthy"], true);
}

#[tokio::test]
async fn test_heal_healthy_service_is_noop() {
    let base = spawn_server(MockComputeControl::new()).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/heal", base))
        .json(&json!({"service": "quiet-api"}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["final_state"], "RESOLVED_NOOP");
}

#[tokio::test]
async fn test_rejected_remediation_is_bad_gateway_with_report() {
    let base = spawn_server(MockComputeControl::new().with_platform_max(12)).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/heal", base))
        .json(&json!({"service": "user-api"}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 502);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["final_state"], "ABORTED_ERROR");
    assert_eq!(body["error"]["kind"], "remediation_rejected");
    assert!(body["verification"].is_null());
}

#[tokio::test]
async fn test_missing_service_is_bad_request() {
    let base = spawn_server(MockComputeControl::new()).await;
    let client = reqwest::Client::new();

    for payload in [json!({}), json!({"service": "   "})] {
        let resp = client
            .post(format!("{}/heal", base))
            .json(&payload)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "bad_request");
    }

    let resp = client
        .post(format!("{}/heal", base))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_history_lists_newest_first() {
    let base = spawn_server(MockComputeControl::new()).await;
    let client = reqwest::Client::new();

    for service in ["quiet-api", "user-api"] {
        client
            .post(format!("{}/heal", base))
            .json(&json!({"service": service}))
            .send()
            .await
            .unwrap();
    }

    let body: Value = client
        .get(format!("{}/history?limit=1", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["count"], 1);
    assert_eq!(body["incidents"][0]["target_id"], "user-api");

    let body: Value = client
        .get(format!("{}/history", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["count"], 2);
}

#[tokio::test]
async fn test_health() {
    let base = spawn_server(MockComputeControl::new()).await;

    let body: Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "autohealer");
    assert_eq!(body["oracle_model"], "test-model");
    assert_eq!(body["in_flight"], 0);
}

#[tokio::test]
async fn test_client_disconnect_does_not_cancel_heal() {
    let mut config = fast_config();
    config.executor.settle_delay_ms = 1500;
    let base = spawn_server_with(config, MockComputeControl::new()).await;

    let body = json!({"service": "user-api"}).to_string();
    let request = format!(
        "POST /heal HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    );
    let mut stream = tokio::net::TcpStream::connect(base.trim_start_matches("http://"))
        .await
        .unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();

    // Hang up while the invocation is settling after the scale-up.
    tokio::time::sleep(Duration::from_millis(300)).await;
    drop(stream);
    tokio::time::sleep(Duration::from_secs(3)).await;

    let history: Value = reqwest::get(format!("{}/history", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(history["count"], 1);
    let report = &history["incidents"][0];
    assert_eq!(report["final_state"], "RESOLVED");
    assert_eq!(report["remediations"].as_array().unwrap().len(), 1);
    assert_eq!(report["verification"]["healthy"], true);
}
