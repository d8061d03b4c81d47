//! Health, status, and metrics exposition against a live deployment.

mod common;

#[tokio::test]
async fn health_reports_200_when_store_and_queue_are_reachable() {
    let Some(base_url) = common::base_url() else { return };
    assert!(common::wait_for_health(&base_url).await, "service never became healthy");

    let response = common::http_client()
        .get(format!("{base_url}/v1/health"))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn status_reports_queue_depth_and_uptime() {
    let Some(base_url) = common::base_url() else { return };
    common::wait_for_health(&base_url).await;

    let response = common::http_client()
        .get(format!("{base_url}/v1/status"))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["queue_depth"].is_u64());
    assert!(body["uptime_seconds"].is_u64());
    assert!(body.get("events_processed_24h").is_some());
}

#[tokio::test]
async fn metrics_endpoint_exposes_prometheus_text_exposition_format() {
    let Some(base_url) = common::base_url() else { return };
    common::wait_for_health(&base_url).await;

    let response = common::http_client()
        .get(format!("{base_url}/metrics"))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.starts_with("text/plain"));
}
