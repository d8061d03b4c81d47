//! Event ingestion scenarios: happy path, rate limiting, and the queue's
//! eventual presence in the stats overview after a poll cycle.

mod common;

use std::time::Duration;

#[tokio::test]
async fn happy_minimal_event_is_accepted_and_eventually_counted() {
    let Some(base_url) = common::base_url() else { return };
    common::wait_for_health(&base_url).await;
    let client = common::http_client();

    let response = client
        .post(format!("{base_url}/v1/events"))
        .json(&common::minimal_event_batch())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 202);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "accepted");
    assert_eq!(body["count"], 1);

    // Allow one worker poll cycle for the event to land in the aggregate.
    tokio::time::sleep(Duration::from_secs(5)).await;

    let overview = client
        .get(format!("{base_url}/v1/stats/overview?period=24h"))
        .send()
        .await
        .unwrap();
    assert!(overview.status().is_success());
    let overview: serde_json::Value = overview.json().await.unwrap();
    assert!(overview["total_calls"].as_u64().unwrap_or(0) >= 1);
}

#[tokio::test]
async fn sixty_one_requests_in_under_a_minute_trigger_at_least_one_rate_limit() {
    let Some(base_url) = common::base_url() else { return };
    common::wait_for_health(&base_url).await;
    let client = common::http_client();

    let mut saw_429 = false;
    for _ in 0..61 {
        let response = client
            .post(format!("{base_url}/v1/events"))
            .json(&common::minimal_event_batch())
            .send()
            .await
            .unwrap();
        if response.status() == 429 {
            let body: serde_json::Value = response.json().await.unwrap();
            assert!(body.get("retry_after").is_some());
            saw_429 = true;
            break;
        }
    }
    assert!(saw_429, "issuing 61 requests in under a minute must trigger at least one rate-limit response");
}

#[tokio::test]
async fn error_events_aggregate_into_the_error_summary() {
    let Some(base_url) = common::base_url() else { return };
    common::wait_for_health(&base_url).await;
    let client = common::http_client();

    let batch = serde_json::json!({ "events": [
        common::standard_error_event("get_forecast", "1.0.0"),
        common::standard_error_event("get_forecast", "1.0.0"),
        common::standard_error_event("get_forecast", "1.0.1"),
    ]});

    let response = client
        .post(format!("{base_url}/v1/events"))
        .json(&batch)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 202);

    tokio::time::sleep(Duration::from_secs(5)).await;

    let errors = client
        .get(format!("{base_url}/v1/stats/errors?period=24h"))
        .send()
        .await
        .unwrap();
    assert!(errors.status().is_success());
    let errors: Vec<serde_json::Value> = errors.json().await.unwrap();
    let row = errors
        .iter()
        .find(|e| e["error_type"] == "TIMEOUT")
        .expect("a TIMEOUT error row must be present");
    assert!(row["count"].as_u64().unwrap_or(0) >= 3);
}
