use std::collections::HashMap;
use std::sync::Arc;

use patient_events_core::DomainEvent;
use patient_events_notifications::adapters::webhook::{SIGNATURE_HEADER, sign_payload};
use patient_events_notifications::{
    NotificationChannel, NotificationError, NotificationSink, ProviderConfig, WebhookAdapter,
};
use time::macros::{date, datetime};
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn created_event() -> DomainEvent {
    DomainEvent::created(
        1,
        "485 777 3456",
        "Sarah Johnson",
        date!(1985 - 03 - 15),
        "North Medical Centre",
        datetime!(2024-01-15 10:30:00 UTC),
    )
}

fn sink_for(server: &MockServer, secret: Option<&str>) -> NotificationSink {
    let provider = ProviderConfig {
        webhook_url: Some(format!("{}/hooks/patients", server.uri())),
        webhook_secret: secret.map(str::to_string),
        webhook_headers: Some(HashMap::from([(
            "X-Practice-Source".to_string(),
            "patient-events".to_string(),
        )])),
        ..Default::default()
    };
    NotificationSink::new(
        Arc::new(WebhookAdapter::new()),
        NotificationChannel::Webhook,
        provider,
    )
    .unwrap()
}

#[tokio::test]
async fn webhook_posts_signed_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/patients"))
        .and(header_exists(SIGNATURE_HEADER))
        .and(header("X-Practice-Source", "patient-events"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let event = created_event();
    sink_for(&server, Some("shared-secret"))
        .notify(&event)
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];

    let body = String::from_utf8(request.body.clone()).unwrap();
    let expected = format!("sha256={}", sign_payload(&body, "shared-secret").unwrap());
    let signature = request
        .headers
        .get(SIGNATURE_HEADER)
        .unwrap()
        .to_str()
        .unwrap();
    assert_eq!(signature, expected);

    let payload: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(payload["template_id"], "patient-welcome");
    assert_eq!(payload["event_id"], event.event_id());
    assert_eq!(payload["channel"], "webhook");
    assert_eq!(payload["data"]["name"], "Sarah Johnson");
    assert!(
        payload["content"]["body"]
            .as_str()
            .unwrap()
            .contains("485 777 3456")
    );
}

#[tokio::test]
async fn webhook_without_secret_is_unsigned() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    sink_for(&server, None)
        .notify(&created_event())
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    assert!(requests[0].headers.get(SIGNATURE_HEADER).is_none());
}

#[tokio::test]
async fn webhook_server_error_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let err = sink_for(&server, None)
        .notify(&created_event())
        .await
        .unwrap_err();
    assert!(err.is_transient(), "got {err:?}");
}

#[tokio::test]
async fn webhook_rejection_is_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad payload"))
        .mount(&server)
        .await;

    let err = sink_for(&server, None)
        .notify(&created_event())
        .await
        .unwrap_err();
    match err {
        NotificationError::SendFailed(message) => assert!(message.contains("bad payload")),
        other => panic!("expected SendFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn webhook_unreachable_is_transient() {
    let server = MockServer::start().await;
    let sink = sink_for(&server, None);
    drop(server);

    let err = sink.notify(&created_event()).await.unwrap_err();
    assert!(err.is_transient(), "got {err:?}");
}
