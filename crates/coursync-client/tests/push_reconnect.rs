use std::time::Duration;

use axum::http::header::CONTENT_TYPE;
use axum::routing::get;
use axum::Router;
use coursync_client::{PushClient, PushError};
use coursync_shared::constants::MAX_PUSH_LINE_BYTES;
use coursync_shared::protocol::encode_frame;
use coursync_shared::types::UserId;
use serde_json::json;
use tokio::time::timeout;

/// Serves one frame per connection, then ends the response.
async fn one_shot_server() -> String {
    async fn events() -> ([(axum::http::HeaderName, &'static str); 1], String) {
        let frame = format!(
            ": heartbeat\n\n{}data: {{not json\n\n",
            encode_frame(r#"{"type":"update","entity":"assignment","id":"page-1"}"#)
        );
        ([(CONTENT_TYPE, "text/event-stream")], frame)
    }

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().route("/events", get(events));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn reconnects_after_server_closes_stream() {
    let url = one_shot_server().await;
    let client = PushClient::new(&url, UserId(1), Duration::from_millis(50));
    let (handle, mut channels) = client.spawn();

    for _ in 0..2 {
        let event = timeout(Duration::from_secs(5), channels.events.recv())
            .await
            .expect("event within timeout")
            .expect("events channel open");
        assert_eq!(event["id"], json!("page-1"));
    }

    let error = timeout(Duration::from_secs(5), channels.errors.recv())
        .await
        .expect("error within timeout")
        .expect("errors channel open");
    assert_eq!(error, PushError::Closed);

    handle.shutdown().await;
    while channels.events.recv().await.is_some() {}
    while channels.errors.recv().await.is_some() {}
}

#[tokio::test]
async fn non_success_status_is_reported() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, Router::new()).await.unwrap();
    });

    let client = PushClient::new(&format!("http://{addr}"), UserId(1), Duration::from_millis(50));
    let (handle, mut channels) = client.spawn();

    let error = timeout(Duration::from_secs(5), channels.errors.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(error, PushError::Status(404));

    handle.stop();
    assert!(timeout(Duration::from_secs(5), channels.events.recv())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn endless_line_fails_the_stream() {
    async fn events() -> ([(axum::http::HeaderName, &'static str); 1], String) {
        ([(CONTENT_TYPE, "text/event-stream")], "x".repeat(MAX_PUSH_LINE_BYTES + 1))
    }

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, Router::new().route("/events", get(events)))
            .await
            .unwrap();
    });

    let client = PushClient::new(&format!("http://{addr}"), UserId(1), Duration::from_millis(50));
    let (handle, mut channels) = client.spawn();

    let error = timeout(Duration::from_secs(5), channels.errors.recv())
        .await
        .expect("error within timeout")
        .expect("errors channel open");
    assert!(matches!(error, PushError::Stream(_)), "{error:?}");

    handle.shutdown().await;
    assert!(channels.events.recv().await.is_none());
    while channels.errors.recv().await.is_some() {}
}
