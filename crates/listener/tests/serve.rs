//! End-to-end tests against a bound listener.

use std::net::SocketAddr;
use std::sync::Arc;

use forwarder::testing::RecordingSink;
use forwarder::{AuditEventReceiver, LogPayload, AUDIT_LOG_EVENT_TYPE};
use listener::{CloudEventListener, ListenerConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

async fn post(addr: SocketAddr, path: &str, headers: &[(&str, &str)], body: &str) -> String {
    let mut request = format!(
        "POST {path} HTTP/1.1\r\nhost: {addr}\r\nconnection: close\r\ncontent-length: {}\r\n",
        body.len()
    );
    for (name, value) in headers {
        request.push_str(&format!("{name}: {value}\r\n"));
    }
    request.push_str("\r\n");
    request.push_str(body);

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

#[tokio::test]
async fn test_serves_events_until_shutdown() {
    let sink = Arc::new(RecordingSink::new());
    let config = ListenerConfig {
        addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        path: "/events".to_string(),
        ..ListenerConfig::default()
    };
    let listener = CloudEventListener::bind(&config, AuditEventReceiver::new(sink.clone()))
        .await
        .unwrap();
    let addr = listener.local_addr();
    assert_ne!(addr.port(), 0);

    let (stop, stopped) = oneshot::channel::<()>();
    let server = tokio::spawn(listener.run(async {
        let _ = stopped.await;
    }));

    let response = post(
        addr,
        "/events",
        &[
            ("ce-specversion", "1.0"),
            ("ce-id", "evt-42"),
            ("ce-type", AUDIT_LOG_EVENT_TYPE),
            ("ce-source", "//cloudaudit.googleapis.com/projects/proj-a/logs/activity"),
            ("content-type", "application/json"),
        ],
        r#"{"logName":"projects/proj-a/logs/activity","protoPayload":{"methodName":"storage.buckets.create"}}"#,
    )
    .await;

    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    let entries = sink.entries();
    assert_eq!(entries.len(), 2);
    assert!(matches!(entries[0].payload, LogPayload::EventSummary(_)));
    assert!(matches!(entries[1].payload, LogPayload::AuditRecord(_)));

    let response = post(addr, "/", &[("ce-specversion", "1.0")], "").await;
    assert!(response.starts_with("HTTP/1.1 404"), "{response}");

    stop.send(()).unwrap();
    server.await.unwrap().unwrap();
}
