//! Local versions of a document land on one server chain.

use std::sync::Arc;

use coursync_client::commands::{assignments, courses, documents};
use coursync_client::{ClientConfig, Session};
use coursync_server::external::MemoryStore;
use coursync_server::{serve_on, AppState, RemoteDb, ServerConfig};
use coursync_shared::types::{AssignmentFields, CourseFields, DocumentType, UserId};
use serde_json::Value;
use tempfile::TempDir;

#[tokio::test]
async fn new_versions_extend_the_server_chain() {
    let dir = TempDir::new().unwrap();
    let state = AppState::new(
        ServerConfig {
            document_storage_path: dir.path().join("server-docs"),
            ..Default::default()
        },
        RemoteDb::open_in_memory().unwrap(),
        Arc::new(MemoryStore::new()),
    )
    .unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve_on(state, listener));

    let config = ClientConfig {
        server_url: format!("http://{addr}"),
        data_dir: Some(dir.path().join("client")),
        push_enabled: false,
        ..Default::default()
    };
    let session = Session::open(config, UserId(1));

    courses::create(
        &session,
        CourseFields {
            code: "CS101".into(),
            name: "Intro to CS".into(),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    let assignment = assignments::create(
        &session,
        AssignmentFields {
            title: "Lab 1".into(),
            course_code: "CS101".into(),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    let remote_assignment = assignment.sync.remote_id().expect("assignment synced");

    let v1 = documents::upload(
        &session,
        assignment.id,
        DocumentType::Submission,
        "report.pdf",
        b"first",
    )
    .await
    .unwrap();
    documents::new_version(&session, v1.id, "report.pdf", b"second")
        .await
        .unwrap();
    let v3 = documents::new_version(&session, v1.id, "report.pdf", b"third")
        .await
        .unwrap();
    assert_eq!(v3.version, 3);

    let latest: Value = reqwest::Client::new()
        .get(format!("http://{addr}/assignments/{remote_assignment}/documents"))
        .header("x-user-id", "1")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let chains = latest.as_array().unwrap();
    assert_eq!(chains.len(), 1);
    assert_eq!(chains[0]["version"], 3);
    assert_eq!(chains[0]["file_size"], 5);
    assert!(chains[0]["parent_id"].is_i64());
}
