//! Runs the daemon in-process and drives it over its real Unix sockets: the
//! control socket for requests and the backend socket for sync frames.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::BytesMut;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use party_core::{PartyId, RosterMirror, UserId};
use party_daemon::paths::{backend_socket_path, socket_path};
use party_daemon::{request, request_status, DaemonConfig, DaemonError, DaemonRequest};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn call(home: &Path, req: DaemonRequest) -> Result<Value, DaemonError> {
    let home = home.to_path_buf();
    tokio::task::spawn_blocking(move || request(&home, &req))
        .await
        .expect("blocking request task")
}

async fn wait_for(path: PathBuf) {
    for _ in 0..200 {
        if path.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{} never appeared", path.display());
}

async fn wait_for_backend(home: &Path, name: &str) {
    for _ in 0..200 {
        let home_buf = home.to_path_buf();
        let status = tokio::task::spawn_blocking(move || request_status(&home_buf))
            .await
            .expect("status task")
            .expect("status");
        if status["backends"]
            .as_array()
            .is_some_and(|names| names.contains(&json!(name)))
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("backend {name} never attached");
}

/// Reads frames until `done` holds for the mirror or the deadline passes.
async fn read_until(
    stream: &mut UnixStream,
    buf: &mut BytesMut,
    mirror: &mut RosterMirror,
    done: impl Fn(&RosterMirror) -> bool,
) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !done(mirror) {
        let mut chunk = [0u8; 1024];
        let read = tokio::time::timeout_at(deadline, stream.read(&mut chunk))
            .await
            .expect("frame before deadline")
            .expect("backend read");
        assert!(read > 0, "daemon closed the backend stream");
        buf.extend_from_slice(&chunk[..read]);
        mirror.apply_frames(buf).expect("well-formed frames");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn backend_mirror_follows_party_lifecycle() {
    let home = TempDir::new().expect("home");
    let daemon = tokio::spawn(party_daemon::run(
        home.path().to_path_buf(),
        DaemonConfig::default(),
    ));
    wait_for(socket_path(home.path())).await;
    wait_for(backend_socket_path(home.path())).await;

    let mut backend = UnixStream::connect(backend_socket_path(home.path()))
        .await
        .expect("attach backend");
    backend
        .write_all(b"{\"backend\":\"lobby\"}\n")
        .await
        .expect("handshake");
    wait_for_backend(home.path(), "lobby").await;

    let connected = call(
        home.path(),
        DaemonRequest::Connect {
            user: "ann".into(),
            backend: "lobby".into(),
            id: None,
        },
    )
    .await
    .expect("connect");
    let ann: UserId = serde_json::from_value(connected["id"].clone()).expect("user id");

    let created = call(home.path(), DaemonRequest::Create { user: "ann".into() })
        .await
        .expect("create");
    let party: PartyId = serde_json::from_value(created["party"].clone()).expect("party id");

    let mut buf = BytesMut::new();
    let mut mirror = RosterMirror::new();
    read_until(&mut backend, &mut buf, &mut mirror, |m| m.party_of(&ann).is_some()).await;
    assert_eq!(mirror.party_of(&ann), Some(party));
    assert_eq!(mirror.roster(&party).map(|r| r.leader), Some(ann));

    call(home.path(), DaemonRequest::Disband { user: "ann".into() })
        .await
        .expect("disband");
    read_until(&mut backend, &mut buf, &mut mirror, RosterMirror::is_empty).await;
    assert_eq!(mirror.party_of(&ann), None);

    call(home.path(), DaemonRequest::Stop).await.expect("stop");
    let result = tokio::time::timeout(Duration::from_secs(5), daemon)
        .await
        .expect("daemon exits after stop")
        .expect("daemon task");
    assert!(result.is_ok(), "daemon failed: {result:?}");
    assert!(!socket_path(home.path()).exists(), "control socket cleaned up");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn refused_request_surfaces_daemon_message() {
    let home = TempDir::new().expect("home");
    let daemon = tokio::spawn(party_daemon::run(
        home.path().to_path_buf(),
        DaemonConfig::default(),
    ));
    wait_for(socket_path(home.path())).await;

    call(
        home.path(),
        DaemonRequest::Connect {
            user: "bo".into(),
            backend: "arena".into(),
            id: None,
        },
    )
    .await
    .expect("connect");

    let err = call(home.path(), DaemonRequest::Leave { user: "bo".into() })
        .await
        .expect_err("bo is in no party");
    match err {
        DaemonError::Protocol(message) => {
            assert_eq!(message, party_core::Rejection::NotInParty.to_string())
        }
        other => panic!("unexpected error: {other:?}"),
    }

    call(home.path(), DaemonRequest::Stop).await.expect("stop");
    let _ = tokio::time::timeout(Duration::from_secs(5), daemon).await;
}
