//! Runtime client against a local Unix listener standing in for HAProxy.

use haproxy_client::{HAProxyError, RuntimeClient, RuntimeClientTrait, ServerState};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixListener;

/// Serves one response per connection, recording received commands.
fn serve(path: &Path, respond: fn(&str) -> String) -> Arc<Mutex<Vec<String>>> {
    let listener = UnixListener::bind(path).unwrap();
    let received = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&received);
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let mut command = String::new();
            stream.read_to_string(&mut command).await.unwrap();
            let response = respond(&command);
            log.lock().unwrap().push(command);
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
        }
    });
    received
}

#[tokio::test]
async fn test_set_server_commands() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("haproxy-runtime-api.sock");
    let received = serve(&socket, |_| String::new());

    let client = RuntimeClient::new(&socket);
    client.set_server_addr("ns_app_http", "SRV_1", "10.0.0.6", 8080).await.unwrap();
    client.set_server_state("ns_app_http", "SRV_1", ServerState::Ready).await.unwrap();

    let received = received.lock().unwrap().clone();
    assert_eq!(
        received,
        vec![
            "set server ns_app_http/SRV_1 addr 10.0.0.6 port 8080\n".to_string(),
            "set server ns_app_http/SRV_1 state ready\n".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_error_response_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("haproxy-runtime-api.sock");
    serve(&socket, |_| "No such backend.\n".to_string());

    let client = RuntimeClient::new(&socket);
    let err = client
        .set_server_state("missing", "SRV_1", ServerState::Maint)
        .await
        .unwrap_err();
    assert!(matches!(err, HAProxyError::Runtime(message) if message == "No such backend."));
}

#[tokio::test]
async fn test_map_content_payload_and_show_map() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("haproxy-runtime-api.sock");
    let received = serve(&socket, |command| {
        if command.starts_with("show map") {
            "0x55a1 a.example/foo ns_app_http\n0x55a2 a.example/ ns_app_http.abc\n".to_string()
        } else {
            String::new()
        }
    });

    let client = RuntimeClient::new(&socket);
    let rows = vec![("a.example/foo".to_string(), "ns_app_http".to_string())];
    client.set_map_content("/etc/haproxy/maps/path-exact.map", &rows).await.unwrap();
    let shown = client.show_map("/etc/haproxy/maps/path-exact.map").await.unwrap();

    let received = received.lock().unwrap().clone();
    assert_eq!(received[0], "clear map /etc/haproxy/maps/path-exact.map\n");
    assert_eq!(
        received[1],
        "add map /etc/haproxy/maps/path-exact.map <<\na.example/foo ns_app_http\n\n"
    );
    assert_eq!(
        shown,
        vec![
            ("a.example/foo".to_string(), "ns_app_http".to_string()),
            ("a.example/".to_string(), "ns_app_http.abc".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_missing_socket_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let client = RuntimeClient::new(dir.path().join("absent.sock"));
    assert!(matches!(
        client.show_servers_state().await,
        Err(HAProxyError::Io(_))
    ));
}
