use async_trait::async_trait;
use monsti_rpc::{
    ConnectionContext, MonstiClient, RpcError, RpcServer, RpcService, SessionPool, WireError,
    methods::{GET_NODE_TYPES, GetConfigParams, GET_CONFIG},
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::{sync::Arc, time::Duration};
use tempfile::TempDir;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::UnixListener,
    sync::broadcast,
};

#[derive(Default)]
struct Recorder {
    closed: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl RpcService for Recorder {
    async fn call(&self, conn: &ConnectionContext, method: &str, params: Value) -> Result<Value, WireError> {
        match method {
            GET_NODE_TYPES => Ok(json!(["core.Document", "core.File"])),
            GET_CONFIG => {
                let params: GetConfigParams =
                    serde_json::from_value(params).map_err(|e| WireError::decode(e.to_string()))?;
                conn.claim_client(&params.module);
                Ok(json!({"Value": params.name, "found": true}))
            }
            other => Err(WireError::unknown_method(other)),
        }
    }

    async fn disconnected(&self, conn: &ConnectionContext) {
        self.closed.lock().push(conn.clients());
    }
}

async fn start(dir: &TempDir) -> (Arc<Recorder>, std::path::PathBuf, broadcast::Sender<()>) {
    let path = dir.path().join("monsti.socket");
    let service = Arc::new(Recorder::default());
    let (shutdown_tx, _) = broadcast::channel(1);
    let server = RpcServer::bind(&path, service.clone(), shutdown_tx.clone()).expect("bind");
    tokio::spawn(server.run());
    (service, path, shutdown_tx)
}

#[tokio::test]
async fn calls_round_trip_over_the_socket() {
    let dir = TempDir::new().expect("tmp");
    let (_service, path, shutdown_tx) = start(&dir).await;

    let mut client = MonstiClient::connect(&path).await.expect("connect");
    assert_eq!(
        client.get_node_types().await.expect("types"),
        vec!["core.Document".to_string(), "core.File".to_string()]
    );
    assert_eq!(
        client.get_config("example", "foo", "bar.baz").await.expect("config"),
        Some(json!("bar.baz"))
    );

    let err = client.get_request(1).await.expect_err("unknown method");
    assert!(matches!(err, RpcError::Remote { .. }));
    assert_eq!(err.remote_code(), Some("unknown_method"));

    // the connection stays usable after a failed call
    assert!(client.get_node_types().await.is_ok());
    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn closing_a_connection_reports_its_clients() {
    let dir = TempDir::new().expect("tmp");
    let (service, path, shutdown_tx) = start(&dir).await;

    let mut client = MonstiClient::connect(&path).await.expect("connect");
    client.get_config("example", "sub-1", "").await.expect("config");
    drop(client);

    for _ in 0..100 {
        if !service.closed.lock().is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(*service.closed.lock(), vec![vec!["sub-1".to_string()]]);
    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn pool_reuses_and_caps_sessions() {
    let dir = TempDir::new().expect("tmp");
    let (_service, path, shutdown_tx) = start(&dir).await;

    let pool = SessionPool::new(&path, 1);
    let first = pool.session().await.expect("session");
    let second = pool.session().await.expect("session");
    let first_id = first.id().to_string();
    assert_ne!(first_id, second.id());
    assert!(first_id.starts_with(&format!("{}#", std::process::id())));

    pool.free(first);
    pool.free(second);
    assert_eq!(pool.idle(), 1);
    let again = pool.session().await.expect("session");
    assert_eq!(again.id(), first_id);
    let _ = shutdown_tx.send(());
}

/// Answers every line after `delay` with an empty list, echoing the call id.
async fn slow_server(path: &std::path::Path, delay: Duration) {
    let listener = UnixListener::bind(path).expect("bind");
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (r, mut w) = stream.into_split();
                let mut lines = BufReader::new(r).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let request: Value = serde_json::from_str(&line).expect("request");
                    tokio::time::sleep(delay).await;
                    let reply = json!({"id": request["id"], "ok": true, "result": []});
                    let mut frame = reply.to_string();
                    frame.push('\n');
                    if w.write_all(frame.as_bytes()).await.is_err() {
                        break;
                    }
                }
            });
        }
    });
}

#[tokio::test]
async fn an_interrupted_call_retires_the_connection() {
    let dir = TempDir::new().expect("tmp");
    let path = dir.path().join("slow.socket");
    slow_server(&path, Duration::from_millis(100)).await;

    let pool = SessionPool::new(&path, 2);
    let mut client = pool.session().await.expect("session");
    let interrupted = tokio::time::timeout(Duration::from_millis(20), client.get_node_types()).await;
    assert!(interrupted.is_err());
    assert!(client.is_broken());

    for _ in 0..3 {
        let err = client.get_node_types().await.expect_err("broken client");
        assert!(matches!(err, RpcError::Closed), "{err:?}");
    }
    pool.free(client);
    assert_eq!(pool.idle(), 0);

    let mut fresh = pool.session().await.expect("session");
    assert!(fresh.get_node_types().await.expect("types").is_empty());
    assert!(!fresh.is_broken());
    pool.free(fresh);
    assert_eq!(pool.idle(), 1);
}
