mod common;

use async_trait::async_trait;
use axum::http::StatusCode;
use common::{get, site};
use monsti_rpc::{MonstiClient, RpcServer, SignalHandler, SignalSchemas, serve_signals};
use monsti_types::{
    FieldConfig, LanguageMap, NodeType,
    signals::{RENDER_NODE, RenderNodeArgs, RenderNodeRet},
};
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tokio::sync::broadcast;

const FOO: &str = "core.Foo";

/// Adds one template variable to `core.Foo` nodes.
struct Contribute {
    key: &'static str,
    value: &'static str,
}

#[async_trait]
impl SignalHandler for Contribute {
    fn signal(&self) -> &str {
        RENDER_NODE
    }

    async fn handle(&self, args: Vec<u8>) -> Result<Vec<u8>, String> {
        let schemas = SignalSchemas::new();
        let args: RenderNodeArgs = schemas
            .decode_args(RENDER_NODE, &args)
            .map_err(|e| e.to_string())?;
        let mut ret = RenderNodeRet::default();
        if args.node_type == FOO {
            ret.context = serde_json::to_vec(&json!({ self.key: self.value })).map_err(|e| e.to_string())?;
        }
        schemas.encode_ret(RENDER_NODE, &ret).map_err(|e| e.to_string())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn every_subscriber_contributes_to_the_rendered_node() {
    let site = site();
    site.monsti
        .register_node_type(NodeType {
            id: FOO.to_string(),
            name: LanguageMap::en("Foo"),
            fields: vec![FieldConfig::shared("core.Title")],
            ..Default::default()
        })
        .expect("register");
    let templates = site.dir.path().join("data/example/templates/core");
    std::fs::create_dir_all(&templates).expect("mkdir");
    std::fs::write(
        templates.join("Foo-view.html"),
        "<p class=\"a\">{{ A }}</p><p class=\"b\">{{ B }}</p>",
    )
    .expect("template");
    site.node("/foo", FOO, "Foo");

    let socket = site.monsti.config().socket_path.clone();
    std::fs::create_dir_all(socket.parent().expect("run dir")).expect("mkdir");
    let (shutdown_tx, _) = broadcast::channel(1);
    let server = RpcServer::bind(&socket, site.monsti.clone(), shutdown_tx.clone()).expect("bind");
    tokio::spawn(server.run());

    for (key, value) in [("A", "alpha"), ("B", "beta")] {
        let mut client = MonstiClient::connect(&socket).await.expect("connect");
        let handlers: Vec<Arc<dyn SignalHandler>> = vec![Arc::new(Contribute { key, value })];
        tokio::spawn(async move {
            let _ = serve_signals(&mut client, &handlers).await;
        });
    }
    for _ in 0..200 {
        if site.monsti.bus().subscribers(RENDER_NODE).len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(site.monsti.bus().subscribers(RENDER_NODE).len(), 2);

    let reply = get(site.app(), "/foo/", None).await;
    assert_eq!(reply.status, StatusCode::OK);
    let body = reply.text();
    assert!(body.contains("<p class=\"a\">alpha</p>"), "{body}");
    assert!(body.contains("<p class=\"b\">beta</p>"), "{body}");

    // nodes of other types pass through unchanged
    let home = get(site.app(), "/", None).await;
    assert_eq!(home.status, StatusCode::OK);
    assert!(!home.text().contains("alpha"));
    let _ = shutdown_tx.send(());
}
