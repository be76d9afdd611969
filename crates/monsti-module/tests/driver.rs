use async_trait::async_trait;
use monsti_host::{HostConfig, Monsti, MonstiSettings};
use monsti_module::{ModuleContext, Typed, TypedHandler, run_module};
use monsti_rpc::RpcServer;
use monsti_types::{
    FieldConfig, LanguageMap, NodeType,
    signals::{RENDER_NODE, RenderNodeArgs, RenderNodeRet},
};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::broadcast;

const THING: &str = "test.Thing";

struct Redirect {
    target: String,
}

#[async_trait]
impl TypedHandler for Redirect {
    type Args = RenderNodeArgs;
    type Ret = RenderNodeRet;

    fn signal(&self) -> &str {
        RENDER_NODE
    }

    async fn handle(&self, args: RenderNodeArgs) -> Result<RenderNodeRet, String> {
        let redirect = (args.node_type == THING).then(|| self.target.clone());
        Ok(RenderNodeRet {
            redirect,
            ..Default::default()
        })
    }
}

fn config_dir() -> TempDir {
    let dir = TempDir::new().expect("tmp");
    std::fs::write(
        dir.path().join("monsti.yaml"),
        "directories:\n  data: data\n  share: share\n  run: run\nmodules: [test]\nmail:\n  debug: true\n",
    )
    .expect("write settings");
    std::fs::write(dir.path().join("test.yaml"), "target: /elsewhere/\n").expect("write module settings");
    let site = dir.path().join("sites/example");
    std::fs::create_dir_all(&site).expect("mkdir");
    std::fs::write(site.join("site.yaml"), "title: Example\nhosts: [example.com]\n").expect("write site");
    std::fs::create_dir_all(dir.path().join("run")).expect("mkdir");
    dir
}

#[tokio::test]
async fn modules_register_types_and_answer_signals() {
    let dir = config_dir();
    let settings = MonstiSettings::load(dir.path()).expect("settings");
    let config = HostConfig::from_settings(&settings).expect("config");
    let monsti = Arc::new(Monsti::new(settings, config).expect("monsti"));
    let (shutdown_tx, _) = broadcast::channel(1);
    let server = RpcServer::bind(&monsti.config().socket_path, monsti.clone(), shutdown_tx.clone())
        .expect("bind");
    tokio::spawn(server.run());
    let report = monsti.barrier().expect("test");

    let module = run_module("test", dir.path(), async |ctx: &mut ModuleContext| {
        let target = ctx.settings()["target"].as_str().unwrap_or_default().to_string();
        ctx.register_node_type(NodeType {
            id: THING.to_string(),
            name: LanguageMap::en("Thing"),
            fields: vec![FieldConfig::shared("core.Title")],
            ..Default::default()
        })
        .await?;
        ctx.handle(Typed::new(Redirect { target }));
        Ok(())
    });

    let checks = async {
        report.await.expect("init reported");
        assert!(monsti.node_type(THING).is_some());
        assert_eq!(monsti.bus().subscribers(RENDER_NODE).len(), 1);

        let args = RenderNodeArgs {
            request: 0,
            node_type: THING.to_string(),
            embed: None,
        };
        let results = monsti
            .emit::<_, RenderNodeRet>(RENDER_NODE, &args)
            .await
            .expect("emit");
        assert_eq!(results.len(), 1);
        let ret = results[0].as_ref().expect("handler result");
        assert_eq!(ret.redirect.as_deref(), Some("/elsewhere/"));
    };

    tokio::select! {
        result = module => panic!("module stopped early: {result:?}"),
        () = checks => {}
    }
    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn failing_setup_is_reported() {
    let dir = config_dir();
    let result = run_module("test", dir.path(), async |_ctx: &mut ModuleContext| {
        anyhow::bail!("no database")
    })
    .await;
    let err = result.expect_err("setup fails");
    assert!(format!("{err:#}").contains("no database"));
}
