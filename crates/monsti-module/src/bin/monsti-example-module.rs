//! An example module: adds the `example.Greeting` node type and greets the
//! visitor on its pages. A site template `example/Greeting-view.html` can
//! show `{{ Visitor }}`.

use async_trait::async_trait;
use monsti_module::{ModuleContext, Typed, TypedHandler, start_module};
use monsti_rpc::SessionPool;
use monsti_types::{
    FieldConfig, FieldType, LanguageMap, NodeType,
    signals::{RENDER_NODE, RenderNodeArgs, RenderNodeRet},
};
use serde_json::json;
use std::sync::Arc;

const GREETING: &str = "example.Greeting";

struct RenderGreeting {
    pool: Arc<SessionPool>,
    salutation: String,
}

#[async_trait]
impl TypedHandler for RenderGreeting {
    type Args = RenderNodeArgs;
    type Ret = RenderNodeRet;

    fn signal(&self) -> &str {
        RENDER_NODE
    }

    async fn handle(&self, args: RenderNodeArgs) -> Result<RenderNodeRet, String> {
        if args.node_type != GREETING {
            return Ok(RenderNodeRet::default());
        }
        let mut session = self.pool.session().await.map_err(|e| e.to_string())?;
        let request = session.get_request(args.request).await.map_err(|e| e.to_string())?;
        self.pool.free(session);
        let visitor = request
            .and_then(|r| r.login)
            .unwrap_or_else(|| "stranger".to_string());
        let context = json!({ "Visitor": format!("{}, {visitor}", self.salutation) });
        Ok(RenderNodeRet {
            context: serde_json::to_vec(&context).map_err(|e| e.to_string())?,
            ..Default::default()
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    start_module("example-module", async |ctx: &mut ModuleContext| {
        ctx.register_node_type(NodeType {
            id: GREETING.to_string(),
            name: LanguageMap::en("Greeting"),
            fields: vec![
                FieldConfig::shared("core.Title"),
                FieldConfig::new("example.Message", "Message", FieldType::Text),
            ],
            ..Default::default()
        })
        .await?;
        let salutation = ctx
            .settings()
            .get("salutation")
            .and_then(|s| s.as_str())
            .unwrap_or("Hello")
            .to_string();
        let pool = ctx.pool();
        ctx.handle(Typed::new(RenderGreeting { pool, salutation }));
        Ok(())
    })
    .await
}
