mod account;
mod actions;
mod blog;
mod contact;
pub mod error;
pub mod path;
mod pipeline;
mod statics;
mod view;

pub use error::PipelineError;

use crate::service::Monsti;
use axum::{
    Router,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use std::{net::SocketAddr, sync::Arc};
use tokio::{sync::broadcast, task::JoinHandle};

#[derive(Clone)]
pub struct HttpState {
    pub monsti: Arc<Monsti>,
}

/// Routes of the public web server: static assets, and every other path
/// through the node pipeline.
pub fn router(monsti: Arc<Monsti>) -> Router {
    Router::new()
        .route("/static/{*path}", get(statics::shared))
        .route("/site-static/{*path}", get(statics::site))
        .fallback(pipeline::handler)
        .with_state(HttpState { monsti })
}

pub fn spawn_http_server(
    monsti: Arc<Monsti>,
    shutdown_tx: broadcast::Sender<()>,
) -> JoinHandle<()> {
    let addr = monsti.config().listen;
    let app = router(monsti);
    tokio::spawn(async move {
        if let Err(err) = serve(addr, app, shutdown_tx).await {
            tracing::error!("http server error: {err}");
        }
    })
}

async fn serve(
    addr: SocketAddr,
    app: Router,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), String> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("bind {addr}: {e}"))?;
    tracing::info!("HTTP server listening on http://{}", addr);
    let mut shutdown_rx = shutdown_tx.subscribe();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await
        .map_err(|e| format!("serve {addr}: {e}"))
}

/// Escape everything a `Location` header can't carry verbatim.
fn location_value(target: &str) -> HeaderValue {
    let mut escaped = String::with_capacity(target.len());
    for byte in target.bytes() {
        if (0x21..0x7f).contains(&byte) {
            escaped.push(byte as char);
        } else {
            escaped.push_str(&format!("%{byte:02X}"));
        }
    }
    HeaderValue::from_str(&escaped).unwrap_or_else(|_| HeaderValue::from_static("/"))
}

/// `303 See Other` to `target`.
pub(crate) fn see_other(target: &str) -> Response {
    (StatusCode::SEE_OTHER, [(header::LOCATION, location_value(target))]).into_response()
}

/// `303 See Other` that also sets a cookie.
pub(crate) fn see_other_with_cookie(target: &str, cookie: &str) -> Response {
    let mut response = see_other(target);
    if let Ok(value) = HeaderValue::from_str(cookie) {
        response.headers_mut().insert(header::SET_COOKIE, value);
    }
    response
}
