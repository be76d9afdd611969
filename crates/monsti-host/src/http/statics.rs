//! Static assets: shared ones below `/static/`, per-site ones below
//! `/site-static/`.

use super::{HttpState, PipelineError};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, header},
    response::{IntoResponse, Response},
};
use std::{io, path::Path as FsPath};

pub(crate) async fn shared(State(state): State<HttpState>, Path(path): Path<String>) -> Response {
    serve_file(&state.monsti.settings().static_dir(), &path).await
}

pub(crate) async fn site(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Path(path): Path<String>,
) -> Response {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    match state.monsti.site_for_host(host) {
        Some(site) => serve_file(&state.monsti.settings().site_static_dir(&site.name), &path).await,
        None => PipelineError::NotFound.into_response(),
    }
}

async fn serve_file(root: &FsPath, relative: &str) -> Response {
    let relative = relative.trim_start_matches('/');
    if relative.is_empty() || relative.split('/').any(|s| s == ".." || s.starts_with('.')) {
        return PipelineError::NotFound.into_response();
    }
    let file = root.join(relative);
    match tokio::fs::read(&file).await {
        Ok(content) => {
            let kind = mime_guess::from_path(&file).first_or_octet_stream();
            let mut response = content.into_response();
            if let Ok(value) = HeaderValue::from_str(kind.essence_str()) {
                response.headers_mut().insert(header::CONTENT_TYPE, value);
            }
            response
        }
        Err(err) if matches!(err.kind(), io::ErrorKind::NotFound | io::ErrorKind::IsADirectory) => {
            PipelineError::NotFound.into_response()
        }
        Err(err) => {
            PipelineError::Internal(format!("could not read {}: {err}", file.display())).into_response()
        }
    }
}
