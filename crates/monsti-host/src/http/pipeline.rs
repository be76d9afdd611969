//! Resolution of a request to a site, user and node, and dispatch of the
//! requested action.

use super::{
    HttpState, PipelineError, account, actions,
    path::{RequestPath, parse_request_path},
    see_other,
    view::{self, PAGE_FULL},
};
use crate::{
    auth::{CookieSession, session_cookie},
    config::SiteConfig,
    service::{Monsti, RequestGuard},
};
use axum::{
    extract::{FromRequest, Multipart, Request, State},
    http::{HeaderMap, Method, StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures::FutureExt;
use monsti_store::DataStore;
use monsti_types::{
    Action, FormData, Node, RequestInfo, SiteSettings, User, node::PATH_TYPE, settings,
};
use std::{
    backtrace::Backtrace,
    cell::RefCell,
    collections::BTreeMap,
    panic::AssertUnwindSafe,
    sync::{Arc, Once},
};

const MAX_FORM_BYTES: usize = 64 * 1024 * 1024;

/// Everything an action needs to know about the current request.
pub(crate) struct RequestContext {
    pub monsti: Arc<Monsti>,
    pub site: SiteConfig,
    pub settings: SiteSettings,
    pub tz: Tz,
    pub method: Method,
    pub path: RequestPath,
    pub raw_query: Option<String>,
    pub query: FormData,
    pub form: FormData,
    /// Uploaded files by form key.
    pub files: BTreeMap<String, Vec<u8>>,
    pub user: Option<User>,
    pub node: Node,
    pub now: DateTime<Utc>,
    request: RequestGuard,
}

impl RequestContext {
    pub fn site_name(&self) -> &str {
        &self.site.name
    }

    pub fn locale(&self) -> &str {
        self.settings.locale()
    }

    pub fn store(&self) -> &DataStore {
        self.monsti.store()
    }

    pub fn request_id(&self) -> u64 {
        self.request.id()
    }

    pub fn is_post(&self) -> bool {
        self.method == Method::POST
    }

    /// Anonymous requests without parameters share cached pages.
    pub fn cacheable(&self) -> bool {
        self.user.is_none() && self.query.is_empty() && self.form.is_empty()
    }

    /// URL of `action` on the current node.
    pub fn action_url(&self, action: Action) -> String {
        action_url(&self.node.path, action)
    }
}

pub(crate) fn action_url(node_path: &str, action: Action) -> String {
    if node_path == "/" {
        format!("/@@{}", action.name())
    } else {
        format!("{node_path}/@@{}", action.name())
    }
}

thread_local! {
    static PANIC_TRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

/// Keep the stack of the panicking thread for [`catch_panic`]; the
/// previous hook still runs.
fn install_panic_hook() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            PANIC_TRACE.with(|trace| *trace.borrow_mut() = Some(Backtrace::force_capture()));
            previous(info);
        }));
    });
}

/// A panic caught while serving a request.
#[derive(Debug)]
pub(crate) struct PanicReport {
    pub message: String,
    pub backtrace: Backtrace,
}

/// Poll `fut`, turning a panic into a report with the stack at the panic
/// site.
pub(crate) async fn catch_panic<F: Future>(fut: F) -> Result<F::Output, PanicReport> {
    install_panic_hook();
    AssertUnwindSafe(fut).catch_unwind().await.map_err(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        let backtrace = PANIC_TRACE
            .with(|trace| trace.borrow_mut().take())
            .unwrap_or_else(Backtrace::force_capture);
        PanicReport { message, backtrace }
    })
}

pub(crate) async fn handler(State(state): State<HttpState>, req: Request) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    match catch_panic(serve(state.monsti, req)).await {
        Ok(Ok(response)) => response,
        Ok(Err(err)) => {
            tracing::debug!(%method, %uri, %err, "request failed");
            err.into_response()
        }
        Err(panic) => {
            tracing::error!(
                %method,
                %uri,
                "panic while handling request: {}\n{}",
                panic.message,
                panic.backtrace
            );
            (StatusCode::INTERNAL_SERVER_ERROR, "Application error.").into_response()
        }
    }
}

fn request_host(req: &Request) -> Option<String> {
    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| req.uri().authority().map(|a| a.to_string()))?;
    Some(host)
}

fn parse_query(raw: Option<&str>) -> FormData {
    raw.map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}

fn session_user(
    monsti: &Monsti,
    site: &str,
    settings: &SiteSettings,
    headers: &HeaderMap,
) -> Result<Option<User>, PipelineError> {
    let key = settings.text(settings::SESSION_AUTH_KEY);
    let session = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(session_cookie)
        .find_map(|value| CookieSession::decode(value, key));
    let Some(login) = session.and_then(|s| s.login) else {
        return Ok(None);
    };
    let user = monsti.store().get_user(site, &login)?;
    if user.is_none() {
        tracing::debug!(site, login, "session of unknown user");
    }
    Ok(user)
}

type Uploads = BTreeMap<String, Vec<u8>>;

async fn read_form(req: Request) -> Result<(FormData, Uploads), PipelineError> {
    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let mut form = FormData::new();
    let mut files = Uploads::new();
    if content_type.starts_with("multipart/form-data") {
        let mut multipart = Multipart::from_request(req, &())
            .await
            .map_err(|e| PipelineError::BadRequest(e.body_text()))?;
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| PipelineError::BadRequest(e.body_text()))?
        {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            let is_file = field.file_name().is_some();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| PipelineError::BadRequest(e.body_text()))?;
            if is_file {
                if !bytes.is_empty() {
                    files.insert(name, bytes.to_vec());
                }
            } else {
                form.insert(name, String::from_utf8_lossy(&bytes).into_owned());
            }
        }
    } else {
        let body = axum::body::to_bytes(req.into_body(), MAX_FORM_BYTES)
            .await
            .map_err(|e| PipelineError::BadRequest(e.to_string()))?;
        form = url::form_urlencoded::parse(&body).into_owned().collect();
    }
    Ok((form, files))
}

async fn serve(monsti: Arc<Monsti>, req: Request) -> Result<Response, PipelineError> {
    let method = req.method().clone();
    if !matches!(method, Method::GET | Method::HEAD | Method::POST) {
        return Err(PipelineError::BadRequest("Request method not supported.".into()));
    }
    let path = parse_request_path(req.uri().path())
        .map_err(|e| PipelineError::BadRequest(e.to_string()))?;
    let host = request_host(&req).ok_or(PipelineError::NotFound)?;
    let Some(site) = monsti.site_for_host(&host).cloned() else {
        tracing::warn!(host, "no site serves this host");
        return Err(PipelineError::NotFound);
    };
    let settings = monsti.site_settings(&site.name)?;
    let tz = settings.site_context().timezone;
    let user = session_user(&monsti, &site.name, &settings, req.headers())?;
    let raw_query = req.uri().query().map(str::to_string);
    let query = parse_query(raw_query.as_deref());
    let (form, files) = if method == Method::POST {
        read_form(req).await?
    } else {
        Default::default()
    };

    let request = monsti.begin_request(RequestInfo {
        id: 0,
        site: site.name.clone(),
        node_path: path.node.clone(),
        action: path.action,
        method: method.to_string(),
        query: query.clone(),
        form: form.clone(),
        login: user.as_ref().map(|u| u.login.clone()),
        locale: settings.locale().to_string(),
    });
    tracing::info!(
        site = %site.name,
        %method,
        path = %path.node,
        action = path.action.name(),
        request = request.id(),
        "request"
    );

    let anonymous = user.is_none();
    if path.action == Action::View
        && path.trailing_slash
        && anonymous
        && query.is_empty()
        && form.is_empty()
    {
        if let Some(entry) = monsti.store().cache().from_cache(&site.name, &path.node, PAGE_FULL) {
            tracing::debug!(site = %site.name, path = %path.node, "serving cached page");
            return Ok(Html(String::from_utf8_lossy(&entry.data).into_owned()).into_response());
        }
    }

    let node = monsti
        .get_node(&site.name, &path.node)?
        .ok_or(PipelineError::NotFound)?;
    let now = Utc::now();
    if path.action == Action::View && anonymous && !node.is_published(now) {
        return Err(PipelineError::NotFound);
    }
    if node.type_id() == PATH_TYPE
        && matches!(
            path.action,
            Action::View | Action::Edit | Action::Add | Action::Remove
        )
    {
        return Ok(see_other(&action_url(&node.path, Action::List)));
    }
    if path.action.requires_auth() && anonymous {
        return Err(PipelineError::Unauthorized);
    }

    let ctx = RequestContext {
        monsti: monsti.clone(),
        site,
        settings,
        tz,
        method,
        path,
        raw_query,
        query,
        form,
        files,
        user,
        node,
        now,
        request,
    };
    dispatch(&ctx).await
}

async fn dispatch(ctx: &RequestContext) -> Result<Response, PipelineError> {
    match ctx.path.action {
        Action::View => view::view(ctx).await,
        Action::Edit => actions::edit(ctx).await,
        Action::Add => actions::add(ctx).await,
        Action::Remove => actions::remove(ctx).await,
        Action::List => actions::list(ctx).await,
        Action::Chooser => actions::chooser(ctx).await,
        Action::Settings => actions::settings(ctx).await,
        Action::Login => account::login(ctx).await,
        Action::Logout => account::logout(ctx),
        Action::RequestPasswordToken => account::request_password_token(ctx).await,
        Action::ChangePassword => account::change_password(ctx).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::backtrace::BacktraceStatus;

    #[test]
    fn action_urls() {
        assert_eq!(action_url("/", Action::List), "/@@list");
        assert_eq!(action_url("/a/b", Action::Edit), "/a/b/@@edit");
    }

    #[tokio::test]
    async fn panics_are_reported_with_their_stack() {
        let report = catch_panic(async { panic!("request exploded") })
            .await
            .expect_err("panic");
        assert_eq!(report.message, "request exploded");
        assert_eq!(report.backtrace.status(), BacktraceStatus::Captured);

        let fine = catch_panic(async { 7 }).await.expect("no panic");
        assert_eq!(fine, 7);
    }

    #[test]
    fn queries_decode() {
        let query = parse_query(Some("size=thumb&raw=1&q=a%20b"));
        assert_eq!(query["size"], "thumb");
        assert_eq!(query["q"], "a b");
        assert!(parse_query(None).is_empty());
    }
}
