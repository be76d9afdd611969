#![allow(dead_code)]

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{HeaderMap, Request, StatusCode, header},
};
use chrono::Duration;
use monsti_host::{
    HostConfig, Monsti, MonstiSettings,
    auth::{BcryptHasher, CookieSession, PasswordHasher},
    config::{Directories, MailSettings},
    mail::LogMailer,
};
use monsti_types::{Node, User, time};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

pub const SITE: &str = "example";
pub const HOST: &str = "example.com";
pub const SESSION_KEY: &str = "session-secret";
pub const TOKEN_KEY: &str = "token-secret";

pub struct TestSite {
    pub dir: TempDir,
    pub monsti: Arc<Monsti>,
    pub mailer: Arc<LogMailer>,
}

/// One site, `example`, served as `example.com`, with a public root
/// document.
pub fn site() -> TestSite {
    let dir = TempDir::new().expect("tmp");
    let site_dir = dir.path().join("config/sites").join(SITE);
    std::fs::create_dir_all(&site_dir).expect("mkdir");
    std::fs::write(
        site_dir.join("site.yaml"),
        format!(
            "title: Example Site\nhosts: [{HOST}]\nbase_url: http://{HOST}\n\
             email_address: site@example.com\nowner:\n  name: Owner\n  email: owner@example.com\n\
             session_auth_key: {SESSION_KEY}\npassword_token_key: {TOKEN_KEY}\n"
        ),
    )
    .expect("write site.yaml");
    let settings = MonstiSettings {
        directories: Directories {
            data: dir.path().join("data"),
            share: dir.path().join("share"),
            locale: dir.path().join("locale"),
            run: dir.path().join("run"),
        },
        listen: "127.0.0.1:0".into(),
        modules: Vec::new(),
        mail: MailSettings {
            debug: true,
            ..Default::default()
        },
        module_path: None,
        config_dir: dir.path().join("config"),
    };
    let config = HostConfig {
        bcrypt_cost: 4,
        socket_path: dir.path().join("run/monsti.socket"),
        ..HostConfig::default()
    };
    let mailer = Arc::new(LogMailer::default());
    let monsti = Monsti::with_mailer(settings, config, mailer.clone()).expect("monsti");
    let site = TestSite {
        dir,
        monsti: Arc::new(monsti),
        mailer,
    };
    site.node("/", monsti_host::core_types::DOCUMENT, "Home");
    site
}

impl TestSite {
    pub fn app(&self) -> Router {
        monsti_host::router(self.monsti.clone())
    }

    /// Write a public node of `node_type` published an hour ago.
    pub fn node(&self, path: &str, node_type: &str, title: &str) -> Node {
        let node_type = self.monsti.node_type(node_type).expect("node type");
        let mut node = self.monsti.new_node(SITE, node_type, path).expect("node");
        node.public = true;
        node.publish_time = time::now_secs() - Duration::hours(1);
        node.field_mut("core.Title").expect("title").set_str(title);
        self.monsti.write_node(SITE, &mut node).expect("write node");
        node
    }

    pub fn user(&self, login: &str, password: &str) -> User {
        let user = User {
            login: login.to_string(),
            name: format!("User {login}"),
            email: format!("{login}@example.com"),
            password: BcryptHasher { cost: 4 }.hash(password).expect("hash"),
            password_changed: time::epoch(),
        };
        self.monsti.store().write_user(SITE, &user).expect("write user");
        user
    }

    /// `Cookie` header value of a session for `login`.
    pub fn session(&self, login: &str) -> String {
        let session = CookieSession {
            login: Some(login.to_string()),
        };
        format!(
            "{}={}",
            monsti_host::auth::SESSION_COOKIE,
            session.encode(SESSION_KEY).expect("encode")
        )
    }
}

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn location(&self) -> &str {
        self.headers
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    }
}

async fn send(app: Router, request: Request<Body>) -> Reply {
    let response = app.oneshot(request).await.expect("response");
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body")
        .to_vec();
    Reply {
        status,
        headers,
        body,
    }
}

pub async fn get(app: Router, uri: &str, cookie: Option<&str>) -> Reply {
    let mut request = Request::get(uri).header(header::HOST, HOST);
    if let Some(cookie) = cookie {
        request = request.header(header::COOKIE, cookie);
    }
    send(app, request.body(Body::empty()).expect("request")).await
}

pub async fn post(app: Router, uri: &str, cookie: Option<&str>, form: &[(&str, &str)]) -> Reply {
    let body: String = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(form)
        .finish();
    let mut request = Request::post(uri)
        .header(header::HOST, HOST)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(cookie) = cookie {
        request = request.header(header::COOKIE, cookie);
    }
    send(app, request.body(Body::from(body)).expect("request")).await
}
