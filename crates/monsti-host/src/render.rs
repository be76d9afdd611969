//! Template rendering.
//!
//! Templates are looked up by name (`master`, `core/Document-view`,
//! `actions/edit`, ...) as `<name>.html`, first in the site's template
//! directory, then in the shared one, and finally among the templates
//! compiled into the daemon.

use crate::error::{HostError, HostResult};
use minijinja::{AutoEscape, Environment, ErrorKind};
use parking_lot::Mutex;
use serde::Serialize;
use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

/// Template used for node types without a view template of their own.
pub const FALLBACK_VIEW: &str = "core/Node-view";

static BUILTIN: &[(&str, &str)] = &[
    ("master", include_str!("../templates/master.html")),
    ("core/Node-view", include_str!("../templates/core/Node-view.html")),
    ("core/Document-view", include_str!("../templates/core/Document-view.html")),
    ("core/File-view", include_str!("../templates/core/File-view.html")),
    ("core/Image-view", include_str!("../templates/core/Image-view.html")),
    ("core/ContactForm-view", include_str!("../templates/core/ContactForm-view.html")),
    ("core/Blog-view", include_str!("../templates/core/Blog-view.html")),
    ("core/BlogPost-view", include_str!("../templates/core/BlogPost-view.html")),
    ("actions/edit", include_str!("../templates/actions/edit.html")),
    ("actions/addform", include_str!("../templates/actions/addform.html")),
    ("actions/removeform", include_str!("../templates/actions/removeform.html")),
    ("actions/list", include_str!("../templates/actions/list.html")),
    ("actions/chooser", include_str!("../templates/actions/chooser.html")),
    ("actions/settings", include_str!("../templates/actions/settings.html")),
    ("actions/login", include_str!("../templates/actions/login.html")),
    (
        "actions/request-password-token",
        include_str!("../templates/actions/request-password-token.html"),
    ),
    ("actions/change-password", include_str!("../templates/actions/change-password.html")),
];

fn builtin(name: &str) -> Option<&'static str> {
    BUILTIN.iter().find(|(n, _)| *n == name).map(|(_, src)| *src)
}

fn read_template(dir: &Path, name: &str) -> Result<Option<String>, minijinja::Error> {
    let path = dir.join(format!("{name}.html"));
    match std::fs::read_to_string(&path) {
        Ok(source) => Ok(Some(source)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(minijinja::Error::new(
            ErrorKind::InvalidOperation,
            format!("could not read template {}", path.display()),
        )
        .with_source(err)),
    }
}

/// Per-site template environments.
pub struct Renderer {
    shared_dir: PathBuf,
    data_dir: PathBuf,
    sites: Mutex<HashMap<String, Arc<Environment<'static>>>>,
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("shared_dir", &self.shared_dir)
            .finish()
    }
}

impl Renderer {
    /// `shared_dir` holds global templates; site templates live in
    /// `<data_dir>/<site>/templates`.
    pub fn new(shared_dir: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        Renderer {
            shared_dir: shared_dir.into(),
            data_dir: data_dir.into(),
            sites: Mutex::new(HashMap::new()),
        }
    }

    fn environment(&self, site: &str) -> Arc<Environment<'static>> {
        let mut sites = self.sites.lock();
        if let Some(env) = sites.get(site) {
            return env.clone();
        }
        let site_dir = self.data_dir.join(site).join("templates");
        let shared_dir = self.shared_dir.clone();
        let mut env = Environment::new();
        env.set_auto_escape_callback(|_| AutoEscape::Html);
        env.set_loader(move |name| {
            if name.split('/').any(|segment| segment == ".." || segment.is_empty()) {
                return Ok(None);
            }
            if let Some(source) = read_template(&site_dir, name)? {
                return Ok(Some(source));
            }
            if let Some(source) = read_template(&shared_dir, name)? {
                return Ok(Some(source));
            }
            Ok(builtin(name).map(str::to_string))
        });
        let env = Arc::new(env);
        sites.insert(site.to_string(), env.clone());
        env
    }

    pub fn has_template(&self, site: &str, name: &str) -> bool {
        self.environment(site).get_template(name).is_ok()
    }

    pub fn render<C: Serialize>(&self, site: &str, name: &str, context: &C) -> HostResult<String> {
        let env = self.environment(site);
        let template = env
            .get_template(name)
            .map_err(|e| HostError::Render(format!("{name}: {e}")))?;
        template
            .render(context)
            .map_err(|e| HostError::Render(format!("{name}: {e:#}")))
    }
}
