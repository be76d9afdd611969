//! Node views: composition of the node template, its embeds and module
//! contributions, and the master page around it.

use super::{
    PipelineError, blog, contact,
    pipeline::RequestContext,
    see_other,
};
use crate::{
    core_types::{BLOG, CONTACT_FORM, FILE, FILE_TYPE, IMAGE},
    nav::{self, NavLink},
    render::FALLBACK_VIEW,
    thumbnail::{self, ImageSize},
};
use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures::{FutureExt, future::BoxFuture};
use minijinja::Value as TemplateValue;
use monsti_types::{
    CacheDep, CacheMods, EmbedNode, Field, Node, field::FileField, nested, paths,
    signals::{
        NODE_CONTEXT, NodeContextArgs, NodeContextRet, RENDER_NODE, RenderNodeArgs, RenderNodeRet,
    },
    time,
};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

pub(crate) const PAGE_FULL: &str = "core.page.full";
pub(crate) const PAGE_PARTIAL: &str = "core.page.partial";

const MAX_EMBED_DEPTH: usize = 8;

pub(crate) type TemplateContext = BTreeMap<String, TemplateValue>;

/// Template representation of a node.
pub(crate) fn node_value(node: &Node, timezone: Tz, locale: &str) -> Value {
    let mut fields: Map<String, Value> = Map::new();
    for config in node.field_configs() {
        let Some(value) = node.field(&config.id) else {
            continue;
        };
        let (namespace, name) = nested::split_field_id(&config.id);
        if let Value::Object(ns) = fields
            .entry(namespace.to_string())
            .or_insert_with(|| json!({}))
        {
            ns.insert(name.to_string(), Value::String(value.render_html()));
        }
    }
    json!({
        "Path": node.path,
        "Name": node.name(),
        "Type": node.type_id(),
        "TypeName": node.node_type.local_name(locale),
        "Title": node.title().unwrap_or("Untitled"),
        "Order": node.order,
        "Hide": node.hide,
        "Public": node.public,
        "PublishTime": node.publish_time.with_timezone(&timezone).format("%Y-%m-%d %H:%M").to_string(),
        "Changed": time::format(&node.changed),
        "Id": node.path_to_id(),
        "TypeId": node.type_to_id(),
        "Fields": fields,
    })
}

/// URL of a node's view, always ending with a slash.
pub(crate) fn node_url(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    }
}

/// Path of an embedded node: absolute URIs are used as they are, relative
/// ones are resolved against the requested node.
pub(crate) fn embed_path(node_path: &str, uri: &str) -> String {
    let path = uri.split(['?', '#']).next().unwrap_or("");
    paths::join_path(node_path, path)
}

/// Query parameters of an embed URI.
pub(crate) fn embed_query(uri: &str) -> BTreeMap<String, String> {
    match uri.split_once('?') {
        Some((_, query)) => url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect(),
        None => BTreeMap::new(),
    }
}

fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub(crate) fn site_value(ctx: &RequestContext) -> Value {
    json!({
        "Title": ctx.settings.title(),
        "Name": ctx.site.name,
        "BaseURL": ctx.settings.text(monsti_types::settings::BASE_URL),
    })
}

fn settings_value(ctx: &RequestContext) -> Value {
    let mut values = Map::new();
    for config in ctx.settings.configs.iter().filter(|c| !c.hidden) {
        if let Some(value) = ctx.settings.fields.get(&config.id) {
            values.insert(config.id.clone(), Value::String(value.render_html()));
        }
    }
    Value::Object(values)
}

/// Output of rendering one node.
#[derive(Debug, Default)]
pub(crate) struct Rendered {
    pub html: String,
    pub mods: CacheMods,
    pub redirect: Option<String>,
}

/// Render the requested node, or the node `embed` points to, with its own
/// embeds and everything subscribed modules contribute.
pub(crate) fn render_node<'a>(
    ctx: &'a RequestContext,
    embed: Option<EmbedNode>,
    depth: usize,
) -> BoxFuture<'a, Result<Rendered, PipelineError>> {
    async move {
        if depth > MAX_EMBED_DEPTH {
            return Err(PipelineError::Internal(format!(
                "embeds of {} nested too deep",
                ctx.node.path
            )));
        }
        let site = ctx.site.name.as_str();
        let mut mods = CacheMods::with_dep(CacheDep::node(ctx.node.path.clone()));
        let embedded;
        let node = match &embed {
            None => &ctx.node,
            Some(embed) => {
                let path = embed_path(&ctx.node.path, &embed.uri);
                embedded = ctx.monsti.get_node(site, &path)?.ok_or_else(|| {
                    PipelineError::Internal(format!("could not find node {path} to embed"))
                })?;
                mods.add_dep(CacheDep::node(embedded.path.clone()));
                &embedded
            }
        };

        let mut context = TemplateContext::new();
        let mut embeds = BTreeMap::new();
        for child in node.node_type.embed.iter().chain(node.embed.iter()) {
            let rendered = render_node(ctx, Some(child.clone()), depth + 1).await?;
            mods.join(&rendered.mods);
            embeds.insert(child.id.clone(), TemplateValue::from_safe_string(rendered.html));
        }
        context.insert("Embed".into(), TemplateValue::from_serialize(&embeds));
        context.insert(
            "Node".into(),
            TemplateValue::from_serialize(node_value(node, ctx.tz, ctx.locale())),
        );
        context.insert("Embedded".into(), TemplateValue::from(embed.is_some()));

        let mut redirect = None;
        match node.type_id() {
            CONTACT_FORM if embed.is_none() => {
                redirect = contact::contribute(ctx, node, &mut context).await?;
            }
            BLOG => {
                let query = match &embed {
                    Some(embed) => embed_query(&embed.uri),
                    None => ctx.query.clone(),
                };
                mods.join(&blog::contribute(ctx, node, &query, &mut context)?);
            }
            _ => {}
        }
        if redirect.is_some() {
            return Ok(Rendered {
                redirect,
                ..Default::default()
            });
        }

        let args = NodeContextArgs {
            request: ctx.request_id(),
            node_type: node.type_id().to_string(),
            embed: embed.clone(),
        };
        for result in ctx.monsti.emit::<_, NodeContextRet>(NODE_CONTEXT, &args).await? {
            let ret = result.map_err(|e| {
                PipelineError::Internal(format!("{NODE_CONTEXT} handler failed: {e}"))
            })?;
            if let Some(extra) = &ret.mods {
                mods.join(extra);
            }
            for (key, html) in ret.context {
                context.insert(key, TemplateValue::from_safe_string(html));
            }
        }

        let args = RenderNodeArgs {
            request: ctx.request_id(),
            node_type: node.type_id().to_string(),
            embed,
        };
        for result in ctx.monsti.emit::<_, RenderNodeRet>(RENDER_NODE, &args).await? {
            let ret = result.map_err(|e| {
                PipelineError::Internal(format!("{RENDER_NODE} handler failed: {e}"))
            })?;
            if let Some(extra) = &ret.mods {
                mods.join(extra);
            }
            if ret.redirect.is_some() {
                redirect = ret.redirect;
            }
            if !ret.context.is_empty() {
                let values: Map<String, Value> =
                    serde_json::from_slice(&ret.context).map_err(PipelineError::internal)?;
                for (key, value) in values {
                    context.insert(key, TemplateValue::from_serialize(&value));
                }
            }
        }
        if redirect.is_some() {
            return Ok(Rendered {
                redirect,
                ..Default::default()
            });
        }

        context.insert("Site".into(), TemplateValue::from_serialize(site_value(ctx)));
        context.insert("SiteSettings".into(), TemplateValue::from_serialize(settings_value(ctx)));

        let renderer = ctx.monsti.renderer();
        let template = match ctx.site.template_overwrites.get(node.type_id()) {
            Some(name) => name.clone(),
            None => node.node_type.template_name(),
        };
        let template = if renderer.has_template(site, &template) {
            template
        } else {
            FALLBACK_VIEW.to_string()
        };
        let html = renderer.render(site, &template, &context)?;
        Ok(Rendered {
            html,
            mods,
            redirect: None,
        })
    }
    .boxed()
}

/// How the master page presents its content.
#[derive(Debug, Default)]
pub(crate) struct Page {
    pub title: Option<String>,
    pub content: String,
    pub edit_view: bool,
    pub slim_view: bool,
}

fn first_dir(path: &str) -> String {
    match paths::segments(path).first() {
        Some(first) => format!("/{first}"),
        None => "/".to_string(),
    }
}

/// Wrap `page` into the master template. The result depends on the whole
/// node tree.
pub(crate) async fn render_in_master(
    ctx: &RequestContext,
    page: Page,
) -> Result<(String, CacheMods), PipelineError> {
    let site = ctx.site.name.as_str();
    let node = &ctx.node;
    let public = ctx.user.is_none();
    let source = ctx.monsti.nav_source(site, ctx.now);

    let mut primary = nav::get_nav(&source, "/", &first_dir(&node.path), public, 1)?;
    nav::make_absolute(&mut primary, "/");
    let mut secondary: Vec<NavLink> = Vec::new();
    if node.path != "/" {
        secondary = nav::get_nav(&source, &node.path, &node.path, public, 1)?;
        nav::make_absolute(&mut secondary, &node.path);
    }

    let mut mods = CacheMods::with_dep(CacheDep::node("/").descend(-1));
    let mut regions = BTreeMap::new();
    for (region, refs) in ctx.settings.region_blocks() {
        let mut html = String::new();
        for target in refs {
            let block = EmbedNode {
                id: region.clone(),
                uri: target.clone(),
            };
            match render_node(ctx, Some(block), 1).await {
                Ok(rendered) => {
                    mods.join(&rendered.mods);
                    html.push_str(&rendered.html);
                }
                Err(err) => tracing::warn!(site, region = %region, block = %target, %err, "could not render block"),
            }
        }
        regions.insert(region, TemplateValue::from_safe_string(html));
    }

    let title = page
        .title
        .unwrap_or_else(|| node.title().unwrap_or_default().to_string());
    let session = ctx.user.as_ref().map(|user| {
        json!({
            "Login": user.login,
            "Name": user.name,
        })
    });
    let mut page_context = TemplateContext::new();
    let mut put = |key: &str, value: TemplateValue| {
        page_context.insert(key.to_string(), value);
    };
    put("Node", TemplateValue::from_serialize(node_value(node, ctx.tz, ctx.locale())));
    put("ShowSecondaryNav", TemplateValue::from(!secondary.is_empty()));
    put("PrimaryNav", TemplateValue::from_serialize(&primary));
    put("SecondaryNav", TemplateValue::from_serialize(&secondary));
    put("EditView", TemplateValue::from(page.edit_view));
    put("SlimView", TemplateValue::from(page.slim_view));
    put("Title", TemplateValue::from(title));
    put("NodeURL", TemplateValue::from(node_url(&node.path)));
    put("Content", TemplateValue::from_safe_string(page.content));
    put("Regions", TemplateValue::from_serialize(&regions));

    let mut context = TemplateContext::new();
    context.insert("Site".into(), TemplateValue::from_serialize(site_value(ctx)));
    context.insert("Page".into(), TemplateValue::from_serialize(&page_context));
    context.insert("Session".into(), TemplateValue::from_serialize(session));
    context.insert("Locale".into(), TemplateValue::from(ctx.locale()));
    let html = ctx.monsti.renderer().render(site, "master", &context)?;
    Ok((html, mods))
}

/// Render `content` inside the master page and answer with it.
pub(crate) async fn master_response(
    ctx: &RequestContext,
    page: Page,
    status: StatusCode,
) -> Result<Response, PipelineError> {
    let (html, _) = render_in_master(ctx, page).await?;
    Ok((status, Html(html)).into_response())
}

/// The `view` action.
pub(crate) async fn view(ctx: &RequestContext) -> Result<Response, PipelineError> {
    // explicit size or raw requests get the image itself, slash or not
    let image_query = ctx.query.contains_key("size") || ctx.query.contains_key("raw");
    if ctx.node.type_id() == IMAGE && image_query {
        return view_image(ctx);
    }
    if !ctx.path.trailing_slash {
        return match ctx.node.type_id() {
            IMAGE => view_image(ctx),
            FILE_TYPE => view_file(ctx),
            _ => {
                let mut target = node_url(&ctx.node.path);
                if let Some(query) = &ctx.raw_query {
                    target.push('?');
                    target.push_str(query);
                }
                Ok(see_other(&target))
            }
        };
    }

    let site = ctx.site.name.as_str();
    let path = ctx.node.path.as_str();
    let cache = ctx.monsti.store().cache();
    let cacheable = ctx.cacheable();
    let cached = if cacheable {
        cache.from_cache(site, path, PAGE_PARTIAL)
    } else {
        None
    };
    let (content, mut mods) = match cached {
        Some(entry) => (String::from_utf8_lossy(&entry.data).into_owned(), entry.mods),
        None => {
            let rendered = render_node(ctx, None, 0).await?;
            if let Some(location) = rendered.redirect {
                return Ok(see_other(&location));
            }
            let mut mods = rendered.mods;
            if cacheable {
                if let Err(err) = cache.to_cache(site, path, PAGE_PARTIAL, rendered.html.as_bytes(), &mut mods) {
                    tracing::warn!(site, path, %err, "could not cache page");
                }
            }
            (rendered.html, mods)
        }
    };

    let page = Page {
        content,
        ..Default::default()
    };
    let (html, master_mods) = render_in_master(ctx, page).await?;
    mods.join(&master_mods);
    if cacheable {
        if let Err(err) = cache.to_cache(site, path, PAGE_FULL, html.as_bytes(), &mut mods) {
            tracing::warn!(site, path, %err, "could not cache page");
        }
    }
    Ok(Html(html).into_response())
}

fn blob_response(body: Vec<u8>, content_type: &str, changed: DateTime<Utc>) -> Response {
    let mut response = body.into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&http_date(changed)) {
        headers.insert(header::LAST_MODIFIED, value);
    }
    response
}

fn image_type(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .map(|format| format.to_mime_type())
        .unwrap_or("application/octet-stream")
}

fn stored_file(ctx: &RequestContext) -> Result<Vec<u8>, PipelineError> {
    ctx.monsti
        .store()
        .get_node_data(&ctx.site.name, &ctx.node.path, &FileField::blob_name(FILE))?
        .ok_or(PipelineError::NotFound)
}

/// An image node's file, or a thumbnail of it for `?size=<name>`.
fn view_image(ctx: &RequestContext) -> Result<Response, PipelineError> {
    let site = ctx.site.name.as_str();
    let path = ctx.node.path.as_str();
    let requested = ctx
        .query
        .get("size")
        .filter(|_| !ctx.query.contains_key("raw"));
    if let Some(name) = requested {
        match ImageSize::named(name, &ctx.settings) {
            Some(size) => {
                let cache = ctx.monsti.store().cache();
                let id = size.cache_id();
                if let Some(entry) = cache.from_cache(site, path, &id) {
                    let kind = image_type(&entry.data);
                    return Ok(blob_response(entry.data, kind, ctx.node.changed));
                }
                let original = stored_file(ctx)?;
                let resized = thumbnail::thumbnail(&original, size)?;
                let mut mods = CacheMods::with_dep(CacheDep::node(path));
                if let Err(err) = cache.to_cache(site, path, &id, &resized, &mut mods) {
                    tracing::warn!(site, path, %err, "could not cache thumbnail");
                }
                let kind = image_type(&resized);
                return Ok(blob_response(resized, kind, ctx.node.changed));
            }
            None => tracing::debug!(site, size = %name, "unknown image size, serving original"),
        }
    }
    let original = stored_file(ctx)?;
    let kind = image_type(&original);
    Ok(blob_response(original, kind, ctx.node.changed))
}

fn view_file(ctx: &RequestContext) -> Result<Response, PipelineError> {
    let content = stored_file(ctx)?;
    let kind = mime_guess::from_path(ctx.node.name()).first_or_octet_stream();
    Ok(blob_response(content, kind.essence_str(), ctx.node.changed))
}
