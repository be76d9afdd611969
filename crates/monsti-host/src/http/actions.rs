//! Authoring actions: edit, add, remove, list, chooser and site settings.

use super::{
    PipelineError,
    pipeline::{RequestContext, action_url},
    see_other,
    view::{self, Page, node_url},
};
use crate::{core_types::IMAGE, thumbnail};
use axum::{http::StatusCode, response::Response};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use minijinja::Value as TemplateValue;
use monsti_types::{
    Action, CacheDep, Field, FieldValue, Form, FormData, Node, Widget, field::FileField,
    form::is_checked, is_valid_node_name, node::PATH_TYPE, paths,
};
use serde_json::{Value, json};
use std::collections::BTreeMap;

const FORM_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M";

fn checkbox_value(checked: bool) -> String {
    if checked { "on" } else { "" }.to_string()
}

fn parse_form_time(raw: &str, tz: Tz) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), FORM_TIME_FORMAT).ok()?;
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|at| at.with_timezone(&Utc))
}

/// How much of the master page surrounds an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Chrome {
    Plain,
    Edit,
    Slim,
}

/// Render an action template into the master page.
pub(crate) async fn action_page(
    ctx: &RequestContext,
    template: &str,
    title: String,
    mut context: BTreeMap<String, TemplateValue>,
    chrome: Chrome,
    status: StatusCode,
) -> Result<Response, PipelineError> {
    context.insert("Title".into(), TemplateValue::from(title.clone()));
    context.insert(
        "Node".into(),
        TemplateValue::from_serialize(view::node_value(&ctx.node, ctx.tz, ctx.locale())),
    );
    let content = ctx
        .monsti
        .renderer()
        .render(ctx.site_name(), template, &context)?;
    let page = Page {
        title: Some(title),
        content,
        edit_view: chrome != Chrome::Plain,
        slim_view: chrome == Chrome::Slim,
    };
    view::master_response(ctx, page, status).await
}

pub(crate) fn form_value(form: &Form, action: &str, data: &FormData, submit: &str) -> TemplateValue {
    TemplateValue::from_safe_string(form.render_html(action, data, submit))
}

enum EditOutcome {
    Saved(String),
    Invalid(StatusCode),
}

/// Edit the current node, or create a new child of it when a `NodeType`
/// is given.
pub(crate) async fn edit(ctx: &RequestContext) -> Result<Response, PipelineError> {
    let site = ctx.site_name();
    let locale = ctx.locale();
    let new_type = ctx
        .form
        .get("NodeType")
        .or_else(|| ctx.query.get("NodeType"))
        .filter(|id| !id.is_empty())
        .cloned();

    let mut node = match &new_type {
        Some(type_id) => {
            let node_type = ctx
                .monsti
                .node_type(type_id)
                .ok_or_else(|| PipelineError::BadRequest(format!("Unknown node type {type_id}.")))?;
            if !node_type.addable_to_type(ctx.node.type_id()) {
                return Err(PipelineError::BadRequest(format!(
                    "Nodes of type {type_id} can't be added here."
                )));
            }
            let mut node = ctx.monsti.new_node(site, node_type, &ctx.node.path)?;
            node.public = true;
            node.publish_time = ctx.now;
            node
        }
        None => ctx.node.clone(),
    };
    let is_new = new_type.is_some();
    let current_name = if is_new { "" } else { node.name() }.to_string();
    let with_name = is_new || !current_name.is_empty();

    let mut form = Form::new();
    let mut data = FormData::new();
    if let Some(type_id) = &new_type {
        form.add("NodeType", "", Widget::Hidden);
        data.insert("NodeType".into(), type_id.clone());
    }
    if !node.node_type.hide {
        form.add("Node.Hide", "Hide in navigation", Widget::Checkbox);
        data.insert("Node.Hide".into(), checkbox_value(node.hide));
    }
    form.add("Node.Public", "Public", Widget::Checkbox);
    data.insert("Node.Public".into(), checkbox_value(node.public));
    form.add("Node.PublishTime", "Publish time", Widget::DateTime);
    data.insert(
        "Node.PublishTime".into(),
        node.publish_time.with_timezone(&ctx.tz).format(FORM_TIME_FORMAT).to_string(),
    );
    if with_name {
        form.add("Name", "Name", Widget::Text).required = true;
        data.insert("Name".into(), current_name.clone());
    }
    let configs: Vec<_> = node.field_configs().cloned().collect();
    for config in &configs {
        if let Some(field) = node.field(&config.id) {
            field.to_form(&mut form, &mut data, config, locale);
        }
    }

    let mut status = StatusCode::OK;
    if ctx.is_post() {
        let submitted = &ctx.form;
        let outcome = if form.fill(submitted) {
            apply_edit(ctx, &mut node, &mut form, &configs, is_new, with_name)?
        } else {
            EditOutcome::Invalid(StatusCode::UNPROCESSABLE_ENTITY)
        };
        match outcome {
            EditOutcome::Saved(target) => return Ok(see_other(&node_url(&target))),
            EditOutcome::Invalid(code) => status = code,
        }
        data.extend(submitted.iter().map(|(k, v)| (k.clone(), v.clone())));
        for key in ["Node.Hide", "Node.Public"] {
            if !submitted.contains_key(key) {
                data.insert(key.into(), String::new());
            }
        }
    }

    let title = if is_new {
        format!("Add {}", node.node_type.local_name(locale))
    } else {
        format!("Edit \"{}\"", ctx.node.title().unwrap_or(ctx.node.name()))
    };
    let mut context = BTreeMap::new();
    context.insert(
        "Form".into(),
        form_value(&form, &ctx.action_url(Action::Edit), &data, "Save"),
    );
    action_page(ctx, "actions/edit", title, context, Chrome::Edit, status).await
}

fn apply_edit(
    ctx: &RequestContext,
    node: &mut Node,
    form: &mut Form,
    configs: &[monsti_types::FieldConfig],
    is_new: bool,
    with_name: bool,
) -> Result<EditOutcome, PipelineError> {
    let site = ctx.site_name();
    let submitted = &ctx.form;
    let flag = |key: &str| submitted.get(key).is_some_and(|v| is_checked(v));

    if !node.node_type.hide {
        node.hide = flag("Node.Hide");
    }
    node.public = flag("Node.Public");
    if let Some(raw) = submitted.get("Node.PublishTime").filter(|v| !v.trim().is_empty()) {
        match parse_form_time(raw, ctx.tz) {
            Some(at) => node.publish_time = at,
            None => form.add_error("Node.PublishTime", "Invalid date and time."),
        }
    }
    for config in configs {
        if let Some(field) = node.field_mut(&config.id) {
            if let Err(err) = field.from_form(submitted, config) {
                form.add_error(config.form_key(), err.to_string());
            }
        }
    }
    let name = if with_name {
        submitted.get("Name").map(|n| n.trim()).unwrap_or_default().to_string()
    } else {
        node.name().to_string()
    };
    if with_name && !is_valid_node_name(&name) {
        form.add_error("Name", "Invalid name.");
    }
    if form.has_errors() {
        return Ok(EditOutcome::Invalid(StatusCode::UNPROCESSABLE_ENTITY));
    }

    let target = if with_name {
        let parent = if is_new {
            ctx.node.path.clone()
        } else {
            node.parent_path()
        };
        let prefixed = paths::join_path(&parent, &node.path_prefix(ctx.tz));
        paths::join_path(&prefixed, &name)
    } else {
        node.path.clone()
    };
    let moved = !is_new && target != node.path;
    if (is_new || moved) && ctx.store().node_exists(site, &target) {
        form.add_error("Name", "A node with this name already exists.");
        return Ok(EditOutcome::Invalid(StatusCode::CONFLICT));
    }

    let upload_key = |id: &str| format!("Fields.{id}");
    if node.type_id() == IMAGE {
        let file_key = upload_key(crate::core_types::FILE);
        if let Some(upload) = ctx.files.get(&file_key) {
            if !thumbnail::is_image(upload) {
                form.add_error(file_key, "The uploaded file is not an image.");
                return Ok(EditOutcome::Invalid(StatusCode::PRECONDITION_FAILED));
            }
        }
    }

    if moved {
        ctx.store().rename_node(site, &node.path, &target)?;
    }
    node.path = target;
    let mut uploads = Vec::new();
    for config in configs {
        let Some(upload) = ctx.files.get(&upload_key(&config.id)) else {
            continue;
        };
        if let Some(FieldValue::File(file)) = node.field_mut(&config.id) {
            file.blob_id = FileField::blob_name(&config.id);
            uploads.push((file.blob_id.clone(), upload));
        }
    }
    ctx.monsti.write_node(site, node)?;
    for (blob, content) in uploads {
        ctx.store().write_node_data(site, &node.path, &blob, content)?;
    }
    if let Err(err) = ctx.store().cache().mark_dep(site, &CacheDep::node(node.path.clone())) {
        tracing::warn!(site, path = %node.path, %err, "could not invalidate cache");
    }
    tracing::info!(site, path = %node.path, created = is_new, "node saved");
    Ok(EditOutcome::Saved(node.path.clone()))
}

/// Choose the type of a node to add below the current one.
pub(crate) async fn add(ctx: &RequestContext) -> Result<Response, PipelineError> {
    let locale = ctx.locale();
    let types: Vec<Value> = ctx
        .monsti
        .addable_node_types(ctx.node.type_id())
        .iter()
        .map(|t| json!({ "Id": t.id, "Name": t.local_name(locale) }))
        .collect();
    let mut context = BTreeMap::new();
    context.insert("NodeTypes".into(), TemplateValue::from_serialize(&types));
    context.insert("Action".into(), TemplateValue::from(ctx.action_url(Action::Edit)));
    action_page(ctx, "actions/addform", "Add content".into(), context, Chrome::Edit, StatusCode::OK).await
}

/// Remove the current node after confirmation.
pub(crate) async fn remove(ctx: &RequestContext) -> Result<Response, PipelineError> {
    if ctx.node.path == "/" {
        return Err(PipelineError::BadRequest("The root node can't be removed.".into()));
    }
    if ctx.is_post() && ctx.form.get("Confirm").map(String::as_str) == Some("ok") {
        let parent = paths::parent_path(&ctx.node.path);
        ctx.store().remove_node(ctx.site_name(), &ctx.node.path)?;
        tracing::info!(site = ctx.site_name(), path = %ctx.node.path, "node removed");
        return Ok(see_other(&node_url(&parent)));
    }
    let mut form = Form::new();
    form.add("Confirm", "", Widget::Hidden);
    let data = FormData::from([("Confirm".to_string(), "ok".to_string())]);
    let mut context = BTreeMap::new();
    context.insert(
        "Form".into(),
        form_value(&form, &ctx.action_url(Action::Remove), &data, "Remove"),
    );
    let title = format!("Remove \"{}\"", ctx.node.title().unwrap_or(ctx.node.name()));
    action_page(ctx, "actions/removeform", title, context, Chrome::Edit, StatusCode::OK).await
}

/// The children of the current node, with their order editable.
pub(crate) async fn list(ctx: &RequestContext) -> Result<Response, PipelineError> {
    let site = ctx.site_name();
    let mut children = ctx.monsti.get_children(site, &ctx.node.path)?;
    children.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.name().cmp(b.name())));

    if ctx.is_post() {
        for child in children.iter_mut().filter(|c| c.type_id() != PATH_TYPE) {
            let key = format!("order-{}", child.name());
            let Some(order) = ctx.form.get(&key).and_then(|v| v.trim().parse::<i32>().ok()) else {
                continue;
            };
            if order != child.order {
                child.order = order;
                ctx.monsti.write_node(site, child)?;
            }
        }
        return Ok(see_other(&ctx.action_url(Action::List)));
    }

    let locale = ctx.locale();
    let entries: Vec<Value> = children
        .iter()
        .map(|child| {
            json!({
                "Path": child.path,
                "Name": child.name(),
                "Title": child.title().unwrap_or(child.name()),
                "TypeName": child.node_type.local_name(locale),
                "Order": child.order,
            })
        })
        .collect();
    let mut context = BTreeMap::new();
    context.insert("Children".into(), TemplateValue::from_serialize(&entries));
    context.insert("Action".into(), TemplateValue::from(ctx.action_url(Action::List)));
    if ctx.node.path != "/" {
        context.insert(
            "Parent".into(),
            TemplateValue::from_serialize(json!({ "Path": paths::parent_path(&ctx.node.path) })),
        );
    }
    let title = format!("Contents of \"{}\"", ctx.node.title().unwrap_or(&ctx.node.path));
    action_page(ctx, "actions/list", title, context, Chrome::Edit, StatusCode::OK).await
}

/// Links to every ancestor of `path`, root first. Each target ends with a
/// slash.
pub(crate) fn splitted_path(path: &str) -> Vec<Value> {
    let mut elements = vec![json!({ "Name": "/", "Path": "/" })];
    let mut current = String::from("/");
    for segment in paths::segments(path) {
        current.push_str(segment);
        current.push('/');
        elements.push(json!({ "Name": segment, "Path": current }));
    }
    elements
}

/// Browse nodes to pick one, optionally only images.
pub(crate) async fn chooser(ctx: &RequestContext) -> Result<Response, PipelineError> {
    let site = ctx.site_name();
    let only_images = ctx.query.get("type").map(String::as_str) == Some("image");
    let mut children = ctx.monsti.get_children(site, &ctx.node.path)?;
    children.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.name().cmp(b.name())));

    let entry = |node: &Node| {
        json!({
            "Path": node.path,
            "Name": node.name(),
            "Title": node.title().unwrap_or(node.name()),
        })
    };
    let images: Vec<Value> = children
        .iter()
        .filter(|c| c.type_id() == IMAGE)
        .map(entry)
        .collect();
    let entries: Vec<Value> = children.iter().map(entry).collect();

    let mut context = BTreeMap::new();
    context.insert(
        "SplittedPath".into(),
        TemplateValue::from_serialize(splitted_path(&ctx.node.path)),
    );
    context.insert("Children".into(), TemplateValue::from_serialize(&entries));
    context.insert("Images".into(), TemplateValue::from_serialize(&images));
    if only_images {
        context.insert("Type".into(), TemplateValue::from("image"));
    }
    action_page(ctx, "actions/chooser", "Choose".into(), context, Chrome::Slim, StatusCode::OK).await
}

/// Edit the site settings.
pub(crate) async fn settings(ctx: &RequestContext) -> Result<Response, PipelineError> {
    let site = ctx.site_name();
    let locale = ctx.locale();
    let mut settings = ctx.settings.clone();
    let configs: Vec<_> = settings.configs.iter().filter(|c| !c.hidden).cloned().collect();

    let mut form = Form::new();
    let mut data = FormData::new();
    for config in &configs {
        if let Some(field) = settings.fields.get(&config.id) {
            field.to_form(&mut form, &mut data, config, locale);
        }
    }

    let mut saved = false;
    let mut status = StatusCode::OK;
    if ctx.is_post() {
        if form.fill(&ctx.form) {
            for config in &configs {
                if let Some(field) = settings.fields.get_mut(&config.id) {
                    if let Err(err) = field.from_form(&ctx.form, config) {
                        form.add_error(config.form_key(), err.to_string());
                    }
                }
            }
        }
        if form.has_errors() {
            status = StatusCode::UNPROCESSABLE_ENTITY;
            data.extend(ctx.form.iter().map(|(k, v)| (k.clone(), v.clone())));
        } else {
            ctx.monsti.write_site_settings(site, &settings)?;
            if let Err(err) = ctx.store().cache().mark_dep(site, &CacheDep::node("/")) {
                tracing::warn!(site, %err, "could not invalidate cache");
            }
            tracing::info!(site, "site settings saved");
            saved = true;
            data.clear();
            for config in &configs {
                if let Some(field) = settings.fields.get(&config.id) {
                    field.to_form(&mut Form::new(), &mut data, config, locale);
                }
            }
        }
    }

    let mut context = BTreeMap::new();
    context.insert(
        "Form".into(),
        form_value(&form, &action_url(&ctx.node.path, Action::Settings), &data, "Save"),
    );
    context.insert("Saved".into(), TemplateValue::from(saved));
    action_page(ctx, "actions/settings", "Settings".into(), context, Chrome::Edit, status).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chooser_path_elements() {
        let elements = splitted_path("/a/b");
        let paths: Vec<&str> = elements.iter().filter_map(|e| e["Path"].as_str()).collect();
        assert_eq!(paths, ["/", "/a/", "/a/b/"]);
        assert_eq!(splitted_path("/").len(), 1);
    }

    #[test]
    fn form_times_use_the_site_zone() {
        let at = parse_form_time("2024-07-01T12:30", chrono_tz::Europe::Berlin).expect("time");
        assert_eq!(at.to_rfc3339(), "2024-07-01T10:30:00+00:00");
        assert!(parse_form_time("yesterday", Tz::UTC).is_none());
    }
}
