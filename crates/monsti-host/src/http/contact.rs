use super::{
    PipelineError,
    pipeline::RequestContext,
    view::{TemplateContext, node_url},
};
use crate::mail;
use minijinja::Value as TemplateValue;
use monsti_types::{Action, Form, FormData, Node, Widget, settings};

fn contact_form() -> Form {
    let mut form = Form::new();
    form.add("Name", "Name", Widget::Text).required = true;
    form.add("Email", "Email", Widget::Text).required = true;
    form.add("Subject", "Subject", Widget::Text).required = true;
    form.add("Message", "Message", Widget::TextArea).required = true;
    form
}

/// Add the contact form to a contact form node's context. A valid
/// submission is mailed to the site owner; the returned redirect then
/// points back to the node.
pub(crate) async fn contribute(
    ctx: &RequestContext,
    node: &Node,
    context: &mut TemplateContext,
) -> Result<Option<String>, PipelineError> {
    let mut form = contact_form();
    let mut data = FormData::new();
    if ctx.is_post() && ctx.path.action == Action::View {
        if form.fill(&ctx.form) {
            let email = ctx.form.get("Email").map(|v| v.trim()).unwrap_or_default();
            if mail::is_address(email) {
                send(ctx, node, &ctx.form).await?;
                return Ok(Some(format!("{}?submitted=1", node_url(&node.path))));
            }
            form.add_error("Email", "Invalid email address.");
        }
        for field in &form.fields {
            if let Some(value) = ctx.form.get(&field.key) {
                data.insert(field.key.clone(), value.clone());
            }
        }
    }
    let html = form.render_html(&node_url(&node.path), &data, "Send");
    context.insert("ContactForm".into(), TemplateValue::from_safe_string(html));
    context.insert(
        "Submitted".into(),
        TemplateValue::from(ctx.query.contains_key("submitted")),
    );
    Ok(None)
}

async fn send(ctx: &RequestContext, node: &Node, data: &FormData) -> Result<(), PipelineError> {
    let value = |key: &str| data.get(key).map(|v| v.trim()).unwrap_or_default();
    let owner = ctx.settings.text(settings::OWNER_EMAIL);
    if owner.is_empty() {
        return Err(PipelineError::Internal(format!(
            "site {} has no owner email for contact form {}",
            ctx.site_name(),
            node.path
        )));
    }
    let from = ctx.settings.text(settings::EMAIL_ADDRESS);
    let body = format!(
        "Message sent via {}{}\n\nFrom: {} <{}>\n\n{}\n",
        ctx.settings.text(settings::BASE_URL).trim_end_matches('/'),
        node_url(&node.path),
        value("Name"),
        value("Email"),
        value("Message"),
    );
    let message = mail::compose(
        ctx.settings.text(settings::EMAIL_NAME),
        from,
        owner,
        &format!("{}: {}", ctx.settings.title(), value("Subject")),
        &body,
    );
    ctx.monsti
        .mailer()
        .send(from, &[owner.to_string()], &message)
        .await?;
    tracing::info!(site = ctx.site_name(), node = %node.path, "contact form submitted");
    Ok(())
}
