//! Login, logout and password management.

use super::{
    PipelineError,
    actions::{Chrome, action_page, form_value},
    pipeline::RequestContext,
    see_other, see_other_with_cookie,
    view::node_url,
};
use crate::{
    auth::{CookieSession, SESSION_COOKIE, password_token, verify_password_token},
    mail,
};
use axum::{http::StatusCode, response::Response};
use minijinja::Value as TemplateValue;
use monsti_types::{Action, Form, FormData, User, Widget, settings, time};
use std::collections::BTreeMap;

fn field<'a>(data: &'a FormData, key: &str) -> &'a str {
    data.get(key).map(|v| v.trim()).unwrap_or_default()
}

async fn verify_password(ctx: &RequestContext, password: &str, hash: &str) -> bool {
    let hasher = ctx.monsti.hasher().clone();
    let (password, hash) = (password.to_string(), hash.to_string());
    tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
        .await
        .unwrap_or(false)
}

async fn hash_password(ctx: &RequestContext, password: &str) -> Result<String, PipelineError> {
    let hasher = ctx.monsti.hasher().clone();
    let password = password.to_string();
    tokio::task::spawn_blocking(move || hasher.hash(&password))
        .await
        .map_err(PipelineError::internal)?
        .map_err(PipelineError::from)
}

pub(crate) async fn login(ctx: &RequestContext) -> Result<Response, PipelineError> {
    let site = ctx.site_name();
    let mut form = Form::new();
    form.add("Login", "Login", Widget::Text).required = true;
    form.add("Password", "Password", Widget::Password).required = true;

    let mut data = FormData::new();
    let mut failed = false;
    if ctx.is_post() {
        if form.fill(&ctx.form) {
            let login = field(&ctx.form, "Login");
            let password = ctx.form.get("Password").map(String::as_str).unwrap_or_default();
            let user = ctx.store().get_user(site, login)?;
            match user {
                Some(user) if verify_password(ctx, password, &user.password).await => {
                    let session = CookieSession {
                        login: Some(user.login.clone()),
                    };
                    let cookie = session.set_cookie(ctx.settings.text(settings::SESSION_AUTH_KEY))?;
                    tracing::info!(site, login = %user.login, "user logged in");
                    return Ok(see_other_with_cookie(&node_url(&ctx.node.path), &cookie));
                }
                _ => {
                    tracing::info!(site, login, "failed login");
                    failed = true;
                }
            }
        }
        data.insert("Login".into(), field(&ctx.form, "Login").to_string());
    }

    let mut context = BTreeMap::new();
    context.insert(
        "Form".into(),
        form_value(&form, &ctx.action_url(Action::Login), &data, "Login"),
    );
    context.insert("Failed".into(), TemplateValue::from(failed));
    action_page(ctx, "actions/login", "Login".into(), context, Chrome::Plain, StatusCode::OK).await
}

pub(crate) fn logout(ctx: &RequestContext) -> Result<Response, PipelineError> {
    let cookie = format!("{SESSION_COOKIE}=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax");
    Ok(see_other_with_cookie(&node_url(&ctx.node.path), &cookie))
}

/// Mail a link to change the password to the user.
pub(crate) async fn request_password_token(ctx: &RequestContext) -> Result<Response, PipelineError> {
    let site = ctx.site_name();
    let mut form = Form::new();
    form.add("User", "Login", Widget::Text).required = true;
    let mut data = FormData::new();
    let mut status = StatusCode::OK;

    if ctx.is_post() {
        if form.fill(&ctx.form) {
            let login = field(&ctx.form, "User");
            match ctx.store().get_user(site, login)? {
                Some(user) => {
                    send_password_link(ctx, &user).await?;
                    let target = format!("{}?sent", ctx.action_url(Action::RequestPasswordToken));
                    return Ok(see_other(&target));
                }
                None => form.add_error("User", "Unknown user."),
            }
        }
        status = StatusCode::UNPROCESSABLE_ENTITY;
        data.insert("User".into(), field(&ctx.form, "User").to_string());
    }

    let mut context = BTreeMap::new();
    context.insert(
        "Form".into(),
        form_value(&form, &ctx.action_url(Action::RequestPasswordToken), &data, "Send"),
    );
    context.insert("Sent".into(), TemplateValue::from(ctx.query.contains_key("sent")));
    let title = "Request password change".to_string();
    action_page(ctx, "actions/request-password-token", title, context, Chrome::Plain, status).await
}

async fn send_password_link(ctx: &RequestContext, user: &User) -> Result<(), PipelineError> {
    let site = ctx.site_name();
    let token = password_token(
        site,
        &user.login,
        ctx.now.timestamp(),
        ctx.settings.text(settings::PASSWORD_TOKEN_KEY),
    )?;
    let token: String = url::form_urlencoded::byte_serialize(token.as_bytes()).collect();
    let base_url = ctx.settings.text(settings::BASE_URL).trim_end_matches('/');
    let link = format!("{base_url}/@@change-password?token={token}");
    let body = format!(
        "Hello {},\n\nto change your password on {}, please visit\n\n{link}\n",
        user.name,
        ctx.settings.title(),
    );
    let from = ctx.settings.text(settings::EMAIL_ADDRESS);
    let message = mail::compose(
        ctx.settings.text(settings::EMAIL_NAME),
        from,
        &user.email,
        &format!("{}: Change your password", ctx.settings.title()),
        &body,
    );
    ctx.monsti
        .mailer()
        .send(from, std::slice::from_ref(&user.email), &message)
        .await?;
    tracing::info!(site, login = %user.login, "password change link sent");
    Ok(())
}

/// Change the password of the logged in user, or of the user a reset token
/// was issued for.
pub(crate) async fn change_password(ctx: &RequestContext) -> Result<Response, PipelineError> {
    let site = ctx.site_name();
    let token = ctx
        .query
        .get("token")
        .or_else(|| ctx.form.get("token"))
        .filter(|t| !t.is_empty())
        .cloned();
    let user = match &token {
        Some(token) => verify_password_token(
            token,
            site,
            ctx.settings.text(settings::PASSWORD_TOKEN_KEY),
            |login| Ok(ctx.store().get_user(site, login)?),
        )?,
        None => Some(ctx.user.clone().ok_or(PipelineError::Unauthorized)?),
    };

    let mut context = BTreeMap::new();
    let title = "Change password".to_string();
    let Some(mut user) = user else {
        context.insert("Invalid".into(), TemplateValue::from(true));
        return action_page(
            ctx,
            "actions/change-password",
            title,
            context,
            Chrome::Plain,
            StatusCode::BAD_REQUEST,
        )
        .await;
    };

    let mut form = Form::new();
    let mut data = FormData::new();
    if let Some(token) = &token {
        form.add("token", "", Widget::Hidden);
        data.insert("token".into(), token.clone());
    } else {
        form.add("OldPassword", "Old password", Widget::Password).required = true;
    }
    form.add("Password", "New password", Widget::Password).required = true;
    form.add("PasswordConfirm", "Repeat new password", Widget::Password).required = true;

    let mut changed = false;
    let mut status = StatusCode::OK;
    if ctx.is_post() {
        if form.fill(&ctx.form) {
            let password = ctx.form.get("Password").map(String::as_str).unwrap_or_default();
            if token.is_none() {
                let old = ctx.form.get("OldPassword").map(String::as_str).unwrap_or_default();
                if !verify_password(ctx, old, &user.password).await {
                    form.add_error("OldPassword", "Wrong password.");
                }
            }
            if ctx.form.get("PasswordConfirm").map(String::as_str) != Some(password) {
                form.add_error("PasswordConfirm", "Passwords do not match.");
            }
            if !form.has_errors() {
                user.password = hash_password(ctx, password).await?;
                user.password_changed = time::now_secs();
                ctx.store().write_user(site, &user)?;
                tracing::info!(site, login = %user.login, "password changed");
                changed = true;
            }
        }
        if !changed {
            status = StatusCode::UNPROCESSABLE_ENTITY;
        }
    }

    context.insert(
        "Form".into(),
        form_value(&form, &ctx.action_url(Action::ChangePassword), &data, "Change"),
    );
    context.insert("Changed".into(), TemplateValue::from(changed));
    action_page(ctx, "actions/change-password", title, context, Chrome::Plain, status).await
}
