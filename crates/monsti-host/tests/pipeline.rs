mod common;

use axum::http::{StatusCode, header};
use common::{SITE, TOKEN_KEY, get, post, site};
use image::{DynamicImage, GenericImageView, ImageFormat, RgbImage};
use monsti_host::{
    auth::password_token,
    core_types::{BLOG, BLOG_POST, CONTACT_FORM, DOCUMENT, IMAGE},
};
use monsti_types::{field::FileField, settings, time};
use std::io::Cursor;

#[tokio::test]
async fn anonymous_views_are_served_from_the_full_page_cache() {
    let site = site();
    site.node("/about", DOCUMENT, "About us");

    let first = get(site.app(), "/about/", None).await;
    assert_eq!(first.status, StatusCode::OK);
    assert!(first.text().contains("About us"));

    // edit the stored document behind the cache's back
    let file = site.dir.path().join("data/example/nodes/about/node.json");
    let raw = std::fs::read_to_string(&file).expect("read node");
    std::fs::write(&file, raw.replace("About us", "Edited elsewhere")).expect("write node");

    let second = get(site.app(), "/about/", None).await;
    assert_eq!(second.status, StatusCode::OK);
    assert_eq!(second.body, first.body);

    // a write through the daemon invalidates the page
    let mut node = site.monsti.get_node(SITE, "/about").expect("get").expect("node");
    node.field_mut("core.Title").expect("title").set_str("About them");
    site.monsti.write_node(SITE, &mut node).expect("write");
    let third = get(site.app(), "/about/", None).await;
    assert!(third.text().contains("About them"));
}

#[tokio::test]
async fn views_without_trailing_slash_redirect() {
    let site = site();
    site.node("/about", DOCUMENT, "About us");
    let reply = get(site.app(), "/about", None).await;
    assert_eq!(reply.status, StatusCode::SEE_OTHER);
    assert_eq!(reply.location(), "/about/");

    let missing = get(site.app(), "/nothing/", None).await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_hosts_and_anonymous_edits_are_refused() {
    let site = site();
    site.node("/about", DOCUMENT, "About us");

    let reply = get_with_host(site.app(), "other.org", "/about/").await;
    assert_eq!(reply, StatusCode::NOT_FOUND);

    let edit = get(site.app(), "/about/@@edit", None).await;
    assert_eq!(edit.status, StatusCode::UNAUTHORIZED);
    assert_eq!(edit.text(), "Unauthorized.");
}

async fn get_with_host(app: axum::Router, host: &str, uri: &str) -> StatusCode {
    use tower::ServiceExt;
    let request = axum::http::Request::get(uri)
        .header(header::HOST, host)
        .body(axum::body::Body::empty())
        .expect("request");
    app.oneshot(request).await.expect("response").status()
}

#[tokio::test]
async fn unpublished_nodes_are_hidden_from_anonymous_visitors() {
    let site = site();
    site.user("alice", "secret");
    let mut draft = site.node("/draft", DOCUMENT, "Draft");
    draft.public = false;
    site.monsti.write_node(SITE, &mut draft).expect("write");

    assert_eq!(get(site.app(), "/draft/", None).await.status, StatusCode::NOT_FOUND);
    let cookie = site.session("alice");
    let reply = get(site.app(), "/draft/", Some(&cookie)).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.text().contains("Draft"));
}

#[tokio::test]
async fn edit_renames_a_node() {
    let site = site();
    site.user("alice", "secret");
    let original = site.node("/about", DOCUMENT, "About us");
    let cookie = site.session("alice");

    let form = get(site.app(), "/about/@@edit", Some(&cookie)).await;
    assert_eq!(form.status, StatusCode::OK);
    assert!(form.text().contains("name=\"Name\""));

    let reply = post(
        site.app(),
        "/about/@@edit",
        Some(&cookie),
        &[
            ("Name", "about2"),
            ("Node.Public", "on"),
            ("Fields.core.Title", "About us"),
            ("Fields.core.Body", "<p>Hello</p>"),
        ],
    )
    .await;
    assert_eq!(reply.status, StatusCode::SEE_OTHER);
    assert_eq!(reply.location(), "/about2/");

    assert!(site.monsti.get_node(SITE, "/about").expect("get").is_none());
    let renamed = site.monsti.get_node(SITE, "/about2").expect("get").expect("renamed");
    assert!(renamed.changed > original.changed);
    assert!(renamed.public);
    let body = renamed.field("core.Body").and_then(|f| f.as_str()).unwrap_or_default();
    assert_eq!(body, "<p>Hello</p>");
}

#[tokio::test]
async fn edit_rejects_invalid_and_taken_names() {
    let site = site();
    site.user("alice", "secret");
    site.node("/about", DOCUMENT, "About");
    site.node("/contact", DOCUMENT, "Contact");
    let cookie = site.session("alice");

    let invalid = post(
        site.app(),
        "/about/@@edit",
        Some(&cookie),
        &[("Name", "a b"), ("Fields.core.Title", "About")],
    )
    .await;
    assert_eq!(invalid.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(invalid.text().contains("Invalid name."));

    let taken = post(
        site.app(),
        "/about/@@edit",
        Some(&cookie),
        &[("Name", "contact"), ("Fields.core.Title", "About")],
    )
    .await;
    assert_eq!(taken.status, StatusCode::CONFLICT);
    assert!(site.monsti.get_node(SITE, "/about").expect("get").is_some());
}

fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(RgbImage::new(width, height))
        .write_to(&mut out, ImageFormat::Jpeg)
        .expect("encode");
    out.into_inner()
}

#[tokio::test]
async fn thumbnails_are_generated_once_and_cached() {
    let site = site();
    site.node("/banner", IMAGE, "Banner");
    site.monsti
        .store()
        .write_node_data(SITE, "/banner", &FileField::blob_name("core.File"), &jpeg(1600, 1200))
        .expect("write image");
    let mut settings = site.monsti.site_settings(SITE).expect("settings");
    settings.set_image_style("hero", 800, 400).expect("style");
    site.monsti.write_site_settings(SITE, &settings).expect("write settings");

    let first = get(site.app(), "/banner/?size=hero", None).await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.headers[header::CONTENT_TYPE], "image/jpeg");
    assert!(first.headers.contains_key(header::LAST_MODIFIED));
    let resized = image::load_from_memory(&first.body).expect("decode");
    let (width, height) = resized.dimensions();
    assert_eq!(height, 400);
    assert!((532..=534).contains(&width), "width {width}");

    let second = get(site.app(), "/banner/?size=hero", None).await;
    assert_eq!(second.body, first.body);

    let raw = get(site.app(), "/banner?raw=1", None).await;
    let original = image::load_from_memory(&raw.body).expect("decode");
    assert_eq!(original.dimensions(), (1600, 1200));

    let unknown = get(site.app(), "/banner?size=giant", None).await;
    assert_eq!(unknown.body, raw.body);
}

#[tokio::test]
async fn blog_posts_are_only_addable_to_blogs() {
    let site = site();
    site.user("alice", "secret");
    site.node("/doc", DOCUMENT, "Document");
    site.node("/blog", BLOG, "Blog");
    let cookie = site.session("alice");

    let blocked = post(
        site.app(),
        "/doc/@@edit",
        Some(&cookie),
        &[("NodeType", BLOG_POST), ("Name", "first"), ("Fields.core.Title", "First")],
    )
    .await;
    assert_eq!(blocked.status, StatusCode::BAD_REQUEST);

    let added = post(
        site.app(),
        "/blog/@@edit",
        Some(&cookie),
        &[
            ("NodeType", BLOG_POST),
            ("Name", "first"),
            ("Node.Public", "on"),
            ("Node.PublishTime", "2024-03-05T10:00"),
            ("Fields.core.Title", "First post"),
        ],
    )
    .await;
    assert_eq!(added.status, StatusCode::SEE_OTHER);
    assert_eq!(added.location(), "/blog/2024/03/first/");
    let post_node = site
        .monsti
        .get_node(SITE, "/blog/2024/03/first")
        .expect("get")
        .expect("post");
    assert_eq!(post_node.type_id(), BLOG_POST);

    let listing = get(site.app(), "/blog/", None).await;
    assert_eq!(listing.status, StatusCode::OK);
    assert!(listing.text().contains("First post"));
}

#[tokio::test]
async fn blog_limit_keeps_the_newest_posts() {
    let site = site();
    site.node("/blog", BLOG, "Blog");
    for (name, title, hours) in [("old", "Old post", 48), ("new", "New post", 2)] {
        let mut post = site.node(&format!("/blog/2024/01/{name}"), BLOG_POST, title);
        post.publish_time = time::now_secs() - chrono::Duration::hours(hours);
        site.monsti.write_node(SITE, &mut post).expect("write");
    }
    let all = get(site.app(), "/blog/", None).await.text();
    let new_at = all.find("New post").expect("new post");
    let old_at = all.find("Old post").expect("old post");
    assert!(new_at < old_at);

    let limited = get(site.app(), "/blog/?limit=1", None).await.text();
    assert!(limited.contains("New post"));
    assert!(!limited.contains("Old post"));
}

#[tokio::test]
async fn contact_form_mails_the_owner() {
    let site = site();
    site.node("/contact", CONTACT_FORM, "Contact");

    let page = get(site.app(), "/contact/", None).await;
    assert!(page.text().contains("name=\"Message\""));

    let incomplete = post(site.app(), "/contact/", None, &[("Name", "Bob")]).await;
    assert_eq!(incomplete.status, StatusCode::OK);
    assert!(incomplete.text().contains("Required."));
    assert!(site.mailer.sent().is_empty());

    let bad_address = [
        ("Name", "Bob"),
        ("Email", "bob\r\nBcc: everyone@example.org"),
        ("Subject", "Hello"),
        ("Message", "Nice site"),
    ];
    let rejected = post(site.app(), "/contact/", None, &bad_address).await;
    assert_eq!(rejected.status, StatusCode::OK);
    assert!(rejected.text().contains("Invalid email address."));
    assert!(site.mailer.sent().is_empty());

    let sent = post(
        site.app(),
        "/contact/",
        None,
        &[
            ("Name", "Bob"),
            ("Email", "bob@example.org"),
            ("Subject", "Hello"),
            ("Message", "Nice site"),
        ],
    )
    .await;
    assert_eq!(sent.status, StatusCode::SEE_OTHER);
    assert_eq!(sent.location(), "/contact/?submitted=1");
    let mails = site.mailer.sent();
    assert_eq!(mails.len(), 1);
    assert_eq!(mails[0].to, ["owner@example.com"]);
    assert!(String::from_utf8_lossy(&mails[0].message).contains("Nice site"));

    let thanks = get(site.app(), "/contact/?submitted=1", None).await;
    assert!(thanks.text().contains("Thank you for your message."));
}

#[tokio::test]
async fn login_sets_a_session_cookie() {
    let site = site();
    site.user("alice", "secret");

    let failed = post(site.app(), "/@@login", None, &[("Login", "alice"), ("Password", "wrong")]).await;
    assert_eq!(failed.status, StatusCode::OK);
    assert!(failed.text().contains("Wrong login or password."));

    let ok = post(site.app(), "/@@login", None, &[("Login", "alice"), ("Password", "secret")]).await;
    assert_eq!(ok.status, StatusCode::SEE_OTHER);
    let cookie = ok.headers[header::SET_COOKIE].to_str().expect("cookie");
    let pair = cookie.split(';').next().expect("pair");
    assert!(pair.starts_with("monsti-session="));

    let list = get(site.app(), "/@@list", Some(pair)).await;
    assert_eq!(list.status, StatusCode::OK);

    let logout = get(site.app(), "/@@logout", Some(pair)).await;
    assert_eq!(logout.status, StatusCode::SEE_OTHER);
    assert!(logout.headers[header::SET_COOKIE].to_str().expect("cookie").contains("Max-Age=0"));
}

#[tokio::test]
async fn password_reset_tokens_expire_with_the_password() {
    let site = site();
    site.user("alice", "secret");

    let requested = post(site.app(), "/@@request-password-token", None, &[("User", "alice")]).await;
    assert_eq!(requested.status, StatusCode::SEE_OTHER);
    assert_eq!(requested.location(), "/@@request-password-token?sent");
    let mails = site.mailer.sent();
    assert_eq!(mails[0].to, ["alice@example.com"]);
    assert!(String::from_utf8_lossy(&mails[0].message).contains("/@@change-password?token="));

    let unknown = post(site.app(), "/@@request-password-token", None, &[("User", "mallory")]).await;
    assert_eq!(unknown.status, StatusCode::UNPROCESSABLE_ENTITY);

    let issued = time::now_secs().timestamp() - 100;
    let token = password_token(SITE, "alice", issued, TOKEN_KEY).expect("token");
    let form = [("token", token.as_str()), ("Password", "fresh"), ("PasswordConfirm", "fresh")];
    let changed = post(site.app(), "/@@change-password", None, &form).await;
    assert_eq!(changed.status, StatusCode::OK);
    assert!(changed.text().contains("Your password has been changed."));

    let reused = post(site.app(), "/@@change-password", None, &form).await;
    assert_eq!(reused.status, StatusCode::BAD_REQUEST);
    assert!(reused.text().contains("not valid anymore"));

    let fresh = password_token(SITE, "alice", time::now_secs().timestamp() + 1, TOKEN_KEY)
        .expect("token");
    let uri = format!("/@@change-password?token={fresh}");
    assert_eq!(get(site.app(), &uri, None).await.status, StatusCode::OK);

    let login = post(site.app(), "/@@login", None, &[("Login", "alice"), ("Password", "fresh")]).await;
    assert_eq!(login.status, StatusCode::SEE_OTHER);
    let user = site.monsti.store().get_user(SITE, "alice").expect("get").expect("user");
    assert!(user.password_changed > time::epoch());
}

#[tokio::test]
async fn list_reorders_children() {
    let site = site();
    site.user("alice", "secret");
    site.node("/a", DOCUMENT, "A");
    site.node("/b", DOCUMENT, "B");
    let cookie = site.session("alice");

    let reply = post(site.app(), "/@@list", Some(&cookie), &[("order-a", "5"), ("order-b", "1")]).await;
    assert_eq!(reply.status, StatusCode::SEE_OTHER);
    assert_eq!(reply.location(), "/@@list");
    let a = site.monsti.get_node(SITE, "/a").expect("get").expect("a");
    assert_eq!(a.order, 5);

    let page = get(site.app(), "/@@list", Some(&cookie)).await.text();
    assert!(page.find("name=\"order-b\"").expect("b") < page.find("name=\"order-a\"").expect("a"));
}

#[tokio::test]
async fn list_leaves_bare_directories_alone() {
    let site = site();
    site.user("alice", "secret");
    site.node("/blog", BLOG, "Blog");
    site.node("/blog/about", DOCUMENT, "About the blog");
    site.node("/blog/2024/01/post", BLOG_POST, "Post");
    let cookie = site.session("alice");

    let form = [("order-2024", "3"), ("order-about", "2")];
    let reply = post(site.app(), "/blog/@@list", Some(&cookie), &form).await;
    assert_eq!(reply.status, StatusCode::SEE_OTHER);
    let about = site.monsti.get_node(SITE, "/blog/about").expect("get").expect("about");
    assert_eq!(about.order, 2);
    assert!(!site.dir.path().join("data/example/nodes/blog/2024/node.json").exists());
}

#[tokio::test]
async fn remove_asks_for_confirmation() {
    let site = site();
    site.user("alice", "secret");
    site.node("/old", DOCUMENT, "Old");
    let cookie = site.session("alice");

    let confirm = get(site.app(), "/old/@@remove", Some(&cookie)).await;
    assert_eq!(confirm.status, StatusCode::OK);
    assert!(confirm.text().contains("name=\"Confirm\" value=\"ok\""));
    assert!(site.monsti.get_node(SITE, "/old").expect("get").is_some());

    let removed = post(site.app(), "/old/@@remove", Some(&cookie), &[("Confirm", "ok")]).await;
    assert_eq!(removed.status, StatusCode::SEE_OTHER);
    assert_eq!(removed.location(), "/");
    assert!(site.monsti.get_node(SITE, "/old").expect("get").is_none());
}

#[tokio::test]
async fn chooser_filters_images() {
    let site = site();
    site.user("alice", "secret");
    site.node("/media", DOCUMENT, "Media");
    site.node("/media/logo", IMAGE, "Logo");
    site.node("/media/notes", DOCUMENT, "Notes");
    let cookie = site.session("alice");

    let images = get(site.app(), "/media/@@chooser?type=image", Some(&cookie)).await.text();
    assert!(images.contains("alt=\"Logo\""));
    assert!(!images.contains("Notes"));

    let all = get(site.app(), "/media/@@chooser", Some(&cookie)).await.text();
    assert!(all.contains("Notes"));
    assert!(all.contains("Logo"));
}

#[tokio::test]
async fn settings_are_saved() {
    let site = site();
    site.user("alice", "secret");
    let cookie = site.session("alice");

    let form = get(site.app(), "/@@settings", Some(&cookie)).await.text();
    assert!(form.contains(settings::SITE_TITLE));
    assert!(!form.contains("session-secret"));

    let key = format!("Fields.{}", settings::SITE_TITLE);
    let reply = post(site.app(), "/@@settings", Some(&cookie), &[(key.as_str(), "Renamed Site")]).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.text().contains("Settings saved."));
    let saved = site.monsti.site_settings(SITE).expect("settings");
    assert_eq!(saved.title(), "Renamed Site");
}

#[tokio::test]
async fn path_nodes_redirect_to_their_listing() {
    let site = site();
    site.user("alice", "secret");
    site.node("/blog", BLOG, "Blog");
    site.node("/blog/2024/01/post", BLOG_POST, "Post");
    let cookie = site.session("alice");
    let reply = get(site.app(), "/blog/2024/", Some(&cookie)).await;
    assert_eq!(reply.status, StatusCode::SEE_OTHER);
    assert_eq!(reply.location(), "/blog/2024/@@list");
}

#[tokio::test]
async fn static_files_are_served() {
    let site = site();
    let shared = site.dir.path().join("share/static/css");
    std::fs::create_dir_all(&shared).expect("mkdir");
    std::fs::write(shared.join("monsti.css"), "body {}").expect("write");
    let reply = get(site.app(), "/static/css/monsti.css", None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.text(), "body {}");

    let site_static = site.dir.path().join("data/example/site-static");
    std::fs::create_dir_all(&site_static).expect("mkdir");
    std::fs::write(site_static.join("logo.svg"), "<svg/>").expect("write");
    let reply = get(site.app(), "/site-static/logo.svg", None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.headers[header::CONTENT_TYPE], "image/svg+xml");
}
