use super::{
    PipelineError,
    pipeline::RequestContext,
    view::{TemplateContext, node_value},
};
use crate::core_types::BLOG_POST;
use minijinja::Value as TemplateValue;
use monsti_types::{CacheDep, CacheMods, Node};
use std::collections::BTreeMap;

/// Posts of `blog`, stored below `<blog>/<year>/<month>/`, newest first.
/// Anonymous visitors only see published posts.
pub(crate) fn posts(ctx: &RequestContext, blog: &Node) -> Result<(Vec<Node>, CacheMods), PipelineError> {
    let site = ctx.site_name();
    let mut mods = CacheMods::with_dep(CacheDep::node(blog.path.clone()).descend(-1));
    let mut posts = Vec::new();
    for year in ctx.monsti.get_children(site, &blog.path)? {
        for month in ctx.monsti.get_children(site, &year.path)? {
            for post in ctx.monsti.get_children(site, &month.path)? {
                if post.type_id() != BLOG_POST {
                    continue;
                }
                if ctx.user.is_none() && !post.is_published(ctx.now) {
                    // the cached listing must go stale once this post appears
                    if post.public && post.publish_time > ctx.now {
                        mods.join(&CacheMods {
                            expire: Some(post.publish_time),
                            ..Default::default()
                        });
                    }
                    continue;
                }
                posts.push(post);
            }
        }
    }
    posts.sort_by(|a, b| b.publish_time.cmp(&a.publish_time));
    Ok((posts, mods))
}

/// Add `BlogPosts` to a blog's template context. `?limit=<n>` keeps the
/// newest `n` posts.
pub(crate) fn contribute(
    ctx: &RequestContext,
    blog: &Node,
    query: &BTreeMap<String, String>,
    context: &mut TemplateContext,
) -> Result<CacheMods, PipelineError> {
    let (mut posts, mods) = posts(ctx, blog)?;
    if let Some(limit) = query.get("limit").and_then(|l| l.trim().parse::<usize>().ok()) {
        posts.truncate(limit);
    }
    let values: Vec<_> = posts
        .iter()
        .map(|post| node_value(post, ctx.tz, ctx.locale()))
        .collect();
    context.insert("BlogPosts".into(), TemplateValue::from_serialize(&values));
    Ok(mods)
}
