//! Site navigation.

use monsti_types::paths;
use serde::Serialize;

/// What navigation needs to know about a node.
#[derive(Debug, Clone, PartialEq)]
pub struct NavNode {
    pub path: String,
    pub title: String,
    pub order: i32,
    /// Hidden itself or through its type.
    pub hide: bool,
    /// Public and already published.
    pub public: bool,
}

pub trait NavSource {
    type Error;

    fn node(&self, path: &str) -> Result<Option<NavNode>, Self::Error>;
    fn children(&self, path: &str) -> Result<Vec<NavNode>, Self::Error>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct NavLink {
    pub name: String,
    pub target: String,
    pub active: bool,
    pub active_below: bool,
    pub order: i32,
    /// 0 for the node and its siblings, 1 for its children.
    pub level: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NavLink>,
}

fn visible(node: &NavNode, public: bool) -> bool {
    !node.hide && (!public || node.public)
}

fn link(node: &NavNode, level: u32) -> NavLink {
    NavLink {
        name: node.title.clone(),
        target: node.path.clone(),
        order: node.order,
        level,
        ..Default::default()
    }
}

fn sort_links(links: &mut [NavLink]) {
    links.sort_by(|a, b| {
        a.order
            .cmp(&b.order)
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.target.cmp(&b.target))
    });
}

fn visible_children<S: NavSource>(
    source: &S,
    path: &str,
    public: bool,
    level: u32,
) -> Result<Vec<NavLink>, S::Error> {
    let mut links: Vec<NavLink> = source
        .children(path)?
        .iter()
        .filter(|child| visible(child, public))
        .map(|child| link(child, level))
        .collect();
    sort_links(&mut links);
    Ok(links)
}

fn fill_children<S: NavSource>(
    source: &S,
    links: &mut [NavLink],
    public: bool,
    depth: u32,
) -> Result<(), S::Error> {
    if depth == 0 {
        return Ok(());
    }
    for link in links.iter_mut() {
        let mut children = visible_children(source, &link.target, public, link.level + 1)?;
        fill_children(source, &mut children, public, depth - 1)?;
        link.children = children;
    }
    Ok(())
}

/// Navigation around `path`: the node with its siblings, and its children
/// right after it.
///
/// A node without visible children borrows the navigation of its parent,
/// unless the parent is the root. With `public` set, unpublished nodes are
/// left out. `depth > 1` additionally fills the `children` of each child
/// link, `depth - 1` levels deep.
pub fn get_nav<S: NavSource>(
    source: &S,
    path: &str,
    active: &str,
    public: bool,
    depth: u32,
) -> Result<Vec<NavLink>, S::Error> {
    let path = paths::clean_path(path);
    let active = paths::clean_path(active);
    let mut children = visible_children(source, &path, public, 1)?;
    if children.is_empty() {
        let parent = paths::parent_path(&path);
        if path == "/" || parent == "/" {
            return Ok(Vec::new());
        }
        return get_nav(source, &parent, &active, public, depth);
    }
    fill_children(source, &mut children, public, depth.saturating_sub(1))?;

    let mut siblings = Vec::new();
    let parent = paths::parent_path(&path);
    if parent == "/" {
        // the root and top level nodes show themselves above their children
        if let Some(node) = source.node(&path)? {
            siblings.push(link(&node, 0));
        }
    } else {
        siblings = visible_children(source, &parent, public, 0)?;
    }

    let mut nav = Vec::with_capacity(siblings.len() + children.len());
    match siblings.iter().position(|l| l.target == path) {
        Some(idx) => {
            let rest = siblings.split_off(idx + 1);
            nav.extend(siblings);
            nav.extend(children);
            nav.extend(rest);
        }
        None => nav = children,
    }
    for link in &mut nav {
        if link.target == active {
            link.active = true;
        } else if paths::is_below(&active, &link.target) {
            link.active_below = true;
        }
    }
    Ok(nav)
}

/// Turn relative targets into absolute ones below `root` and end every
/// target with a slash.
pub fn make_absolute(nav: &mut [NavLink], root: &str) {
    for link in nav {
        if !link.target.starts_with('/') {
            link.target = paths::join_path(root, &link.target);
        }
        if !link.target.ends_with('/') {
            link.target.push('/');
        }
        make_absolute(&mut link.children, root);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::BTreeMap, convert::Infallible};

    struct Tree(BTreeMap<&'static str, (NavNode, Vec<&'static str>)>);

    impl Tree {
        fn sample() -> Self {
            let node = |path: &str, order: i32, hide: bool| NavNode {
                path: path.to_string(),
                title: "Untitled".to_string(),
                order,
                hide,
                public: true,
            };
            Tree(BTreeMap::from([
                ("/", (node("/", 0, false), vec!["foo", "bar", "hideme", "cruz"])),
                ("/foo", (node("/foo", 0, false), vec!["child1", "child2"])),
                ("/foo/child1", (node("/foo/child1", 0, false), vec![])),
                ("/foo/child2", (node("/foo/child2", 0, false), vec!["child1"])),
                ("/foo/child2/child1", (node("/foo/child2/child1", 0, false), vec![])),
                ("/bar", (node("/bar", 2, false), vec![])),
                ("/hideme", (node("/hideme", 0, true), vec![])),
                ("/cruz", (node("/cruz", -2, false), vec!["child1"])),
                ("/cruz/child1", (node("/cruz/child1", 0, false), vec![])),
            ]))
        }
    }

    impl NavSource for Tree {
        type Error = Infallible;

        fn node(&self, path: &str) -> Result<Option<NavNode>, Infallible> {
            Ok(self.0.get(path).map(|(node, _)| node.clone()))
        }

        fn children(&self, path: &str) -> Result<Vec<NavNode>, Infallible> {
            let names = self.0.get(path).map(|(_, c)| c.clone()).unwrap_or_default();
            Ok(names
                .into_iter()
                .filter_map(|name| self.0.get(paths::join_path(path, name).as_str()))
                .map(|(node, _)| node.clone())
                .collect())
        }
    }

    fn l(target: &str, level: u32, order: i32, active: bool, active_below: bool) -> NavLink {
        NavLink {
            name: "Untitled".into(),
            target: target.into(),
            active,
            active_below,
            order,
            level,
            children: Vec::new(),
        }
    }

    #[test]
    fn navigation_around_nodes() {
        let tree = Tree::sample();
        let cases = vec![
            ("/", "/", vec![
                l("/", 0, 0, true, false),
                l("/cruz", 1, -2, false, false),
                l("/foo", 1, 0, false, false),
                l("/bar", 1, 2, false, false),
            ]),
            ("/", "/foo/child2/child1", vec![
                l("/", 0, 0, false, true),
                l("/cruz", 1, -2, false, false),
                l("/foo", 1, 0, false, true),
                l("/bar", 1, 2, false, false),
            ]),
            ("/foo", "/foo", vec![
                l("/foo", 0, 0, true, false),
                l("/foo/child1", 1, 0, false, false),
                l("/foo/child2", 1, 0, false, false),
            ]),
            ("/foo/child1", "/foo/child1", vec![
                l("/foo", 0, 0, false, true),
                l("/foo/child1", 1, 0, true, false),
                l("/foo/child2", 1, 0, false, false),
            ]),
            ("/foo/child2", "/foo/child2", vec![
                l("/foo/child1", 0, 0, false, false),
                l("/foo/child2", 0, 0, true, false),
                l("/foo/child2/child1", 1, 0, false, false),
            ]),
            ("/foo/child2/child1", "/foo/child2/child1", vec![
                l("/foo/child1", 0, 0, false, false),
                l("/foo/child2", 0, 0, false, true),
                l("/foo/child2/child1", 1, 0, true, false),
            ]),
            ("/bar", "/bar", vec![]),
            ("/cruz", "/cruz", vec![
                l("/cruz", 0, -2, true, false),
                l("/cruz/child1", 1, 0, false, false),
            ]),
        ];
        for (path, active, expected) in cases {
            let nav = get_nav(&tree, path, active, true, 1).expect("nav");
            assert_eq!(nav, expected, "get_nav({path:?}, {active:?})");
        }
    }

    #[test]
    fn unpublished_nodes_only_show_to_editors() {
        let mut tree = Tree::sample();
        if let Some((node, _)) = tree.0.get_mut("/bar") {
            node.public = false;
        }
        let public: Vec<String> = get_nav(&tree, "/", "/", true, 1)
            .expect("nav")
            .into_iter()
            .map(|l| l.target)
            .collect();
        assert!(!public.contains(&"/bar".to_string()));
        let all = get_nav(&tree, "/", "/", false, 1).expect("nav");
        assert!(all.iter().any(|l| l.target == "/bar"));
    }

    #[test]
    fn deeper_navigation_fills_children() {
        let tree = Tree::sample();
        let nav = get_nav(&tree, "/", "/", true, 3).expect("nav");
        let foo = nav.iter().find(|l| l.target == "/foo").expect("foo");
        assert_eq!(foo.children.len(), 2);
        assert_eq!(foo.children[1].target, "/foo/child2");
        assert_eq!(foo.children[1].level, 2);
        assert_eq!(foo.children[1].children[0].target, "/foo/child2/child1");
    }

    #[test]
    fn absolute_targets_end_with_slash() {
        let mut nav = vec![l("/", 0, 0, false, false), l("foo", 0, 0, false, false), l(".", 0, 0, false, false), l("../bar", 0, 0, false, false)];
        make_absolute(&mut nav, "/root");
        let targets: Vec<&str> = nav.iter().map(|l| l.target.as_str()).collect();
        assert_eq!(targets, vec!["/", "/root/foo/", "/root/", "/bar/"]);
    }
}
