//! Helpers for absolute, `/`-separated node paths.

/// Normalize a node path: absolute, no empty or `.` segments, `..` resolved,
/// no trailing slash except for the root.
pub fn clean_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    format!("/{}", segments.join("/"))
}

/// Parent of a node path; the root is its own parent.
pub fn parent_path(path: &str) -> String {
    let clean = clean_path(path);
    match clean.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => clean[..idx].to_string(),
    }
}

/// Join `relative` onto `base`; absolute `relative` paths replace `base`.
pub fn join_path(base: &str, relative: &str) -> String {
    if relative.starts_with('/') {
        clean_path(relative)
    } else {
        clean_path(&format!("{base}/{relative}"))
    }
}

/// Last segment of a node path, empty for the root.
pub fn base_name(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or("")
}

/// Path segments without the root.
pub fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Whether `path` lies at or below `ancestor`.
pub fn is_below(path: &str, ancestor: &str) -> bool {
    let path = clean_path(path);
    let ancestor = clean_path(ancestor);
    ancestor == "/" || path == ancestor || path.starts_with(&format!("{ancestor}/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleaning_and_joining() {
        assert_eq!(clean_path("//foo/./bar/"), "/foo/bar");
        assert_eq!(clean_path("/foo/../.."), "/");
        assert_eq!(join_path("/root", "../bar"), "/bar");
        assert_eq!(join_path("/root", "/abs"), "/abs");
        assert_eq!(join_path("/root", "."), "/root");
    }

    #[test]
    fn parents_and_names() {
        assert_eq!(parent_path("/foo/bar"), "/foo");
        assert_eq!(parent_path("/foo"), "/");
        assert_eq!(parent_path("/"), "/");
        assert_eq!(base_name("/foo/bar/"), "bar");
        assert_eq!(base_name("/"), "");
        assert!(is_below("/foo/bar", "/foo"));
        assert!(!is_below("/foobar", "/foo"));
        assert!(is_below("/anything", "/"));
    }
}
