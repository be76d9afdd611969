//! Request path decoding and the trailing `@@action` segment.

use monsti_types::{Action, paths};
use percent_encoding::percent_decode_str;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPath {
    /// Clean node path, no trailing slash except for the root.
    pub node: String,
    /// Whether the node part of the URL ended with a slash.
    pub trailing_slash: bool,
    pub action: Action,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("path must start with a slash")]
    MissingLeadingSlash,
    #[error("invalid percent encoding")]
    InvalidPercentEncoding,
    #[error("path is not valid UTF-8")]
    InvalidUtf8,
    #[error("invalid path segment '{0}'")]
    InvalidSegment(String),
}

/// Decode a raw URL path and split off its action. Unknown actions fall
/// back to `view`.
pub fn parse_request_path(raw: &str) -> Result<RequestPath, PathError> {
    let decoded = percent_decode(raw)?;
    if !decoded.starts_with('/') {
        return Err(PathError::MissingLeadingSlash);
    }
    let (node_part, action) = split_action(&decoded);
    for segment in node_part.split('/') {
        if segment == ".." {
            return Err(PathError::InvalidSegment(segment.to_string()));
        }
    }
    Ok(RequestPath {
        node: paths::clean_path(node_part),
        trailing_slash: node_part.ends_with('/'),
        action,
    })
}

/// Split `/a/b/@@edit` into `/a/b/` and `edit`.
pub fn split_action(path: &str) -> (&str, Action) {
    let last = path.rsplit('/').next().unwrap_or("");
    match last.strip_prefix("@@") {
        Some(name) if !name.is_empty() => {
            let node = &path[..path.len() - last.len()];
            let node = if node.is_empty() { "/" } else { node };
            (node, Action::from_name(name).unwrap_or(Action::View))
        }
        _ => (path, Action::View),
    }
}

/// Percent-decode a raw path. Every `%` has to start a complete escape.
fn percent_decode(input: &str) -> Result<String, PathError> {
    let complete = input.split('%').skip(1).all(|rest| {
        rest.as_bytes()
            .get(..2)
            .is_some_and(|digits| digits.iter().all(u8::is_ascii_hexdigit))
    });
    if !complete {
        return Err(PathError::InvalidPercentEncoding);
    }
    percent_decode_str(input)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|_| PathError::InvalidUtf8)
}
