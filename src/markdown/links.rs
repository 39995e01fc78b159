//! Relative link resolution
//!
//! Resolves document links against the source file's directory with pure
//! string math; the filesystem is never touched. Resolved paths feed
//! `LINKS_TO` edge targets as `<repo-lowercased>:<resolved-path>`.

/// Resolve a markdown link against the path of the file containing it.
///
/// Fragments are discarded, backslashes normalized, `.` and `..` segments
/// folded, and the result lowercased. Returns `None` for empty input,
/// absolute URLs, and links that resolve to nothing.
pub fn resolve_relative(source_file_path: &str, link_url: &str) -> Option<String> {
    if source_file_path.is_empty() || link_url.is_empty() {
        return None;
    }

    let path = link_url.split('#').next().unwrap_or("");
    if path.is_empty() || has_scheme(path) {
        return None;
    }

    let source = source_file_path.replace('\\', "/");
    // Root-level files yield an empty dir.
    let source_dir = match source.rfind('/') {
        Some(i) => &source[..i],
        None => "",
    };

    let combined = if source_dir.is_empty() {
        path.to_string()
    } else {
        format!("{}/{}", source_dir, path)
    };

    let mut stack: Vec<&str> = Vec::new();
    for segment in combined.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            other => stack.push(other),
        }
    }

    if stack.is_empty() {
        return None;
    }
    Some(stack.join("/").to_lowercase())
}

/// A URL scheme (`https:`, `mailto:`) before any slash marks an external
/// link, which never targets a repository document.
fn has_scheme(path: &str) -> bool {
    match path.find(':') {
        Some(i) => {
            let before_slash = path.find('/').map_or(true, |slash| i < slash);
            before_slash && !path[..i].is_empty() && path[..i].chars().all(|c| c.is_ascii_alphabetic())
        }
        None => false,
    }
}
