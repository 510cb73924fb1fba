//! Site-relative path helpers.
//!
//! Everything downstream of the filesystem walk speaks in forward-slash,
//! site-relative strings (`blog/post/index.html`), never in `PathBuf`s, so the
//! File Index, Resource Table and resolver are platform-independent and cheap to
//! compare. These helpers convert at the boundary and do the posix-style path
//! arithmetic the resolver needs.

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use std::path::Path;

/// Characters that would change the meaning of a relative URL if written raw.
const URL_PATH_UNSAFE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'\'')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`');

/// Convert a relative filesystem path into a forward-slash string.
pub fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Site-relative forward-slash path of `path` under `root`, if it is inside it.
pub fn rel_to_root(root: &Path, path: &Path) -> Option<String> {
    path.strip_prefix(root).ok().map(to_slash)
}

/// Directory part of a site-relative path (`""` for files at the root).
pub fn parent_dir(rel: &str) -> &str {
    rel.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// Last segment of a slash-separated path.
pub fn basename(rel: &str) -> &str {
    let trimmed = rel.trim_end_matches('/');
    trimmed.rsplit_once('/').map(|(_, name)| name).unwrap_or(trimmed)
}

/// Lowercased extension of the last path segment, without the dot.
pub fn extension(rel: &str) -> Option<String> {
    let name = basename(rel);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Posix-normalize a URL path onto the site root.
///
/// - Empty and `.` segments are dropped, `..` pops a segment and is clamped at
///   the root (a browser resolves `/../x` to `/x` as well).
/// - The leading slash is removed.
/// - A trailing slash survives so callers can tell directory references apart.
pub fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    let mut out = parts.join("/");
    if !out.is_empty() && (path.ends_with('/') || path.ends_with("/.") || path.ends_with("/..")) {
        out.push('/');
    }
    out
}

/// Join a reference relative to `dir` and normalize the result.
pub fn join(dir: &str, reference: &str) -> String {
    if dir.is_empty() {
        normalize(reference)
    } else {
        normalize(&format!("{dir}/{reference}"))
    }
}

/// Path from the directory containing `from_file` to `target`.
///
/// Both arguments are site-relative file paths.
///
/// ```text
/// from  blog/post/index.html
/// to    blog/post/image.png   →  image.png
/// to    assets/css/main.css   →  ../../assets/css/main.css
/// ```
pub fn relative_path(from_file: &str, target: &str) -> String {
    let from_dir: Vec<&str> = parent_dir(from_file)
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    let target_segs: Vec<&str> = target.split('/').filter(|s| !s.is_empty()).collect();

    // The file name itself never takes part in the common prefix.
    let max_common = from_dir.len().min(target_segs.len().saturating_sub(1));
    let common = from_dir
        .iter()
        .zip(&target_segs)
        .take(max_common)
        .take_while(|(a, b)| a == b)
        .count();

    let mut out: Vec<&str> = Vec::with_capacity(from_dir.len() - common + target_segs.len());
    out.extend(std::iter::repeat_n("..", from_dir.len() - common));
    out.extend(&target_segs[common..]);
    out.join("/")
}

/// Percent-encode the characters of a path that a browser would otherwise read
/// as query, fragment or attribute delimiters. `/` is kept; non-ASCII bytes are
/// always encoded.
pub fn encode_url_path(path: &str) -> String {
    utf8_percent_encode(path, URL_PATH_UNSAFE).to_string()
}
