//! Path and filter utilities

use std::path::{Path, PathBuf};

/// Split a file path into (directory, base name, extension).
/// The base name drops only the last extension (`a.b.csv` → `a.b`); the extension has no dot.
/// Returns `None` when the path has no file name.
pub fn split_file_path(path: &Path) -> Option<(PathBuf, String, Option<String>)> {
    path.file_name()?;
    let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let stem = path.file_stem()?.to_string_lossy().into_owned();
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());
    Some((dir, stem, ext))
}

/// Strip one leading dot so `.csv` and `csv` compare equal.
pub fn normalize_extension(ext: &str) -> &str {
    ext.strip_prefix('.').unwrap_or(ext)
}

/// True if `path` has extension `ext` (leading dot optional). `None` matches everything.
pub fn extension_matches(path: &Path, ext: Option<&str>) -> bool {
    match ext {
        None => true,
        Some(want) => path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == normalize_extension(want)),
    }
}

/// True if `inner` is `outer` or lies under it, compared on absolute paths without touching
/// the filesystem (`inner` need not exist yet).
pub fn is_within(inner: &Path, outer: &Path) -> bool {
    match (std::path::absolute(inner), std::path::absolute(outer)) {
        (Ok(inner), Ok(outer)) => inner.starts_with(outer),
        _ => false,
    }
}

/// Check if a file should be excluded based on OS-specific hidden files
pub fn is_os_hidden_file(path: &Path) -> bool {
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        match name {
            // macOS
            ".DS_Store" | ".AppleDouble" | ".LSOverride" => true,
            // Windows
            "Thumbs.db" | "ehthumbs.db" | "Desktop.ini" => true,
            // Linux
            ".directory" => true,
            // macOS resource fork files start with ._
            _ => name.starts_with("._"),
        }
    } else {
        false
    }
}

/// Returns true if the path should be included in the walk (not excluded).
pub fn should_include_in_walk(path: &Path, exclude_patterns: &[String]) -> bool {
    if is_os_hidden_file(path) {
        return false;
    }
    if exclude_patterns.is_empty() {
        return true;
    }
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n,
        None => return true,
    };
    let path_str = path.to_str().unwrap_or("");
    !exclude_patterns
        .iter()
        .any(|pattern| glob_match(pattern, name) || glob_match(pattern, path_str))
}

/// Simple glob pattern matching (supports * and ?)
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    glob_match_chars(&p, &t)
}

fn glob_match_chars(p: &[char], t: &[char]) -> bool {
    match p.split_first() {
        None => t.is_empty(),
        Some(('*', rest)) => {
            if rest.is_empty() {
                return true; // trailing * matches everything
            }
            (0..=t.len()).any(|i| glob_match_chars(rest, &t[i..]))
        }
        Some(('?', rest)) => !t.is_empty() && glob_match_chars(rest, &t[1..]),
        Some((c, rest)) => t.first() == Some(c) && glob_match_chars(rest, &t[1..]),
    }
}
