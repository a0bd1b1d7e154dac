//! Remote path handling
//!
//! Device paths are always POSIX style regardless of the host platform,
//! so they are kept as plain strings rather than `std::path::Path`.
//! All adapter-facing paths are normalized and absolute; the relative
//! forms only matter to the interactive shell, which resolves them
//! against its remote working directory with [`resolve`].

/// Path separator on the device
pub const SEP: char = '/';

/// Root of the device tree
pub const ROOT: &str = "/";

/// Normalize a path: collapse repeated separators, drop `.` components,
/// fold `..` into the preceding component and strip any trailing separator.
///
/// `..` never climbs above the root of an absolute path.
pub fn normpath(path: &str) -> String {
    let absolute = path.starts_with(SEP);
    let mut parts: Vec<&str> = Vec::new();

    for component in path.split(SEP) {
        match component {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|p| *p != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    if absolute {
        format!("/{}", joined)
    } else {
        joined
    }
}

/// Normalize and anchor a path at the device root
pub fn abspath(path: &str) -> String {
    let normalized = normpath(path);
    if normalized.starts_with(SEP) {
        normalized
    } else {
        format!("/{}", normalized)
    }
}

/// True if the path names the device root (or is empty)
pub fn is_root(path: &str) -> bool {
    matches!(normpath(path).as_str(), "" | "/")
}

/// Split an absolute path into `(parent directory, leaf name)`.
///
/// The root splits into `("/", "")`.
pub fn pathsplit(path: &str) -> (String, String) {
    let path = abspath(path);
    match path.rfind(SEP) {
        Some(0) => (ROOT.to_string(), path[1..].to_string()),
        Some(idx) => (path[..idx].to_string(), path[idx + 1..].to_string()),
        None => (ROOT.to_string(), path),
    }
}

/// Parent directory of a path
pub fn dirname(path: &str) -> String {
    pathsplit(path).0
}

/// Final component of a path
pub fn basename(path: &str) -> String {
    pathsplit(path).1
}

/// Join `name` onto `base`. An absolute `name` replaces `base` entirely.
pub fn pathjoin(base: &str, name: &str) -> String {
    if name.starts_with(SEP) || base.is_empty() {
        normpath(name)
    } else {
        normpath(&format!("{}/{}", base, name))
    }
}

/// Resolve a possibly-relative path typed by a user against the current
/// remote directory.
///
/// - `..` climbs one level above `base`
/// - `.` is `base` itself
/// - a leading `/` is already absolute
/// - anything else is appended to `base`
///
/// Doubled separators collapse in every case.
pub fn resolve(input: &str, base: &str) -> String {
    let input = input.trim();
    if input.is_empty() {
        return abspath(base);
    }
    abspath(&pathjoin(&abspath(base), input))
}

/// True if `path` is `base` or lies anywhere beneath it
pub fn isbase(path: &str, base: &str) -> bool {
    let path = abspath(path);
    let base = abspath(base);
    if base == ROOT {
        return true;
    }
    path == base
        || path
            .strip_prefix(base.as_str())
            .is_some_and(|rest| rest.starts_with(SEP))
}

/// Every ancestor of `path` from the root down to `path` itself
pub fn recursepath(path: &str) -> Vec<String> {
    let path = abspath(path);
    let mut result = vec![ROOT.to_string()];
    let mut current = String::new();
    for component in path.split(SEP).filter(|c| !c.is_empty()) {
        current.push(SEP);
        current.push_str(component);
        result.push(current.clone());
    }
    result
}

/// Ensure a path ends with a separator, as `ls` wants for symlinked directories
pub fn forcedir(path: &str) -> String {
    if path.ends_with(SEP) {
        path.to_string()
    } else {
        format!("{}/", path)
    }
}

/// Single-quote a string for embedding in a remote `sh` command line
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}
