//! Virtual path expansion and name validation.

use crate::error::{FsError, PathError};

/// Maximum length of a single path segment.
pub const MAX_NAME_LEN: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Anchors used to turn `~/...` and relative paths into absolute ones.
pub struct PathContext<'a> {
    /// Home directory of the acting user, if any.
    pub home: Option<&'a str>,
    /// Directory relative paths are resolved against.
    pub cwd: &'a str,
}

impl<'a> PathContext<'a> {
    /// Context with no home, resolving relative paths against `/`.
    pub const ROOT: PathContext<'static> = PathContext {
        home: None,
        cwd: "/",
    };

    /// Context anchored at `home`, with relative paths resolved against it.
    pub fn at_home(home: &'a str) -> Self {
        Self {
            home: Some(home),
            cwd: home,
        }
    }

    /// Returns a copy that resolves relative paths against `cwd`.
    pub fn with_cwd(self, cwd: &'a str) -> Self {
        Self { cwd, ..self }
    }
}

/// Expands `raw` against `ctx` and normalizes it into an absolute path.
///
/// Accepts absolute paths, `~` and `~/...` (the context home), `~user/...` (`/home/user`), and
/// relative paths joined onto `ctx.cwd`. Backslashes count as separators, `.` is dropped, and
/// `..` pops a segment without climbing above `/`.
pub fn expand_path(raw: &str, ctx: PathContext<'_>) -> Result<String, PathError> {
    let trimmed = raw.trim();
    let joined = if trimmed.is_empty() {
        ctx.cwd.to_string()
    } else if trimmed.starts_with('/') || trimmed.starts_with('\\') {
        trimmed.to_string()
    } else if let Some(rest) = trimmed.strip_prefix('~') {
        let (user, tail) = match rest.find(['/', '\\']) {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        };
        if user.is_empty() {
            let home = ctx.home.ok_or(PathError::NoHomeDirectory)?;
            format!("{home}/{tail}")
        } else {
            format!("/home/{user}/{tail}")
        }
    } else {
        format!("{}/{trimmed}", ctx.cwd)
    };
    Ok(normalize_path(&joined))
}

/// Normalizes a path lexically, returning `/` for empty or fully collapsed input.
pub fn normalize_path(path: &str) -> String {
    let mut out = String::new();
    for segment in path.replace('\\', "/").split('/') {
        if segment.is_empty() || segment == "." {
            continue;
        }
        if segment == ".." {
            if let Some(idx) = out.rfind('/') {
                out.truncate(idx);
            }
            continue;
        }
        out.push('/');
        out.push_str(segment);
    }

    if out.is_empty() {
        "/".to_string()
    } else {
        out
    }
}

/// Iterates the segments of a normalized absolute path.
pub fn segments(normalized: &str) -> impl Iterator<Item = &str> {
    normalized.split('/').filter(|segment| !segment.is_empty())
}

/// Joins a directory path and a child name.
pub fn join(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Splits a normalized absolute path into its parent directory and final segment.
pub fn split_parent(normalized: &str) -> Option<(&str, &str)> {
    let idx = normalized.rfind('/')?;
    let name = &normalized[idx + 1..];
    if name.is_empty() {
        return None;
    }
    let parent = if idx == 0 { "/" } else { &normalized[..idx] };
    Some((parent, name))
}

/// Checks that `name` can be used as a single path segment.
pub fn validate_name(name: &str) -> Result<(), FsError> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.len() > MAX_NAME_LEN
        || name.chars().any(|ch| ch == '/' || ch == '\\' || ch == '\0');
    if invalid {
        Err(FsError::InvalidName(name.to_string()))
    } else {
        Ok(())
    }
}

/// Returns `base`, or `base (2)`, `base (3)`, ... whichever `taken` reports as free first.
///
/// The extension of file-like names is preserved: `notes.txt` becomes `notes (2).txt`.
pub fn unique_name(base: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(base) {
        return base.to_string();
    }
    let (stem, ext) = match base.rfind('.') {
        Some(idx) if idx > 0 => (&base[..idx], &base[idx..]),
        _ => (base, ""),
    };
    (2u64..)
        .map(|n| format!("{stem} ({n}){ext}"))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| base.to_string())
}
