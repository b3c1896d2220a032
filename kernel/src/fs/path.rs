//! Path grammar: absolute `/`-separated paths with `.`, `..` and empty
//! segments collapsed at canonicalization time.

use alloc::{
    string::{String, ToString},
    vec::Vec,
};

use crate::error::{KernelError, KernelResult};

/// Maximum path length in bytes.
pub const PATH_MAX: usize = 1024;

/// Maximum single component length in bytes.
pub const NAME_MAX: usize = 255;

/// Canonicalize an absolute path: collapse `.`, `..`, and empty
/// components. Canonicalization is idempotent; `..` at the root stays at
/// the root.
pub fn canonicalize(path: &str) -> KernelResult<String> {
    if path.is_empty() {
        return Err(KernelError::invalid("empty path"));
    }
    if path.len() > PATH_MAX {
        return Err(KernelError::invalid("path too long"));
    }
    if !path.starts_with('/') {
        return Err(KernelError::invalid("path not absolute"));
    }

    let mut parts: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            name => {
                if name.len() > NAME_MAX {
                    return Err(KernelError::invalid("path component too long"));
                }
                parts.push(name);
            }
        }
    }

    if parts.is_empty() {
        return Ok("/".to_string());
    }
    let mut out = String::with_capacity(path.len());
    for part in parts {
        out.push('/');
        out.push_str(part);
    }
    Ok(out)
}

/// Split a canonical path into (parent, final component). The root has no
/// final component.
pub fn split_parent(canonical: &str) -> KernelResult<(&str, &str)> {
    if canonical == "/" {
        return Err(KernelError::invalid("root has no parent"));
    }
    let idx = canonical
        .rfind('/')
        .ok_or(KernelError::invalid("path not canonical"))?;
    let parent = if idx == 0 { "/" } else { &canonical[..idx] };
    Ok((parent, &canonical[idx + 1..]))
}

/// Component iterator over a canonical path ("/" yields nothing).
pub fn components(canonical: &str) -> impl Iterator<Item = &str> {
    canonical.split('/').filter(|c| !c.is_empty())
}

/// Join a possibly-relative path onto a canonical working directory and
/// canonicalize the result.
pub fn absolutize(cwd: &str, path: &str) -> KernelResult<String> {
    if path.starts_with('/') {
        canonicalize(path)
    } else {
        if cwd.len() + path.len() + 1 > PATH_MAX {
            return Err(KernelError::invalid("path too long"));
        }
        let mut joined = String::with_capacity(cwd.len() + path.len() + 1);
        joined.push_str(cwd);
        joined.push('/');
        joined.push_str(path);
        canonicalize(&joined)
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn canonicalization_collapses_segments() {
        assert_eq!(canonicalize("/").expect("ok"), "/");
        assert_eq!(canonicalize("/a/b/c").expect("ok"), "/a/b/c");
        assert_eq!(canonicalize("/a//b///c").expect("ok"), "/a/b/c");
        assert_eq!(canonicalize("/a/./b/.").expect("ok"), "/a/b");
        assert_eq!(canonicalize("/a/b/../c").expect("ok"), "/a/c");
        assert_eq!(canonicalize("/../..").expect("ok"), "/");
        assert_eq!(canonicalize("/a/../../b").expect("ok"), "/b");
    }

    #[test]
    fn canonicalization_is_idempotent() {
        for raw in ["/", "/a/b/c", "/a//./b/../c", "/x/y/../../z"] {
            let once = canonicalize(raw).expect("ok");
            let twice = canonicalize(&once).expect("ok");
            assert_eq!(once, twice, "input {}", raw);
        }
    }

    #[test]
    fn invalid_paths_are_rejected() {
        assert!(canonicalize("").is_err());
        assert!(canonicalize("relative/path").is_err());

        let long_component = alloc::format!("/{}", "x".repeat(NAME_MAX + 1));
        assert!(canonicalize(&long_component).is_err());

        let long_path = alloc::format!("/{}", "a/".repeat(PATH_MAX));
        assert!(canonicalize(&long_path).is_err());
    }

    #[test]
    fn parent_splitting() {
        assert_eq!(split_parent("/a").expect("ok"), ("/", "a"));
        assert_eq!(split_parent("/a/b/c").expect("ok"), ("/a/b", "c"));
        assert!(split_parent("/").is_err());
    }

    #[test]
    fn absolutize_honors_cwd() {
        assert_eq!(absolutize("/home", "docs").expect("ok"), "/home/docs");
        assert_eq!(absolutize("/home", "../etc").expect("ok"), "/etc");
        assert_eq!(absolutize("/home", "/abs").expect("ok"), "/abs");
    }
}
