//! Path containment checks for extraction.

use std::path::{Component, Path, PathBuf};

/// Reduce a stored entry path to a relative path that cannot escape an
/// extraction root. `None` when no such reduction exists: absolute paths,
/// drive prefixes, embedded NUL, or `..` components that climb above the
/// root. Backslashes are treated as separators since legacy archivers
/// emit them.
pub(crate) fn enclosed_path(raw: &str) -> Option<PathBuf> {
    if raw.is_empty() || raw.contains('\0') {
        return None;
    }
    let normalized = raw.replace('\\', "/");
    if normalized.starts_with('/') {
        return None;
    }

    let mut out = PathBuf::new();
    let mut depth = 0usize;
    for component in Path::new(&normalized).components() {
        match component {
            Component::Prefix(_) | Component::RootDir => return None,
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return None;
                }
                depth -= 1;
                out.pop();
            }
            Component::Normal(part) => {
                depth += 1;
                out.push(part);
            }
        }
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Whether a symlink at `link_path` pointing at `target` stays inside
/// `root`. Relative targets resolve against the link's parent directory;
/// resolution is lexical, matching the containment policy applied before
/// the link exists on disk.
pub(crate) fn symlink_target_is_contained(link_path: &Path, target: &[u8], root: &Path) -> bool {
    if target.contains(&0) {
        return false;
    }
    let target = String::from_utf8_lossy(target).replace('\\', "/");
    let target_path = Path::new(&target);

    let resolved = if target_path.is_absolute() {
        target_path.to_path_buf()
    } else {
        link_path
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join(target_path)
    };

    match normalize_lexically(&resolved) {
        Some(clean) => clean.starts_with(root),
        None => false,
    }
}

/// Resolve `.` and `..` without touching the filesystem. `None` when `..`
/// underflows the path's anchor.
fn normalize_lexically(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::Normal(part) => out.push(part),
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_relative_paths() {
        assert_eq!(
            enclosed_path("a/b/c.txt"),
            Some(PathBuf::from("a/b/c.txt"))
        );
        assert_eq!(enclosed_path("./a/./b"), Some(PathBuf::from("a/b")));
        assert_eq!(enclosed_path("a/../b"), Some(PathBuf::from("b")));
    }

    #[test]
    fn rejects_escapes() {
        assert_eq!(enclosed_path("../evil"), None);
        assert_eq!(enclosed_path("a/../../evil"), None);
        assert_eq!(enclosed_path("/etc/passwd"), None);
        assert_eq!(enclosed_path("ok\0bad"), None);
        assert_eq!(enclosed_path(""), None);
        assert_eq!(enclosed_path("..\\evil"), None);
    }

    #[test]
    fn symlink_containment() {
        let root = Path::new("/dest");
        let link = Path::new("/dest/sub/link");

        assert!(symlink_target_is_contained(link, b"sibling", root));
        assert!(symlink_target_is_contained(link, b"../other/file", root));
        assert!(!symlink_target_is_contained(link, b"../../etc/passwd", root));
        assert!(!symlink_target_is_contained(link, b"/etc/passwd", root));
        assert!(symlink_target_is_contained(link, b"/dest/abs/ok", root));
        assert!(!symlink_target_is_contained(link, b"ok\0bad", root));
    }
}
