//! Path classification for the file jail.
//!
//! A candidate path is allowed when, in priority order: it is a
//! non-filesystem pseudo-path; its real path lies under the jail root;
//! it matches a static OS/library prefix; it equals a static exact file
//! (linker cache, locale/timezone data, interpreter site customization);
//! or it lies under the invoking user's cache/local-data directories.
//!
//! Classification always goes through real-path resolution so symlink
//! traversal and `..` cannot move a path across the jail boundary: for
//! any observed path P, `is_allowed(P)` evaluates identically no matter
//! the observing process's working directory or symlink indirection.

use std::path::{Component, Path, PathBuf};

use super::JailError;

/// OS and toolchain directories every process legitimately touches.
const STATIC_PREFIXES: &[&str] = &[
    "/usr/lib",
    "/usr/lib64",
    "/usr/libexec",
    "/usr/local/lib",
    "/lib",
    "/lib64",
    "/lib/x86_64-linux-gnu",
    "/usr/lib/x86_64-linux-gnu",
    "/usr/bin",
    "/usr/local/bin",
    "/usr/local/sbin",
    "/usr/sbin",
    "/usr/share/locale",
    "/usr/share/zoneinfo",
    "/proc",
    "/dev",
];

/// Exact files the dynamic linker, locale machinery and interpreter
/// startup read on every launch.
const STATIC_EXACT: &[&str] = &[
    "/etc/ld.so.cache",
    "/etc/ld.so.preload",
    "/etc/localtime",
    "/etc/locale.alias",
    "/etc/resolv.conf",
    "/etc/python3.12/sitecustomize.py",
    "/usr/pyvenv.cfg",
];

/// Immutable allow-list rules for one jail.
#[derive(Debug, Clone)]
pub struct AllowListPolicy {
    jail_root: PathBuf,
    static_prefixes: Vec<PathBuf>,
    exact_files: Vec<PathBuf>,
    user_prefixes: Vec<PathBuf>,
}

impl AllowListPolicy {
    /// Build the policy for a jail root. The root must exist; it is
    /// canonicalized once so later comparisons are symlink-stable.
    pub fn new(jail_root: &Path) -> Result<Self, JailError> {
        Self::with_extras(jail_root, &[], &[])
    }

    /// Build the policy with deployment-specific extra allowances.
    pub fn with_extras(
        jail_root: &Path,
        extra_prefixes: &[PathBuf],
        extra_files: &[PathBuf],
    ) -> Result<Self, JailError> {
        let jail_root = jail_root
            .canonicalize()
            .map_err(|source| JailError::JailDir {
                path: jail_root.to_path_buf(),
                source,
            })?;

        let mut static_prefixes: Vec<PathBuf> =
            STATIC_PREFIXES.iter().copied().map(PathBuf::from).collect();
        static_prefixes.extend(extra_prefixes.iter().cloned());

        let mut exact_files: Vec<PathBuf> =
            STATIC_EXACT.iter().copied().map(PathBuf::from).collect();
        exact_files.extend(extra_files.iter().cloned());

        Ok(Self {
            jail_root,
            static_prefixes,
            exact_files,
            user_prefixes: user_prefixes(),
        })
    }

    pub fn jail_root(&self) -> &Path {
        &self.jail_root
    }

    /// Classify one observed path.
    pub fn is_allowed(&self, candidate: &str) -> bool {
        if candidate.is_empty() || is_pseudo_path(candidate) {
            return true;
        }

        let resolved = self.resolve_candidate(candidate);

        if resolved.starts_with(&self.jail_root) {
            return true;
        }
        if self
            .static_prefixes
            .iter()
            .any(|prefix| resolved.starts_with(prefix))
        {
            return true;
        }
        if self.exact_files.iter().any(|exact| resolved == *exact) {
            return true;
        }
        if self
            .user_prefixes
            .iter()
            .any(|prefix| resolved.starts_with(prefix))
        {
            return true;
        }

        false
    }

    /// Resolve a candidate to the absolute real path violations are
    /// deduplicated by. Relative candidates resolve against the jail
    /// root, never the observer's working directory.
    pub fn resolve_candidate(&self, candidate: &str) -> PathBuf {
        let path = Path::new(candidate);
        if path.is_absolute() {
            resolve_real_path(path)
        } else {
            resolve_real_path(&self.jail_root.join(path))
        }
    }
}

/// Targets that denote kernel objects, not filesystem entries.
pub fn is_pseudo_path(target: &str) -> bool {
    target.starts_with("pipe:[") || target.starts_with("socket:[") || target.starts_with("anon_inode:")
}

/// Real-path resolution that also handles paths which do not exist:
/// the deepest existing ancestor is canonicalized (resolving symlinks
/// and `..` through the kernel), and the non-existent tail — which
/// cannot contain symlinks — is appended with lexical `.`/`..` handling.
pub fn resolve_real_path(path: &Path) -> PathBuf {
    if let Ok(real) = path.canonicalize() {
        return real;
    }

    let mut base = path.to_path_buf();
    let mut tail: Vec<std::ffi::OsString> = Vec::new();

    loop {
        if let Ok(real) = base.canonicalize() {
            base = real;
            break;
        }
        match base.file_name() {
            Some(name) => {
                tail.push(name.to_os_string());
                base.pop();
            }
            None => break,
        }
    }

    for component in tail.into_iter().rev() {
        match Path::new(&component).components().next() {
            Some(Component::ParentDir) => {
                base.pop();
            }
            Some(Component::CurDir) | None => {}
            _ => base.push(component),
        }
    }

    base
}

/// Per-user cache and local-data prefixes.
fn user_prefixes() -> Vec<PathBuf> {
    let Some(base) = directories::BaseDirs::new() else {
        return Vec::new();
    };
    let home = base.home_dir();
    vec![home.join(".local"), home.join(".cache")]
}
