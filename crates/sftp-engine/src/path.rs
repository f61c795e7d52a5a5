//! Pure path-string algebra for the remote (always POSIX-flavored, per spec
//! §4.8) filesystem namespace — no local I/O, no assumption that the local
//! and remote separators match.
//!
//! The wire carries plain UTF-8 strings; this module supplies the handful
//! of string operations the engine needs to build and interpret those
//! strings (joining, trimming a trailing separator, splitting leaf from
//! parent) without ever touching `std::path`, whose semantics are tied to
//! the local platform and therefore wrong for a path that names something
//! on a possibly different remote OS.

/// Remote-path string helper, parameterized on the separator the session
/// negotiated (spec §4.8; always `'/'` for SFTP v3 in practice, but the
/// option exists so a caller can be explicit).
#[derive(Debug, Clone, Copy)]
pub struct PathHelper {
    separator: char,
}

impl PathHelper {
    pub fn new(separator: char) -> Self {
        Self { separator }
    }

    /// Joins a parent and a child component with exactly one separator
    /// between them, regardless of whether either side already has one.
    pub fn join(&self, parent: &str, child: &str) -> String {
        if parent.is_empty() {
            return child.to_string();
        }
        let trimmed_parent = self.trim_trailing_separator(parent);
        let trimmed_child = child.trim_start_matches(self.separator);
        if trimmed_parent.is_empty() {
            format!("{}{}", self.separator, trimmed_child)
        } else {
            format!("{trimmed_parent}{}{trimmed_child}", self.separator)
        }
    }

    /// Removes one or more trailing separators, except when the whole
    /// string is the root (`"/"`), which is left untouched.
    pub fn trim_trailing_separator<'a>(&self, path: &'a str) -> &'a str {
        if path.len() == 1 {
            return path;
        }
        path.trim_end_matches(self.separator)
    }

    /// The final path component, i.e. the part after the last separator.
    pub fn leaf<'a>(&self, path: &'a str) -> &'a str {
        let trimmed = self.trim_trailing_separator(path);
        match trimmed.rfind(self.separator) {
            Some(idx) => &trimmed[idx + self.separator.len_utf8()..],
            None => trimmed,
        }
    }

    /// The path with its final component removed. Returns `"/"` for a
    /// path directly under the root, and `""` for a bare relative leaf
    /// with no parent component.
    pub fn parent(&self, path: &str) -> String {
        let trimmed = self.trim_trailing_separator(path);
        match trimmed.rfind(self.separator) {
            Some(0) => self.separator.to_string(),
            Some(idx) => trimmed[..idx].to_string(),
            None => String::new(),
        }
    }

    /// Collapses repeated separators and resolves `.`/`..` components
    /// lexically, without touching the filesystem. A leading `..` past the
    /// root is dropped rather than producing `../..` (there is no parent
    /// of the remote root to escape to).
    pub fn normalize(&self, path: &str) -> String {
        let is_absolute = path.starts_with(self.separator);
        let mut stack: Vec<&str> = Vec::new();

        for component in path.split(self.separator) {
            match component {
                "" | "." => {}
                ".." => {
                    if stack.pop().is_none() && !is_absolute {
                        stack.push("..");
                    }
                }
                other => stack.push(other),
            }
        }

        let joined = stack.join(&self.separator.to_string());
        if is_absolute {
            format!("{}{joined}", self.separator)
        } else if joined.is_empty() {
            ".".to_string()
        } else {
            joined
        }
    }

    /// Resolves `path` to its canonical remote form by invoking the
    /// caller-supplied hook, which in practice is a closure wrapping
    /// [`crate::engine::Engine::canonicalize`]. `PathHelper` itself never
    /// talks to the wire; this only exists so callers can reach
    /// canonicalization through the same handle they reach `join`/`leaf`
    /// through.
    pub async fn canonicalize<F, Fut>(&self, path: &str, hook: F) -> crate::error::Result<String>
    where
        F: FnOnce(String) -> Fut,
        Fut: std::future::Future<Output = crate::error::Result<String>>,
    {
        hook(path.to_string()).await
    }
}

impl Default for PathHelper {
    fn default() -> Self {
        Self::new('/')
    }
}
