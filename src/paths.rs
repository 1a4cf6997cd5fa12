// Lookup roots for files referenced by plays and roles.

use std::path::{Path, PathBuf};

/// Resolves relative lookups for a play. `Simple` keeps everything under one
/// top directory; `Separate` is installed while a role is being imported:
/// tasks, handlers, vars and meta resolve inside the role directory while
/// plain files keep resolving against the playbook top. Tasks snapshot their
/// resolver at construction, so roles composed later cannot retarget them.
#[derive(Debug, Clone)]
pub enum Paths {
    Simple { top: PathBuf },
    Separate { top: PathBuf, root: PathBuf },
}

impl Paths {
    pub fn simple(top: impl Into<PathBuf>) -> Self {
        Paths::Simple { top: top.into() }
    }

    pub fn separate(top: impl Into<PathBuf>, root: impl Into<PathBuf>) -> Self {
        Paths::Separate {
            top: top.into(),
            root: root.into(),
        }
    }

    pub fn top(&self) -> &Path {
        match self {
            Paths::Simple { top } | Paths::Separate { top, .. } => top,
        }
    }

    pub fn file(&self, rel: &str) -> PathBuf {
        self.top().join(rel)
    }

    pub fn role(&self, name: &str) -> PathBuf {
        self.top().join("roles").join(name)
    }

    pub fn task(&self, rel: &str) -> PathBuf {
        self.in_root("tasks", rel)
    }

    pub fn handler(&self, rel: &str) -> PathBuf {
        self.in_root("handlers", rel)
    }

    pub fn vars(&self, rel: &str) -> PathBuf {
        self.in_root("vars", rel)
    }

    pub fn meta(&self, rel: &str) -> PathBuf {
        self.in_root("meta", rel)
    }

    fn in_root(&self, kind: &str, rel: &str) -> PathBuf {
        match self {
            Paths::Simple { top } => top.join(rel),
            Paths::Separate { root, .. } => root.join(kind).join(rel),
        }
    }
}

pub fn file_exists(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_resolves_everything_under_top() {
        let p = Paths::simple("/play");
        assert_eq!(p.file("a.yml"), PathBuf::from("/play/a.yml"));
        assert_eq!(p.task("main.yml"), PathBuf::from("/play/main.yml"));
        assert_eq!(p.role("web"), PathBuf::from("/play/roles/web"));
    }

    #[test]
    fn separate_splits_role_lookups_from_files() {
        let p = Paths::separate("/play", "/play/roles/web");
        assert_eq!(p.file("a.sh"), PathBuf::from("/play/a.sh"));
        assert_eq!(p.task("main.yml"), PathBuf::from("/play/roles/web/tasks/main.yml"));
        assert_eq!(
            p.handler("main.yml"),
            PathBuf::from("/play/roles/web/handlers/main.yml")
        );
        assert_eq!(p.vars("main.yml"), PathBuf::from("/play/roles/web/vars/main.yml"));
        assert_eq!(p.meta("main.yml"), PathBuf::from("/play/roles/web/meta/main.yml"));
    }
}
