use std::path::{Path, PathBuf};

fn strip_root(path: &Path) -> &Path {
    match path.strip_prefix("/") {
        Ok(relative) => relative,
        Err(_) => path,
    }
}

/// Joins `rel` under `base`, stripping any leading `/` from `rel` first so the result always
/// stays under `base` regardless of whether `rel` was written as an absolute or relative path.
pub fn join_relative(base: impl AsRef<Path>, rel: impl AsRef<Path>) -> PathBuf {
    base.as_ref().join(strip_root(rel.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_relative() {
        assert_eq!(
            join_relative("/var/lib/snapd/seed", "/systems/20240101"),
            Path::new("/var/lib/snapd/seed/systems/20240101")
        );
        assert_eq!(
            join_relative("/var/lib/snapd/seed", "systems/20240101"),
            Path::new("/var/lib/snapd/seed/systems/20240101")
        );
    }
}
