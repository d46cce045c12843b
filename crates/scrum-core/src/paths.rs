use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const SCRUM_DIR: &str = ".scrum";
pub const CONFIG_FILE: &str = ".scrum/config.yaml";
pub const DEFAULT_DB_FILE: &str = ".scrum/scrum.db";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn scrum_dir(root: &Path) -> PathBuf {
    root.join(SCRUM_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

/// Resolve the database location. Relative paths are taken from the
/// project root.
pub fn db_path(root: &Path, configured: Option<&Path>) -> PathBuf {
    match configured {
        Some(p) if p.is_absolute() => p.to_path_buf(),
        Some(p) => root.join(p),
        None => root.join(DEFAULT_DB_FILE),
    }
}

pub fn is_initialized(root: &Path) -> bool {
    scrum_dir(root).is_dir()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_path_defaults_under_scrum_dir() {
        let root = Path::new("/proj");
        assert_eq!(db_path(root, None), PathBuf::from("/proj/.scrum/scrum.db"));
        assert_eq!(
            db_path(root, Some(Path::new("data/s.db"))),
            PathBuf::from("/proj/data/s.db")
        );
        assert_eq!(
            db_path(root, Some(Path::new("/var/s.db"))),
            PathBuf::from("/var/s.db")
        );
    }
}
