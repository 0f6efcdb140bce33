use std::path::{Path, PathBuf};
use std::sync::RwLock;

static TABLES_BASE_PATH: RwLock<Option<PathBuf>> = RwLock::new(None);

/// Override the table directory for the whole process. Later calls replace
/// earlier ones.
pub fn set_tables_base_path<P: AsRef<Path>>(path: P) {
    let mut guard = TABLES_BASE_PATH
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *guard = Some(path.as_ref().to_path_buf());
}

/// Resolution order: explicit override, `BUFRLIB_TABLES_PATH` environment
/// variable, then `tables` relative to the working directory.
pub fn get_tables_base_path() -> PathBuf {
    let guard = TABLES_BASE_PATH
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(path) = guard.as_ref() {
        return path.clone();
    }

    if let Ok(env_path) = std::env::var("BUFRLIB_TABLES_PATH") {
        return PathBuf::from(env_path);
    }

    PathBuf::from("tables")
}

pub fn get_table_path<P: AsRef<Path>>(relative_path: P) -> PathBuf {
    get_tables_base_path().join(relative_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_base_path_wins() {
        set_tables_base_path("/custom/tables/path");
        assert_eq!(
            get_tables_base_path(),
            PathBuf::from("/custom/tables/path")
        );
        assert_eq!(
            get_table_path("master/bufrtabb_14.csv"),
            PathBuf::from("/custom/tables/path/master/bufrtabb_14.csv")
        );
    }
}
