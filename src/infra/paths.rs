// src/infra/paths.rs — Config location
//
// DRAFTLOOM_HOME overrides everything. Otherwise config lives in ~/.draftloom/.

use std::path::PathBuf;

fn draftloom_home() -> Option<PathBuf> {
    std::env::var_os("DRAFTLOOM_HOME").map(PathBuf::from)
}

/// Configuration directory: $DRAFTLOOM_HOME/ or ~/.draftloom/
pub fn config_dir() -> Option<PathBuf> {
    if let Some(home) = draftloom_home() {
        return Some(home);
    }
    directories::BaseDirs::new().map(|dirs| dirs.home_dir().join(".draftloom"))
}

/// Config file path, `None` when no home directory can be determined.
pub fn config_file_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_file_is_named_config_toml() {
        if let Some(path) = config_file_path() {
            assert_eq!(path.file_name().unwrap(), "config.toml");
        }
    }
}
