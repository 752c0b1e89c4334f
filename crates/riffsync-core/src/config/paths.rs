//! Standard locations for riffsync files

use std::path::PathBuf;

const APP_DIR: &str = "riffsync";

/// `<config_dir>/riffsync`, falling back to `./.riffsync` when the platform
/// has no config directory
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from(".").join(format!(".{}", APP_DIR)))
}

/// `<config_dir>/riffsync/config.yaml`
pub fn default_config_path() -> PathBuf {
    config_dir().join("config.yaml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_layout() {
        let path = default_config_path();
        assert!(path.ends_with("config.yaml"));
        assert!(path
            .parent()
            .is_some_and(|p| p.to_string_lossy().contains("riffsync")));
    }
}
