//! YAML config file I/O
//!
//! Loading never fails: a missing file means defaults, an unreadable or
//! invalid one is logged and replaced by defaults. Saving writes a sibling
//! temp file and renames it over the target.

use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            log::info!("[CONFIG] No config at {:?}, using defaults", path);
            return T::default();
        }
        Err(e) => {
            log::warn!("[CONFIG] Cannot read {:?}: {}, using defaults", path, e);
            return T::default();
        }
    };

    serde_yaml::from_str(&contents).unwrap_or_else(|e| {
        log::warn!("[CONFIG] Invalid config in {:?}: {}, using defaults", path, e);
        T::default()
    })
}

pub fn save_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize config")?;
    let staging = path.with_extension("yaml.tmp");
    std::fs::write(&staging, yaml)
        .with_context(|| format!("Failed to write {:?}", staging))?;
    std::fs::rename(&staging, path)
        .with_context(|| format!("Failed to replace {:?}", path))?;

    log::info!("[CONFIG] Saved {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    struct Sample {
        rate: u32,
        label: String,
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded: Sample = load_config(&dir.path().join("absent.yaml"));
        assert_eq!(loaded, Sample::default());
    }

    #[test]
    fn test_invalid_yaml_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        std::fs::write(&path, "rate: [not a number").unwrap();
        let loaded: Sample = load_config(&path);
        assert_eq!(loaded, Sample::default());
    }

    #[test]
    fn test_save_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/riffsync/config.yaml");
        let config = Sample {
            rate: 44100,
            label: "studio".into(),
        };
        save_config(&config, &path).unwrap();

        let loaded: Sample = load_config(&path);
        assert_eq!(loaded, config);
        assert!(!path.with_extension("yaml.tmp").exists());
    }
}
