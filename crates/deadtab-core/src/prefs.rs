use crate::config::Config;
use crate::keymap::KeyId;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Persisted user preference: the last key committed by capture or set-key.
/// Pre-populates the control surface; never authoritative for the monitor,
/// which receives its key explicitly with every arm command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Prefs {
    pub watched_key: Option<KeyId>,
}

impl Prefs {
    pub fn path() -> PathBuf {
        Config::config_dir().join("prefs.toml")
    }

    /// Load the preference file, treating a missing or unreadable file as
    /// "no preference yet".
    pub fn load() -> Self {
        Self::load_from(&Self::path()).unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading prefs from {}", path.display()))?;
        toml::from_str(&contents).with_context(|| "parsing prefs TOML")
    }

    pub fn store(&self) -> Result<()> {
        self.store_to(&Self::path())
    }

    pub fn store_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let contents = toml::to_string(self).context("serializing prefs")?;
        std::fs::write(path, contents)
            .with_context(|| format!("writing prefs to {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keymap::KEY_SPACE;

    fn temp_prefs_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("deadtab-prefs-test-{}-{}", std::process::id(), name))
    }

    #[test]
    fn store_then_load_round_trips() {
        let path = temp_prefs_path("roundtrip");
        let prefs = Prefs { watched_key: Some(KEY_SPACE) };
        prefs.store_to(&path).unwrap();
        let loaded = Prefs::load_from(&path).unwrap();
        assert_eq!(loaded, prefs);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_file_is_an_error_from_load_from() {
        let path = temp_prefs_path("missing");
        assert!(Prefs::load_from(&path).is_err());
    }

    #[test]
    fn default_has_no_key() {
        assert_eq!(Prefs::default().watched_key, None);
    }

    #[test]
    fn empty_toml_parses_to_no_key() {
        let prefs: Prefs = toml::from_str("").unwrap();
        assert_eq!(prefs.watched_key, None);
    }
}
