use std::path::{Path, PathBuf};

use configparser::ini::Ini;
use log::info;

const DEFAULT_CONFIG_PATH: &str = "/etc/devicectl/devicectl.conf";
const DEFAULT_DATASTORE_PATH: &str = "/var/lib/devicectl/state.db";
const DEFAULT_SEED_ROOT: &str = "/var/lib/snapd/seed";

/// Local daemon knobs read from an ini-style file, in the teacher's `AgentConfig` idiom:
/// a handful of path/tuning overrides with defaults, never a hard failure if the file is
/// absent.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DaemonConfig {
    datastore_path: PathBuf,
    seed_root: PathBuf,
    registration_retry_cap_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        DaemonConfig {
            datastore_path: DEFAULT_DATASTORE_PATH.into(),
            seed_root: DEFAULT_SEED_ROOT.into(),
            registration_retry_cap_secs: 3600,
        }
    }
}

impl DaemonConfig {
    /// Loads from the default configuration path, falling back to defaults for any
    /// section/key that's absent or for a wholly-missing file.
    pub fn load() -> Self {
        Self::load_from(Path::new(DEFAULT_CONFIG_PATH))
    }

    pub fn load_from(path: &Path) -> Self {
        let mut config = Self::default();

        let mut ini = Ini::new();
        match ini.load(path) {
            Ok(_) => {
                if let Some(path) = ini.get("daemon", "datastore-path") {
                    config.datastore_path = path.into();
                }
                if let Some(path) = ini.get("daemon", "seed-root") {
                    config.seed_root = path.into();
                }
                if let Some(secs) = ini.getuint("registration", "retry-cap-secs").ok().flatten() {
                    config.registration_retry_cap_secs = secs;
                }
            }
            Err(_) => {
                info!("daemon configuration file not found at {}, using defaults", path.display());
            }
        }

        config
    }

    pub fn datastore_path(&self) -> &Path {
        &self.datastore_path
    }

    pub fn seed_root(&self) -> &Path {
        &self.seed_root
    }

    pub fn registration_retry_cap_secs(&self) -> u64 {
        self.registration_retry_cap_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = DaemonConfig::load_from(Path::new("/nonexistent/devicectl.conf"));
        assert_eq!(config.datastore_path(), Path::new(DEFAULT_DATASTORE_PATH));
    }

    #[test]
    fn test_load_overrides_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devicectl.conf");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[daemon]\ndatastore-path = /custom/state.db\n\n[registration]\nretry-cap-secs = 120\n"
        )
        .unwrap();

        let config = DaemonConfig::load_from(&path);
        assert_eq!(config.datastore_path(), Path::new("/custom/state.db"));
        assert_eq!(config.registration_retry_cap_secs(), 120);
        assert_eq!(config.seed_root(), Path::new(DEFAULT_SEED_ROOT));
    }
}
