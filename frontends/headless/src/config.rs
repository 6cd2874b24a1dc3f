use anyhow::Result;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use sheetmirror::SyncConfig;
use sheetmirror_appscript::AppsScriptConfig;

/// Runner configuration, read from one YAML file.
///
/// ```yaml
/// appscript:
///   script_url: https://script.google.com/macros/s/.../exec
/// sync:
///   sync_interval_ms: 60000
/// snapshot_dir: ~/.cache/sheetmirror
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HeadlessConfig {
    pub sync: SyncConfig,
    pub appscript: AppsScriptConfig,
    /// Directory for collection snapshots; snapshots are disabled when unset
    pub snapshot_dir: Option<PathBuf>,
}

impl HeadlessConfig {
    /// Load configuration from a YAML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config file {}: {}", path.display(), e)
        })?;

        let config: HeadlessConfig = serde_yaml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse config YAML {}: {}", path.display(), e)
        })?;

        Ok(config)
    }

    /// Apply environment overrides, expand `~` and validate
    pub fn finish(mut self) -> Result<Self> {
        self.appscript = self.appscript.with_env_overrides();
        self.appscript.validate()?;
        self.sync.validate()?;
        if let Some(dir) = self.snapshot_dir.take() {
            self.snapshot_dir = Some(expand_home(dir));
        }
        Ok(self)
    }
}

fn expand_home(path: PathBuf) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_file_keeps_defaults() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(
            file,
            "appscript:\n  script_url: https://example.test/exec\nsync:\n  cooldown_ms: 5000"
        )?;

        let config = HeadlessConfig::load_from_file(file.path())?;

        assert_eq!(config.appscript.script_url, "https://example.test/exec");
        assert_eq!(config.sync.cooldown_ms, 5000);
        assert_eq!(config.sync.sync_interval_ms, SyncConfig::default().sync_interval_ms);
        assert!(config.snapshot_dir.is_none());
        Ok(())
    }

    #[test]
    fn unreadable_file_names_the_path() {
        let err = HeadlessConfig::load_from_file(Path::new("/nonexistent/sheetmirror.yaml"))
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/sheetmirror.yaml"));
    }

    #[test]
    fn home_prefix_is_expanded() {
        if let Some(home) = std::env::var_os("HOME") {
            assert_eq!(
                expand_home(PathBuf::from("~/cache")),
                PathBuf::from(home).join("cache")
            );
        }
        assert_eq!(expand_home(PathBuf::from("/tmp/x")), PathBuf::from("/tmp/x"));
    }
}
