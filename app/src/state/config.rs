//! Configuration loading and persistence.
//!
//! Handles the TOML config file (~/.config/matchsync/config.toml). CLI
//! overrides are applied on top of the cached copy and never written back.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

pub use matchsync::MatchsyncConfig;

// ---------------------------------------------------------------------------
// Persistence I/O
// ---------------------------------------------------------------------------

/// Returns `~/.config/matchsync/config.toml`.
pub fn default_config_path() -> PathBuf {
    let dir = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("matchsync");
    dir.join("config.toml")
}

/// Load persisted config from disk. If the file does not exist, creates it
/// with all-defaults and returns that.
pub fn load(path: &Path) -> MatchsyncConfig {
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str::<MatchsyncConfig>(&contents) {
            Ok(config) => {
                tracing::info!("loaded config from {}", path.display());
                config
            }
            Err(e) => {
                tracing::warn!("failed to parse {}: {e}", path.display());
                MatchsyncConfig::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let defaults = MatchsyncConfig::default();
            tracing::info!("no config file found, creating {}", path.display());
            save_to(path, &defaults);
            defaults
        }
        Err(e) => {
            tracing::warn!("failed to read {}: {e}", path.display());
            MatchsyncConfig::default()
        }
    }
}

/// Write config to a specific path. Creates parent dirs if needed. Never panics.
pub fn save_to(path: &Path, config: &MatchsyncConfig) {
    if let Some(dir) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(dir) {
            tracing::warn!("failed to create config dir {}: {e}", dir.display());
            return;
        }
    }
    match toml::to_string_pretty(config) {
        Ok(contents) => {
            if let Err(e) = std::fs::write(path, contents) {
                tracing::warn!("failed to write {}: {e}", path.display());
            }
        }
        Err(e) => {
            tracing::warn!("failed to serialize config: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// Cached config
// ---------------------------------------------------------------------------

/// Cached configuration backed by a TOML file.
///
/// Reads are cheap (RwLock read guard + clone).
pub struct SystemConfig {
    inner: RwLock<MatchsyncConfig>,
}

impl SystemConfig {
    /// Load config from disk (or create defaults) and cache it.
    pub fn new(path: PathBuf) -> Self {
        let config = load(&path);
        Self {
            inner: RwLock::new(config),
        }
    }

    /// Cache a config that is not backed by a file.
    pub fn in_memory(config: MatchsyncConfig) -> Self {
        Self {
            inner: RwLock::new(config),
        }
    }

    /// Clone the current cached config.
    pub fn snapshot(&self) -> MatchsyncConfig {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Mutate the cached copy only (CLI overrides).
    pub fn override_with(&self, f: impl FnOnce(&mut MatchsyncConfig)) {
        f(&mut self.inner.write().unwrap_or_else(|e| e.into_inner()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("matchsync-test-{}-{name}", uuid::Uuid::new_v4()))
            .join("config.toml")
    }

    #[test]
    fn missing_file_is_created_with_defaults() {
        let path = temp_path("missing");
        let config = load(&path);
        assert_eq!(config, MatchsyncConfig::default());
        assert!(path.exists());
        assert_eq!(load(&path), config);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let path = temp_path("partial");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            "[matching]\nauto_accept = true\n\n[mock_server]\nbind = \"0.0.0.0:9000\"\n",
        )
        .unwrap();

        let config = load(&path);
        assert!(config.matching.auto_accept);
        assert_eq!(config.matching.leave_queue_timeout_secs, 5);
        assert_eq!(config.server.url, "ws://127.0.0.1:3040");
        assert_eq!(config.mock_server.map(|m| m.bind).as_deref(), Some("0.0.0.0:9000"));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn unparseable_file_falls_back_to_defaults() {
        let path = temp_path("broken");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[server\nurl = ").unwrap();
        assert_eq!(load(&path), MatchsyncConfig::default());
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn overrides_are_not_persisted() {
        let path = temp_path("override");
        let system = SystemConfig::new(path.clone());
        system.override_with(|c| c.server.url = "ws://elsewhere:1".into());
        assert_eq!(system.snapshot().server.url, "ws://elsewhere:1");
        assert_eq!(load(&path).server.url, "ws://127.0.0.1:3040");
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
